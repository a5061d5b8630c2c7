pub mod config;
pub mod error;
pub mod handshake;
pub mod paths;
pub mod types;

pub use config::{AgentConfig, AgentKind, Config, FollowUpRule};
pub use error::{Error, Result};
pub use handshake::{
    ErrorKind, Outcome, RequestContext, WorkerError, WorkerInput, WorkerOutput, WorkerRequest,
    WorkerResponse,
};
pub use paths::Paths;
