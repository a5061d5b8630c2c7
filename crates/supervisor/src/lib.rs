pub mod executor;
pub mod health;
pub mod intent;
pub mod invoker;
pub mod local;
pub mod plan;
pub mod planner;
pub mod registry;
pub mod response;
pub mod supervisor;
pub mod synthesizer;
pub mod tasks;

pub use executor::{value_text, PlanExecutor, StepResult, StepState};
pub use health::{AgentHealth, HealthChecker};
pub use intent::{ShortCircuit, ShortCircuitClassifier};
pub use invoker::{AgentInvoker, Invoker};
pub use local::LocalHandler;
pub use plan::{InputSource, Plan, PlanValidationError, Step, StepRef};
pub use planner::{PlanOutcome, PlanSource, Planner};
pub use registry::{AgentDescriptor, AgentRegistry, Connection};
pub use response::{SupervisorResponse, TopLevelError, UsedAgent};
pub use supervisor::{QueryOptions, QueryRequest, Supervisor, SupervisorError};
pub use synthesizer::Synthesizer;
pub use tasks::{HttpTaskLookup, TaskNameLookup};
