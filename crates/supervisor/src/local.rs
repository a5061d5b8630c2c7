//! Built-in handlers for `kind = "local"` agents.

use serde_json::{json, Value};
use switchboard_core::{WorkerInput, WorkerOutput};

/// The closed set of in-process handlers. Adding one is a code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalHandler {
    /// Returns the input text unchanged.
    Echo,
    /// Current UTC time as RFC 3339.
    Clock,
    /// Word, line and character counts of the input text.
    WordCount,
}

impl LocalHandler {
    pub const ALL: [LocalHandler; 3] = [LocalHandler::Echo, LocalHandler::Clock, LocalHandler::WordCount];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "echo" => Some(LocalHandler::Echo),
            "clock" => Some(LocalHandler::Clock),
            "word_count" => Some(LocalHandler::WordCount),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LocalHandler::Echo => "echo",
            LocalHandler::Clock => "clock",
            LocalHandler::WordCount => "word_count",
        }
    }

    pub fn run(&self, input: &WorkerInput) -> Result<WorkerOutput, String> {
        match self {
            LocalHandler::Echo => Ok(WorkerOutput::new(Value::String(input.text.clone()))),
            LocalHandler::Clock => {
                let now = chrono::Utc::now();
                let mut output = WorkerOutput::new(Value::String(now.to_rfc3339()));
                output.details = Some(json!({ "unix": now.timestamp() }));
                Ok(output)
            }
            LocalHandler::WordCount => {
                let text = input.text.as_str();
                let words = text.split_whitespace().count();
                let mut output = WorkerOutput::new(json!(words));
                output.details = Some(json!({
                    "lines": text.lines().count(),
                    "chars": text.chars().count(),
                }));
                Ok(output)
            }
        }
    }
}

impl std::fmt::Display for LocalHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
