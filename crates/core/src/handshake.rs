//! Worker handshake: the fixed JSON contract between the supervisor and an agent.
//!
//! Request: `{request_id, agent_name, intent, input: {text, metadata}, context: {user_id, conversation_id?, timestamp}}`
//!
//! Response: `{request_id, agent_name, status, output, error}` where exactly one of
//! `output` / `error` is non-null and `status` agrees with it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerInput {
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl WorkerInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestContext {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// RFC 3339 timestamp of the inbound query.
    pub timestamp: String,
}

impl RequestContext {
    pub fn new(user_id: Option<&str>, conversation_id: Option<String>) -> Self {
        Self {
            user_id: user_id
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("anonymous")
                .to_string(),
            conversation_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRequest {
    pub request_id: String,
    pub agent_name: String,
    pub intent: String,
    pub input: WorkerInput,
    pub context: RequestContext,
}

impl WorkerRequest {
    /// Build a request with a freshly generated `request_id`.
    pub fn new(agent_name: &str, intent: &str, input: WorkerInput, context: RequestContext) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            agent_name: agent_name.to_string(),
            intent: intent.to_string(),
            input,
            context,
        }
    }
}

/// Failure category carried in `error.type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    HttpStatus,
    ConnectionError,
    TransportError,
    BadResponse,
    Timeout,
    DependencyFailed,
    Cancelled,
    LocalHandlerError,
    ConfigError,
    /// Any type string reported by the agent itself.
    Other(String),
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::HttpStatus => "http_status",
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::BadResponse => "bad_response",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DependencyFailed => "dependency_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::LocalHandlerError => "local_handler_error",
            ErrorKind::ConfigError => "config_error",
            ErrorKind::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "http_status" => ErrorKind::HttpStatus,
            "connection_error" => ErrorKind::ConnectionError,
            "transport_error" => ErrorKind::TransportError,
            "bad_response" => ErrorKind::BadResponse,
            "timeout" => ErrorKind::Timeout,
            "dependency_failed" => ErrorKind::DependencyFailed,
            "cancelled" => ErrorKind::Cancelled,
            "local_handler_error" => ErrorKind::LocalHandlerError,
            "config_error" => ErrorKind::ConfigError,
            other => ErrorKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ErrorKind::parse(&s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerOutput {
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl WorkerOutput {
    pub fn new(result: Value) -> Self {
        Self {
            result,
            confidence: None,
            details: None,
        }
    }

    /// The output as one JSON object, used for `step:<id>.output.<field>` lookups.
    pub fn as_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("result".to_string(), self.result.clone());
        if let Some(c) = self.confidence {
            map.insert("confidence".to_string(), Value::from(c));
        }
        if let Some(d) = &self.details {
            map.insert("details".to_string(), d.clone());
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
}

impl WorkerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(WorkerOutput),
    Error(WorkerError),
}

/// An agent's reply. The success/error split is a sum type, so a response
/// with both or neither of `output`/`error` cannot be represented; such wire
/// payloads are rejected during deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireResponse", into = "WireResponse")]
pub struct WorkerResponse {
    pub request_id: String,
    pub agent_name: String,
    pub outcome: Outcome,
}

impl WorkerResponse {
    pub fn success(request_id: &str, agent_name: &str, output: WorkerOutput) -> Self {
        Self {
            request_id: request_id.to_string(),
            agent_name: agent_name.to_string(),
            outcome: Outcome::Success(output),
        }
    }

    pub fn failure(
        request_id: &str,
        agent_name: &str,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            agent_name: agent_name.to_string(),
            outcome: Outcome::Error(WorkerError::new(kind, message)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    /// `"success"` or `"error"`, as on the wire.
    pub fn status(&self) -> &'static str {
        match self.outcome {
            Outcome::Success(_) => "success",
            Outcome::Error(_) => "error",
        }
    }

    pub fn output(&self) -> Option<&WorkerOutput> {
        match &self.outcome {
            Outcome::Success(o) => Some(o),
            Outcome::Error(_) => None,
        }
    }

    pub fn output_mut(&mut self) -> Option<&mut WorkerOutput> {
        match &mut self.outcome {
            Outcome::Success(o) => Some(o),
            Outcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&WorkerError> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Error(e) => Some(e),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireResponse {
    #[serde(default)]
    request_id: String,
    #[serde(default)]
    agent_name: String,
    status: String,
    #[serde(default)]
    output: Option<WorkerOutput>,
    #[serde(default)]
    error: Option<WorkerError>,
}

impl TryFrom<WireResponse> for WorkerResponse {
    type Error = String;

    fn try_from(wire: WireResponse) -> std::result::Result<Self, Self::Error> {
        let outcome = match (wire.status.as_str(), wire.output, wire.error) {
            ("success", Some(output), None) => Outcome::Success(output),
            ("error", None, Some(error)) => Outcome::Error(error),
            ("success", _, _) => {
                return Err("status 'success' requires a non-null output and a null error".to_string())
            }
            ("error", _, _) => {
                return Err("status 'error' requires a non-null error and a null output".to_string())
            }
            (other, _, _) => return Err(format!("unknown status '{}'", other)),
        };
        Ok(WorkerResponse {
            request_id: wire.request_id,
            agent_name: wire.agent_name,
            outcome,
        })
    }
}

impl From<WorkerResponse> for WireResponse {
    fn from(resp: WorkerResponse) -> Self {
        let status = resp.status().to_string();
        let (output, error) = match resp.outcome {
            Outcome::Success(o) => (Some(o), None),
            Outcome::Error(e) => (None, Some(e)),
        };
        WireResponse {
            request_id: resp.request_id,
            agent_name: resp.agent_name,
            status,
            output,
            error,
        }
    }
}
