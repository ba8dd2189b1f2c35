use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToolErrorKind {
    ConfigError,
    AuthFailure,
    ConnectError,
    ExecutionError,
    SafetyBlocked,
    TransferError,
    TimedOut,
    Cancelled,
    PoolShuttingDown,
    SessionNotFound,
    SessionBusy,
}

impl ToolErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorKind::ConfigError => "ConfigError",
            ToolErrorKind::AuthFailure => "AuthFailure",
            ToolErrorKind::ConnectError => "ConnectError",
            ToolErrorKind::ExecutionError => "ExecutionError",
            ToolErrorKind::SafetyBlocked => "SafetyBlocked",
            ToolErrorKind::TransferError => "TransferError",
            ToolErrorKind::TimedOut => "TimedOut",
            ToolErrorKind::Cancelled => "Cancelled",
            ToolErrorKind::PoolShuttingDown => "PoolShuttingDown",
            ToolErrorKind::SessionNotFound => "SessionNotFound",
            ToolErrorKind::SessionBusy => "SessionBusy",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            host: None,
            details: None,
            retryable: matches!(kind, ToolErrorKind::ConnectError | ToolErrorKind::TimedOut),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ConfigError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::AuthFailure, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ConnectError, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ExecutionError, message)
    }

    pub fn safety_blocked(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::SafetyBlocked, message)
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::TransferError, message)
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::TimedOut, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Cancelled, message)
    }

    pub fn pool_shutting_down(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::PoolShuttingDown, message)
    }

    pub fn session_not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::SessionNotFound, message)
    }

    pub fn session_busy(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::SessionBusy, message)
    }

    /// Structured form crossing the stdio boundary.
    pub fn to_envelope(&self) -> Value {
        let mut out = serde_json::Map::new();
        out.insert(
            "kind".to_string(),
            Value::String(self.kind.as_str().to_string()),
        );
        out.insert("message".to_string(), Value::String(self.message.clone()));
        if let Some(host) = &self.host {
            out.insert("host".to_string(), Value::String(host.clone()));
        }
        if let Some(details) = &self.details {
            out.insert("details".to_string(), details.clone());
        }
        out.insert("retryable".to_string(), Value::Bool(self.retryable));
        Value::Object(out)
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl Error for ToolError {}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::execution(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_kind_and_host() {
        let err = ToolError::connect("dial failed").with_host("db1");
        let env = err.to_envelope();
        assert_eq!(env.get("kind").and_then(|v| v.as_str()), Some("ConnectError"));
        assert_eq!(env.get("host").and_then(|v| v.as_str()), Some("db1"));
        assert_eq!(env.get("retryable").and_then(|v| v.as_bool()), Some(true));
    }

    #[test]
    fn only_connect_and_timeout_are_retryable() {
        assert!(ToolError::connect("x").retryable);
        assert!(ToolError::timed_out("x").retryable);
        assert!(!ToolError::auth("x").retryable);
        assert!(!ToolError::safety_blocked("x").retryable);
        assert!(!ToolError::execution("x").retryable);
        assert!(!ToolError::session_busy("x").retryable);
    }
}
