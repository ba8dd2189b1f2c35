use crate::errors::ToolError;
use serde::Deserialize;
use serde_json::Value;

/// One request line: `{"tool": ..., "args": {...}, "id": ...}`.
#[derive(Debug, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    pub id: Value,
}

pub fn parse_request(line: &str) -> Result<ToolRequest, ToolError> {
    serde_json::from_str(line)
        .map_err(|err| ToolError::config(format!("Invalid request line: {}", err)))
}

pub fn success_response(id: &Value, result: Value) -> Value {
    serde_json::json!({
        "id": id,
        "ok": true,
        "result": result,
    })
}

pub fn error_response(id: &Value, error: &ToolError) -> Value {
    serde_json::json!({
        "id": id,
        "ok": false,
        "error": error.to_envelope(),
    })
}
