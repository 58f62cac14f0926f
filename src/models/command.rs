//! Command payloads for `POST /devices/{id}/commands`

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAIN_COMPONENT: &str = "main";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub component: String,
    pub capability: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Value>,
}

impl Command {
    /// Command against the `main` component.
    pub fn main(capability: &str, command: &str, arguments: Vec<Value>) -> Self {
        Self {
            component: MAIN_COMPONENT.to_string(),
            capability: capability.to_string(),
            command: command.to_string(),
            arguments,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CommandRequest<'a> {
    pub commands: &'a [Command],
}

/// Whole numbers go out as JSON integers (`25`, not `25.0`).
pub fn number_argument(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}
