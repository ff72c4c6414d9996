//! Code-execution request/response shapes exchanged with sandbox sessions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request to run untrusted handler code inside a sandbox session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecuteCodeReq {
    pub handler_code: String,
    #[serde(default)]
    pub event: BTreeMap<String, Value>,
    #[serde(default, rename = "context")]
    pub execute_context: ExecuteContext,
}

/// Runtime context visible to the executed handler.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecuteContext {
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub function_version: String,
    #[serde(default)]
    pub remaining_time_in_millis: i64,
    #[serde(default)]
    pub memory_limit_in_mb: i64,
    #[serde(default)]
    pub log_group_name: String,
}

/// Result of one synchronous execution.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecuteCodeResp {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub metrics: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_request_round_trips_with_context_field_name() {
        let mut request = ExecuteCodeReq {
            handler_code: "def handler(event, context): return 1".to_string(),
            ..ExecuteCodeReq::default()
        };
        request
            .event
            .insert("input".to_string(), serde_json::json!("x"));
        request.execute_context.function_name = "fn".to_string();

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["context"]["function_name"], "fn");

        let decoded: ExecuteCodeReq = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.execute_context.function_name, "fn");
    }
}
