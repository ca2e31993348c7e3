//! Outbound result delivery to the orchestrator.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::error;

use crate::executions::{Execution, ExecutionResult};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts the final result to the execution's callback URL. Delivery is a
/// single best-effort attempt; failures are logged, never retried.
#[derive(Clone)]
pub struct CallbackEmitter {
    client: reqwest::Client,
}

impl CallbackEmitter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// The callback body for a resolved execution.
    pub fn payload(exec: &Execution, result: &ExecutionResult) -> Value {
        json!({
            "correlation_id": exec.request.correlation_id,
            "status": result.status.as_str(),
            "result": result.output,
            "tool": exec.request.tool.name,
        })
    }

    pub async fn emit(&self, exec: &Execution, result: &ExecutionResult) {
        let url = exec.request.callback.url.trim();
        if url.is_empty() {
            return;
        }
        let payload = Self::payload(exec, result);
        let outcome = self
            .client
            .post(url)
            .timeout(CALLBACK_TIMEOUT)
            .json(&payload)
            .send()
            .await;
        if let Err(err) = outcome {
            error!(
                correlation_id = %exec.request.correlation_id,
                error = %err,
                "callback delivery failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executions::{Request, Status, Tool};
    use chrono::Utc;
    use serde_json::json;

    fn execution() -> Execution {
        Execution {
            request: Request {
                correlation_id: "r1".to_string(),
                tool: Tool {
                    name: "t".to_string(),
                    ..Tool::default()
                },
                question: "Question??".to_string(),
                ..Request::default()
            },
            created_at: Utc::now(),
            message_id: 9,
            message_text: String::new(),
            awaiting_text: false,
        }
    }

    #[test]
    fn test_payload_for_button_selection() {
        let result = ExecutionResult::new(
            Status::Success,
            json!({
                "question": "Question??",
                "selected_option": "B",
                "selected_index": 1,
                "custom": false,
                "input_mode": "button",
            }),
        );
        assert_eq!(
            CallbackEmitter::payload(&execution(), &result),
            json!({
                "correlation_id": "r1",
                "status": "success",
                "result": {
                    "question": "Question??",
                    "selected_option": "B",
                    "selected_index": 1,
                    "custom": false,
                    "input_mode": "button",
                },
                "tool": "t",
            })
        );
    }

    #[test]
    fn test_payload_for_timeout() {
        let result = ExecutionResult::new(Status::Error, json!("execution timeout"));
        assert_eq!(
            CallbackEmitter::payload(&execution(), &result),
            json!({
                "correlation_id": "r1",
                "status": "error",
                "result": "execution timeout",
                "tool": "t",
            })
        );
    }
}
