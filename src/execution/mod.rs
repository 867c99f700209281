//! Tool-execution stage
//!
//! Runs every pending invocation on the last message-log entry and
//! answers each with exactly one tool-result turn. Missing tools and
//! failures become error text; nothing here aborts the workflow.

use crate::error::{with_timeout, OrchestrationError};
use crate::messages::{pending_tool_calls, Message, ToolCall};
use crate::tools::ToolRegistry;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Result turns for the invocations pending on the last log entry
    pub async fn execute_pending(&self, messages: &[Message]) -> Vec<Message> {
        let calls = pending_tool_calls(messages);
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            results.push(self.execute_call(call).await);
        }

        info!(invocations = results.len(), "Tool execution completed");
        results
    }

    async fn execute_call(&self, call: &ToolCall) -> Message {
        let Some(tool) = self.registry.get(&call.name) else {
            warn!(tool_name = %call.name, "Tool not registered");
            return Message::tool_result(
                call,
                OrchestrationError::ToolNotFound(call.name.clone()).to_string(),
            );
        };

        let start = Instant::now();
        let outcome = with_timeout(self.timeout, &call.name, tool.execute(&call.args)).await;
        let execution_time_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                debug!(tool_name = %call.name, execution_time_ms, "Tool succeeded");
                Message::tool_result(call, render(output))
            }
            Err(e) => {
                warn!(tool_name = %call.name, execution_time_ms, error = %e, "Tool execution failed");
                Message::tool_result(call, format!("Tool execution failed: {}", e))
            }
        }
    }
}

/// Strings pass through; structured output is rendered as JSON
fn render(output: Value) -> String {
    match output {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Role;
    use crate::tools::Tool;
    use crate::Result;
    use serde_json::json;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "Echo the arguments"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: &Value) -> Result<Value> {
            Ok(args.clone())
        }
    }

    struct BrokenTool;

    #[async_trait::async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn description(&self) -> &'static str {
            "Always fails"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: &Value) -> Result<Value> {
            Err(OrchestrationError::ToolError("backend down".into()))
        }
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn description(&self) -> &'static str {
            "Never finishes in time"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: &Value) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(BrokenTool));
        registry.register(Arc::new(SlowTool));
        ToolExecutor::new(Arc::new(registry), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_one_result_per_invocation() {
        let calls = vec![
            ToolCall::new("echo", json!({"user_id": "U001"})),
            ToolCall::new("missing", json!({})),
            ToolCall::new("broken", json!({})),
            ToolCall::new("slow", json!({})),
        ];
        let messages = vec![
            Message::user("refund"),
            Message::assistant_with_tools("", calls.clone()),
        ];

        let results = executor().execute_pending(&messages).await;

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|m| m.role == Role::Tool));
        for (call, result) in calls.iter().zip(&results) {
            assert_eq!(result.tool_call_id.as_deref(), Some(call.id.as_str()));
        }
        assert_eq!(results[0].content, r#"{"user_id":"U001"}"#);
        assert_eq!(results[1].content, "Tool missing not found in available tools");
        assert!(results[2].content.starts_with("Tool execution failed:"));
        assert!(results[3].content.contains("Timed out"));
    }

    #[tokio::test]
    async fn test_nothing_pending() {
        let messages = vec![Message::user("hello"), Message::assistant("hi")];
        assert!(executor().execute_pending(&messages).await.is_empty());
    }
}
