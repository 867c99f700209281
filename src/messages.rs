//! Role-tagged message log
//!
//! The workflow keeps one append-only log per request. Tool invocations
//! requested by the model and the results fed back to it live here too.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A named tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            args,
        }
    }
}

/// A single turn in the message log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
    /// Pending invocations (assistant turns only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Invocation this turn answers (tool turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name (tool turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Assistant turn carrying pending tool invocations
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content.into());
        msg.tool_calls = tool_calls;
        msg
    }

    /// Result turn for one tool invocation
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content.into());
        msg.tool_call_id = Some(call.id.clone());
        msg.name = Some(call.name.clone());
        msg
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// =============================
// Log helpers (ZERO ALLOCATION)
// =============================

/// Text of the most recent user turn
pub fn last_user_text(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

/// Iterate over user turns
pub fn user_turns(messages: &[Message]) -> impl Iterator<Item = &Message> {
    messages.iter().filter(|m| m.role == Role::User)
}

/// Iterate over tool-result turns
pub fn tool_results(messages: &[Message]) -> impl Iterator<Item = &Message> {
    messages.iter().filter(|m| m.role == Role::Tool)
}

/// Pending invocations carried by the last log entry
pub fn pending_tool_calls(messages: &[Message]) -> &[ToolCall] {
    messages
        .last()
        .map(|m| m.tool_calls.as_slice())
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_result_links_call() {
        let call = ToolCall::new("get_user_data", json!({"user_id": "U001"}));
        let result = Message::tool_result(&call, "{}");

        assert_eq!(result.role, Role::Tool);
        assert_eq!(result.tool_call_id.as_deref(), Some(call.id.as_str()));
        assert_eq!(result.name.as_deref(), Some("get_user_data"));
    }

    #[test]
    fn test_last_user_text() {
        let messages = vec![
            Message::user("first question"),
            Message::assistant("answer"),
            Message::user("follow up"),
        ];
        assert_eq!(last_user_text(&messages), "follow up");
        assert_eq!(last_user_text(&[]), "");
    }

    #[test]
    fn test_pending_tool_calls_only_from_last_entry() {
        let call = ToolCall::new("retriever_tool", json!({"query": "refund"}));
        let mut messages = vec![
            Message::user("refund please"),
            Message::assistant_with_tools("", vec![call.clone()]),
        ];
        assert_eq!(pending_tool_calls(&messages).len(), 1);

        messages.push(Message::tool_result(&call, "no documents"));
        assert!(pending_tool_calls(&messages).is_empty());
        assert_eq!(tool_results(&messages).count(), 1);
    }
}
