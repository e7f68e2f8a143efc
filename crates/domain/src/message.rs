use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::handoff::{HandoffRequest, ReturnReport};

/// A message in a conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// The outcome of a tool invocation.
///
/// `kind` is a structured discriminator: control-flow results (handoffs,
/// returns) are tagged explicitly instead of being sniffed out of the
/// content string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub kind: ToolResultKind,
}

/// Discriminates plain tool output from control-flow results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolResultKind {
    /// Ordinary output; `content` is the whole result.
    #[default]
    Text,
    /// The tool requested a transfer of control to another agent.
    Handoff { request: HandoffRequest },
    /// The tool requested a return to the previous agent on the stack.
    Return { report: ReturnReport },
}

impl ToolResultKind {
    pub fn is_handoff(&self) -> bool {
        matches!(self, ToolResultKind::Handoff { .. })
    }

    pub fn is_return(&self) -> bool {
        matches!(self, ToolResultKind::Return { .. })
    }
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    fn with_role(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            session_id: String::new(),
            role,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, text)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Names of all tools invoked in this message.
    pub fn tool_call_names(&self) -> impl Iterator<Item = &str> {
        self.tool_calls.iter().map(|tc| tc.tool_name.as_str())
    }

    /// Whether any tool result in this message is an error.
    pub fn has_tool_error(&self) -> bool {
        self.tool_results.iter().any(|tr| tr.is_error)
    }
}
