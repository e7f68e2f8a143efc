use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::message::{ToolCall, ToolResult};

/// A boxed async stream, used for agent runtime responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events produced while an agent processes a message.
///
/// The orchestrator forwards these in received order; `ToolResult` chunks
/// carrying a handoff kind are intercepted and never reach the caller raw.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Chunk {
    /// Incremental assistant text.
    Text { text: String },

    /// The agent is invoking a tool.
    ToolCall { call: ToolCall },

    /// A tool finished.
    ToolResult { result: ToolResult },

    /// A non-fatal error surfaced to the caller. The conversation survives.
    Error { message: String },
}

impl Chunk {
    pub fn text(text: impl Into<String>) -> Self {
        Chunk::Text { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Chunk::Error {
            message: message.into(),
        }
    }
}
