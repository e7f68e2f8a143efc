//! Contracts the core consumes from collaborators: the LLM runtime, the
//! session store, optional classifiers/summarizers, and tools. The core
//! never talks to a model or a database directly — everything arrives
//! through these seams.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use nx_domain::agent::AgentDefinition;
use nx_domain::message::{Message, ToolResultKind};
use nx_domain::session::SessionMetadata;
use nx_domain::stream::{BoxStream, Chunk};
use nx_domain::Result;

/// The chunk stream an agent runtime produces for one message.
pub type ChunkStream = BoxStream<'static, Chunk>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Live handle to one conversation. The metadata lock is the single point
/// of truth during a run; stores read it back out after the run completes.
pub struct SessionState {
    pub id: String,
    pub user_id: Option<String>,
    meta: RwLock<SessionMetadata>,
}

impl SessionState {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            user_id: None,
            meta: RwLock::new(SessionMetadata::default()),
        })
    }

    pub fn with_metadata(id: impl Into<String>, meta: SessionMetadata) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            user_id: None,
            meta: RwLock::new(meta),
        })
    }

    /// Snapshot the metadata.
    pub fn metadata(&self) -> SessionMetadata {
        self.meta.read().clone()
    }

    /// Mutate the metadata under the write lock.
    pub fn update_metadata<R>(&self, f: impl FnOnce(&mut SessionMetadata) -> R) -> R {
        f(&mut self.meta.write())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A per-agent LLM execution engine. Implementations are expected to use
/// interior mutability for the setters (they are called during agent
/// registration, before the runtime processes anything).
#[async_trait]
pub trait LlmRuntime: Send + Sync {
    /// Process one message, producing a stream of chunks. The stream ends
    /// when the agent's turn is complete.
    async fn process(&self, session: Arc<SessionState>, message: Message) -> Result<ChunkStream>;

    fn set_system_prompt(&self, prompt: &str);
    fn set_default_model(&self, model: &str);
    fn set_max_iterations(&self, max: u32);
    fn register_tool(&self, tool: Arc<dyn Tool>);
}

/// Builds an [`LlmRuntime`] for each registered agent definition.
pub trait RuntimeFactory: Send + Sync {
    fn create(&self, def: &AgentDefinition) -> Result<Arc<dyn LlmRuntime>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read access to persisted conversation history.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The most recent `max` messages of a session, oldest first.
    async fn history(&self, session_id: &str, max: usize) -> Result<Vec<Message>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Optional helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maps free text onto one of a set of candidate intents.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Returns `(intent, confidence)`.
    async fn classify(&self, text: &str, candidates: &[String]) -> Result<(String, f64)>;
}

/// Produces conversation summaries for handoff context.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message], max_len: usize) -> Result<String>;
}

/// Picks the next agent, overriding the router entirely when configured.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// `Ok(None)` defers to the orchestrator's normal selection chain.
    async fn select(
        &self,
        session: &SessionState,
        message: &Message,
        agents: &[AgentDefinition],
    ) -> Result<Option<String>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What a tool execution produced.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    pub kind: ToolResultKind,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            kind: ToolResultKind::Text,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            kind: ToolResultKind::Text,
        }
    }
}

/// A tool the model can invoke. Registered by name and dispatched by map
/// lookup, never through an inheritance hierarchy.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input.
    fn schema(&self) -> serde_json::Value;
    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput>;
}
