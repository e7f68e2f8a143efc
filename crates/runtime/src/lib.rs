//! The Nexus orchestration runtime — routes messages through a population
//! of LLM-backed agents, transfers control between them under declarative
//! handoff rules, shares context across handoffs, and tracks independently
//! scheduled subagent runs.
//!
//! Entry point: build an [`Orchestrator`] with a [`RuntimeFactory`] and a
//! [`SessionStore`], register agents, then call [`Orchestrator::process`]
//! per incoming message and read the returned chunk channel.

pub mod cancel;
pub mod capabilities;
pub mod context;
pub mod events;
pub mod handoff_tools;
pub mod orchestrator;
pub mod router;
pub mod subagents;

pub use capabilities::{
    ChunkStream, IntentClassifier, LlmRuntime, RuntimeFactory, SessionState, SessionStore,
    Summarizer, Supervisor, Tool, ToolOutput,
};
pub use cancel::{CancelRegistry, CancelToken};
pub use context::ContextManager;
pub use events::{EventCallback, OrchestratorEvent};
pub use orchestrator::{AgentDirectory, Orchestrator, SpawnParams};
pub use router::{MatchBand, RouteMatch, Router};
pub use subagents::{
    CleanupPolicy, RegisterParams, RunOutcome, RunStatus, SubagentRegistry, SubagentRun,
};
