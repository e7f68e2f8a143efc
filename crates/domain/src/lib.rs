//! Shared data model for the Nexus orchestration core: agent definitions,
//! handoff rules and triggers, messages and stream chunks, session metadata,
//! tool-access policy data, configuration, and the common error type.

pub mod agent;
pub mod config;
pub mod error;
pub mod handoff;
pub mod message;
pub mod policy;
pub mod session;
pub mod stream;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Top-level configuration for the orchestration core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: config::OrchestratorConfig,
    #[serde(default)]
    pub context: config::ContextConfig,
    #[serde(default)]
    pub approval: config::ApprovalConfig,
    #[serde(default)]
    pub subagents: config::SubagentConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_config_parses_empty_toml() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.orchestrator.max_handoff_depth, 5);
        assert_eq!(cfg.context.max_messages, 50);
        assert_eq!(cfg.approval.approval_timeout_secs, 300);
        assert_eq!(cfg.subagents.sweep_interval_secs, 60);
    }
}
