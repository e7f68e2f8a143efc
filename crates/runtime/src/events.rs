//! Orchestrator lifecycle events, delivered through an optional callback
//! and mirrored to structured logs.

use std::sync::Arc;

use serde::Serialize;

use nx_domain::handoff::ContextMode;

/// Lifecycle events emitted while processing a message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    AgentSelected {
        session_id: String,
        agent_id: String,
        /// How the agent was chosen (supervisor, router, sticky, default).
        via: String,
    },
    HandoffInitiated {
        session_id: String,
        from: String,
        to: String,
        reason: String,
    },
    HandoffCompleted {
        session_id: String,
        from: String,
        to: String,
    },
    HandoffFailed {
        session_id: String,
        from: String,
        to: String,
        reason: String,
    },
    ContextShared {
        session_id: String,
        from: String,
        to: String,
        mode: ContextMode,
        message_count: usize,
    },
    AgentError {
        session_id: String,
        agent_id: String,
        error: String,
    },
}

pub type EventCallback = Arc<dyn Fn(OrchestratorEvent) + Send + Sync>;

impl OrchestratorEvent {
    /// Mirror the event to the log stream.
    pub fn trace(&self) {
        match self {
            OrchestratorEvent::AgentSelected {
                session_id,
                agent_id,
                via,
            } => tracing::debug!(%session_id, %agent_id, %via, "agent selected"),
            OrchestratorEvent::HandoffInitiated {
                session_id,
                from,
                to,
                reason,
            } => tracing::info!(%session_id, %from, %to, %reason, "handoff initiated"),
            OrchestratorEvent::HandoffCompleted { session_id, from, to } => {
                tracing::info!(%session_id, %from, %to, "handoff completed")
            }
            OrchestratorEvent::HandoffFailed {
                session_id,
                from,
                to,
                reason,
            } => tracing::warn!(%session_id, %from, %to, %reason, "handoff failed"),
            OrchestratorEvent::ContextShared {
                session_id,
                from,
                to,
                mode,
                message_count,
            } => tracing::debug!(
                %session_id,
                %from,
                %to,
                ?mode,
                message_count,
                "context shared"
            ),
            OrchestratorEvent::AgentError {
                session_id,
                agent_id,
                error,
            } => tracing::warn!(%session_id, %agent_id, %error, "agent error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let event = OrchestratorEvent::HandoffInitiated {
            session_id: "s1".into(),
            from: "a".into(),
            to: "b".into(),
            reason: "r".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "handoff_initiated");
        assert_eq!(json["from"], "a");
    }
}
