use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::message::Role;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context sharing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How much conversation state crosses a handoff boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// Recent history verbatim (bounded by the context manager's window).
    #[default]
    Full,
    /// A generated (or deterministic fallback) summary instead of messages.
    Summary,
    /// History filtered to an include-roles set.
    Filtered,
    /// Only the last N messages.
    LastN,
    /// No messages; just the task/reason.
    None,
}

/// One history message as seen by a handoff target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The conversation state passed to a target agent on handoff.
///
/// Immutable once attached to a [`HandoffRequest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ContextMessage>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub task: String,
    /// Agents that already touched this conversation, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_agents: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SharedContext {
    /// Append an agent to `previous_agents`, preserving order and uniqueness.
    pub fn record_agent(&mut self, agent_id: &str) {
        if !self.previous_agents.iter().any(|a| a == agent_id) {
            self.previous_agents.push(agent_id.to_string());
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handoff request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A request to transfer control between agents. Constructed by the handoff
/// tool, consumed exactly once by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub from_agent: String,
    pub to_agent: String,
    pub reason: String,
    #[serde(default)]
    pub context: SharedContext,
    #[serde(default)]
    pub return_expected: bool,
    pub requested_at: DateTime<Utc>,
}

impl HandoffRequest {
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            reason: reason.into(),
            context: SharedContext::default(),
            return_expected: false,
            requested_at: Utc::now(),
        }
    }

    /// Strict parser for handoff results delivered as plain text by runtimes
    /// that cannot carry the structured result kind. Accepts only a JSON
    /// object with a `handoff_request` field that deserializes cleanly.
    pub fn parse_result(content: &str) -> Option<HandoffRequest> {
        let trimmed = content.trim_start();
        if !trimmed.starts_with('{') {
            return None;
        }
        let envelope: HandoffEnvelope = serde_json::from_str(trimmed).ok()?;
        Some(envelope.handoff_request)
    }
}

/// The wire shape of the handoff tool's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffEnvelope {
    pub handoff_request: HandoffRequest,
    pub target_agent: String,
    #[serde(default)]
    pub target_name: String,
    pub status: String,
}

impl HandoffEnvelope {
    pub fn initiated(request: HandoffRequest, target_name: impl Into<String>) -> Self {
        Self {
            target_agent: request.to_agent.clone(),
            target_name: target_name.into(),
            status: "initiated".into(),
            handoff_request: request,
        }
    }
}

/// Payload of the `return_control` tool: the finishing agent's report to
/// whoever is on top of the handoff stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnReport {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default = "d_true")]
    pub success: bool,
}

fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_result_rejects_non_json() {
        assert!(HandoffRequest::parse_result("plain text").is_none());
        assert!(HandoffRequest::parse_result("").is_none());
    }

    #[test]
    fn parse_result_rejects_json_without_envelope() {
        // JSON, but not a handoff envelope — the permissive first-byte check
        // alone would have misfired here.
        assert!(HandoffRequest::parse_result(r#"{"rows": [1, 2, 3]}"#).is_none());
    }

    #[test]
    fn parse_result_accepts_envelope() {
        let envelope = HandoffEnvelope::initiated(
            HandoffRequest::new("code-agent", "review-agent", "needs review"),
            "Review Agent",
        );
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed = HandoffRequest::parse_result(&json).unwrap();
        assert_eq!(parsed.from_agent, "code-agent");
        assert_eq!(parsed.to_agent, "review-agent");
    }

    #[test]
    fn envelope_status_is_initiated() {
        let envelope =
            HandoffEnvelope::initiated(HandoffRequest::new("a", "b", "r"), "B");
        assert_eq!(envelope.status, "initiated");
        assert_eq!(envelope.target_agent, "b");
    }

    #[test]
    fn record_agent_dedupes() {
        let mut ctx = SharedContext::default();
        ctx.record_agent("a");
        ctx.record_agent("b");
        ctx.record_agent("a");
        assert_eq!(ctx.previous_agents, vec!["a", "b"]);
    }

    #[test]
    fn context_mode_serde_names() {
        assert_eq!(
            serde_json::to_string(&ContextMode::LastN).unwrap(),
            r#""last_n""#
        );
        assert_eq!(
            serde_json::to_string(&ContextMode::None).unwrap(),
            r#""none""#
        );
        let m: ContextMode = serde_json::from_str(r#""summary""#).unwrap();
        assert_eq!(m, ContextMode::Summary);
    }

    #[test]
    fn return_report_success_defaults_true() {
        let report: ReturnReport = serde_json::from_str(r#"{"summary": "done"}"#).unwrap();
        assert!(report.success);
    }
}
