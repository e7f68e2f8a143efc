use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One completed tenure of an agent as the session's current agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHistoryEntry {
    pub agent_id: String,
    /// When the agent became current (previous transition, or the first
    /// observed message when this is the first transition).
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Typed per-session orchestration state. Read at message entry, rewritten
/// on every transition. Unknown keys written by other subsystems are
/// preserved through `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_agent_id: Option<String>,
    /// Append-only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agent_history: Vec<AgentHistoryEntry>,
    #[serde(default)]
    pub handoff_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_handoff_at: Option<DateTime<Utc>>,
    /// LIFO stack of source agent ids awaiting a return of control.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_handoff_stack: Vec<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl SessionMetadata {
    /// Deserialize from a stored JSON value, tolerating foreign keys.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Serialize for storage.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Current handoff depth.
    pub fn handoff_depth(&self) -> usize {
        self.active_handoff_stack.len()
    }

    /// Record a completed handoff: appends history, rolls the current agent,
    /// bumps the counter, and (when a return is expected) pushes the source
    /// onto the stack.
    pub fn record_handoff(
        &mut self,
        from: &str,
        to: &str,
        reason: &str,
        return_expected: bool,
        session_started_at: DateTime<Utc>,
    ) {
        let now = Utc::now();
        self.agent_history.push(AgentHistoryEntry {
            agent_id: from.to_string(),
            started_at: self.last_handoff_at.unwrap_or(session_started_at),
            ended_at: Some(now),
            handoff_to: Some(to.to_string()),
            handoff_reason: Some(reason.to_string()),
        });
        if return_expected {
            self.active_handoff_stack.push(from.to_string());
        }
        self.current_agent_id = Some(to.to_string());
        self.handoff_count += 1;
        self.last_handoff_at = Some(now);
    }

    /// Pop the agent awaiting a return of control, if any.
    pub fn pop_return(&mut self) -> Option<String> {
        self.active_handoff_stack.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_empty() {
        let meta = SessionMetadata::default();
        assert!(meta.current_agent_id.is_none());
        assert_eq!(meta.handoff_depth(), 0);
        assert_eq!(meta.handoff_count, 0);
    }

    #[test]
    fn record_handoff_updates_all_fields() {
        let mut meta = SessionMetadata::default();
        let t0 = Utc::now();
        meta.record_handoff("code-agent", "review-agent", "needs review", true, t0);

        assert_eq!(meta.current_agent_id.as_deref(), Some("review-agent"));
        assert_eq!(meta.handoff_count, 1);
        assert_eq!(meta.active_handoff_stack, vec!["code-agent"]);
        assert!(meta.last_handoff_at.is_some());

        let entry = &meta.agent_history[0];
        assert_eq!(entry.agent_id, "code-agent");
        assert_eq!(entry.handoff_to.as_deref(), Some("review-agent"));
        // First transition anchors to the session start, never the zero time.
        assert_eq!(entry.started_at, t0);
    }

    #[test]
    fn second_handoff_starts_where_first_ended() {
        let mut meta = SessionMetadata::default();
        let t0 = Utc::now();
        meta.record_handoff("a", "b", "r1", false, t0);
        let first_handoff_at = meta.last_handoff_at.unwrap();
        meta.record_handoff("b", "c", "r2", false, t0);

        assert_eq!(meta.agent_history[1].started_at, first_handoff_at);
        assert_eq!(meta.handoff_count, 2);
        // No returns expected: stack stays empty.
        assert!(meta.active_handoff_stack.is_empty());
    }

    #[test]
    fn stack_is_lifo() {
        let mut meta = SessionMetadata::default();
        let t0 = Utc::now();
        meta.record_handoff("a", "b", "r", true, t0);
        meta.record_handoff("b", "c", "r", true, t0);

        assert_eq!(meta.pop_return().as_deref(), Some("b"));
        assert_eq!(meta.pop_return().as_deref(), Some("a"));
        assert!(meta.pop_return().is_none());
    }

    #[test]
    fn roundtrip_preserves_foreign_keys() {
        let stored = serde_json::json!({
            "current_agent_id": "helper",
            "handoff_count": 3,
            "channel_thread_ts": "1712.345",
            "locale": "en-GB",
        });
        let meta = SessionMetadata::from_value(&stored).unwrap();
        assert_eq!(meta.current_agent_id.as_deref(), Some("helper"));
        assert_eq!(meta.handoff_count, 3);

        let back = meta.to_value().unwrap();
        assert_eq!(back["channel_thread_ts"], "1712.345");
        assert_eq!(back["locale"], "en-GB");
    }
}
