use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::agent::HandoffRule;
use crate::handoff::ContextMode;
use crate::policy::{RiskLevel, TrustLevel};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Agent selected when the router and session state have no opinion.
    #[serde(default)]
    pub default_agent_id: Option<String>,
    /// Ceiling on the active handoff stack; transfers beyond it fail.
    #[serde(default = "d_5")]
    pub max_handoff_depth: usize,
    /// When enabled, registering an agent also registers the built-in
    /// handoff/return/list tools on its runtime.
    #[serde(default = "d_true")]
    pub peer_handoffs: bool,
    /// Rules evaluated for every agent, after the current agent's own.
    #[serde(default)]
    pub global_handoff_rules: Vec<HandoffRule>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_agent_id: None,
            max_handoff_depth: 5,
            peer_handoffs: true,
            global_handoff_rules: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Window for `full` mode.
    #[serde(default = "d_50")]
    pub max_messages: usize,
    /// Window for `last_n` mode (overridable per handoff via metadata).
    #[serde(default = "d_10")]
    pub last_n: usize,
    /// Mode used when the matching rule does not set one.
    #[serde(default)]
    pub default_mode: ContextMode,
    /// Target length handed to the summarizer.
    #[serde(default = "d_500")]
    pub summary_max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_messages: 50,
            last_n: 10,
            default_mode: ContextMode::default(),
            summary_max_chars: 500,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-risk-level approval rule.
///
/// When `require_approval` is set, an invocation at this risk is gated: it
/// auto-approves only while the edge's trust meets `min_trust_level` and the
/// session is under `max_auto_approve_per_session`; otherwise a human is
/// asked. When unset, the level falls through to the untrusted/high-risk
/// fallbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRule {
    #[serde(default = "d_true")]
    pub require_approval: bool,
    #[serde(default)]
    pub min_trust_level: TrustLevel,
    #[serde(default = "d_10u32")]
    pub max_auto_approve_per_session: u32,
}

impl Default for RiskRule {
    fn default() -> Self {
        Self {
            require_approval: true,
            min_trust_level: TrustLevel::Untrusted,
            max_auto_approve_per_session: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Patterns that always go to a human, regardless of trust.
    #[serde(default)]
    pub always_require_approval_for: Vec<String>,
    /// Patterns that never go to a human.
    #[serde(default)]
    pub never_require_approval_for: Vec<String>,
    #[serde(default = "d_rule_low")]
    pub low: RiskRule,
    #[serde(default = "d_rule_medium")]
    pub medium: RiskRule,
    #[serde(default = "d_rule_high")]
    pub high: RiskRule,
    #[serde(default = "d_rule_critical")]
    pub critical: RiskRule,
    #[serde(default = "d_true")]
    pub require_approval_for_untrusted: bool,
    #[serde(default = "d_true")]
    pub require_approval_for_high_risk: bool,
    /// Pending request TTL, seconds.
    #[serde(default = "d_300")]
    pub approval_timeout_secs: u64,
    /// Sweep cadence for decided/expired records, seconds.
    #[serde(default = "d_60")]
    pub cleanup_interval_secs: u64,
}

impl ApprovalConfig {
    pub fn rule_for(&self, risk: RiskLevel) -> &RiskRule {
        match risk {
            RiskLevel::Low => &self.low,
            RiskLevel::Medium => &self.medium,
            RiskLevel::High => &self.high,
            RiskLevel::Critical => &self.critical,
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            always_require_approval_for: Vec::new(),
            never_require_approval_for: Vec::new(),
            low: d_rule_low(),
            medium: d_rule_medium(),
            high: d_rule_high(),
            critical: d_rule_critical(),
            require_approval_for_untrusted: true,
            require_approval_for_high_risk: true,
            approval_timeout_secs: 300,
            cleanup_interval_secs: 60,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subagent registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentConfig {
    /// JSON persistence file. `None` keeps the registry memory-only.
    #[serde(default)]
    pub persist_path: Option<PathBuf>,
    /// Sweeper cadence, seconds.
    #[serde(default = "d_60")]
    pub sweep_interval_secs: u64,
    /// Per-run timeout applied when a registration does not set one (ms).
    /// Zero disables the timeout.
    #[serde(default)]
    pub default_timeout_ms: u64,
    /// How long a completed record stays before the sweeper archives it (ms).
    #[serde(default = "d_3600000")]
    pub archive_after_ms: u64,
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            persist_path: None,
            sweep_interval_secs: 60,
            default_timeout_ms: 0,
            archive_after_ms: 3_600_000,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_5() -> usize {
    5
}
fn d_10() -> usize {
    10
}
fn d_50() -> usize {
    50
}
fn d_60() -> u64 {
    60
}
fn d_300() -> u64 {
    300
}
fn d_500() -> usize {
    500
}
fn d_10u32() -> u32 {
    10
}
fn d_3600000() -> u64 {
    3_600_000
}

fn d_rule_low() -> RiskRule {
    RiskRule {
        require_approval: false,
        min_trust_level: TrustLevel::Untrusted,
        max_auto_approve_per_session: 50,
    }
}
fn d_rule_medium() -> RiskRule {
    RiskRule {
        require_approval: true,
        min_trust_level: TrustLevel::Tofu,
        max_auto_approve_per_session: 10,
    }
}
fn d_rule_high() -> RiskRule {
    RiskRule {
        require_approval: true,
        min_trust_level: TrustLevel::Trusted,
        max_auto_approve_per_session: 3,
    }
}
fn d_rule_critical() -> RiskRule {
    RiskRule {
        require_approval: true,
        min_trust_level: TrustLevel::Trusted,
        max_auto_approve_per_session: 0,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
