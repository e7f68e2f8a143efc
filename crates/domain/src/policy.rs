use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trust & risk
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Confidence assigned to an edge device. Ordering is monotone:
/// `Untrusted < Tofu < Trusted`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    #[default]
    Untrusted,
    /// Trust-on-first-use: seen before, never explicitly vetted.
    Tofu,
    Trusted,
}

impl TrustLevel {
    /// Whether `self` meets the required minimum.
    pub fn meets(self, minimum: TrustLevel) -> bool {
        self >= minimum
    }
}

/// Risk classification of a single tool invocation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy profiles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Named preset policies carrying a default allow list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyProfile {
    /// Read-only introspection.
    #[default]
    Minimal,
    /// Shell, filesystem, and process tools.
    Coding,
    /// Conversation and agent-directory tools.
    Messaging,
    /// Everything not explicitly denied.
    Full,
}

impl PolicyProfile {
    /// The profile's default allow patterns, merged with the policy's own
    /// allow list during resolution. `Full` short-circuits before allow
    /// lists are consulted, so its list is empty.
    pub fn allow_patterns(self) -> &'static [&'static str] {
        match self {
            PolicyProfile::Minimal => &["core.status", "core.list_agents"],
            PolicyProfile::Coding => &[
                "core.status",
                "core.exec",
                "core.read",
                "core.write",
                "core.process",
            ],
            PolicyProfile::Messaging => &[
                "core.status",
                "core.list_agents",
                "core.send_message",
                "core.handoff",
            ],
            PolicyProfile::Full => &[],
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool access policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-provider allow/deny overlay, evaluated in isolation before the base
/// lists when the requested tool belongs to that provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderOverlay {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

/// An agent's tool-access policy: a profile preset plus explicit allow/deny
/// patterns and optional per-provider overlays keyed by provider id
/// (`nexus`, `mcp:<server>`, `edge:<device>`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolAccessPolicy {
    #[serde(default)]
    pub profile: PolicyProfile,
    #[serde(default)]
    pub allow: Vec<String>,
    /// Evaluated before allow; deny always wins.
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub providers: HashMap<String, ProviderOverlay>,
}

impl ToolAccessPolicy {
    pub fn full() -> Self {
        Self {
            profile: PolicyProfile::Full,
            ..Self::default()
        }
    }

    pub fn with_deny(mut self, patterns: &[&str]) -> Self {
        self.deny = patterns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_allow(mut self, patterns: &[&str]) -> Self {
        self.allow = patterns.iter().map(|s| s.to_string()).collect();
        self
    }
}
