//! The policy resolver: given an agent's tool-access policy and a requested
//! tool name, produce an allow/deny decision with a reason.
//!
//! Evaluation order is fixed: canonicalize → per-provider overlay → base
//! deny → `full` profile short-circuit → allow lists → default deny.
//! Deny always wins.

use std::sync::Arc;

use serde::Serialize;

use nx_domain::policy::{PolicyProfile, ToolAccessPolicy};

use crate::identity::{ToolCatalog, ToolIdentity, ToolSource};

/// The outcome of a policy evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
}

impl Decision {
    fn allowed(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

pub struct PolicyResolver {
    catalog: Arc<ToolCatalog>,
}

impl PolicyResolver {
    pub fn new(catalog: Arc<ToolCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    // ── Catalog delegation ───────────────────────────────────────

    pub fn canonical_name(&self, name: &str) -> String {
        self.catalog.canonical_name(name)
    }

    pub fn register_alias(&self, alias: &str, canonical: &str) {
        self.catalog.register_alias(alias, canonical);
    }

    pub fn register_mcp_server(&self, server_id: &str, tool_names: &[String]) {
        self.catalog.register_mcp_server(server_id, tool_names);
    }

    pub fn unregister_mcp_server(&self, server_id: &str) {
        self.catalog.unregister_mcp_server(server_id);
    }

    pub fn reset_mcp(&self) {
        self.catalog.reset_mcp();
    }

    pub fn register_edge_server(&self, edge_id: &str, tool_names: &[String]) {
        self.catalog.register_edge_server(edge_id, tool_names);
    }

    pub fn unregister_edge_server(&self, edge_id: &str) {
        self.catalog.unregister_edge_server(edge_id);
    }

    /// Evaluate `policy` against `tool_name`.
    pub fn decide(&self, policy: &ToolAccessPolicy, tool_name: &str) -> Decision {
        let ident = self.catalog.identity(tool_name);

        // Per-provider overlay first; both its deny and its allow win
        // immediately, isolated from the base lists.
        if let Some(overlay) = policy.providers.get(&ident.provider_key()) {
            for pattern in self.expand_groups(&overlay.deny) {
                if self.matches(&pattern, &ident) {
                    return Decision::denied(format!("denied by rule: {pattern}"));
                }
            }
            for pattern in self.expand_groups(&overlay.allow) {
                if self.matches(&pattern, &ident) {
                    return Decision::allowed(format!("allowed by rule: {pattern}"));
                }
            }
        }

        for pattern in self.expand_groups(&policy.deny) {
            if self.matches(&pattern, &ident) {
                return Decision::denied(format!("denied by rule: {pattern}"));
            }
        }

        if policy.profile == PolicyProfile::Full {
            return Decision::allowed("allowed by profile full");
        }

        let mut allow: Vec<String> = policy
            .profile
            .allow_patterns()
            .iter()
            .map(|s| s.to_string())
            .collect();
        allow.extend(policy.allow.iter().cloned());
        for pattern in self.expand_groups(&allow) {
            if self.matches(&pattern, &ident) {
                return Decision::allowed(format!("allowed by rule: {pattern}"));
            }
        }

        Decision::denied("no matching allow rule")
    }

    /// Convenience wrapper over [`decide`](Self::decide).
    pub fn is_allowed(&self, policy: &ToolAccessPolicy, tool_name: &str) -> bool {
        self.decide(policy, tool_name).allowed
    }

    /// Whether a single pattern matches a tool name, after canonicalization
    /// of both sides. Used by the approval manager's always/never lists.
    pub fn pattern_matches(&self, pattern: &str, tool_name: &str) -> bool {
        let ident = self.catalog.identity(tool_name);
        self.matches(&self.catalog.canonical_name(pattern), &ident)
    }

    /// Expand `mcp:<id>.*` / `edge:<id>.*` wildcards into the concrete tools
    /// registered under that server; other patterns pass through normalized.
    /// Deduplicates while preserving order; idempotent.
    pub fn expand_groups(&self, patterns: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |candidate: String| {
            if !out.contains(&candidate) {
                out.push(candidate);
            }
        };

        for raw in patterns {
            let pattern = self.catalog.canonical_name(raw);
            if let Some((source, server_id)) = Self::server_wildcard(&pattern) {
                match self.catalog.server_tools(source, server_id) {
                    Some(tools) => tools.into_iter().for_each(&mut push),
                    // Unknown server: pattern passes through untouched.
                    None => push(pattern),
                }
            } else if Self::is_wildcard(&pattern) {
                push(pattern);
            } else {
                // Concrete names come out fully qualified (`exec` →
                // `core.exec`), so the result is a canonical tool list.
                push(self.catalog.identity(&pattern).canonical);
            }
        }
        out
    }

    fn is_wildcard(pattern: &str) -> bool {
        pattern == "*" || pattern == "mcp:*" || pattern == "edge:*" || pattern.ends_with(".*")
    }

    /// `mcp:<id>.*` / `edge:<id>.*` → (source, id).
    fn server_wildcard(pattern: &str) -> Option<(ToolSource, &str)> {
        let body = pattern.strip_suffix(".*")?;
        if let Some(id) = body.strip_prefix("mcp:") {
            if !id.is_empty() && !id.contains('.') {
                return Some((ToolSource::Mcp, id));
            }
        }
        if let Some(id) = body.strip_prefix("edge:") {
            if !id.is_empty() && !id.contains('.') {
                return Some((ToolSource::Edge, id));
            }
        }
        None
    }

    /// Pattern semantics: `*` matches anything; `mcp:*`/`edge:*` match a
    /// source; `core.*` matches any core tool; `<prefix>.*` matches a
    /// namespace; otherwise exact equality on canonical names (so `exec`
    /// and `core.exec` are the same tool).
    fn matches(&self, pattern: &str, ident: &ToolIdentity) -> bool {
        if pattern == "*" {
            return true;
        }
        match pattern {
            "mcp:*" => return ident.source == ToolSource::Mcp,
            "edge:*" => return ident.source == ToolSource::Edge,
            "core.*" => return ident.source == ToolSource::Core,
            _ => {}
        }
        if let Some(prefix) = pattern.strip_suffix(".*") {
            return ident.canonical.starts_with(&format!("{prefix}."));
        }
        self.catalog.identity(pattern).canonical == ident.canonical
    }
}
