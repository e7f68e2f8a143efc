//! Canonical tool naming — `core.X`, `mcp:server.tool`, `edge:device.tool` —
//! plus the alias table and the MCP/edge server registries that power
//! wildcard expansion.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a tool comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    /// Built-in tools, provider key `nexus`.
    Core,
    /// Tools advertised by an MCP server.
    Mcp,
    /// Tools provided by an external device; subject to approval.
    Edge,
}

/// A parsed tool name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolIdentity {
    pub source: ToolSource,
    /// Server/device id for mcp/edge tools; `None` for core.
    pub namespace: Option<String>,
    pub name: String,
    /// Fully-qualified form: `core.x`, `mcp:server.tool`, `edge:device.tool`.
    pub canonical: String,
}

impl ToolIdentity {
    /// Parse an already-normalized (lowercased, alias-resolved) name.
    fn parse(normalized: &str) -> Self {
        if let Some(rest) = normalized.strip_prefix("edge:") {
            return Self::qualified(ToolSource::Edge, "edge", rest);
        }
        if let Some(rest) = normalized.strip_prefix("mcp:") {
            return Self::qualified(ToolSource::Mcp, "mcp", rest);
        }
        // Unqualified names are core tools.
        let name = normalized.strip_prefix("core.").unwrap_or(normalized);
        Self {
            source: ToolSource::Core,
            namespace: None,
            name: name.to_string(),
            canonical: format!("core.{name}"),
        }
    }

    fn qualified(source: ToolSource, prefix: &str, rest: &str) -> Self {
        match rest.split_once('.') {
            Some((ns, name)) => Self {
                source,
                namespace: Some(ns.to_string()),
                name: name.to_string(),
                canonical: format!("{prefix}:{ns}.{name}"),
            },
            // Malformed (no tool part) — keep the whole remainder as the
            // namespace so provider-key derivation still works.
            None => Self {
                source,
                namespace: Some(rest.to_string()),
                name: String::new(),
                canonical: format!("{prefix}:{rest}"),
            },
        }
    }

    /// The provider key used for per-provider policy overlays:
    /// `edge:<id>`, `mcp:<id>`, or `nexus` for core tools.
    pub fn provider_key(&self) -> String {
        match self.source {
            ToolSource::Core => "nexus".to_string(),
            ToolSource::Mcp => format!("mcp:{}", self.namespace.as_deref().unwrap_or("")),
            ToolSource::Edge => format!("edge:{}", self.namespace.as_deref().unwrap_or("")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Registry of aliases and MCP/edge servers. Shared by the policy resolver
/// and the approval manager.
#[derive(Default)]
pub struct ToolCatalog {
    aliases: RwLock<HashMap<String, String>>,
    /// server id → canonical tool names under it.
    mcp_servers: RwLock<HashMap<String, Vec<String>>>,
    edge_servers: RwLock<HashMap<String, Vec<String>>>,
    identities: RwLock<HashMap<String, ToolIdentity>>,
}

const MAX_ALIAS_HOPS: usize = 8;

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(name: &str) -> String {
        name.trim().to_ascii_lowercase()
    }

    /// Normalize a tool name: trim, lowercase, resolve through the alias
    /// table to a fixpoint. Idempotent: `canonical_name(canonical_name(x))
    /// == canonical_name(x)`.
    pub fn canonical_name(&self, name: &str) -> String {
        let mut current = Self::normalize(name);
        let aliases = self.aliases.read();
        for _ in 0..MAX_ALIAS_HOPS {
            match aliases.get(&current) {
                Some(target) if *target != current => current = target.clone(),
                _ => break,
            }
        }
        current
    }

    /// Parse a name into its identity, through the cache.
    pub fn identity(&self, name: &str) -> ToolIdentity {
        let canonical = self.canonical_name(name);
        if let Some(hit) = self.identities.read().get(&canonical) {
            return hit.clone();
        }
        let ident = ToolIdentity::parse(&canonical);
        self.identities
            .write()
            .insert(canonical, ident.clone());
        ident
    }

    pub fn register_alias(&self, alias: &str, canonical: &str) {
        self.aliases
            .write()
            .insert(Self::normalize(alias), Self::normalize(canonical));
    }

    pub fn register_mcp_server(&self, server_id: &str, tool_names: &[String]) {
        let id = Self::normalize(server_id);
        let tools = tool_names
            .iter()
            .map(|t| Self::qualify("mcp", &id, t))
            .collect();
        self.mcp_servers.write().insert(id, tools);
    }

    pub fn unregister_mcp_server(&self, server_id: &str) {
        self.mcp_servers.write().remove(&Self::normalize(server_id));
    }

    pub fn reset_mcp(&self) {
        self.mcp_servers.write().clear();
    }

    pub fn register_edge_server(&self, edge_id: &str, tool_names: &[String]) {
        let id = Self::normalize(edge_id);
        let tools = tool_names
            .iter()
            .map(|t| Self::qualify("edge", &id, t))
            .collect();
        self.edge_servers.write().insert(id, tools);
    }

    pub fn unregister_edge_server(&self, edge_id: &str) {
        self.edge_servers.write().remove(&Self::normalize(edge_id));
    }

    fn qualify(prefix: &str, server_id: &str, tool: &str) -> String {
        let t = Self::normalize(tool);
        if t.starts_with(&format!("{prefix}:")) {
            t
        } else {
            format!("{prefix}:{server_id}.{t}")
        }
    }

    /// Registered tools under `mcp:<id>` or `edge:<id>`, if any.
    pub fn server_tools(&self, source: ToolSource, server_id: &str) -> Option<Vec<String>> {
        let id = Self::normalize(server_id);
        match source {
            ToolSource::Mcp => self.mcp_servers.read().get(&id).cloned(),
            ToolSource::Edge => self.edge_servers.read().get(&id).cloned(),
            ToolSource::Core => None,
        }
    }
}
