use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::handoff::ContextMode;
use crate::policy::ToolAccessPolicy;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing triggers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Declarative predicate kinds a handoff rule can be armed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Keyword,
    Pattern,
    Intent,
    ToolUse,
    Explicit,
    Fallback,
    Always,
    TaskComplete,
    Error,
}

/// A single routing predicate over an incoming message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingTrigger {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    /// Single operand (keyword, regex source, explicit target hint, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Multi-operand list (keywords, intents, tool names).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    /// Minimum confidence in `0..=1` for the trigger to fire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RoutingTrigger {
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            value: None,
            values: Vec::new(),
            threshold: None,
            metadata: HashMap::new(),
        }
    }

    pub fn keyword(words: &[&str]) -> Self {
        Self {
            values: words.iter().map(|s| s.to_string()).collect(),
            ..Self::new(TriggerType::Keyword)
        }
    }

    pub fn pattern(source: impl Into<String>) -> Self {
        Self {
            value: Some(source.into()),
            ..Self::new(TriggerType::Pattern)
        }
    }

    /// All operands: `values` plus the singleton `value` when present.
    pub fn operands(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.values.iter().map(String::as_str).collect();
        if let Some(v) = &self.value {
            if !out.contains(&v.as_str()) {
                out.push(v.as_str());
            }
        }
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handoff rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A declarative handoff rule: when any trigger fires, control may transfer
/// to `target_agent_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRule {
    pub target_agent_id: String,
    pub triggers: Vec<RoutingTrigger>,
    /// Higher wins; ties break by rule order.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub context_mode: ContextMode,
    /// Whether control is expected back after the target finishes.
    #[serde(default)]
    pub return_to_sender: bool,
    /// Optional note attached to the shared context's task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HandoffRule {
    pub fn new(target: impl Into<String>, triggers: Vec<RoutingTrigger>, priority: i32) -> Self {
        Self {
            target_agent_id: target.into(),
            triggers,
            priority,
            context_mode: ContextMode::default(),
            return_to_sender: false,
            message: None,
        }
    }

    fn validate(&self, owner: &str) -> Result<()> {
        if self.target_agent_id.is_empty() {
            return Err(Error::Validation(format!(
                "handoff rule on '{owner}' has an empty target agent id"
            )));
        }
        if self.triggers.is_empty() {
            return Err(Error::Validation(format!(
                "handoff rule '{owner}' -> '{}' has no triggers",
                self.target_agent_id
            )));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent definition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named agent configuration. Deep-cloned on registration and immutable
/// inside the orchestrator thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Tool names this agent wants exposed (pre-policy).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(default)]
    pub tool_policy: ToolAccessPolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handoff_rules: Vec<HandoffRule>,
    #[serde(default = "d_true")]
    pub can_receive_handoffs: bool,
    #[serde(default = "d_10")]
    pub max_iterations: u32,
}

impl AgentDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            system_prompt: String::new(),
            model: None,
            provider: None,
            tools: Vec::new(),
            tool_policy: ToolAccessPolicy::default(),
            handoff_rules: Vec::new(),
            can_receive_handoffs: true,
            max_iterations: 10,
        }
    }

    pub fn with_rule(mut self, rule: HandoffRule) -> Self {
        self.handoff_rules.push(rule);
        self
    }

    /// Validate the definition before registration.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("agent id must not be empty".into()));
        }
        for rule in &self.handoff_rules {
            rule.validate(&self.id)?;
        }
        Ok(())
    }
}

fn d_true() -> bool {
    true
}
fn d_10() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_id_fails_validation() {
        let def = AgentDefinition::new("", "Nameless");
        assert!(matches!(def.validate(), Err(Error::Validation(_))));
        let def = AgentDefinition::new("  ", "Whitespace");
        assert!(def.validate().is_err());
    }

    #[test]
    fn rule_without_triggers_fails_validation() {
        let def = AgentDefinition::new("a", "A").with_rule(HandoffRule::new("b", vec![], 0));
        assert!(def.validate().is_err());
    }

    #[test]
    fn rule_without_target_fails_validation() {
        let def = AgentDefinition::new("a", "A").with_rule(HandoffRule::new(
            "",
            vec![RoutingTrigger::keyword(&["go"])],
            0,
        ));
        assert!(def.validate().is_err());
    }

    #[test]
    fn valid_definition_passes() {
        let def = AgentDefinition::new("code-agent", "Code Agent").with_rule(HandoffRule::new(
            "review-agent",
            vec![RoutingTrigger::keyword(&["review"])],
            10,
        ));
        assert!(def.validate().is_ok());
        assert!(def.can_receive_handoffs);
        assert_eq!(def.max_iterations, 10);
    }

    #[test]
    fn trigger_operands_merge_value_and_values() {
        let mut t = RoutingTrigger::keyword(&["a", "b"]);
        t.value = Some("c".into());
        assert_eq!(t.operands(), vec!["a", "b", "c"]);
        // Duplicate singleton is not repeated.
        t.value = Some("a".into());
        assert_eq!(t.operands(), vec!["a", "b"]);
    }

    #[test]
    fn trigger_type_serde_names() {
        assert_eq!(
            serde_json::to_string(&TriggerType::ToolUse).unwrap(),
            r#""tool_use""#
        );
        assert_eq!(
            serde_json::to_string(&TriggerType::TaskComplete).unwrap(),
            r#""task_complete""#
        );
    }

    #[test]
    fn definition_deserializes_with_defaults() {
        let def: AgentDefinition =
            serde_json::from_str(r#"{"id": "helper", "name": "Helper"}"#).unwrap();
        assert!(def.can_receive_handoffs);
        assert!(def.handoff_rules.is_empty());
        assert_eq!(def.max_iterations, 10);
    }
}
