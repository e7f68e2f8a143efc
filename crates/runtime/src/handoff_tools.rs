//! Built-in tools the orchestrator registers on every agent runtime when
//! peer handoffs are enabled: `handoff`, `return_control`, and
//! `list_agents`. Their results carry structured kinds so the orchestrator
//! intercepts them without sniffing content.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use nx_domain::handoff::{HandoffEnvelope, HandoffRequest, ReturnReport, SharedContext};
use nx_domain::message::ToolResultKind;
use nx_domain::Result;

use crate::capabilities::{Tool, ToolOutput};
use crate::orchestrator::AgentDirectory;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// handoff
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Requests a transfer of control to another agent. One instance per
/// registered agent, bound to its id.
pub struct HandoffTool {
    agent_id: String,
    directory: Arc<AgentDirectory>,
}

impl HandoffTool {
    pub fn new(agent_id: impl Into<String>, directory: Arc<AgentDirectory>) -> Self {
        Self {
            agent_id: agent_id.into(),
            directory,
        }
    }
}

#[async_trait]
impl Tool for HandoffTool {
    fn name(&self) -> &str {
        "handoff"
    }

    fn description(&self) -> &str {
        "Transfer the conversation to another agent. Use list_agents to see who is available."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "target_agent": { "type": "string", "description": "ID of the agent to hand off to" },
                "reason": { "type": "string", "description": "Why control is being transferred" },
                "context": { "type": "object", "description": "Extra context to pass along" },
                "return_expected": { "type": "boolean", "description": "Whether control should come back here afterwards" }
            },
            "required": ["target_agent", "reason"]
        })
    }

    async fn execute(&self, params: Value) -> Result<ToolOutput> {
        let Some(target) = params.get("target_agent").and_then(|v| v.as_str()) else {
            return Ok(ToolOutput::error("missing required argument: target_agent"));
        };
        let Some(reason) = params.get("reason").and_then(|v| v.as_str()) else {
            return Ok(ToolOutput::error("missing required argument: reason"));
        };

        let Some(def) = self.directory.get(target) else {
            return Ok(ToolOutput::error(format!(
                "unknown agent '{target}'. Available: {}",
                self.directory.ids().join(", ")
            )));
        };
        if !def.can_receive_handoffs {
            return Ok(ToolOutput::error(format!(
                "agent '{target}' cannot receive handoffs"
            )));
        }
        if target == self.agent_id {
            return Ok(ToolOutput::error("an agent cannot hand off to itself"));
        }

        let context = params
            .get("context")
            .cloned()
            .map(|v| serde_json::from_value::<SharedContext>(v).unwrap_or_default())
            .unwrap_or_default();
        let mut request = HandoffRequest::new(&self.agent_id, target, reason);
        request.context = context;
        request.return_expected = params
            .get("return_expected")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let envelope = HandoffEnvelope::initiated(request.clone(), def.name.as_str());
        Ok(ToolOutput {
            content: serde_json::to_string(&envelope)?,
            is_error: false,
            kind: ToolResultKind::Handoff { request },
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// return_control
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hands control back to whichever agent is waiting on the handoff stack.
/// A no-op (plain result) when nothing is waiting.
pub struct ReturnControlTool;

#[async_trait]
impl Tool for ReturnControlTool {
    fn name(&self) -> &str {
        "return_control"
    }

    fn description(&self) -> &str {
        "Return control to the agent that handed off to you, with a summary of what was done."
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string", "description": "What was accomplished" },
                "result": { "description": "Structured result data, if any" },
                "success": { "type": "boolean", "description": "Whether the task succeeded" }
            },
            "required": ["summary"]
        })
    }

    async fn execute(&self, params: Value) -> Result<ToolOutput> {
        let Some(summary) = params.get("summary").and_then(|v| v.as_str()) else {
            return Ok(ToolOutput::error("missing required argument: summary"));
        };
        let report = ReturnReport {
            summary: summary.to_string(),
            result: params.get("result").cloned(),
            success: params
                .get("success")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
        };
        Ok(ToolOutput {
            content: serde_json::to_string(&report)?,
            is_error: false,
            kind: ToolResultKind::Return { report },
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// list_agents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lists every registered agent in human-readable markdown.
pub struct ListAgentsTool {
    directory: Arc<AgentDirectory>,
}

impl ListAgentsTool {
    pub fn new(directory: Arc<AgentDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Tool for ListAgentsTool {
    fn name(&self) -> &str {
        "list_agents"
    }

    fn description(&self) -> &str {
        "List all registered agents and whether they accept handoffs."
    }

    fn schema(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value) -> Result<ToolOutput> {
        let agents = self.directory.list();
        if agents.is_empty() {
            return Ok(ToolOutput::text("No agents registered."));
        }
        let mut out = String::from("# Available Agents\n\n");
        for def in agents {
            let name = if def.name.is_empty() { &def.id } else { &def.name };
            out.push_str(&format!("- **{name}** (`{}`)", def.id));
            if !def.description.is_empty() {
                out.push_str(&format!(" — {}", def.description));
            }
            if !def.can_receive_handoffs {
                out.push_str(" [does not accept handoffs]");
            }
            out.push('\n');
        }
        Ok(ToolOutput::text(out))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use nx_domain::agent::AgentDefinition;

    fn directory() -> Arc<AgentDirectory> {
        let dir = Arc::new(AgentDirectory::new());
        let mut review = AgentDefinition::new("review-agent", "Review Agent");
        review.description = "reviews code".into();
        dir.insert(AgentDefinition::new("code-agent", "Code Agent"));
        dir.insert(review);
        let mut closed = AgentDefinition::new("closed", "Closed");
        closed.can_receive_handoffs = false;
        dir.insert(closed);
        dir
    }

    #[tokio::test]
    async fn handoff_produces_structured_result() {
        let tool = HandoffTool::new("code-agent", directory());
        let out = tool
            .execute(serde_json::json!({
                "target_agent": "review-agent",
                "reason": "needs review",
                "return_expected": true,
            }))
            .await
            .unwrap();

        assert!(!out.is_error);
        let ToolResultKind::Handoff { request } = &out.kind else {
            panic!("expected handoff kind");
        };
        assert_eq!(request.from_agent, "code-agent");
        assert_eq!(request.to_agent, "review-agent");
        assert!(request.return_expected);

        // The content is a strict envelope the legacy parser accepts.
        let parsed = HandoffRequest::parse_result(&out.content).unwrap();
        assert_eq!(parsed.to_agent, "review-agent");
        let envelope: HandoffEnvelope = serde_json::from_str(&out.content).unwrap();
        assert_eq!(envelope.status, "initiated");
        assert_eq!(envelope.target_name, "Review Agent");
    }

    #[tokio::test]
    async fn handoff_rejects_bad_targets() {
        let tool = HandoffTool::new("code-agent", directory());

        let out = tool
            .execute(serde_json::json!({"target_agent": "ghost", "reason": "r"}))
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("unknown agent"));

        let out = tool
            .execute(serde_json::json!({"target_agent": "closed", "reason": "r"}))
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("cannot receive handoffs"));

        let out = tool
            .execute(serde_json::json!({"target_agent": "code-agent", "reason": "r"}))
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("itself"));

        let out = tool.execute(serde_json::json!({"reason": "r"})).await.unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("target_agent"));
    }

    #[tokio::test]
    async fn return_control_wraps_report() {
        let tool = ReturnControlTool;
        let out = tool
            .execute(serde_json::json!({"summary": "fixed it", "success": true}))
            .await
            .unwrap();
        let ToolResultKind::Return { report } = &out.kind else {
            panic!("expected return kind");
        };
        assert_eq!(report.summary, "fixed it");
        assert!(report.success);

        let out = tool.execute(serde_json::json!({})).await.unwrap();
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn list_agents_renders_markdown() {
        let tool = ListAgentsTool::new(directory());
        let out = tool.execute(serde_json::json!({})).await.unwrap();
        assert!(out.content.contains("# Available Agents"));
        assert!(out.content.contains("**Review Agent** (`review-agent`) — reviews code"));
        assert!(out.content.contains("[does not accept handoffs]"));
    }

    #[tokio::test]
    async fn list_agents_empty_directory() {
        let tool = ListAgentsTool::new(Arc::new(AgentDirectory::new()));
        let out = tool.execute(serde_json::json!({})).await.unwrap();
        assert_eq!(out.content, "No agents registered.");
    }
}
