//! Builds the shared context that crosses a handoff boundary, under the
//! sharing mode configured on the matching rule. Also composes multiple
//! contexts and renders a context block for system prompts.

use std::collections::HashMap;
use std::sync::Arc;

use nx_domain::agent::HandoffRule;
use nx_domain::config::ContextConfig;
use nx_domain::handoff::{ContextMessage, ContextMode, HandoffRequest, SharedContext};
use nx_domain::message::{Message, Role};

use crate::capabilities::{SessionStore, Summarizer};

/// History content is clipped to this many bytes per line in prompts.
const PROMPT_CONTENT_MAX: usize = 500;
/// Quoted user messages in the deterministic summary are clipped to this.
const SUMMARY_QUOTE_MAX: usize = 200;

pub struct ContextManager {
    config: ContextConfig,
    store: Arc<dyn SessionStore>,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl ContextManager {
    pub fn new(config: ContextConfig, store: Arc<dyn SessionStore>) -> Self {
        Self {
            config,
            store,
            summarizer: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.set_summarizer(summarizer);
        self
    }

    pub fn set_summarizer(&mut self, summarizer: Arc<dyn Summarizer>) {
        self.summarizer = Some(summarizer);
    }

    // ── Building ─────────────────────────────────────────────────

    /// Construct the context for a handoff. The mode comes from the
    /// matching rule when given, otherwise the configured default; the
    /// incoming request's variables, metadata, and agent trail carry over.
    pub async fn build(
        &self,
        session_id: &str,
        request: &HandoffRequest,
        rule: Option<&HandoffRule>,
    ) -> SharedContext {
        let mode = rule
            .map(|r| r.context_mode)
            .unwrap_or(self.config.default_mode);
        let history = match self.store.history(session_id, self.config.max_messages).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "history read failed; sharing empty context");
                Vec::new()
            }
        };
        let incoming = &request.context;

        let mut ctx = SharedContext {
            variables: incoming.variables.clone(),
            metadata: incoming.metadata.clone(),
            previous_agents: incoming.previous_agents.clone(),
            summary: incoming.summary.clone(),
            ..Default::default()
        };

        match mode {
            ContextMode::Full => {
                ctx.messages = history.iter().map(to_context_message).collect();
            }
            ContextMode::Summary => {
                ctx.summary = Some(self.summarize(&history).await);
            }
            ContextMode::Filtered => {
                let roles = include_roles(&incoming.metadata);
                ctx.messages = history
                    .iter()
                    .filter(|m| roles.contains(&m.role))
                    .filter(|m| !m.content.is_empty() || !m.tool_calls.is_empty())
                    .map(to_context_message)
                    .collect();
            }
            ContextMode::LastN => {
                let n = incoming
                    .metadata
                    .get("last_n")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as usize)
                    .unwrap_or(self.config.last_n);
                let skip = history.len().saturating_sub(n);
                ctx.messages = history[skip..].iter().map(to_context_message).collect();
            }
            ContextMode::None => {}
        }

        // Task precedence: the incoming context's task, then the rule's
        // message, then the request reason.
        ctx.task = if !incoming.task.is_empty() {
            incoming.task.clone()
        } else {
            rule.and_then(|r| r.message.clone())
                .unwrap_or_else(|| request.reason.clone())
        };

        ctx.record_agent(&request.from_agent);
        self.enrich_variables(&mut ctx, &history);
        ctx
    }

    /// Stamp conversation-shape variables and copy per-message `variables`
    /// and `entities` metadata into the context.
    fn enrich_variables(&self, ctx: &mut SharedContext, history: &[Message]) {
        if let Some(first) = history.first() {
            ctx.variables.insert(
                "conversation_start".into(),
                serde_json::json!(first.created_at.to_rfc3339()),
            );
        }
        ctx.variables
            .insert("message_count".into(), serde_json::json!(history.len()));

        for message in history {
            if let Some(vars) = message.metadata.get("variables").and_then(|v| v.as_object()) {
                for (k, v) in vars {
                    ctx.variables.insert(k.clone(), v.clone());
                }
            }
            if let Some(entities) = message.metadata.get("entities").and_then(|v| v.as_object()) {
                for (k, v) in entities {
                    ctx.variables.insert(format!("entity_{k}"), v.clone());
                }
            }
        }
    }

    // ── Summaries ────────────────────────────────────────────────

    async fn summarize(&self, history: &[Message]) -> String {
        if let Some(summarizer) = &self.summarizer {
            match summarizer.summarize(history, self.config.summary_max_chars).await {
                Ok(summary) => return summary,
                Err(e) => {
                    tracing::warn!(error = %e, "summarizer failed; using basic summary");
                }
            }
        }
        basic_summary(history)
    }

    // ── Composition ──────────────────────────────────────────────

    /// Compose several contexts: summaries joined by `---`, messages
    /// deduplicated by timestamp, variables and metadata last-wins, task
    /// last-non-empty, agent trails unioned in order.
    pub fn merge_contexts(&self, contexts: &[SharedContext]) -> SharedContext {
        let mut merged = SharedContext::default();
        let mut summaries: Vec<&str> = Vec::new();
        let mut seen_timestamps = std::collections::HashSet::new();

        for ctx in contexts {
            if let Some(summary) = ctx.summary.as_deref() {
                if !summary.is_empty() {
                    summaries.push(summary);
                }
            }
            for message in &ctx.messages {
                if seen_timestamps.insert(message.timestamp) {
                    merged.messages.push(message.clone());
                }
            }
            for (k, v) in &ctx.variables {
                merged.variables.insert(k.clone(), v.clone());
            }
            for (k, v) in &ctx.metadata {
                merged.metadata.insert(k.clone(), v.clone());
            }
            if !ctx.task.is_empty() {
                merged.task = ctx.task.clone();
            }
            for agent in &ctx.previous_agents {
                merged.record_agent(agent);
            }
        }

        if !summaries.is_empty() {
            merged.summary = Some(summaries.join("\n---\n"));
        }
        merged
    }

    // ── Rendering ────────────────────────────────────────────────

    /// Render a context as a markdown block for a system prompt.
    pub fn format_for_prompt(&self, ctx: &SharedContext) -> String {
        let mut out = String::new();

        if !ctx.task.is_empty() {
            out.push_str("## Current Task\n");
            out.push_str(&ctx.task);
            out.push_str("\n\n");
        }

        if !ctx.previous_agents.is_empty() {
            out.push_str("## Previous Agents\n");
            out.push_str(&ctx.previous_agents.join(" -> "));
            out.push_str("\n\n");
        }

        if let Some(summary) = ctx.summary.as_deref() {
            if !summary.is_empty() {
                out.push_str("## Conversation Summary\n");
                out.push_str(summary);
                out.push_str("\n\n");
            }
        }

        if !ctx.variables.is_empty() {
            out.push_str("## Context Variables\n");
            let mut keys: Vec<_> = ctx.variables.keys().collect();
            keys.sort();
            for key in keys {
                let value = &ctx.variables[key];
                let rendered = match value.as_str() {
                    Some(s) => s.to_string(),
                    None => value.to_string(),
                };
                out.push_str(&format!("- {key}: {rendered}\n"));
            }
            out.push('\n');
        }

        if !ctx.messages.is_empty() {
            out.push_str("## Conversation History\n");
            for message in &ctx.messages {
                let who = match &message.agent_id {
                    Some(agent) => format!("{} ({agent})", role_str(message.role)),
                    None => role_str(message.role).to_string(),
                };
                out.push_str(&format!(
                    "[{who}] {}\n",
                    truncate(&message.content, PROMPT_CONTENT_MAX)
                ));
            }
        }

        out.trim_end().to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn to_context_message(message: &Message) -> ContextMessage {
    ContextMessage {
        role: message.role,
        content: message.content.clone(),
        agent_id: message
            .metadata
            .get("agent_id")
            .and_then(|v| v.as_str())
            .map(String::from),
        timestamp: message.created_at,
    }
}

/// The role filter for `filtered` mode; overridable via the incoming
/// context's `include_roles` metadata.
fn include_roles(metadata: &HashMap<String, serde_json::Value>) -> Vec<Role> {
    if let Some(list) = metadata.get("include_roles").and_then(|v| v.as_array()) {
        let roles: Vec<Role> = list
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(|s| match s {
                "user" => Some(Role::User),
                "assistant" => Some(Role::Assistant),
                "system" => Some(Role::System),
                "tool" => Some(Role::Tool),
                _ => None,
            })
            .collect();
        if !roles.is_empty() {
            return roles;
        }
    }
    vec![Role::User, Role::Assistant]
}

/// Deterministic fallback summary: role counts, the first and most recent
/// user messages, and the tools invoked.
fn basic_summary(history: &[Message]) -> String {
    if history.is_empty() {
        return "No conversation history.".to_string();
    }

    let mut counts: HashMap<Role, usize> = HashMap::new();
    for message in history {
        *counts.entry(message.role).or_insert(0) += 1;
    }

    let mut out = format!(
        "Conversation with {} messages ({} user, {} assistant, {} tool).",
        history.len(),
        counts.get(&Role::User).copied().unwrap_or(0),
        counts.get(&Role::Assistant).copied().unwrap_or(0),
        counts.get(&Role::Tool).copied().unwrap_or(0),
    );

    let user_messages: Vec<&Message> =
        history.iter().filter(|m| m.role == Role::User).collect();
    if let Some(first) = user_messages.first() {
        out.push_str(&format!(
            " First user message: \"{}\".",
            truncate(&first.content, SUMMARY_QUOTE_MAX)
        ));
    }
    if user_messages.len() > 1 {
        if let Some(last) = user_messages.last() {
            out.push_str(&format!(
                " Most recent user message: \"{}\".",
                truncate(&last.content, SUMMARY_QUOTE_MAX)
            ));
        }
    }

    let mut tools: Vec<&str> = Vec::new();
    for message in history {
        for name in message.tool_call_names() {
            if !tools.contains(&name) {
                tools.push(name);
            }
        }
    }
    if !tools.is_empty() {
        out.push_str(&format!(" Tools used: {}.", tools.join(", ")));
    }

    out
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Byte-bounded truncation that never splits a UTF-8 character.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nx_domain::Result;

    struct FixedHistory(Vec<Message>);

    #[async_trait]
    impl SessionStore for FixedHistory {
        async fn history(&self, _session_id: &str, max: usize) -> Result<Vec<Message>> {
            let skip = self.0.len().saturating_sub(max);
            Ok(self.0[skip..].to_vec())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn history(&self, _session_id: &str, _max: usize) -> Result<Vec<Message>> {
            Err(nx_domain::Error::Other("store offline".into()))
        }
    }

    struct CannedSummarizer(Result<String>);

    #[async_trait]
    impl Summarizer for CannedSummarizer {
        async fn summarize(&self, _messages: &[Message], _max_len: usize) -> Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(_) => Err(nx_domain::Error::Other("summarizer offline".into())),
            }
        }
    }

    fn manager(history: Vec<Message>) -> ContextManager {
        ContextManager::new(ContextConfig::default(), Arc::new(FixedHistory(history)))
    }

    fn sample_history() -> Vec<Message> {
        let mut m3 = Message::assistant("running tests");
        m3.tool_calls.push(nx_domain::message::ToolCall {
            call_id: "c1".into(),
            tool_name: "core.exec".into(),
            arguments: serde_json::json!({}),
        });
        vec![
            Message::user("fix the login bug"),
            Message::assistant("looking into it"),
            m3,
            Message::user("also check the tests"),
        ]
    }

    fn request() -> HandoffRequest {
        HandoffRequest::new("code-agent", "review-agent", "needs a second pair of eyes")
    }

    fn rule_with_mode(mode: ContextMode) -> HandoffRule {
        let mut rule = HandoffRule::new(
            "review-agent",
            vec![nx_domain::agent::RoutingTrigger::keyword(&["review"])],
            10,
        );
        rule.context_mode = mode;
        rule
    }

    #[tokio::test]
    async fn full_mode_carries_messages() {
        let mgr = manager(sample_history());
        let ctx = mgr
            .build("s1", &request(), Some(&rule_with_mode(ContextMode::Full)))
            .await;
        assert_eq!(ctx.messages.len(), 4);
        assert_eq!(ctx.task, "needs a second pair of eyes");
        assert_eq!(ctx.previous_agents, vec!["code-agent"]);
    }

    #[tokio::test]
    async fn none_mode_omits_messages() {
        let mgr = manager(sample_history());
        let ctx = mgr
            .build("s1", &request(), Some(&rule_with_mode(ContextMode::None)))
            .await;
        assert!(ctx.messages.is_empty());
        assert!(ctx.summary.is_none());
        assert!(!ctx.task.is_empty());
    }

    #[tokio::test]
    async fn last_n_mode_takes_tail() {
        let mgr = manager(sample_history());
        let mut req = request();
        req.context
            .metadata
            .insert("last_n".into(), serde_json::json!(2));
        let ctx = mgr
            .build("s1", &req, Some(&rule_with_mode(ContextMode::LastN)))
            .await;
        assert_eq!(ctx.messages.len(), 2);
        assert_eq!(ctx.messages[1].content, "also check the tests");
    }

    #[tokio::test]
    async fn filtered_mode_defaults_to_user_and_assistant() {
        let mut history = sample_history();
        history.push(Message::system("internal note"));
        let mut empty = Message::assistant("");
        empty.tool_calls.push(nx_domain::message::ToolCall {
            call_id: "c2".into(),
            tool_name: "core.read".into(),
            arguments: serde_json::json!({}),
        });
        history.push(empty);
        history.push(Message::assistant("")); // empty, no tool calls: dropped

        let mgr = manager(history);
        let ctx = mgr
            .build("s1", &request(), Some(&rule_with_mode(ContextMode::Filtered)))
            .await;
        // 4 sample messages + the empty-with-tool-calls one; system and the
        // bare empty assistant message are dropped.
        assert_eq!(ctx.messages.len(), 5);
        assert!(ctx.messages.iter().all(|m| m.role != Role::System));
    }

    #[tokio::test]
    async fn filtered_mode_honors_include_roles_override() {
        let mut history = sample_history();
        history.push(Message::system("keep me"));
        let mgr = manager(history);
        let mut req = request();
        req.context
            .metadata
            .insert("include_roles".into(), serde_json::json!(["system"]));
        let ctx = mgr
            .build("s1", &req, Some(&rule_with_mode(ContextMode::Filtered)))
            .await;
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.messages[0].content, "keep me");
    }

    #[tokio::test]
    async fn summary_mode_uses_summarizer() {
        let mgr = manager(sample_history())
            .with_summarizer(Arc::new(CannedSummarizer(Ok("tight summary".into()))));
        let ctx = mgr
            .build("s1", &request(), Some(&rule_with_mode(ContextMode::Summary)))
            .await;
        assert_eq!(ctx.summary.as_deref(), Some("tight summary"));
        assert!(ctx.messages.is_empty());
    }

    #[tokio::test]
    async fn summarizer_failure_falls_back_to_basic() {
        let mgr = manager(sample_history()).with_summarizer(Arc::new(CannedSummarizer(Err(
            nx_domain::Error::Other("x".into()),
        ))));
        let ctx = mgr
            .build("s1", &request(), Some(&rule_with_mode(ContextMode::Summary)))
            .await;
        let summary = ctx.summary.unwrap();
        assert!(summary.contains("4 messages"));
        assert!(summary.contains("fix the login bug"));
        assert!(summary.contains("also check the tests"));
        assert!(summary.contains("core.exec"));
    }

    #[tokio::test]
    async fn store_failure_degrades_to_empty_context() {
        let mgr = ContextManager::new(ContextConfig::default(), Arc::new(FailingStore));
        let ctx = mgr
            .build("s1", &request(), Some(&rule_with_mode(ContextMode::Full)))
            .await;
        assert!(ctx.messages.is_empty());
        assert_eq!(ctx.variables["message_count"], serde_json::json!(0));
    }

    #[tokio::test]
    async fn variables_are_enriched_from_history() {
        let mut history = sample_history();
        history[1]
            .metadata
            .insert("variables".into(), serde_json::json!({"ticket": "NX-42"}));
        history[2]
            .metadata
            .insert("entities".into(), serde_json::json!({"repo": "nexus"}));
        let first_at = history[0].created_at;

        let mgr = manager(history);
        let ctx = mgr.build("s1", &request(), None).await;
        assert_eq!(ctx.variables["ticket"], serde_json::json!("NX-42"));
        assert_eq!(ctx.variables["entity_repo"], serde_json::json!("nexus"));
        assert_eq!(ctx.variables["message_count"], serde_json::json!(4));
        assert_eq!(
            ctx.variables["conversation_start"],
            serde_json::json!(first_at.to_rfc3339())
        );
    }

    #[tokio::test]
    async fn incoming_context_carries_over() {
        let mgr = manager(sample_history());
        let mut req = request();
        req.context.task = "continue the audit".into();
        req.context
            .variables
            .insert("customer".into(), serde_json::json!("acme"));
        req.context.previous_agents = vec!["triage".into()];

        let ctx = mgr.build("s1", &req, None).await;
        assert_eq!(ctx.task, "continue the audit");
        assert_eq!(ctx.variables["customer"], serde_json::json!("acme"));
        assert_eq!(ctx.previous_agents, vec!["triage", "code-agent"]);
    }

    #[test]
    fn merge_joins_summaries_and_dedupes_messages() {
        let mgr = manager(vec![]);
        let shared = Message::user("shared");
        let mut c1 = SharedContext {
            summary: Some("part one".into()),
            task: "first".into(),
            ..Default::default()
        };
        c1.messages.push(to_context_message(&shared));
        c1.variables.insert("k".into(), serde_json::json!(1));
        c1.previous_agents = vec!["a".into()];

        let mut c2 = SharedContext {
            summary: Some("part two".into()),
            task: "second".into(),
            ..Default::default()
        };
        c2.messages.push(to_context_message(&shared)); // same timestamp
        c2.messages.push(to_context_message(&Message::user("unique")));
        c2.variables.insert("k".into(), serde_json::json!(2));
        c2.previous_agents = vec!["b".into(), "a".into()];

        let merged = mgr.merge_contexts(&[c1, c2]);
        assert_eq!(merged.summary.as_deref(), Some("part one\n---\npart two"));
        assert_eq!(merged.messages.len(), 2);
        assert_eq!(merged.variables["k"], serde_json::json!(2));
        assert_eq!(merged.task, "second");
        assert_eq!(merged.previous_agents, vec!["a", "b"]);
    }

    #[test]
    fn merge_keeps_last_nonempty_task() {
        let mgr = manager(vec![]);
        let c1 = SharedContext {
            task: "real task".into(),
            ..Default::default()
        };
        let c2 = SharedContext::default();
        let merged = mgr.merge_contexts(&[c1, c2]);
        assert_eq!(merged.task, "real task");
    }

    #[test]
    fn format_renders_sections() {
        let mgr = manager(vec![]);
        let mut ctx = SharedContext {
            summary: Some("what happened".into()),
            task: "finish the report".into(),
            previous_agents: vec!["triage".into(), "code-agent".into()],
            ..Default::default()
        };
        ctx.variables
            .insert("ticket".into(), serde_json::json!("NX-42"));
        let mut msg = to_context_message(&Message::user("hello there"));
        msg.agent_id = Some("triage".into());
        ctx.messages.push(msg);

        let text = mgr.format_for_prompt(&ctx);
        assert!(text.contains("## Current Task\nfinish the report"));
        assert!(text.contains("## Previous Agents\ntriage -> code-agent"));
        assert!(text.contains("## Conversation Summary\nwhat happened"));
        assert!(text.contains("- ticket: NX-42"));
        assert!(text.contains("[user (triage)] hello there"));
    }

    #[test]
    fn format_truncates_long_content() {
        let mgr = manager(vec![]);
        let mut ctx = SharedContext::default();
        ctx.messages
            .push(to_context_message(&Message::user("x".repeat(900))));
        let text = mgr.format_for_prompt(&ctx);
        let line = text.lines().last().unwrap();
        assert!(line.len() <= "[user] ".len() + PROMPT_CONTENT_MAX + 3);
        assert!(line.ends_with("..."));
    }

    #[test]
    fn basic_summary_of_empty_history() {
        assert_eq!(basic_summary(&[]), "No conversation history.");
    }

    #[test]
    fn basic_summary_single_user_message_not_quoted_twice() {
        let summary = basic_summary(&[Message::user("only one")]);
        assert_eq!(summary.matches("only one").count(), 1);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo";
        let t = truncate(s, 2);
        assert_eq!(t, "h...");
        assert_eq!(truncate("short", 10), "short");
    }
}
