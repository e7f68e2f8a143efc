//! Declarative handoff routing — evaluates trigger rules against a message
//! and picks the highest-priority target.
//!
//! Rule precedence: the current agent's own rules and the global rules
//! compete on the genuine band; fallback triggers on *other* agents' rules
//! compete on a strictly lower band, so a genuine match always wins no
//! matter what priorities the rules carry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;

use nx_domain::agent::{AgentDefinition, HandoffRule, RoutingTrigger, TriggerType};
use nx_domain::message::Message;

use crate::capabilities::IntentClassifier;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Match
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which band a match competes on. `Fallback` loses to any `Genuine` match
/// regardless of priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchBand {
    Fallback,
    Genuine,
}

/// A winning rule evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct RouteMatch {
    pub target_agent_id: String,
    pub priority: i32,
    pub band: MatchBand,
    pub trigger_type: TriggerType,
    pub confidence: f64,
    /// Evaluation order, used to break priority ties (earlier wins).
    order: usize,
}

impl RouteMatch {
    fn beats(&self, other: &RouteMatch) -> bool {
        (self.band, self.priority, std::cmp::Reverse(self.order))
            > (other.band, other.priority, std::cmp::Reverse(other.order))
    }
}

/// Fixed phrases that signal task completion.
const TASK_COMPLETE_PHRASES: &[&str] = &[
    "task complete",
    "task completed",
    "task done",
    "i'm done",
    "i am done",
    "finished",
    "completed successfully",
    "task is complete",
];

/// Soft error phrases (score 0.5, against 1.0 for hard tool errors).
const ERROR_PHRASES: &[&str] = &[
    "error",
    "failed",
    "cannot",
    "unable to",
    "i don't know how",
    "out of my expertise",
    "need help with",
];

/// Phrasings that count as an explicit transfer request.
const EXPLICIT_PHRASES: &[&str] = &["hand off to", "handoff to", "transfer to", "switch to"];
const EXPLICIT_PATTERNS: &[&str] = &[r"let\s+\w+\s+handle", r"ask\s+\w+\s+to\s+help", r"@\w+"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct Router {
    /// Compiled regexes keyed by raw pattern source. `None` marks a pattern
    /// that failed to compile so it is never retried.
    regex_cache: RwLock<HashMap<String, Option<Arc<Regex>>>>,
    intent: Option<Arc<dyn IntentClassifier>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_intent_classifier(classifier: Arc<dyn IntentClassifier>) -> Self {
        Self {
            regex_cache: RwLock::new(HashMap::new()),
            intent: Some(classifier),
        }
    }

    // ── Rule aggregation ─────────────────────────────────────────

    /// Decide whether `message` should route away from `current_agent_id`.
    ///
    /// Targets must be registered, handoff-capable, and different from the
    /// current agent; rules pointing elsewhere are skipped.
    pub async fn route(
        &self,
        message: &Message,
        current_agent_id: &str,
        agents: &[AgentDefinition],
        global_rules: &[HandoffRule],
    ) -> Option<RouteMatch> {
        let mut best: Option<RouteMatch> = None;
        let mut order = 0usize;

        let current_rules = agents
            .iter()
            .find(|a| a.id == current_agent_id)
            .map(|a| a.handoff_rules.as_slice())
            .unwrap_or_default();

        for rule in current_rules.iter().chain(global_rules) {
            order += 1;
            if !self.target_is_eligible(&rule.target_agent_id, current_agent_id, agents) {
                continue;
            }
            if let Some(m) = self.evaluate_rule(rule, message, MatchBand::Genuine, order).await {
                if best.as_ref().is_none_or(|b| m.beats(b)) {
                    best = Some(m);
                }
            }
        }

        // Other agents' fallback triggers, on the lower band.
        for agent in agents.iter().filter(|a| a.id != current_agent_id) {
            for rule in &agent.handoff_rules {
                order += 1;
                if !self.target_is_eligible(&rule.target_agent_id, current_agent_id, agents) {
                    continue;
                }
                let has_fallback = rule
                    .triggers
                    .iter()
                    .any(|t| t.trigger_type == TriggerType::Fallback);
                if !has_fallback {
                    continue;
                }
                let m = RouteMatch {
                    target_agent_id: rule.target_agent_id.clone(),
                    priority: rule.priority,
                    band: MatchBand::Fallback,
                    trigger_type: TriggerType::Fallback,
                    confidence: 0.1,
                    order,
                };
                if best.as_ref().is_none_or(|b| m.beats(b)) {
                    best = Some(m);
                }
            }
        }

        if let Some(m) = &best {
            tracing::debug!(
                target = %m.target_agent_id,
                priority = m.priority,
                band = ?m.band,
                trigger = ?m.trigger_type,
                confidence = m.confidence,
                "route matched"
            );
        }
        best
    }

    fn target_is_eligible(
        &self,
        target: &str,
        current_agent_id: &str,
        agents: &[AgentDefinition],
    ) -> bool {
        target != current_agent_id
            && agents
                .iter()
                .any(|a| a.id == target && a.can_receive_handoffs)
    }

    async fn evaluate_rule(
        &self,
        rule: &HandoffRule,
        message: &Message,
        band: MatchBand,
        order: usize,
    ) -> Option<RouteMatch> {
        for trigger in &rule.triggers {
            let score = self.score_trigger(trigger, message).await;
            let fires = match trigger.threshold {
                Some(threshold) => score >= threshold && score > 0.0,
                None => score > 0.0,
            };
            if fires {
                return Some(RouteMatch {
                    target_agent_id: rule.target_agent_id.clone(),
                    priority: rule.priority,
                    band,
                    trigger_type: trigger.trigger_type,
                    confidence: score,
                    order,
                });
            }
        }
        None
    }

    /// Agents whose own rules match the message; every handoff-capable
    /// agent when none match.
    pub async fn candidate_agents(
        &self,
        message: &Message,
        agents: &[AgentDefinition],
    ) -> Vec<String> {
        let mut matched = Vec::new();
        for agent in agents.iter().filter(|a| a.can_receive_handoffs) {
            'rules: for rule in &agent.handoff_rules {
                for trigger in &rule.triggers {
                    if trigger.trigger_type == TriggerType::Fallback {
                        continue;
                    }
                    if self.score_trigger(trigger, message).await > 0.0 {
                        matched.push(agent.id.clone());
                        break 'rules;
                    }
                }
            }
        }
        if matched.is_empty() {
            return agents
                .iter()
                .filter(|a| a.can_receive_handoffs)
                .map(|a| a.id.clone())
                .collect();
        }
        matched
    }

    /// Pick a first agent when the session has none yet.
    pub async fn select_initial(
        &self,
        message: &Message,
        agents: &[AgentDefinition],
    ) -> Option<String> {
        self.candidate_agents(message, agents).await.into_iter().next()
    }

    // ── Trigger scoring ──────────────────────────────────────────

    /// Confidence in `0..=1`; zero means no match.
    pub async fn score_trigger(&self, trigger: &RoutingTrigger, message: &Message) -> f64 {
        let text = message.content.to_lowercase();
        match trigger.trigger_type {
            TriggerType::Keyword => {
                let keywords = trigger.operands();
                if keywords.is_empty() {
                    return 0.0;
                }
                let hits = keywords
                    .iter()
                    .filter(|k| text.contains(&k.to_lowercase()))
                    .count();
                hits as f64 / keywords.len() as f64
            }

            TriggerType::Pattern => {
                let Some(source) = trigger.value.as_deref().or(trigger.values.first().map(String::as_str))
                else {
                    return 0.0;
                };
                match self.regex_for(source) {
                    Some(re) if re.is_match(&message.content) => 1.0,
                    _ => 0.0,
                }
            }

            TriggerType::Intent => {
                let Some(classifier) = &self.intent else {
                    return 0.0;
                };
                let candidates: Vec<String> =
                    trigger.operands().iter().map(|s| s.to_string()).collect();
                match classifier.classify(&message.content, &candidates).await {
                    Ok((intent, confidence)) => {
                        let matched = candidates
                            .iter()
                            .any(|c| c.eq_ignore_ascii_case(&intent));
                        if matched {
                            confidence
                        } else {
                            0.0
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "intent classification failed");
                        0.0
                    }
                }
            }

            TriggerType::ToolUse => {
                let wanted = trigger.operands();
                let hit = message
                    .tool_call_names()
                    .any(|name| wanted.iter().any(|w| w.eq_ignore_ascii_case(name)));
                if hit {
                    1.0
                } else {
                    0.0
                }
            }

            TriggerType::Explicit => {
                let phrased = EXPLICIT_PHRASES.iter().any(|p| text.contains(p))
                    || EXPLICIT_PATTERNS.iter().any(|p| {
                        self.regex_for(p)
                            .map(|re| re.is_match(&message.content))
                            .unwrap_or(false)
                    });
                if !phrased {
                    return 0.0;
                }
                if let Some(value) = &trigger.value {
                    if !text.contains(&value.to_lowercase()) {
                        return 0.0;
                    }
                }
                1.0
            }

            TriggerType::TaskComplete => {
                let flagged = message
                    .metadata
                    .get("task_complete")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if flagged || TASK_COMPLETE_PHRASES.iter().any(|p| text.contains(p)) {
                    1.0
                } else {
                    0.0
                }
            }

            TriggerType::Error => {
                if message.has_tool_error() || message.metadata.contains_key("error") {
                    return 1.0;
                }
                if ERROR_PHRASES.iter().any(|p| text.contains(p)) {
                    return 0.5;
                }
                0.0
            }

            TriggerType::Always => 1.0,

            // Handled during rule aggregation, never scored directly.
            TriggerType::Fallback => 0.0,
        }
    }

    // ── Regex cache ──────────────────────────────────────────────

    /// Compile-and-cache keyed by raw source. Invalid patterns are cached
    /// as `None` so they are not recompiled on every call. First-compile
    /// wins under contention; a duplicate compile is tolerable.
    fn regex_for(&self, source: &str) -> Option<Arc<Regex>> {
        if let Some(cached) = self.regex_cache.read().get(source) {
            return cached.clone();
        }
        let compiled = match Regex::new(&format!("(?i){source}")) {
            Ok(re) => Some(Arc::new(re)),
            Err(e) => {
                tracing::warn!(pattern = source, error = %e, "invalid trigger regex");
                None
            }
        };
        self.regex_cache
            .write()
            .entry(source.to_string())
            .or_insert_with(|| compiled.clone());
        compiled
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nx_domain::message::{ToolCall, ToolResult, ToolResultKind};
    use nx_domain::Result;

    fn agent(id: &str) -> AgentDefinition {
        AgentDefinition::new(id, id)
    }

    fn keyword_rule(target: &str, words: &[&str], priority: i32) -> HandoffRule {
        HandoffRule::new(target, vec![RoutingTrigger::keyword(words)], priority)
    }

    #[tokio::test]
    async fn keyword_scoring_is_hit_ratio() {
        let router = Router::new();
        let trigger = RoutingTrigger::keyword(&["review", "audit"]);
        let msg = Message::user("please review this code");
        assert_eq!(router.score_trigger(&trigger, &msg).await, 0.5);
        let msg = Message::user("review and audit this");
        assert_eq!(router.score_trigger(&trigger, &msg).await, 1.0);
        let msg = Message::user("nothing relevant");
        assert_eq!(router.score_trigger(&trigger, &msg).await, 0.0);
    }

    #[tokio::test]
    async fn keyword_is_case_insensitive() {
        let router = Router::new();
        let trigger = RoutingTrigger::keyword(&["Review"]);
        let msg = Message::user("REVIEW please");
        assert_eq!(router.score_trigger(&trigger, &msg).await, 1.0);
    }

    #[tokio::test]
    async fn pattern_matches_case_insensitively() {
        let router = Router::new();
        let trigger = RoutingTrigger::pattern(r"test.*code");
        let msg = Message::user("TEST my Code");
        assert_eq!(router.score_trigger(&trigger, &msg).await, 1.0);
    }

    #[tokio::test]
    async fn invalid_pattern_scores_zero_and_is_cached() {
        let router = Router::new();
        let trigger = RoutingTrigger::pattern(r"([unclosed");
        let msg = Message::user("anything");
        assert_eq!(router.score_trigger(&trigger, &msg).await, 0.0);
        // Second evaluation hits the negative cache.
        assert_eq!(router.score_trigger(&trigger, &msg).await, 0.0);
        assert!(router.regex_cache.read().get("([unclosed").unwrap().is_none());
    }

    #[tokio::test]
    async fn regex_instances_are_reused() {
        let router = Router::new();
        let trigger = RoutingTrigger::pattern("review");
        let msg = Message::user("review");
        router.score_trigger(&trigger, &msg).await;
        let first = router.regex_cache.read().get("review").unwrap().clone().unwrap();
        router.score_trigger(&trigger, &msg).await;
        let second = router.regex_cache.read().get("review").unwrap().clone().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn tool_use_matches_call_names() {
        let router = Router::new();
        let mut trigger = RoutingTrigger::new(TriggerType::ToolUse);
        trigger.values = vec!["core.exec".into()];
        let mut msg = Message::user("");
        msg.tool_calls.push(ToolCall {
            call_id: "c1".into(),
            tool_name: "core.exec".into(),
            arguments: serde_json::json!({}),
        });
        assert_eq!(router.score_trigger(&trigger, &msg).await, 1.0);
    }

    #[tokio::test]
    async fn explicit_mention_scores() {
        let router = Router::new();
        let trigger = RoutingTrigger::new(TriggerType::Explicit);
        assert_eq!(
            router
                .score_trigger(&trigger, &Message::user("@code help me"))
                .await,
            1.0
        );
        assert_eq!(
            router
                .score_trigger(&trigger, &Message::user("transfer to billing"))
                .await,
            1.0
        );
        assert_eq!(
            router
                .score_trigger(&trigger, &Message::user("just a question"))
                .await,
            0.0
        );
    }

    #[tokio::test]
    async fn explicit_with_value_requires_it_in_text() {
        let router = Router::new();
        let mut trigger = RoutingTrigger::new(TriggerType::Explicit);
        trigger.value = Some("code".into());
        assert_eq!(
            router
                .score_trigger(&trigger, &Message::user("@code help me"))
                .await,
            1.0
        );
        assert_eq!(
            router
                .score_trigger(&trigger, &Message::user("@billing help me"))
                .await,
            0.0
        );
    }

    #[tokio::test]
    async fn task_complete_phrases_and_metadata() {
        let router = Router::new();
        let trigger = RoutingTrigger::new(TriggerType::TaskComplete);
        assert_eq!(
            router
                .score_trigger(&trigger, &Message::user("ok, task is complete"))
                .await,
            1.0
        );
        let msg =
            Message::user("moving on").with_metadata("task_complete", serde_json::json!(true));
        assert_eq!(router.score_trigger(&trigger, &msg).await, 1.0);
        assert_eq!(
            router
                .score_trigger(&trigger, &Message::user("still working"))
                .await,
            0.0
        );
    }

    #[tokio::test]
    async fn error_trigger_levels() {
        let router = Router::new();
        let trigger = RoutingTrigger::new(TriggerType::Error);

        let mut msg = Message::user("all good");
        msg.tool_results.push(ToolResult {
            call_id: "c".into(),
            tool_name: "core.exec".into(),
            content: "boom".into(),
            is_error: true,
            kind: ToolResultKind::Text,
        });
        assert_eq!(router.score_trigger(&trigger, &msg).await, 1.0);

        let msg = Message::user("x").with_metadata("error", serde_json::json!("timeout"));
        assert_eq!(router.score_trigger(&trigger, &msg).await, 1.0);

        let msg = Message::user("i am unable to do this");
        assert_eq!(router.score_trigger(&trigger, &msg).await, 0.5);

        let msg = Message::user("smooth sailing");
        assert_eq!(router.score_trigger(&trigger, &msg).await, 0.0);
    }

    #[tokio::test]
    async fn priority_breaks_dual_matches() {
        let router = Router::new();
        let mut code = agent("code-agent");
        code.handoff_rules = vec![
            keyword_rule("review-agent", &["review"], 10),
            HandoffRule::new(
                "test-agent",
                vec![RoutingTrigger::pattern(r"test.*code")],
                20,
            ),
        ];
        let agents = vec![code, agent("review-agent"), agent("test-agent")];
        let msg = Message::user("review test my code");

        let m = router.route(&msg, "code-agent", &agents, &[]).await.unwrap();
        assert_eq!(m.target_agent_id, "test-agent");
        assert_eq!(m.priority, 20);
    }

    #[tokio::test]
    async fn tie_breaks_by_rule_order() {
        let router = Router::new();
        let mut a = agent("a");
        a.handoff_rules = vec![
            keyword_rule("b", &["help"], 10),
            keyword_rule("c", &["help"], 10),
        ];
        let agents = vec![a, agent("b"), agent("c")];
        let m = router
            .route(&Message::user("help me"), "a", &agents, &[])
            .await
            .unwrap();
        assert_eq!(m.target_agent_id, "b");
    }

    #[tokio::test]
    async fn genuine_match_beats_any_fallback() {
        let router = Router::new();
        let mut a = agent("a");
        a.handoff_rules = vec![keyword_rule("b", &["billing"], -5000)];
        let mut c = agent("c");
        c.handoff_rules = vec![HandoffRule::new(
            "d",
            vec![RoutingTrigger::new(TriggerType::Fallback)],
            1_000_000,
        )];
        let agents = vec![a, agent("b"), c, agent("d")];

        // Even with a hugely negative priority, the genuine keyword match
        // outranks the foreign fallback.
        let m = router
            .route(&Message::user("billing question"), "a", &agents, &[])
            .await
            .unwrap();
        assert_eq!(m.target_agent_id, "b");
        assert_eq!(m.band, MatchBand::Genuine);
    }

    #[tokio::test]
    async fn fallback_fires_when_nothing_matches() {
        let router = Router::new();
        let a = agent("a");
        let mut c = agent("c");
        c.handoff_rules = vec![HandoffRule::new(
            "d",
            vec![RoutingTrigger::new(TriggerType::Fallback)],
            0,
        )];
        let agents = vec![a, c, agent("d")];

        let m = router
            .route(&Message::user("unrelated"), "a", &agents, &[])
            .await
            .unwrap();
        assert_eq!(m.target_agent_id, "d");
        assert_eq!(m.band, MatchBand::Fallback);
    }

    #[tokio::test]
    async fn global_rules_apply_to_any_current_agent() {
        let router = Router::new();
        let agents = vec![agent("a"), agent("escalation")];
        let global = vec![keyword_rule("escalation", &["urgent"], 5)];

        let m = router
            .route(&Message::user("this is urgent"), "a", &agents, &global)
            .await
            .unwrap();
        assert_eq!(m.target_agent_id, "escalation");
    }

    #[tokio::test]
    async fn self_and_non_receiving_targets_are_skipped() {
        let router = Router::new();
        let mut a = agent("a");
        a.handoff_rules = vec![keyword_rule("a", &["loop"], 10)];
        let mut b = agent("b");
        b.can_receive_handoffs = false;
        let mut a2 = a.clone();
        a2.handoff_rules.push(keyword_rule("b", &["loop"], 5));
        let agents = vec![a2, b];

        assert!(router
            .route(&Message::user("loop here"), "a", &agents, &[])
            .await
            .is_none());
    }

    #[tokio::test]
    async fn threshold_gates_partial_keyword_hits() {
        let router = Router::new();
        let mut a = agent("a");
        let mut trigger = RoutingTrigger::keyword(&["alpha", "beta"]);
        trigger.threshold = Some(0.75);
        a.handoff_rules = vec![HandoffRule::new("b", vec![trigger], 10)];
        let agents = vec![a, agent("b")];

        // One of two keywords = 0.5 < 0.75.
        assert!(router
            .route(&Message::user("alpha only"), "a", &agents, &[])
            .await
            .is_none());
        assert!(router
            .route(&Message::user("alpha and beta"), "a", &agents, &[])
            .await
            .is_some());
    }

    #[tokio::test]
    async fn candidate_agents_broad_fallback() {
        let router = Router::new();
        let mut a = agent("a");
        a.handoff_rules = vec![keyword_rule("b", &["review"], 10)];
        let mut hidden = agent("hidden");
        hidden.can_receive_handoffs = false;
        let agents = vec![a, agent("b"), hidden];

        let matched = router
            .candidate_agents(&Message::user("review this"), &agents)
            .await;
        assert_eq!(matched, vec!["a"]);

        let broad = router
            .candidate_agents(&Message::user("nothing"), &agents)
            .await;
        assert_eq!(broad, vec!["a", "b"]);
    }

    struct FixedIntent(String, f64);

    #[async_trait]
    impl IntentClassifier for FixedIntent {
        async fn classify(&self, _text: &str, _candidates: &[String]) -> Result<(String, f64)> {
            Ok((self.0.clone(), self.1))
        }
    }

    struct FailingIntent;

    #[async_trait]
    impl IntentClassifier for FailingIntent {
        async fn classify(&self, _text: &str, _candidates: &[String]) -> Result<(String, f64)> {
            Err(nx_domain::Error::Other("classifier offline".into()))
        }
    }

    #[tokio::test]
    async fn intent_uses_classifier_confidence() {
        let router =
            Router::with_intent_classifier(Arc::new(FixedIntent("Billing".into(), 0.9)));
        let mut trigger = RoutingTrigger::new(TriggerType::Intent);
        trigger.values = vec!["billing".into(), "support".into()];
        let msg = Message::user("my invoice is wrong");
        assert_eq!(router.score_trigger(&trigger, &msg).await, 0.9);

        // Classified intent outside the candidate list scores zero.
        let router = Router::with_intent_classifier(Arc::new(FixedIntent("other".into(), 0.9)));
        assert_eq!(router.score_trigger(&trigger, &msg).await, 0.0);
    }

    #[tokio::test]
    async fn intent_degrades_to_zero() {
        // No classifier configured.
        let router = Router::new();
        let mut trigger = RoutingTrigger::new(TriggerType::Intent);
        trigger.values = vec!["billing".into()];
        let msg = Message::user("anything");
        assert_eq!(router.score_trigger(&trigger, &msg).await, 0.0);

        // Classifier errors degrade, not propagate.
        let router = Router::with_intent_classifier(Arc::new(FailingIntent));
        assert_eq!(router.score_trigger(&trigger, &msg).await, 0.0);
    }
}
