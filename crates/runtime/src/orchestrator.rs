//! The orchestrator — routes each message to an agent, streams its chunks,
//! intercepts handoff results, and drives the handoff protocol. One spawned
//! task per in-flight message; the returned channel closes when the run
//! (including any chained handoffs) terminates.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use nx_domain::agent::AgentDefinition;
use nx_domain::handoff::{HandoffRequest, ReturnReport, SharedContext};
use nx_domain::message::{Message, ToolResultKind};
use nx_domain::stream::Chunk;
use nx_domain::{Config, Error, Result};
use nx_policy::{ApprovalManager, PolicyResolver, ToolCatalog, TrustStore};

use crate::cancel::{CancelRegistry, CancelToken};
use crate::capabilities::{
    IntentClassifier, LlmRuntime, RuntimeFactory, SessionState, SessionStore, Summarizer,
    Supervisor, Tool,
};
use crate::context::ContextManager;
use crate::events::{EventCallback, OrchestratorEvent};
use crate::handoff_tools::{HandoffTool, ListAgentsTool, ReturnControlTool};
use crate::router::{RouteMatch, Router};
use crate::subagents::{
    CleanupPolicy, RegisterParams, RunOutcome, SubagentRegistry, SubagentRun,
};

/// Capacity of the chunk channel returned by [`Orchestrator::process`].
const CHUNK_BUFFER: usize = 10;

/// Outcome of agent selection.
enum Selection {
    /// Process with this agent directly.
    Agent(String),
    /// The router moved the conversation off the current agent; run the
    /// handoff protocol before processing.
    Routed { from: String, route: RouteMatch },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Registered agent definitions in registration order. Reads return deep
/// copies; definitions are immutable once inserted.
#[derive(Default)]
pub struct AgentDirectory {
    defs: RwLock<Vec<AgentDefinition>>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, def: AgentDefinition) {
        self.defs.write().push(def);
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentDefinition> {
        self.defs.read().iter().find(|d| d.id == agent_id).cloned()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.defs.read().iter().any(|d| d.id == agent_id)
    }

    pub fn list(&self) -> Vec<AgentDefinition> {
        self.defs.read().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.defs.read().iter().map(|d| d.id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.read().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subagent spawn input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input for [`Orchestrator::spawn_subagent`].
#[derive(Debug, Clone, Default)]
pub struct SpawnParams {
    /// Agent to run; falls back to the default, then any registered agent.
    pub agent_id: Option<String>,
    pub task: String,
    pub label: Option<String>,
    /// Session that asked for the run; its cancellation cascades here.
    pub requester_session_key: String,
    pub cleanup: CleanupPolicy,
    pub timeout_ms: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    config: Config,
    directory: Arc<AgentDirectory>,
    runtimes: RwLock<HashMap<String, Arc<dyn LlmRuntime>>>,
    factory: Arc<dyn RuntimeFactory>,
    router: Router,
    context: ContextManager,
    policy: Arc<PolicyResolver>,
    approvals: Arc<ApprovalManager>,
    subagents: Arc<SubagentRegistry>,
    cancels: CancelRegistry,
    events: RwLock<Option<EventCallback>>,
    supervisor: RwLock<Option<Arc<dyn Supervisor>>>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        factory: Arc<dyn RuntimeFactory>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let catalog = Arc::new(ToolCatalog::new());
        let policy = Arc::new(PolicyResolver::new(catalog));
        let trust = Arc::new(TrustStore::new());
        let approvals = Arc::new(ApprovalManager::new(
            config.approval.clone(),
            policy.clone(),
            trust,
        ));
        let subagents = Arc::new(SubagentRegistry::new(config.subagents.clone()));
        let context = ContextManager::new(config.context.clone(), store);

        Self {
            config,
            directory: Arc::new(AgentDirectory::new()),
            runtimes: RwLock::new(HashMap::new()),
            factory,
            router: Router::new(),
            context,
            policy,
            approvals,
            subagents,
            cancels: CancelRegistry::new(),
            events: RwLock::new(None),
            supervisor: RwLock::new(None),
        }
    }

    pub fn with_intent_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.router = Router::with_intent_classifier(classifier);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.context.set_summarizer(summarizer);
        self
    }

    pub fn set_supervisor(&self, supervisor: Arc<dyn Supervisor>) {
        *self.supervisor.write() = Some(supervisor);
    }

    /// Optional observer for lifecycle events.
    pub fn set_event_callback(&self, callback: EventCallback) {
        *self.events.write() = Some(callback);
    }

    // ── Component access ─────────────────────────────────────────

    pub fn policy(&self) -> &Arc<PolicyResolver> {
        &self.policy
    }

    pub fn approvals(&self) -> &Arc<ApprovalManager> {
        &self.approvals
    }

    pub fn subagents(&self) -> &Arc<SubagentRegistry> {
        &self.subagents
    }

    pub fn directory(&self) -> &Arc<AgentDirectory> {
        &self.directory
    }

    // ── Registration ─────────────────────────────────────────────

    /// Validate and register an agent. The definition is deep-copied; the
    /// built-in handoff tools are registered on its runtime when peer
    /// handoffs are enabled.
    pub fn register_agent(&self, def: &AgentDefinition) -> Result<()> {
        def.validate()?;
        if self.directory.contains(&def.id) {
            return Err(Error::Validation(format!(
                "agent id '{}' is already registered",
                def.id
            )));
        }
        let def = def.clone();
        let runtime = self.factory.create(&def)?;

        if !def.system_prompt.is_empty() {
            runtime.set_system_prompt(&def.system_prompt);
        }
        if let Some(model) = &def.model {
            runtime.set_default_model(model);
        }
        runtime.set_max_iterations(def.max_iterations);

        if self.config.orchestrator.peer_handoffs {
            runtime.register_tool(Arc::new(HandoffTool::new(
                def.id.clone(),
                self.directory.clone(),
            )));
            runtime.register_tool(Arc::new(ReturnControlTool));
            runtime.register_tool(Arc::new(ListAgentsTool::new(self.directory.clone())));
        }

        tracing::info!(
            agent_id = %def.id,
            rules = def.handoff_rules.len(),
            can_receive = def.can_receive_handoffs,
            "registered agent"
        );
        self.runtimes.write().insert(def.id.clone(), runtime);
        self.directory.insert(def);
        Ok(())
    }

    pub fn register_tool_for_agent(&self, agent_id: &str, tool: Arc<dyn Tool>) -> Result<()> {
        let runtime = self
            .runtimes
            .read()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("unknown agent '{agent_id}'")))?;
        runtime.register_tool(tool);
        Ok(())
    }

    pub fn register_tool_for_all(&self, tool: Arc<dyn Tool>) {
        for runtime in self.runtimes.read().values() {
            runtime.register_tool(tool.clone());
        }
    }

    // ── Processing ───────────────────────────────────────────────

    /// Start processing a message. Returns a bounded chunk channel that
    /// closes when the run, including chained handoffs, terminates.
    pub fn process(
        self: &Arc<Self>,
        session: Arc<SessionState>,
        message: Message,
    ) -> mpsc::Receiver<Chunk> {
        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let orchestrator = Arc::clone(self);
        let cancel = self.cancels.register(&session.id);

        tokio::spawn(async move {
            let session_id = session.id.clone();
            let result = orchestrator
                .clone()
                .process_inner(session, message, tx.clone(), cancel)
                .await;
            if let Err(e) = result {
                let _ = tx.send(Chunk::error(e.to_string())).await;
            }
            // Subagent runs spawned on this session stay in its cancel group.
            orchestrator.cancels.remove_token(&session_id);
        });
        rx
    }

    /// Cancel an in-flight run (and any subagent runs in its group).
    pub fn cancel_session(&self, session_id: &str) -> usize {
        self.cancels.cancel(session_id)
    }

    async fn process_inner(
        self: Arc<Self>,
        session: Arc<SessionState>,
        message: Message,
        tx: mpsc::Sender<Chunk>,
        cancel: CancelToken,
    ) -> Result<()> {
        match self.select_agent(&session, &message).await? {
            Selection::Agent(agent_id) => {
                self.process_with_agent(agent_id, session, message, tx, cancel)
                    .await
            }
            // A router-initiated change is a handoff in its own right: same
            // bookkeeping, events, and rejection rules, but the target
            // receives the original message rather than a synthetic briefing.
            Selection::Routed { from, route } => {
                let request = HandoffRequest::new(
                    from,
                    route.target_agent_id.clone(),
                    format!(
                        "routing trigger {:?} matched (confidence {:.2})",
                        route.trigger_type, route.confidence
                    ),
                );
                self.handle_handoff(request, session, tx, cancel, Some(message))
                    .await
            }
        }
    }

    // ── Selection ────────────────────────────────────────────────

    /// Selection chain: supervisor → sticky current agent (router may move
    /// it) → router cold start → configured default → first registered.
    async fn select_agent(
        &self,
        session: &Arc<SessionState>,
        message: &Message,
    ) -> Result<Selection> {
        let defs = self.directory.list();
        if defs.is_empty() {
            return Err(Error::Routing("no agents registered".into()));
        }

        let supervisor = self.supervisor.read().clone();
        if let Some(supervisor) = supervisor {
            match supervisor.select(session, message, &defs).await {
                Ok(Some(agent_id)) if self.directory.contains(&agent_id) => {
                    return Ok(self.selected(session, agent_id, "supervisor"));
                }
                Ok(Some(agent_id)) => {
                    tracing::warn!(%agent_id, "supervisor chose an unregistered agent; ignoring");
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "supervisor selection failed; falling back");
                }
            }
        }

        let current = session.metadata().current_agent_id;
        if let Some(current) = current.filter(|id| self.directory.contains(id)) {
            let global = &self.config.orchestrator.global_handoff_rules;
            return Ok(
                match self.router.route(message, &current, &defs, global).await {
                    Some(route) => {
                        self.emit(OrchestratorEvent::AgentSelected {
                            session_id: session.id.clone(),
                            agent_id: route.target_agent_id.clone(),
                            via: "router".into(),
                        });
                        Selection::Routed {
                            from: current,
                            route,
                        }
                    }
                    None => self.selected(session, current, "sticky"),
                },
            );
        }

        if let Some(agent_id) = self.router.select_initial(message, &defs).await {
            return Ok(self.selected(session, agent_id, "router"));
        }

        if let Some(default) = &self.config.orchestrator.default_agent_id {
            if self.directory.contains(default) {
                return Ok(self.selected(session, default.clone(), "default"));
            }
        }

        let first = defs[0].id.clone();
        Ok(self.selected(session, first, "first_registered"))
    }

    fn selected(&self, session: &Arc<SessionState>, agent_id: String, via: &str) -> Selection {
        self.emit(OrchestratorEvent::AgentSelected {
            session_id: session.id.clone(),
            agent_id: agent_id.clone(),
            via: via.to_string(),
        });
        Selection::Agent(agent_id)
    }

    // ── Agent execution ──────────────────────────────────────────

    /// Run one agent over one message, forwarding its chunks and
    /// intercepting handoff/return results. Boxed for recursion across
    /// chained handoffs.
    fn process_with_agent(
        self: Arc<Self>,
        agent_id: String,
        session: Arc<SessionState>,
        message: Message,
        tx: mpsc::Sender<Chunk>,
        cancel: CancelToken,
    ) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let runtime = self
                .runtimes
                .read()
                .get(&agent_id)
                .cloned()
                .ok_or_else(|| Error::Routing(format!("no runtime for agent '{agent_id}'")))?;

            // The selected agent becomes current before it produces anything.
            session.update_metadata(|m| m.current_agent_id = Some(agent_id.clone()));

            let mut stream = match runtime.process(session.clone(), message).await {
                Ok(stream) => stream,
                Err(e) => {
                    self.emit(OrchestratorEvent::AgentError {
                        session_id: session.id.clone(),
                        agent_id: agent_id.clone(),
                        error: e.to_string(),
                    });
                    let _ = tx.send(Chunk::error(format!("agent '{agent_id}': {e}"))).await;
                    return Ok(());
                }
            };

            while let Some(chunk) = stream.next().await {
                if cancel.is_cancelled() {
                    tracing::debug!(session_id = %session.id, "run cancelled; dropping stream");
                    break;
                }
                match chunk {
                    Chunk::ToolResult { result } => match result.kind.clone() {
                        ToolResultKind::Handoff { request } => {
                            self.clone()
                                .handle_handoff(
                                    request,
                                    session.clone(),
                                    tx.clone(),
                                    cancel.clone(),
                                    None,
                                )
                                .await?;
                        }
                        ToolResultKind::Return { report } => {
                            self.clone()
                                .handle_return(
                                    &agent_id,
                                    report,
                                    session.clone(),
                                    tx.clone(),
                                    cancel.clone(),
                                )
                                .await?;
                        }
                        ToolResultKind::Text => {
                            // Foreign runtimes can only tag results as text;
                            // re-validate the strict envelope before acting.
                            if let Some(mut request) =
                                HandoffRequest::parse_result(&result.content)
                            {
                                if request.from_agent.is_empty() {
                                    request.from_agent = agent_id.clone();
                                }
                                self.clone()
                                    .handle_handoff(
                                        request,
                                        session.clone(),
                                        tx.clone(),
                                        cancel.clone(),
                                        None,
                                    )
                                    .await?;
                            } else if tx.send(Chunk::ToolResult { result }).await.is_err() {
                                break;
                            }
                        }
                    },
                    other => {
                        if tx.send(other).await.is_err() {
                            // Receiver gone; stop forwarding.
                            break;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    // ── Handoffs ─────────────────────────────────────────────────

    /// Drive one handoff: validate, build the shared context, roll session
    /// metadata, and reinvoke the target agent — with a synthetic system
    /// briefing, or with `deliver` when the transfer was router-initiated.
    /// Failures emit `handoff_failed` and a single error chunk; the
    /// conversation survives.
    fn handle_handoff(
        self: Arc<Self>,
        request: HandoffRequest,
        session: Arc<SessionState>,
        tx: mpsc::Sender<Chunk>,
        cancel: CancelToken,
        deliver: Option<Message>,
    ) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.emit(OrchestratorEvent::HandoffInitiated {
                session_id: session.id.clone(),
                from: request.from_agent.clone(),
                to: request.to_agent.clone(),
                reason: request.reason.clone(),
            });

            let max_depth = self.config.orchestrator.max_handoff_depth;
            let rejection = {
                let meta = session.metadata();
                if meta.handoff_depth() >= max_depth {
                    Some(format!("maximum handoff depth {max_depth} reached"))
                } else if request.to_agent == request.from_agent {
                    Some("agent cannot hand off to itself".into())
                } else {
                    match self.directory.get(&request.to_agent) {
                        None => Some(format!("unknown target agent '{}'", request.to_agent)),
                        Some(def) if !def.can_receive_handoffs => {
                            Some(format!("agent '{}' cannot receive handoffs", request.to_agent))
                        }
                        Some(_) => None,
                    }
                }
            };
            if let Some(reason) = rejection {
                return self
                    .reject_handoff(&request, &reason, &session, &tx)
                    .await;
            }

            // Shared context, under the matching rule's mode.
            let source_rule = self.directory.get(&request.from_agent).and_then(|def| {
                def.handoff_rules
                    .iter()
                    .find(|r| r.target_agent_id == request.to_agent)
                    .cloned()
            });
            let shared = self
                .context
                .build(&session.id, &request, source_rule.as_ref())
                .await;
            let mode = source_rule
                .as_ref()
                .map(|r| r.context_mode)
                .unwrap_or(self.config.context.default_mode);
            self.emit(OrchestratorEvent::ContextShared {
                session_id: session.id.clone(),
                from: request.from_agent.clone(),
                to: request.to_agent.clone(),
                mode,
                message_count: shared.messages.len(),
            });

            let return_expected = request.return_expected
                || source_rule.as_ref().is_some_and(|r| r.return_to_sender);
            let mut request = request;
            request.context = shared;

            // Metadata rolls before the target produces anything.
            let anchor = conversation_start(&request.context).unwrap_or_else(Utc::now);
            session.update_metadata(|m| {
                m.record_handoff(
                    &request.from_agent,
                    &request.to_agent,
                    &request.reason,
                    return_expected,
                    anchor,
                )
            });

            let message = match deliver {
                Some(message) => message,
                None => {
                    let mut message = Message::system(self.handoff_briefing(&request, return_expected));
                    message.session_id = session.id.clone();
                    message
                        .metadata
                        .insert("handoff".into(), serde_json::json!(true));
                    message
                }
            };

            let outcome = self
                .clone()
                .process_with_agent(
                    request.to_agent.clone(),
                    session.clone(),
                    message,
                    tx.clone(),
                    cancel,
                )
                .await;

            match outcome {
                Ok(()) => {
                    self.emit(OrchestratorEvent::HandoffCompleted {
                        session_id: session.id.clone(),
                        from: request.from_agent.clone(),
                        to: request.to_agent.clone(),
                    });
                    Ok(())
                }
                Err(e) => {
                    self.reject_handoff(&request, &e.to_string(), &session, &tx)
                        .await
                }
            }
        })
    }

    async fn reject_handoff(
        &self,
        request: &HandoffRequest,
        reason: &str,
        session: &Arc<SessionState>,
        tx: &mpsc::Sender<Chunk>,
    ) -> Result<()> {
        self.emit(OrchestratorEvent::HandoffFailed {
            session_id: session.id.clone(),
            from: request.from_agent.clone(),
            to: request.to_agent.clone(),
            reason: reason.to_string(),
        });
        let _ = tx
            .send(Chunk::error(format!(
                "handoff to '{}' failed: {reason}",
                request.to_agent
            )))
            .await;
        Ok(())
    }

    /// The synthetic system message the target agent starts from.
    fn handoff_briefing(&self, request: &HandoffRequest, return_expected: bool) -> String {
        let mut briefing = format!(
            "Control transferred from '{}' to '{}'. Reason: {}.",
            request.from_agent, request.to_agent, request.reason
        );
        if !request.context.task.is_empty() {
            briefing.push_str(&format!(" Task: {}.", request.context.task));
        }
        if return_expected {
            briefing.push_str(&format!(
                " Return control to '{}' with the return_control tool when finished.",
                request.from_agent
            ));
        }
        let rendered = self.context.format_for_prompt(&request.context);
        if !rendered.is_empty() {
            briefing.push_str("\n\n");
            briefing.push_str(&rendered);
        }
        briefing
    }

    /// A `return_control` result: pop the stack and hand control back. When
    /// nothing is waiting, the report is forwarded as a plain chunk.
    async fn handle_return(
        self: Arc<Self>,
        current_agent: &str,
        report: ReturnReport,
        session: Arc<SessionState>,
        tx: mpsc::Sender<Chunk>,
        cancel: CancelToken,
    ) -> Result<()> {
        let Some(waiting) = session.update_metadata(|m| m.pop_return()) else {
            let _ = tx
                .send(Chunk::text(format!("[no agent waiting] {}", report.summary)))
                .await;
            return Ok(());
        };

        let mut request = HandoffRequest::new(
            current_agent,
            &waiting,
            format!("returning control: {}", report.summary),
        );
        request.context = SharedContext {
            summary: Some(report.summary.clone()),
            ..Default::default()
        };
        if let Some(result) = report.result {
            request.context.variables.insert("return_result".into(), result);
        }
        request
            .context
            .variables
            .insert("return_success".into(), serde_json::json!(report.success));

        self.handle_handoff(request, session, tx, cancel, None).await
    }

    // ── Subagents ────────────────────────────────────────────────

    /// Register and launch an independent subagent run. The run joins the
    /// requester session's cancel group and reports through the registry.
    pub fn spawn_subagent(self: &Arc<Self>, params: SpawnParams) -> Result<SubagentRun> {
        let agent_id = params
            .agent_id
            .clone()
            .or_else(|| self.config.orchestrator.default_agent_id.clone())
            .or_else(|| self.directory.ids().into_iter().next())
            .ok_or_else(|| Error::Routing("no agents registered".into()))?;
        if !self.directory.contains(&agent_id) {
            return Err(Error::Validation(format!("unknown agent '{agent_id}'")));
        }

        let child_session_key = format!("subagent:{agent_id}:{}", uuid::Uuid::new_v4());
        let record = self.subagents.register(RegisterParams {
            child_session_key: child_session_key.clone(),
            requester_session_key: params.requester_session_key.clone(),
            task: params.task.clone(),
            label: params.label,
            cleanup: params.cleanup,
            timeout_ms: params.timeout_ms,
        });
        let run_id = record.run_id;

        let run_key = format!("run:{run_id}");
        let token = self.cancels.register(&run_key);
        self.cancels
            .join_group(&params.requester_session_key, &run_key);

        let orchestrator = Arc::clone(self);
        let requester = params.requester_session_key;
        tokio::spawn(async move {
            if orchestrator.subagents.start(&run_id).is_err() {
                return;
            }
            let session = SessionState::new(child_session_key);
            let message = Message::user(params.task);
            let mut outcome = orchestrator
                .clone()
                .drain_run(agent_id, session, message, token.clone())
                .await;
            if token.is_cancelled() {
                outcome = RunOutcome::failed("cancelled");
            }
            // Completion races the timeout sweep; whichever lands first wins.
            let _ = orchestrator.subagents.complete(&run_id, outcome);
            orchestrator.cancels.remove_token(&run_key);
            orchestrator.cancels.leave_group(&requester, &run_key);
        });

        Ok(record)
    }

    /// Run an agent to completion and fold its chunks into an outcome.
    async fn drain_run(
        self: Arc<Self>,
        agent_id: String,
        session: Arc<SessionState>,
        message: Message,
        cancel: CancelToken,
    ) -> RunOutcome {
        let (tx, mut rx) = mpsc::channel(CHUNK_BUFFER);
        let driver = tokio::spawn(self.process_with_agent(agent_id, session, message, tx, cancel));

        let mut text = String::new();
        let mut error: Option<String> = None;
        while let Some(chunk) = rx.recv().await {
            match chunk {
                Chunk::Text { text: t } => text.push_str(&t),
                Chunk::Error { message } => error = Some(message),
                _ => {}
            }
        }
        match driver.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error = Some(e.to_string()),
            Err(e) => error = Some(format!("run task panicked: {e}")),
        }
        match error {
            Some(e) => RunOutcome::failed(e),
            None => RunOutcome::completed(text),
        }
    }

    // ── Events ───────────────────────────────────────────────────

    fn emit(&self, event: OrchestratorEvent) {
        event.trace();
        if let Some(callback) = self.events.read().clone() {
            callback(event);
        }
    }
}

/// Parse the `conversation_start` variable stamped by the context manager.
fn conversation_start(context: &SharedContext) -> Option<DateTime<Utc>> {
    context
        .variables
        .get("conversation_start")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

