//! Edge-tool approval workflow — gates tool invocations from external
//! devices behind human approval, with trust levels and per-session
//! auto-approve rate limits.
//!
//! `check_approval` either returns immediately (auto-approved or not
//! governed) or registers a pending record and returns an
//! `ApprovalRequired` error carrying the request id. Callers then
//! `wait_for_approval` until a reviewer decides, the record expires, or the
//! wait is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use uuid::Uuid;

use nx_domain::policy::{RiskLevel, TrustLevel};
use nx_domain::{config::ApprovalConfig, Error, Result};

use crate::identity::ToolSource;
use crate::resolver::PolicyResolver;
use crate::trust::TrustStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ApprovalStatus {
    pub fn is_decided(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

/// A human-visible approval record. Decided at most once; expiry moves
/// Pending → Expired and never touches decided records.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub tool_name: String,
    pub edge_id: String,
    /// Serialized tool input, shown to the reviewer.
    pub input: String,
    pub risk: RiskLevel,
    /// Trust level snapshot at request time.
    pub trust: TrustLevel,
    pub session_id: String,
    pub user_id: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<String>,
}

/// Invoked when a new pending approval is registered.
pub type OnApprovalRequired = Arc<dyn Fn(ApprovalRequest) + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How long `wait_for_approval` sleeps between re-checks when no decision
/// signal arrives. Also the latency bound for observing lazy expiry.
const WAIT_POLL: Duration = Duration::from_millis(200);

/// Decided/expired records are swept this long after their expiry.
fn decided_retention() -> chrono::Duration {
    chrono::Duration::hours(1)
}

pub struct ApprovalManager {
    config: ApprovalConfig,
    resolver: Arc<PolicyResolver>,
    trust: Arc<TrustStore>,
    requests: RwLock<HashMap<Uuid, ApprovalRequest>>,
    /// Auto-approve counters keyed (session id, risk level).
    session_approvals: RwLock<HashMap<(String, RiskLevel), u32>>,
    /// Signals waiters whenever any record changes state.
    decided: Notify,
    on_required: RwLock<Option<OnApprovalRequired>>,
    stop_tx: watch::Sender<bool>,
}

impl ApprovalManager {
    pub fn new(
        config: ApprovalConfig,
        resolver: Arc<PolicyResolver>,
        trust: Arc<TrustStore>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            resolver,
            trust,
            requests: RwLock::new(HashMap::new()),
            session_approvals: RwLock::new(HashMap::new()),
            decided: Notify::new(),
            on_required: RwLock::new(None),
            stop_tx,
        }
    }

    pub fn set_on_approval_required(&self, callback: OnApprovalRequired) {
        *self.on_required.write() = Some(callback);
    }

    // ── Decision entry point ─────────────────────────────────────

    /// Decide whether an edge tool invocation may proceed now.
    ///
    /// `Ok(())` means proceed (not governed, or auto-approved). An
    /// `ApprovalRequired` error means a pending record was registered and
    /// the caller should wait on its id.
    pub fn check_approval(
        &self,
        tool_name: &str,
        edge_id: &str,
        input: &str,
        session_id: &str,
        user_id: &str,
        risk: RiskLevel,
    ) -> Result<()> {
        let ident = self.resolver.catalog().identity(tool_name);
        if ident.source != ToolSource::Edge && edge_id.is_empty() {
            return Ok(());
        }
        let device = if edge_id.is_empty() {
            ident.namespace.clone().unwrap_or_default()
        } else {
            edge_id.to_string()
        };
        let trust = self.trust.get(&device);
        // Trust-on-first-use: this check runs at the pre-observation level,
        // but the sighting promotes an unseen device to Tofu for later calls.
        if !device.is_empty() {
            self.trust.observe(&device);
        }

        if self.matches_any(&self.config.always_require_approval_for, tool_name) {
            return self.register_pending(tool_name, &device, input, session_id, user_id, risk, trust);
        }
        if self.matches_any(&self.config.never_require_approval_for, tool_name) {
            return Ok(());
        }

        let rule = self.config.rule_for(risk);
        if rule.require_approval {
            let under_cap = self.session_count(session_id, risk) < rule.max_auto_approve_per_session;
            if trust.meets(rule.min_trust_level) && under_cap {
                self.bump_session_count(session_id, risk);
                tracing::debug!(
                    tool = tool_name,
                    edge = %device,
                    risk = ?risk,
                    "auto-approved edge tool call"
                );
                return Ok(());
            }
            return self.register_pending(tool_name, &device, input, session_id, user_id, risk, trust);
        }

        if self.config.require_approval_for_untrusted && trust == TrustLevel::Untrusted {
            return self.register_pending(tool_name, &device, input, session_id, user_id, risk, trust);
        }
        if self.config.require_approval_for_high_risk && risk >= RiskLevel::High {
            return self.register_pending(tool_name, &device, input, session_id, user_id, risk, trust);
        }

        Ok(())
    }

    fn matches_any(&self, patterns: &[String], tool_name: &str) -> bool {
        patterns
            .iter()
            .any(|p| self.resolver.pattern_matches(p, tool_name))
    }

    #[allow(clippy::too_many_arguments)]
    fn register_pending(
        &self,
        tool_name: &str,
        edge_id: &str,
        input: &str,
        session_id: &str,
        user_id: &str,
        risk: RiskLevel,
        trust: TrustLevel,
    ) -> Result<()> {
        let now = Utc::now();
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            tool_name: tool_name.to_string(),
            edge_id: edge_id.to_string(),
            input: input.to_string(),
            risk,
            trust,
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            requested_at: now,
            expires_at: now + chrono::Duration::seconds(self.config.approval_timeout_secs as i64),
            status: ApprovalStatus::Pending,
            decided_by: None,
            decided_at: None,
            denial_reason: None,
        };
        let id = request.id;
        self.requests.write().insert(id, request.clone());
        tracing::info!(
            request_id = %id,
            tool = tool_name,
            edge = edge_id,
            risk = ?risk,
            "edge tool call requires approval"
        );
        if let Some(cb) = self.on_required.read().clone() {
            cb(request);
        }
        Err(Error::ApprovalRequired {
            request_id: id.to_string(),
        })
    }

    // ── Waiting ──────────────────────────────────────────────────

    /// Non-blocking probe: `Ok` when approved, the terminal error when
    /// denied or expired, `ApprovalPending` while undecided.
    pub fn try_result(&self, id: &Uuid) -> Result<()> {
        let request = self
            .get_request(id)
            .ok_or_else(|| Error::Other(format!("approval request not found: {id}")))?;
        match request.status {
            ApprovalStatus::Approved => Ok(()),
            ApprovalStatus::Denied => Err(Error::ApprovalDenied {
                reason: request
                    .denial_reason
                    .unwrap_or_else(|| "denied by reviewer".into()),
            }),
            ApprovalStatus::Expired => Err(Error::ApprovalExpired),
            ApprovalStatus::Pending => Err(Error::ApprovalPending),
        }
    }

    /// Block until the record is decided or expires. Dropping the returned
    /// future (e.g. in a `select!` against a cancel signal) abandons the
    /// wait; the record stays pending and expires on its TTL.
    pub async fn wait_for_approval(&self, id: Uuid) -> Result<()> {
        loop {
            match self.try_result(&id) {
                Err(Error::ApprovalPending) => {
                    tokio::select! {
                        _ = self.decided.notified() => {}
                        _ = tokio::time::sleep(WAIT_POLL) => {}
                    }
                }
                other => return other,
            }
        }
    }

    // ── Decisions ────────────────────────────────────────────────

    /// Resolve a pending request as approved. Deciding an already-decided
    /// or expired record is a conflict and does not mutate state.
    pub fn approve(&self, id: &Uuid, decided_by: &str) -> Result<()> {
        self.decide(id, decided_by, None)
    }

    /// Resolve a pending request as denied.
    pub fn deny(&self, id: &Uuid, decided_by: &str, reason: Option<String>) -> Result<()> {
        self.decide(id, decided_by, Some(reason.unwrap_or_else(|| "denied".into())))
    }

    fn decide(&self, id: &Uuid, decided_by: &str, denial: Option<String>) -> Result<()> {
        let mut requests = self.requests.write();
        let request = requests
            .get_mut(id)
            .ok_or_else(|| Error::Other(format!("approval request not found: {id}")))?;

        // Lazy expiry at observation time.
        if request.status == ApprovalStatus::Pending && request.expires_at <= Utc::now() {
            request.status = ApprovalStatus::Expired;
            self.decided.notify_waiters();
            return Err(Error::ApprovalConflict("expired".into()));
        }
        if request.status.is_decided() {
            return Err(Error::ApprovalConflict(format!("{:?}", request.status)));
        }

        request.status = if denial.is_some() {
            ApprovalStatus::Denied
        } else {
            ApprovalStatus::Approved
        };
        request.decided_by = Some(decided_by.to_string());
        request.decided_at = Some(Utc::now());
        request.denial_reason = denial;
        drop(requests);
        self.decided.notify_waiters();
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Snapshot a record by id, flipping overdue pendings to Expired.
    pub fn get_request(&self, id: &Uuid) -> Option<ApprovalRequest> {
        let mut requests = self.requests.write();
        let request = requests.get_mut(id)?;
        if request.status == ApprovalStatus::Pending && request.expires_at <= Utc::now() {
            request.status = ApprovalStatus::Expired;
            self.decided.notify_waiters();
        }
        Some(request.clone())
    }

    /// All currently pending records (for reviewer surfaces).
    pub fn list_pending(&self) -> Vec<ApprovalRequest> {
        let now = Utc::now();
        self.requests
            .read()
            .values()
            .filter(|r| r.status == ApprovalStatus::Pending && r.expires_at > now)
            .cloned()
            .collect()
    }

    fn session_count(&self, session_id: &str, risk: RiskLevel) -> u32 {
        self.session_approvals
            .read()
            .get(&(session_id.to_string(), risk))
            .copied()
            .unwrap_or(0)
    }

    fn bump_session_count(&self, session_id: &str, risk: RiskLevel) {
        *self
            .session_approvals
            .write()
            .entry((session_id.to_string(), risk))
            .or_insert(0) += 1;
    }

    /// Clear all auto-approve counters for a session.
    pub fn reset_session_approvals(&self, session_id: &str) {
        self.session_approvals
            .write()
            .retain(|(sid, _), _| sid != session_id);
    }

    // ── Cleanup ──────────────────────────────────────────────────

    /// Flip overdue pendings to Expired, then drop decided/expired records
    /// whose expiry is more than an hour old. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let mut requests = self.requests.write();
        let mut flipped = false;
        for request in requests.values_mut() {
            if request.status == ApprovalStatus::Pending && request.expires_at <= now {
                request.status = ApprovalStatus::Expired;
                flipped = true;
            }
        }
        let before = requests.len();
        requests.retain(|_, r| {
            !(r.status.is_decided() && r.expires_at + decided_retention() <= now)
        });
        let removed = before - requests.len();
        drop(requests);
        if flipped {
            self.decided.notify_waiters();
        }
        if removed > 0 {
            tracing::debug!(removed, "swept decided approval records");
        }
        removed
    }

    /// Spawn the periodic cleanup sweeper. Stopped by [`stop`](Self::stop).
    pub fn start_sweeper(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        let interval = Duration::from_secs(self.config.cleanup_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        manager.cleanup_expired();
                    }
                }
            }
        });
    }

    /// Signal the sweeper to exit.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
