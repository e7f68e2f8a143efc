//! Subagent run registry — tracks independently-scheduled agent runs with
//! JSON persistence, timeout enforcement, and an archival sweeper.
//!
//! Persistence is best-effort: every mutation rewrites the whole map
//! atomically (`*.tmp` then rename), and failures are logged and swallowed;
//! the in-memory view stays authoritative for the life of the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use nx_domain::config::SubagentConfig;
use nx_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Error,
    Timeout,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Timeout)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

/// What to do with the child session once the run finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    #[default]
    Delete,
    Keep,
}

/// Terminal result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ended_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn completed(result: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Completed,
            result: Some(result.into()),
            error: None,
            ended_at: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            result: None,
            error: Some(error.into()),
            ended_at: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentRun {
    pub run_id: Uuid,
    pub child_session_key: String,
    pub requester_session_key: String,
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub cleanup: CleanupPolicy,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
    /// Zero disables the timeout.
    #[serde(default)]
    pub timeout_ms: u64,
    /// Epoch millis after which the sweeper drops the completed record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_at_ms: Option<i64>,
    #[serde(default)]
    pub cleanup_completed: bool,
}

impl SubagentRun {
    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Registration input.
#[derive(Debug, Clone, Default)]
pub struct RegisterParams {
    pub child_session_key: String,
    pub requester_session_key: String,
    pub task: String,
    pub label: Option<String>,
    pub cleanup: CleanupPolicy,
    /// Falls back to the configured default when `None`.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub active: usize,
    pub by_status: HashMap<String, usize>,
}

pub type RunCallback = Arc<dyn Fn(SubagentRun) + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SubagentRegistry {
    config: SubagentConfig,
    runs: RwLock<HashMap<Uuid, SubagentRun>>,
    on_start: RwLock<Option<RunCallback>>,
    on_complete: RwLock<Option<RunCallback>>,
    stop_tx: watch::Sender<bool>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SubagentRegistry {
    /// Create the registry, loading and merging any persisted records
    /// (in-memory entries win on conflict).
    pub fn new(config: SubagentConfig) -> Self {
        let mut runs = HashMap::new();
        if let Some(path) = &config.persist_path {
            for (id, run) in Self::load(path) {
                runs.entry(id).or_insert(run);
            }
        }
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            runs: RwLock::new(runs),
            on_start: RwLock::new(None),
            on_complete: RwLock::new(None),
            stop_tx,
            sweeper: Mutex::new(None),
        }
    }

    pub fn set_on_run_start(&self, callback: RunCallback) {
        *self.on_start.write() = Some(callback);
    }

    pub fn set_on_run_complete(&self, callback: RunCallback) {
        *self.on_complete.write() = Some(callback);
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Register a new run in `Pending`.
    pub fn register(&self, params: RegisterParams) -> SubagentRun {
        let run = SubagentRun {
            run_id: Uuid::new_v4(),
            child_session_key: params.child_session_key,
            requester_session_key: params.requester_session_key,
            task: params.task,
            label: params.label,
            cleanup: params.cleanup,
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            outcome: None,
            timeout_ms: params.timeout_ms.unwrap_or(self.config.default_timeout_ms),
            archive_at_ms: None,
            cleanup_completed: false,
        };
        self.runs.write().insert(run.run_id, run.clone());
        self.persist();
        tracing::debug!(run_id = %run.run_id, task = %run.task, "subagent run registered");
        run
    }

    /// Move a pending run to `Running`.
    pub fn start(&self, run_id: &Uuid) -> Result<SubagentRun> {
        let run = {
            let mut runs = self.runs.write();
            let run = runs
                .get_mut(run_id)
                .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
            if run.status != RunStatus::Pending {
                return Err(Error::Validation(format!(
                    "run {run_id} is {}, not pending",
                    run.status.as_str()
                )));
            }
            run.status = RunStatus::Running;
            run.started_at = Some(Utc::now());
            run.clone()
        };
        self.persist();
        self.fire(&self.on_start, run.clone());
        Ok(run)
    }

    /// Record a terminal outcome. Completed runs cannot transition again;
    /// only `cleanup_completed` may change afterwards.
    pub fn complete(&self, run_id: &Uuid, outcome: RunOutcome) -> Result<SubagentRun> {
        let run = {
            let mut runs = self.runs.write();
            let run = runs
                .get_mut(run_id)
                .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
            if run.is_complete() {
                return Err(Error::Validation(format!(
                    "run {run_id} already completed as {}",
                    run.status.as_str()
                )));
            }
            run.status = outcome.status;
            run.archive_at_ms =
                Some(outcome.ended_at.timestamp_millis() + self.config.archive_after_ms as i64);
            run.outcome = Some(outcome);
            run.clone()
        };
        self.persist();
        self.fire(&self.on_complete, run.clone());
        Ok(run)
    }

    /// Time out running records whose deadline has passed. Returns the ids
    /// that transitioned.
    pub fn check_timeouts(&self) -> Vec<Uuid> {
        let now = Utc::now();
        let mut timed_out = Vec::new();
        {
            let mut runs = self.runs.write();
            for run in runs.values_mut() {
                if run.status != RunStatus::Running || run.timeout_ms == 0 {
                    continue;
                }
                let Some(started_at) = run.started_at else {
                    continue;
                };
                let deadline = started_at + chrono::Duration::milliseconds(run.timeout_ms as i64);
                if deadline < now {
                    let outcome = RunOutcome {
                        status: RunStatus::Timeout,
                        result: None,
                        error: Some("subagent exceeded timeout".into()),
                        ended_at: now,
                    };
                    run.status = RunStatus::Timeout;
                    run.archive_at_ms =
                        Some(now.timestamp_millis() + self.config.archive_after_ms as i64);
                    run.outcome = Some(outcome);
                    timed_out.push(run.run_id);
                }
            }
        }
        if !timed_out.is_empty() {
            self.persist();
            let snapshot = self.runs.read();
            for id in &timed_out {
                if let Some(run) = snapshot.get(id) {
                    tracing::warn!(run_id = %id, "subagent run timed out");
                    self.fire(&self.on_complete, run.clone());
                }
            }
        }
        timed_out
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn get(&self, run_id: &Uuid) -> Option<SubagentRun> {
        self.runs.read().get(run_id).cloned()
    }

    pub fn list_for_requester(&self, requester_session_key: &str) -> Vec<SubagentRun> {
        let mut runs: Vec<SubagentRun> = self
            .runs
            .read()
            .values()
            .filter(|r| r.requester_session_key == requester_session_key)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at);
        runs
    }

    pub fn list_active(&self) -> Vec<SubagentRun> {
        let mut runs: Vec<SubagentRun> = self
            .runs
            .read()
            .values()
            .filter(|r| !r.is_complete())
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at);
        runs
    }

    pub fn stats(&self) -> RegistryStats {
        let runs = self.runs.read();
        let mut by_status = HashMap::new();
        for run in runs.values() {
            *by_status.entry(run.status.as_str().to_string()).or_insert(0) += 1;
        }
        RegistryStats {
            total: runs.len(),
            active: runs.values().filter(|r| !r.is_complete()).count(),
            by_status,
        }
    }

    // ── Mutation helpers ─────────────────────────────────────────

    pub fn delete(&self, run_id: &Uuid) -> Result<()> {
        let removed = self.runs.write().remove(run_id);
        if removed.is_none() {
            return Err(Error::RunNotFound(run_id.to_string()));
        }
        self.persist();
        Ok(())
    }

    /// Flag a completed run's external cleanup as done. The only mutation
    /// allowed after a terminal status.
    pub fn mark_cleanup_complete(&self, run_id: &Uuid) -> Result<()> {
        {
            let mut runs = self.runs.write();
            let run = runs
                .get_mut(run_id)
                .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
            run.cleanup_completed = true;
        }
        self.persist();
        Ok(())
    }

    // ── Sweeper ──────────────────────────────────────────────────

    /// Drop completed records whose archive deadline has passed. Returns
    /// the number removed.
    pub fn sweep_archived(&self) -> usize {
        let now_ms = Utc::now().timestamp_millis();
        let before;
        let after;
        {
            let mut runs = self.runs.write();
            before = runs.len();
            runs.retain(|_, run| {
                !(run.is_complete() && run.archive_at_ms.is_some_and(|at| at <= now_ms))
            });
            after = runs.len();
        }
        let removed = before - after;
        if removed > 0 {
            self.persist();
            tracing::debug!(removed, "archived subagent runs");
        }
        removed
    }

    /// Spawn the periodic sweeper (timeout checks + archival). Stopped by
    /// [`stop`](Self::stop).
    pub fn start_sweeper(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        let interval = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        registry.check_timeouts();
                        registry.sweep_archived();
                    }
                }
            }
        });
        *self.sweeper.lock() = Some(handle);
    }

    /// Signal the sweeper to exit promptly.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    // ── Callbacks ────────────────────────────────────────────────

    /// Invoke a callback off the caller's path; the registry never blocks
    /// on observers.
    fn fire(&self, slot: &RwLock<Option<RunCallback>>, run: SubagentRun) {
        if let Some(callback) = slot.read().clone() {
            tokio::spawn(async move { callback(run) });
        }
    }

    // ── Persistence ──────────────────────────────────────────────

    fn load(path: &Path) -> HashMap<Uuid, SubagentRun> {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<HashMap<Uuid, SubagentRun>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "subagent state unreadable");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        }
    }

    fn persist(&self) {
        let Some(path) = self.config.persist_path.clone() else {
            return;
        };
        let snapshot = self.runs.read().clone();
        if let Err(e) = Self::write_atomic(&path, &snapshot) {
            tracing::warn!(path = %path.display(), error = %e, "subagent state write failed");
        }
    }

    fn write_atomic(path: &PathBuf, runs: &HashMap<Uuid, SubagentRun>) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755));
            }
        }
        let json = serde_json::to_vec_pretty(runs)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
