//! Per-session cancellation with fan-out to spawned subagent runs.
//!
//! Each in-flight `process` call registers a token keyed by session id.
//! Subagent runs spawned on behalf of a session join that session's group,
//! so cancelling the parent signals every child run too.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cooperative cancellation flag, checked at suspension points.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Tracks active tokens by owner key, with owner→member groups for
/// cascading cancellation.
#[derive(Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<String, CancelToken>>,
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and track a fresh token for `key`, replacing any prior one.
    pub fn register(&self, key: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(key.to_string(), token.clone());
        token
    }

    /// Signal `key` and every member of its group. Returns how many tokens
    /// were signalled.
    pub fn cancel(&self, key: &str) -> usize {
        let tokens = self.tokens.lock();
        let mut signalled = 0;
        if let Some(token) = tokens.get(key) {
            token.cancel();
            signalled += 1;
        }
        if let Some(members) = self.groups.lock().get(key) {
            for member in members {
                if let Some(token) = tokens.get(member) {
                    token.cancel();
                    signalled += 1;
                }
            }
        }
        signalled
    }

    /// Drop the token for `key` and dissolve any group it owned.
    pub fn remove(&self, key: &str) {
        self.tokens.lock().remove(key);
        self.groups.lock().remove(key);
    }

    /// Drop only the token, leaving `key`'s group intact so members spawned
    /// during the run stay cancellable through it.
    pub fn remove_token(&self, key: &str) {
        self.tokens.lock().remove(key);
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.tokens.lock().contains_key(key)
    }

    /// Attach `member` to `owner`'s cancellation group.
    pub fn join_group(&self, owner: &str, member: &str) {
        self.groups
            .lock()
            .entry(owner.to_string())
            .or_default()
            .insert(member.to_string());
    }

    pub fn leave_group(&self, owner: &str, member: &str) {
        let mut groups = self.groups.lock();
        if let Some(members) = groups.get_mut(owner) {
            members.remove(member);
            if members.is_empty() {
                groups.remove(owner);
            }
        }
    }
}
