//! Session registry: the concurrent map of active conversations.
//!
//! Each session owns its own lock, so independent calls never block
//! each other while the single-writer-per-session invariant holds: a
//! turn runs with the session entry locked from first read to final
//! write-back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::domain::dialogue::DialogueState;
use crate::domain::session::SessionContext;
use crate::domain::foundation::SessionId;

/// Per-session turn counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub turns: u32,
    pub fast_path_hits: u32,
    pub classifier_failures: u32,
    pub generation_fallbacks: u32,
    pub total_turn_ms: u64,
}

impl SessionMetrics {
    /// Records one completed turn.
    pub fn record_turn(
        &mut self,
        elapsed_ms: u64,
        fast_path: bool,
        classifier_failed: bool,
        generation_fallback: bool,
    ) {
        self.turns += 1;
        self.total_turn_ms += elapsed_ms;
        if fast_path {
            self.fast_path_hits += 1;
        }
        if classifier_failed {
            self.classifier_failures += 1;
        }
        if generation_fallback {
            self.generation_fallbacks += 1;
        }
    }

    /// Mean turn latency over the session.
    pub fn mean_turn_ms(&self) -> u64 {
        if self.turns == 0 {
            0
        } else {
            self.total_turn_ms / self.turns as u64
        }
    }
}

/// The state guarded by one session's lock.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub context: SessionContext,
    pub state: DialogueState,
    pub metrics: SessionMetrics,
}

impl SessionEntry {
    /// Creates a fresh entry in the initial dialogue state.
    pub fn new(context: SessionContext) -> Self {
        Self {
            context,
            state: DialogueState::Idle,
            metrics: SessionMetrics::default(),
        }
    }
}

/// One registered session: its lock plus the out-of-band barge-in
/// signal, which must be reachable while a turn holds the lock.
#[derive(Debug)]
pub struct SessionSlot {
    pub entry: Mutex<SessionEntry>,
    cancel_epoch: AtomicU64,
}

impl SessionSlot {
    fn new(entry: SessionEntry) -> Self {
        Self {
            entry: Mutex::new(entry),
            cancel_epoch: AtomicU64::new(0),
        }
    }

    /// Current cancellation epoch; a turn records this at start and
    /// abandons itself when it changes.
    pub fn cancel_epoch(&self) -> u64 {
        self.cancel_epoch.load(Ordering::Acquire)
    }

    /// Signals a barge-in: any in-flight turn observes the bump and
    /// abandons its remaining effects.
    pub fn bump_cancel(&self) -> u64 {
        self.cancel_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// The concurrent session map. Explicitly constructed and owned;
/// nothing here is a global.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session. Returns false when the id is taken.
    pub async fn insert(&self, session_id: SessionId, entry: SessionEntry) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session_id) {
            return false;
        }
        sessions.insert(session_id, Arc::new(SessionSlot::new(entry)));
        true
    }

    /// Looks up a session's slot.
    pub async fn get(&self, session_id: SessionId) -> Option<Arc<SessionSlot>> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    /// Removes a session, returning its slot.
    pub async fn remove(&self, session_id: SessionId) -> Option<Arc<SessionSlot>> {
        self.sessions.write().await.remove(&session_id)
    }

    /// Number of active sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// True when no sessions are active.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Snapshot of the current sessions for iteration without holding
    /// the map lock.
    pub async fn snapshot(&self) -> Vec<(SessionId, Arc<SessionSlot>)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect()
    }

    /// Removes sessions idle past their tenant timeout.
    ///
    /// Expiry is checked under each session's own lock (`try_lock`), so
    /// the sweep never races an in-flight turn: a locked session is
    /// active by definition and skipped this round.
    pub async fn sweep_expired(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<SessionId> {
        let mut removed = Vec::new();
        for (session_id, slot) in self.snapshot().await {
            let Ok(entry) = slot.entry.try_lock() else {
                continue;
            };
            if entry.context.is_expired(now) {
                // Hold the session lock across the removal so a turn
                // cannot start on a half-removed session.
                self.sessions.write().await.remove(&session_id);
                removed.push(session_id);
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::{OrganizationContext, TenantConfig};
    use chrono::{Duration, Utc};

    fn entry(now: chrono::DateTime<Utc>) -> SessionEntry {
        SessionEntry::new(SessionContext::new(
            SessionId::new(),
            TenantConfig::default(),
            OrganizationContext::default(),
            now,
        ))
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        let now = Utc::now();

        assert!(registry.insert(id, entry(now)).await);
        assert!(!registry.insert(id, entry(now)).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn get_and_remove_round_trip() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();

        registry.insert(id, entry(Utc::now())).await;
        assert!(registry.get(id).await.is_some());

        registry.remove(id).await;
        assert!(registry.get(id).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_sessions() {
        let registry = SessionRegistry::new();
        let now = Utc::now();
        let stale_id = SessionId::new();
        let fresh_id = SessionId::new();

        registry.insert(stale_id, entry(now)).await;
        registry
            .insert(fresh_id, entry(now + Duration::seconds(280)))
            .await;

        // Default tenant timeout is 300s; only the first is stale.
        let removed = registry.sweep_expired(now + Duration::seconds(310)).await;

        assert_eq!(removed, vec![stale_id]);
        assert!(registry.get(stale_id).await.is_none());
        assert!(registry.get(fresh_id).await.is_some());
    }

    #[tokio::test]
    async fn sweep_skips_sessions_with_a_turn_in_flight() {
        let registry = SessionRegistry::new();
        let now = Utc::now();
        let id = SessionId::new();
        registry.insert(id, entry(now)).await;

        let slot = registry.get(id).await.unwrap();
        let _guard = slot.entry.lock().await;

        // Well past expiry, but the session lock is held.
        let removed = registry.sweep_expired(now + Duration::seconds(600)).await;

        assert!(removed.is_empty());
        assert!(registry.get(id).await.is_some());
    }

    #[tokio::test]
    async fn cancel_epoch_bumps_are_visible() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        registry.insert(id, entry(Utc::now())).await;

        let slot = registry.get(id).await.unwrap();
        let before = slot.cancel_epoch();
        slot.bump_cancel();

        assert_eq!(slot.cancel_epoch(), before + 1);
    }

    #[test]
    fn metrics_record_and_average() {
        let mut metrics = SessionMetrics::default();
        metrics.record_turn(100, true, false, false);
        metrics.record_turn(300, false, true, true);

        assert_eq!(metrics.turns, 2);
        assert_eq!(metrics.fast_path_hits, 1);
        assert_eq!(metrics.classifier_failures, 1);
        assert_eq!(metrics.generation_fallbacks, 1);
        assert_eq!(metrics.mean_turn_ms(), 200);
    }
}
