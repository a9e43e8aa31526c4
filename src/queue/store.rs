//! In-memory table of waiting players
//!
//! The store is partitioned by time control and keyed by queue id. Every slot
//! owns the abort handle of its entry's expansion timer, so dropping an entry
//! from the table and cancelling its timer always happen together.
//!
//! The store itself is not synchronized; the engine keeps it behind a single
//! async mutex.

use std::collections::HashMap;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::{MatchmakingError, Result};
use crate::queue::entry::QueueEntry;
use crate::types::{QueueId, SocketId, TimeControl};

/// Entry plus the handle of its pending expansion timer
#[derive(Debug)]
struct QueueSlot {
    entry: QueueEntry,
    timer: Option<AbortHandle>,
}

impl QueueSlot {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Debug, Default)]
pub struct QueueStore {
    pools: HashMap<TimeControl, HashMap<QueueId, QueueSlot>>,
    locations: HashMap<QueueId, TimeControl>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry into the pool of its time control
    pub fn add(&mut self, entry: QueueEntry) -> Result<()> {
        if self.locations.contains_key(&entry.queue_id) {
            warn!("Rejecting duplicate queue id {}", entry.queue_id);
            return Err(MatchmakingError::DuplicateQueueId {
                queue_id: entry.queue_id,
            }
            .into());
        }

        self.locations.insert(entry.queue_id, entry.time_control);
        self.pools
            .entry(entry.time_control)
            .or_default()
            .insert(entry.queue_id, QueueSlot { entry, timer: None });
        Ok(())
    }

    /// Hand the expansion timer of an entry to its slot.
    ///
    /// Returns false and aborts the timer if the entry is already gone. A
    /// previously attached timer is aborted and replaced.
    pub fn attach_timer(&mut self, queue_id: QueueId, timer: AbortHandle) -> bool {
        match self.slot_mut(queue_id) {
            Some(slot) => {
                slot.cancel_timer();
                slot.timer = Some(timer);
                true
            }
            None => {
                timer.abort();
                false
            }
        }
    }

    /// Detach the timer handle without aborting it.
    ///
    /// A firing timer calls this on itself so that a removal later in the same
    /// tick cannot abort the task that is doing the removal.
    pub fn take_timer(&mut self, queue_id: QueueId) -> Option<AbortHandle> {
        self.slot_mut(queue_id).and_then(|slot| slot.timer.take())
    }

    pub fn has_timer(&self, queue_id: QueueId) -> bool {
        self.slot(queue_id).is_some_and(|slot| slot.timer.is_some())
    }

    /// Remove an entry and cancel its timer. Unknown ids are a no-op.
    pub fn remove_by_id(&mut self, queue_id: QueueId) -> Option<QueueEntry> {
        let time_control = self.locations.remove(&queue_id)?;
        let pool = self.pools.get_mut(&time_control)?;
        let mut slot = pool.remove(&queue_id)?;
        slot.cancel_timer();
        debug!(
            "Removed queue entry {} for user {} from {} pool",
            queue_id, slot.entry.user_id, time_control
        );
        Some(slot.entry)
    }

    pub fn remove_by_user(&mut self, user_id: &str) -> Vec<QueueEntry> {
        let ids = self.ids_matching(|entry| entry.user_id == user_id);
        ids.into_iter()
            .filter_map(|id| self.remove_by_id(id))
            .collect()
    }

    pub fn remove_by_socket(&mut self, socket_id: &str) -> Vec<QueueEntry> {
        let ids = self.ids_matching(|entry| entry.socket_id == socket_id);
        ids.into_iter()
            .filter_map(|id| self.remove_by_id(id))
            .collect()
    }

    pub fn find_by_id(&self, queue_id: QueueId) -> Option<&QueueEntry> {
        self.slot(queue_id).map(|slot| &slot.entry)
    }

    pub fn get_mut(&mut self, queue_id: QueueId) -> Option<&mut QueueEntry> {
        self.slot_mut(queue_id).map(|slot| &mut slot.entry)
    }

    /// Snapshot of a pool, oldest entry first
    pub fn pool_for(&self, time_control: TimeControl) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = self
            .pools
            .get(&time_control)
            .map(|pool| pool.values().map(|slot| slot.entry.clone()).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.queue_id.cmp(&b.queue_id))
        });
        entries
    }

    /// Point an entry at a new connection, returning the previous socket
    pub fn reassign_socket(&mut self, queue_id: QueueId, socket_id: SocketId) -> Option<SocketId> {
        self.get_mut(queue_id)
            .map(|entry| std::mem::replace(&mut entry.socket_id, socket_id))
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn waiting_by_time_control(&self) -> HashMap<TimeControl, usize> {
        TimeControl::ALL
            .iter()
            .map(|tc| (*tc, self.pools.get(tc).map_or(0, HashMap::len)))
            .collect()
    }

    /// Drop every entry and cancel every timer
    pub fn clear(&mut self) -> Vec<QueueEntry> {
        let ids: Vec<QueueId> = self.locations.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.remove_by_id(id))
            .collect()
    }

    fn ids_matching(&self, predicate: impl Fn(&QueueEntry) -> bool) -> Vec<QueueId> {
        self.pools
            .values()
            .flat_map(|pool| pool.values())
            .filter(|slot| predicate(&slot.entry))
            .map(|slot| slot.entry.queue_id)
            .collect()
    }

    fn slot(&self, queue_id: QueueId) -> Option<&QueueSlot> {
        let time_control = self.locations.get(&queue_id)?;
        self.pools.get(time_control)?.get(&queue_id)
    }

    fn slot_mut(&mut self, queue_id: QueueId) -> Option<&mut QueueSlot> {
        let time_control = self.locations.get(&queue_id)?;
        self.pools.get_mut(time_control)?.get_mut(&queue_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JoinRequest, RatingSnapshot};

    fn entry(user: &str, socket: &str, tc: TimeControl, rating: f64) -> QueueEntry {
        let request = JoinRequest {
            user_id: user.to_string(),
            time_control: tc.to_string(),
            rating: RatingSnapshot {
                rating,
                deviation: 50.0,
                volatility: 0.06,
            },
            latency_ms: 30.0,
            preferred_range: None,
            device_fingerprint: String::new(),
        };
        QueueEntry::new(&request, tc, socket.to_string(), 75.0)
    }

    fn pending_timer() -> tokio::task::JoinHandle<()> {
        tokio::spawn(std::future::pending::<()>())
    }

    #[test]
    fn test_add_and_find() {
        let mut store = QueueStore::new();
        let a = entry("alice", "s1", TimeControl::Blitz, 1200.0);
        let id = a.queue_id;
        store.add(a).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.find_by_id(id).unwrap().user_id, "alice");
        assert_eq!(store.pool_for(TimeControl::Blitz).len(), 1);
        assert!(store.pool_for(TimeControl::Bullet).is_empty());
    }

    #[test]
    fn test_duplicate_queue_id_rejected() {
        let mut store = QueueStore::new();
        let a = entry("alice", "s1", TimeControl::Blitz, 1200.0);
        let mut clash = entry("bob", "s2", TimeControl::Rapid, 1300.0);
        clash.queue_id = a.queue_id;

        store.add(a).unwrap();
        let err = store.add(clash).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::DuplicateQueueId { .. })
        ));
        // The original is not overwritten
        assert_eq!(store.len(), 1);
        assert!(store.pool_for(TimeControl::Rapid).is_empty());
    }

    #[test]
    fn test_remove_by_id_is_idempotent() {
        let mut store = QueueStore::new();
        let a = entry("alice", "s1", TimeControl::Blitz, 1200.0);
        let id = a.queue_id;
        store.add(a).unwrap();

        assert!(store.remove_by_id(id).is_some());
        assert!(store.remove_by_id(id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_bulk_removal() {
        let mut store = QueueStore::new();
        store
            .add(entry("alice", "s1", TimeControl::Blitz, 1200.0))
            .unwrap();
        store
            .add(entry("alice", "s1", TimeControl::Rapid, 1200.0))
            .unwrap();
        store
            .add(entry("bob", "s2", TimeControl::Blitz, 1300.0))
            .unwrap();

        assert_eq!(store.remove_by_user("alice").len(), 2);
        assert_eq!(store.remove_by_socket("s2").len(), 1);
        assert!(store.remove_by_socket("s2").is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_pool_snapshot_is_fifo() {
        let mut store = QueueStore::new();
        let mut first = entry("alice", "s1", TimeControl::Blitz, 1200.0);
        let second = entry("bob", "s2", TimeControl::Blitz, 1300.0);
        first.joined_at = second.joined_at - chrono::Duration::seconds(5);
        store.add(second).unwrap();
        store.add(first).unwrap();

        let pool = store.pool_for(TimeControl::Blitz);
        assert_eq!(pool[0].user_id, "alice");
        assert_eq!(pool[1].user_id, "bob");
    }

    #[test]
    fn test_reassign_socket() {
        let mut store = QueueStore::new();
        let a = entry("alice", "s1", TimeControl::Blitz, 1200.0);
        let id = a.queue_id;
        store.add(a).unwrap();

        assert_eq!(store.reassign_socket(id, "s9".to_string()), Some("s1".to_string()));
        assert_eq!(store.find_by_id(id).unwrap().socket_id, "s9");
        assert!(store.remove_by_socket("s1").is_empty());
    }

    #[tokio::test]
    async fn test_removal_cancels_timer() {
        let mut store = QueueStore::new();
        let a = entry("alice", "s1", TimeControl::Blitz, 1200.0);
        let id = a.queue_id;
        store.add(a).unwrap();

        let timer = pending_timer();
        assert!(store.attach_timer(id, timer.abort_handle()));
        assert!(store.has_timer(id));

        store.remove_by_id(id);
        assert!(timer.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_attach_to_missing_entry_aborts() {
        let mut store = QueueStore::new();
        let timer = pending_timer();
        assert!(!store.attach_timer(uuid::Uuid::new_v4(), timer.abort_handle()));
        assert!(timer.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_take_timer_detaches_without_abort() {
        let mut store = QueueStore::new();
        let a = entry("alice", "s1", TimeControl::Blitz, 1200.0);
        let id = a.queue_id;
        store.add(a).unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let timer = tokio::spawn(async move {
            let _ = rx.await;
        });
        store.attach_timer(id, timer.abort_handle());

        assert!(store.take_timer(id).is_some());
        assert!(!store.has_timer(id));
        store.remove_by_id(id);

        tx.send(()).unwrap();
        assert!(timer.await.is_ok());
    }
}
