//! In-memory progress snapshots for polling during ingestion.
//!
//! Each running batch has one writer (the worker executing it) and any
//! number of pollers. Terminal snapshots linger for a grace period so a
//! poller that missed the finish still sees the final counters, then age
//! out; after that the batch row in storage is the source of truth.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

use tabula_model::ProgressSnapshot;

#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// How long a terminal snapshot stays pollable. Default: 5 minutes.
    pub ttl: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        ProgressConfig {
            ttl: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct Entry {
    snapshot: ProgressSnapshot,
    /// Set once the snapshot turns terminal; the entry expires then.
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone)]
pub struct ProgressStore {
    ttl: Duration,
    inner: Arc<Mutex<HashMap<Uuid, Entry>>>,
}

impl ProgressStore {
    pub fn new(config: ProgressConfig) -> Self {
        ProgressStore {
            ttl: config.ttl,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Publish the first snapshot of a batch.
    pub fn insert(&self, snapshot: ProgressSnapshot) {
        self.put(snapshot, None);
    }

    /// Publish a mid-run snapshot, replacing the previous one.
    pub fn update(&self, snapshot: ProgressSnapshot) {
        self.put(snapshot, None);
    }

    /// Publish the terminal snapshot and start its retention clock.
    pub fn complete(&self, snapshot: ProgressSnapshot) {
        let deadline = Instant::now() + self.ttl;
        self.put(snapshot, Some(deadline));
    }

    fn put(&self, snapshot: ProgressSnapshot, expires_at: Option<Instant>) {
        let mut inner = self.inner.lock().expect("progress store mutex poisoned");
        inner.insert(
            snapshot.batch_id,
            Entry {
                snapshot,
                expires_at,
            },
        );
    }

    /// Current snapshot of a batch, dropping it first if it has aged out.
    pub fn get(&self, batch_id: Uuid) -> Option<ProgressSnapshot> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("progress store mutex poisoned");
        match inner.get(&batch_id) {
            Some(entry) if entry.expired(now) => {
                inner.remove(&batch_id);
                None
            }
            Some(entry) => Some(entry.snapshot.clone()),
            None => None,
        }
    }

    /// Drop every aged-out entry, returning how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("progress store mutex poisoned");
        let before = inner.len();
        inner.retain(|_, entry| !entry.expired(now));
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("progress store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tabula_model::BatchStatus;

    fn snapshot(batch_id: Uuid, processed: u32, status: BatchStatus) -> ProgressSnapshot {
        ProgressSnapshot {
            batch_id,
            total_rows: 10,
            processed_rows: processed,
            success_rows: processed,
            failed_rows: 0,
            percentage: ProgressSnapshot::percentage_of(processed, 10),
            status,
            message: None,
        }
    }

    #[test]
    fn updates_replace_the_snapshot() {
        let store = ProgressStore::new(ProgressConfig::default());
        let id = Uuid::new_v4();

        store.insert(snapshot(id, 0, BatchStatus::Processing));
        store.update(snapshot(id, 7, BatchStatus::Processing));

        let seen = store.get(id).expect("snapshot present");
        assert_eq!(seen.processed_rows, 7);
        assert_eq!(seen.percentage, 70);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn terminal_snapshots_age_out() {
        let store = ProgressStore::new(ProgressConfig {
            ttl: Duration::from_secs(0),
        });
        let id = Uuid::new_v4();

        store.insert(snapshot(id, 3, BatchStatus::Processing));
        assert!(store.get(id).is_some());

        store.complete(snapshot(id, 10, BatchStatus::Success));
        assert!(store.get(id).is_none(), "zero ttl expires immediately");
        assert!(store.is_empty(), "get drops the aged entry");
    }

    #[test]
    fn live_snapshots_never_age_out() {
        let store = ProgressStore::new(ProgressConfig {
            ttl: Duration::from_secs(0),
        });
        let id = Uuid::new_v4();

        store.update(snapshot(id, 5, BatchStatus::Processing));
        assert_eq!(store.purge_expired(), 0);
        assert!(store.get(id).is_some());
    }

    #[test]
    fn purge_sweeps_only_expired_entries() {
        let store = ProgressStore::new(ProgressConfig {
            ttl: Duration::from_secs(0),
        });
        let done = Uuid::new_v4();
        let running = Uuid::new_v4();

        store.complete(snapshot(done, 10, BatchStatus::Success));
        store.insert(snapshot(running, 2, BatchStatus::Processing));

        assert_eq!(store.purge_expired(), 1);
        assert!(store.get(done).is_none());
        assert!(store.get(running).is_some());
    }
}
