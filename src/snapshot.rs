//! Snapshots.
//!
//! The substrate has no point-in-time reads, so a snapshot is a live view:
//! reads through it see every write committed before the read runs. What a
//! snapshot does carry is lifecycle. It is reference counted by the sessions
//! holding it and lives in the State's snapshot arena until it is both closed
//! and unreferenced.

use crate::batch::Batch;
use crate::core::{BatchKind, DEFAULT_COLUMN_FAMILY, DbError, Result};
use crate::iterator::{IteratorOptions, RangeIterator};
use crate::state::State;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Debug)]
pub(crate) struct SnapshotInner {
    id: u64,
    refs: AtomicUsize,
    closed: AtomicBool,
    released: AtomicBool,
}

impl SnapshotInner {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            refs: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            released: AtomicBool::new(false),
        }
    }

    /// Closed by the owning State; skips the arena bookkeeping
    pub(crate) fn force_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.released.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
    state: Weak<State>,
}

impl Snapshot {
    pub(crate) fn new(inner: Arc<SnapshotInner>, state: Weak<State>) -> Self {
        Self { inner, state }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Sessions currently holding this snapshot
    pub fn ref_count(&self) -> usize {
        self.inner.refs.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Closed and no longer referenced
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    pub(crate) fn acquire(&self) {
        self.inner.refs.fetch_add(1, Ordering::SeqCst);
    }

    /// # Panics
    /// When the snapshot holds no references.
    pub(crate) fn release(&self) {
        let previous = self
            .inner
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match previous {
            Ok(1) if self.is_closed() => self.finalize(),
            Ok(_) => {}
            Err(_) => panic!("Snapshot::release called with no outstanding references"),
        }
    }

    /// Close the snapshot. Physical release waits for the last session
    /// holding it.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.ref_count() == 0 {
            self.finalize();
        } else {
            debug!(id = self.id(), refs = self.ref_count(), "snapshot close deferred");
        }
    }

    fn finalize(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(state) = self.state.upgrade() {
            state.forget_snapshot(self.inner.id);
        }
        debug!(id = self.id(), "snapshot released");
    }

    fn state(&self) -> Result<Arc<State>> {
        if self.is_closed() {
            return Err(DbError::Closed(format!("snapshot {} is closed", self.id())));
        }
        let state = self
            .state
            .upgrade()
            .ok_or_else(|| DbError::Closed("snapshot outlived its engine".into()))?;
        if state.is_closed() {
            return Err(state.closed_error());
        }
        Ok(state)
    }

    /// Read batch over the default column family, reading through this
    /// snapshot
    pub async fn read(&self) -> Result<Batch> {
        self.read_cf(DEFAULT_COLUMN_FAMILY).await
    }

    pub async fn read_cf(&self, column_family: &str) -> Result<Batch> {
        let state = self.state()?;
        state.get_column_family(column_family)?;
        let core = state.create_batch(BatchKind::Read)?;
        Ok(Batch::new(
            Arc::clone(&state),
            core,
            column_family,
            Some(self.clone()),
            None,
        ))
    }

    pub fn iterator(&self, options: IteratorOptions) -> Result<RangeIterator> {
        let state = self.state()?;
        RangeIterator::new(state, options.snapshot(self), DEFAULT_COLUMN_FAMILY, None)
    }

    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let mut batch = self.read().await?.auto_destroy();
        let pending = batch.get(key)?;
        batch.flush().await?;
        pending.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::substrate::MemorySubstrate;

    fn state() -> Arc<State> {
        let config = EngineConfig::new().substrate(MemorySubstrate::new());
        State::new("snapshot-tests", config).unwrap()
    }

    #[test]
    fn test_close_unreferenced_releases() {
        let state = state();
        let snapshot = state.snapshot().unwrap();
        assert_eq!(state.live_snapshots(), 1);

        snapshot.close();
        assert!(snapshot.is_released());
        assert_eq!(state.live_snapshots(), 0);
    }

    #[test]
    fn test_close_waits_for_last_reference() {
        let state = state();
        let snapshot = state.snapshot().unwrap();
        snapshot.acquire();
        snapshot.acquire();

        snapshot.close();
        assert!(snapshot.is_closed());
        assert!(!snapshot.is_released());

        snapshot.release();
        assert!(!snapshot.is_released());
        snapshot.release();
        assert!(snapshot.is_released());
        assert_eq!(state.live_snapshots(), 0);
    }

    #[test]
    #[should_panic(expected = "no outstanding references")]
    fn test_release_without_reference_panics() {
        let state = state();
        let snapshot = state.snapshot().unwrap();
        snapshot.release();
    }

    #[tokio::test]
    async fn test_closed_snapshot_refuses_reads() {
        let state = state();
        let snapshot = state.snapshot().unwrap();
        snapshot.close();
        assert!(matches!(snapshot.read().await, Err(DbError::Closed(_))));
    }

    #[tokio::test]
    async fn test_close_before_first_open() {
        let state = state();
        let snapshot = state.snapshot().unwrap();
        snapshot.close();
        assert_eq!(state.phase().unwrap(), crate::state::Phase::Unopened);
        assert!(snapshot.is_released());
    }
}
