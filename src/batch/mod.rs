//! Batches: buffered units of read or write work.
//!
//! A write batch queues `put`/`delete`/`delete_range` and commits them as one
//! substrate transaction on `flush()`. A read batch queues `get`s and answers
//! all of them from one read-only transaction. Destroyed batches hand their
//! core back to the State's [`pool::BatchPool`].

pub mod pool;

use crate::core::{BatchKind, DbError, Result};
use crate::session::SessionInner;
use crate::snapshot::Snapshot;
use crate::state::State;
use crate::substrate::{Direction, SubstrateTransaction, TransactionMode};
use std::future::Future;
use std::ops::Bound;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::debug;

/// Queued write, addressed by object store name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        store: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        store: String,
        key: Vec<u8>,
    },
    /// Half-open `[start, end)`
    DeleteRange {
        store: String,
        start: Vec<u8>,
        end: Vec<u8>,
    },
}

impl WriteOp {
    pub fn store(&self) -> &str {
        match self {
            WriteOp::Put { store, .. }
            | WriteOp::Delete { store, .. }
            | WriteOp::DeleteRange { store, .. } => store,
        }
    }

    fn apply(&self, txn: &mut SubstrateTransaction) -> Result<()> {
        match self {
            WriteOp::Put { store, key, value } => txn.put(store, key, value),
            WriteOp::Delete { store, key } => txn.delete(store, key),
            WriteOp::DeleteRange { store, start, end } => {
                let mut cursor = txn.open_cursor(
                    store,
                    Bound::Included(start.clone()),
                    Bound::Excluded(end.clone()),
                    Direction::Next,
                )?;
                while cursor.advance()?.is_some() {
                    cursor.delete()?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct ReadRequest {
    store: String,
    key: Vec<u8>,
    reply: oneshot::Sender<Result<Option<Vec<u8>>>>,
}

/// The poolable part of a batch: identity plus its operation queues
#[derive(Debug)]
pub struct BatchCore {
    id: u64,
    kind: BatchKind,
    writes: Vec<WriteOp>,
    reads: Vec<ReadRequest>,
}

impl BatchCore {
    pub fn new(id: u64, kind: BatchKind) -> Self {
        Self {
            id,
            kind,
            writes: Vec::new(),
            reads: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn pending(&self) -> usize {
        self.writes.len() + self.reads.len()
    }

    /// Clear queued work. Pending reads resolve with an error.
    pub fn reset(&mut self) {
        self.writes.clear();
        self.reads.clear();
    }
}

/// Result of a queued `get`, settled by the batch's `flush()`
#[derive(Debug)]
pub struct PendingRead {
    rx: oneshot::Receiver<Result<Option<Vec<u8>>>>,
}

impl Future for PendingRead {
    type Output = Result<Option<Vec<u8>>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(DbError::InvalidState(
                "batch was destroyed before the read was flushed".into(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct Batch {
    state: Arc<State>,
    core: Option<BatchCore>,
    column_family: String,
    snapshot: Option<Snapshot>,
    session: Option<Arc<SessionInner>>,
    auto_destroy: bool,
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("core", &self.core)
            .field("column_family", &self.column_family)
            .field("auto_destroy", &self.auto_destroy)
            .finish()
    }
}

impl Batch {
    pub(crate) fn new(
        state: Arc<State>,
        core: BatchCore,
        column_family: &str,
        snapshot: Option<Snapshot>,
        session: Option<Arc<SessionInner>>,
    ) -> Self {
        Self {
            state,
            core: Some(core),
            column_family: column_family.to_string(),
            snapshot,
            session,
            auto_destroy: false,
        }
    }

    /// Destroy this batch right after its first `flush()`
    pub fn auto_destroy(mut self) -> Self {
        self.auto_destroy = true;
        self
    }

    /// Pool identity of the underlying core; stable across reuse
    pub fn id(&self) -> Option<u64> {
        self.core.as_ref().map(|c| c.id())
    }

    pub fn kind(&self) -> Option<BatchKind> {
        self.core.as_ref().map(|c| c.kind())
    }

    pub fn is_write(&self) -> bool {
        self.kind().map(|k| k.is_write()).unwrap_or(false)
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.is_none()
    }

    pub fn pending(&self) -> usize {
        self.core.as_ref().map(|c| c.pending()).unwrap_or(0)
    }

    pub fn column_family(&self) -> &str {
        &self.column_family
    }

    fn check_usable(&self) -> Result<()> {
        if self.state.is_closed() {
            return Err(self.state.closed_error());
        }
        if let Some(session) = &self.session {
            if session.is_closed() {
                return Err(DbError::Closed("session is closed".into()));
            }
        }
        if let Some(snapshot) = &self.snapshot {
            if snapshot.is_closed() {
                return Err(DbError::Closed(format!("snapshot {} is closed", snapshot.id())));
            }
        }
        Ok(())
    }

    fn core_mut(&mut self, kind: BatchKind) -> Result<&mut BatchCore> {
        self.check_usable()?;
        let core = self
            .core
            .as_mut()
            .ok_or_else(|| DbError::InvalidState("batch is destroyed".into()))?;
        if core.kind != kind {
            return Err(DbError::InvalidState(format!(
                "operation needs a {} batch, this one is {}",
                kind, core.kind
            )));
        }
        Ok(core)
    }

    fn push_write(&mut self, op: WriteOp) -> Result<()> {
        self.core_mut(BatchKind::Write)?.writes.push(op);
        Ok(())
    }

    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let column_family = self.column_family.clone();
        self.put_cf(&column_family, key, value)
    }

    pub fn put_cf(
        &mut self,
        column_family: &str,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<()> {
        let store = self.state.store_name(column_family)?;
        self.push_write(WriteOp::Put {
            store,
            key: key.as_ref().to_vec(),
            value: value.as_ref().to_vec(),
        })
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<()> {
        let column_family = self.column_family.clone();
        self.delete_cf(&column_family, key)
    }

    pub fn delete_cf(&mut self, column_family: &str, key: impl AsRef<[u8]>) -> Result<()> {
        let store = self.state.store_name(column_family)?;
        self.push_write(WriteOp::Delete {
            store,
            key: key.as_ref().to_vec(),
        })
    }

    /// Delete every key in `[start, end)`
    pub fn delete_range(&mut self, start: impl AsRef<[u8]>, end: impl AsRef<[u8]>) -> Result<()> {
        let column_family = self.column_family.clone();
        self.delete_range_cf(&column_family, start, end)
    }

    pub fn delete_range_cf(
        &mut self,
        column_family: &str,
        start: impl AsRef<[u8]>,
        end: impl AsRef<[u8]>,
    ) -> Result<()> {
        let store = self.state.store_name(column_family)?;
        self.push_write(WriteOp::DeleteRange {
            store,
            start: start.as_ref().to_vec(),
            end: end.as_ref().to_vec(),
        })
    }

    /// Queue a point read. The returned future settles after `flush()`.
    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<PendingRead> {
        let column_family = self.column_family.clone();
        self.get_cf(&column_family, key)
    }

    pub fn get_cf(&mut self, column_family: &str, key: impl AsRef<[u8]>) -> Result<PendingRead> {
        let store = self.state.store_name(column_family)?;
        let (reply, rx) = oneshot::channel();
        self.core_mut(BatchKind::Read)?.reads.push(ReadRequest {
            store,
            key: key.as_ref().to_vec(),
            reply,
        });
        Ok(PendingRead { rx })
    }

    /// Commit queued writes, or answer queued reads
    pub async fn flush(&mut self) -> Result<()> {
        self.check_usable()?;
        let core = self
            .core
            .as_mut()
            .ok_or_else(|| DbError::InvalidState("batch is destroyed".into()))?;
        let kind = core.kind;
        let id = core.id;

        let result = match kind {
            BatchKind::Write => {
                let writes = std::mem::take(&mut core.writes);
                self.commit_writes(id, writes).await
            }
            BatchKind::Read => {
                let reads = std::mem::take(&mut core.reads);
                self.answer_reads(reads).await
            }
        };

        if self.auto_destroy {
            self.destroy();
        }
        result
    }

    async fn commit_writes(&self, id: u64, writes: Vec<WriteOp>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        if self.state.is_read_only() {
            return Err(DbError::ReadOnly(format!(
                "'{}' was opened read-only",
                self.state.path()
            )));
        }

        let mut stores: Vec<String> = Vec::new();
        for op in &writes {
            if !stores.iter().any(|s| s == op.store()) {
                stores.push(op.store().to_string());
            }
        }
        self.state.ensure_column_families(&stores).await?;

        let mut access = self.state.begin(&stores, TransactionMode::ReadWrite).await?;
        for op in &writes {
            if let Err(e) = op.apply(&mut access.txn) {
                access.txn.abort();
                return Err(e);
            }
        }
        access.txn.commit().await?;
        debug!(batch = id, ops = writes.len(), "write batch committed");
        Ok(())
    }

    async fn answer_reads(&self, reads: Vec<ReadRequest>) -> Result<()> {
        if reads.is_empty() {
            return Ok(());
        }

        let stores: Vec<String> = reads.iter().map(|r| r.store.clone()).collect();
        let access = match self.state.begin(&stores, TransactionMode::ReadOnly).await {
            Ok(access) => access,
            Err(e) => {
                for read in reads {
                    let _ = read.reply.send(Err(e.clone()));
                }
                return Err(e);
            }
        };

        for read in reads {
            let value = if access.missing.contains(&read.store) {
                Ok(None)
            } else {
                access.txn.get(&read.store, &read.key)
            };
            // The caller may have dropped its PendingRead
            let _ = read.reply.send(value);
        }
        Ok(())
    }

    /// Release this batch. Its core goes back to the pool if there is room.
    pub fn destroy(&mut self) {
        if let Some(core) = self.core.take() {
            self.state.free_batch(core, self.auto_destroy);
        }
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if let Some(core) = self.core.take() {
            self.state.free_batch(core, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::substrate::MemorySubstrate;

    fn state() -> Arc<State> {
        let config = EngineConfig::new().substrate(MemorySubstrate::new());
        State::new("batch-tests", config).unwrap()
    }

    async fn write_batch(state: &Arc<State>) -> Batch {
        let core = state.create_batch(BatchKind::Write).unwrap();
        Batch::new(Arc::clone(state), core, "default", None, None)
    }

    async fn read_batch(state: &Arc<State>) -> Batch {
        let core = state.create_batch(BatchKind::Read).unwrap();
        Batch::new(Arc::clone(state), core, "default", None, None)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let state = state();
        let mut batch = write_batch(&state).await;
        batch.put(b"k", b"v").unwrap();
        batch.flush().await.unwrap();

        let mut reads = read_batch(&state).await;
        let hit = reads.get(b"k").unwrap();
        let miss = reads.get(b"nope").unwrap();
        reads.flush().await.unwrap();

        assert_eq!(hit.await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(miss.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_range_is_half_open() {
        let state = state();
        let mut batch = write_batch(&state).await;
        for key in ["aa", "ab", "ac", "ba", "bb", "bc"] {
            batch.put(key, b"x").unwrap();
        }
        batch.flush().await.unwrap();

        batch.delete_range("a", "b").unwrap();
        batch.flush().await.unwrap();

        let mut reads = read_batch(&state).await;
        let pending: Vec<_> = ["aa", "ab", "ac", "ba", "bb", "bc"]
            .iter()
            .map(|k| reads.get(k).unwrap())
            .collect();
        reads.flush().await.unwrap();

        let mut present = Vec::new();
        for (key, read) in ["aa", "ab", "ac", "ba", "bb", "bc"].iter().zip(pending) {
            if read.await.unwrap().is_some() {
                present.push(*key);
            }
        }
        assert_eq!(present, vec!["ba", "bb", "bc"]);
    }

    #[tokio::test]
    async fn test_get_on_write_batch_is_rejected() {
        let state = state();
        let mut batch = write_batch(&state).await;
        assert!(matches!(batch.get(b"k"), Err(DbError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_destroy_returns_core_to_pool() {
        let state = state();
        let mut batch = write_batch(&state).await;
        let id = batch.id();
        batch.destroy();
        assert!(batch.is_destroyed());
        assert!(matches!(batch.put(b"k", b"v"), Err(DbError::InvalidState(_))));

        let again = write_batch(&state).await;
        assert_eq!(again.id(), id);
    }

    #[tokio::test]
    async fn test_destroy_fails_pending_reads() {
        let state = state();
        let mut batch = read_batch(&state).await;
        let pending = batch.get(b"k").unwrap();
        batch.destroy();
        assert!(matches!(pending.await, Err(DbError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_auto_destroy_after_flush() {
        let state = state();
        let mut batch = write_batch(&state).await.auto_destroy();
        batch.put(b"k", b"v").unwrap();
        batch.flush().await.unwrap();
        assert!(batch.is_destroyed());
        assert_eq!(state.batch_pool_stats().unwrap().pooled_write, 1);
    }

    #[tokio::test]
    async fn test_write_to_new_column_family_materializes_store() {
        let state = state();
        let mut batch = write_batch(&state).await;
        batch.put_cf("users", b"alice", b"1").unwrap();
        batch.flush().await.unwrap();

        let names = state.substrate().object_store_names(state.path()).unwrap();
        assert!(names.contains(&"users".to_string()));
        assert!(names.contains(&"default".to_string()));
    }
}
