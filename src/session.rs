//! Sessions.
//!
//! A session is a handle bound to one column family and optionally one
//! snapshot. It shares its parent's State, has its own open/closed flag and
//! sits in the State's session list while open. Closing a session never
//! closes the State; closing the State closes every session.

use crate::batch::Batch;
use crate::core::{BatchKind, DEFAULT_COLUMN_FAMILY, DbError, Entry, KeyRange, Result};
use crate::encoding::Datum;
use crate::iterator::{IteratorOptions, RangeIterator};
use crate::snapshot::Snapshot;
use crate::state::State;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use tracing::debug;

/// Per-session bookkeeping shared with the State's session list
#[derive(Debug)]
pub(crate) struct SessionInner {
    /// Position in the State's session list, -1 when detached
    index: AtomicIsize,
    closed: AtomicBool,
    column_family: String,
    snapshot: Option<Snapshot>,
    owns_snapshot: bool,
}

impl SessionInner {
    pub(crate) fn new(column_family: &str, snapshot: Option<Snapshot>, owns_snapshot: bool) -> Self {
        Self {
            index: AtomicIsize::new(-1),
            closed: AtomicBool::new(false),
            column_family: column_family.to_string(),
            snapshot,
            owns_snapshot,
        }
    }

    pub(crate) fn index(&self) -> Option<usize> {
        usize::try_from(self.index.load(Ordering::SeqCst)).ok()
    }

    pub(crate) fn set_index(&self, index: usize) {
        self.index.store(index as isize, Ordering::SeqCst);
    }

    pub(crate) fn detach(&self) {
        self.index.store(-1, Ordering::SeqCst);
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }
}

/// Options for opening a session
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Family the session is bound to; `default` when unset
    pub column_family: Option<String>,
    /// Read through an existing snapshot
    pub snapshot: Option<Snapshot>,
    /// Take a new snapshot owned by the session and closed with it
    pub fresh_snapshot: bool,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column_family(mut self, name: &str) -> Self {
        self.column_family = Some(name.to_string());
        self
    }

    pub fn snapshot(mut self, snapshot: &Snapshot) -> Self {
        self.snapshot = Some(snapshot.clone());
        self.fresh_snapshot = false;
        self
    }

    pub fn fresh_snapshot(mut self) -> Self {
        self.snapshot = None;
        self.fresh_snapshot = true;
        self
    }
}

/// What a data operation runs against: State, column family, and the
/// snapshot and session it reads through, if any.
///
/// Shared by `Session` and `StorageEngine` so both expose the same data API.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    pub(crate) state: Arc<State>,
    pub(crate) column_family: String,
    pub(crate) snapshot: Option<Snapshot>,
    pub(crate) session: Option<Arc<SessionInner>>,
}

impl Scope {
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.state.is_closed() {
            return Err(self.state.closed_error());
        }
        if let Some(session) = &self.session {
            if session.is_closed() {
                return Err(DbError::Closed("session is closed".into()));
            }
        }
        Ok(())
    }

    pub(crate) async fn read(&self) -> Result<Batch> {
        self.check_open()?;
        let core = self.state.create_batch(BatchKind::Read)?;
        Ok(Batch::new(
            Arc::clone(&self.state),
            core,
            &self.column_family,
            self.snapshot.clone(),
            self.session.clone(),
        ))
    }

    pub(crate) async fn write(&self) -> Result<Batch> {
        self.check_open()?;
        if self.state.is_read_only() {
            return Err(DbError::ReadOnly(format!(
                "'{}' was opened read-only",
                self.state.path()
            )));
        }
        let core = self.state.create_batch(BatchKind::Write)?;
        Ok(Batch::new(
            Arc::clone(&self.state),
            core,
            &self.column_family,
            None,
            self.session.clone(),
        ))
    }

    pub(crate) fn iterator(&self, mut options: IteratorOptions) -> Result<RangeIterator> {
        self.check_open()?;
        if options.snapshot.is_none() {
            options.snapshot = self.snapshot.clone();
        }
        RangeIterator::new(
            Arc::clone(&self.state),
            options,
            &self.column_family,
            self.session.clone(),
        )
    }

    pub(crate) async fn peek(&self, range: KeyRange, reverse: bool) -> Result<Option<Entry>> {
        let options = IteratorOptions::new().range(range).reverse(reverse).limit(1);
        self.iterator(options)?.next().await
    }

    pub(crate) async fn get(&self, key: &[u8], column_family: Option<&str>) -> Result<Option<Vec<u8>>> {
        let mut batch = self.read().await?.auto_destroy();
        let pending = match column_family {
            Some(name) => batch.get_cf(name, key)?,
            None => batch.get(key)?,
        };
        batch.flush().await?;
        pending.await
    }

    pub(crate) async fn put(&self, key: &[u8], value: &[u8], column_family: Option<&str>) -> Result<()> {
        let mut batch = self.write().await?.auto_destroy();
        match column_family {
            Some(name) => batch.put_cf(name, key, value)?,
            None => batch.put(key, value)?,
        }
        batch.flush().await
    }

    pub(crate) async fn delete(&self, key: &[u8], column_family: Option<&str>) -> Result<()> {
        let mut batch = self.write().await?.auto_destroy();
        match column_family {
            Some(name) => batch.delete_cf(name, key)?,
            None => batch.delete(key)?,
        }
        batch.flush().await
    }

    pub(crate) async fn delete_range(
        &self,
        start: &[u8],
        end: &[u8],
        column_family: Option<&str>,
    ) -> Result<()> {
        let mut batch = self.write().await?.auto_destroy();
        match column_family {
            Some(name) => batch.delete_range_cf(name, start, end)?,
            None => batch.delete_range(start, end)?,
        }
        batch.flush().await
    }

    pub(crate) async fn put_encoded(&self, key: Datum, value: Datum) -> Result<()> {
        let config = self.state.config();
        let key = config.key_encoding.encode(&key)?;
        let value = config.value_encoding.encode(&value)?;
        self.put(&key, &value, None).await
    }

    pub(crate) async fn get_decoded(&self, key: Datum) -> Result<Option<Datum>> {
        let config = self.state.config();
        let key = config.key_encoding.encode(&key)?;
        match self.get(&key, None).await? {
            Some(value) => Ok(Some(config.value_encoding.decode(&value)?)),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    scope: Scope,
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn open(state: &Arc<State>, options: SessionOptions) -> Result<Self> {
        if state.is_closed() {
            return Err(state.closed_error());
        }

        let column_family = options
            .column_family
            .unwrap_or_else(|| DEFAULT_COLUMN_FAMILY.to_string());
        state.get_column_family(&column_family)?;

        let (snapshot, owns_snapshot) = if options.fresh_snapshot {
            (Some(state.snapshot()?), true)
        } else {
            (options.snapshot, false)
        };
        if let Some(snapshot) = &snapshot {
            if snapshot.is_closed() {
                return Err(DbError::Closed(format!("snapshot {} is closed", snapshot.id())));
            }
        }

        let inner = Arc::new(SessionInner::new(&column_family, snapshot.clone(), owns_snapshot));
        state.add_session(&inner)?;
        debug!(path = %state.path(), column_family = %column_family, index = ?inner.index(), "session opened");

        Ok(Self {
            scope: Scope {
                state: Arc::clone(state),
                column_family,
                snapshot,
                session: Some(Arc::clone(&inner)),
            },
            inner,
        })
    }

    pub fn column_family(&self) -> &str {
        &self.inner.column_family
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.inner.snapshot()
    }

    /// Position in the State's session list; `None` once detached
    pub fn index(&self) -> Option<usize> {
        self.inner.index()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed() || self.scope.state.is_closed()
    }

    /// Open the State and materialize this session's column family
    pub async fn ready(&self) -> Result<()> {
        self.scope.check_open()?;
        self.scope.state.ready().await?;
        let store = self.scope.state.store_name(&self.inner.column_family)?;
        self.scope.state.ensure_column_families(&[store]).await
    }

    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.scope.state.remove_session(&self.inner)?;
        if self.inner.owns_snapshot {
            if let Some(snapshot) = self.inner.snapshot() {
                snapshot.close();
            }
        }
        debug!(path = %self.scope.state.path(), column_family = %self.inner.column_family, "session closed");
        Ok(())
    }

    /// Completion barrier for this session's column family
    pub async fn flush(&self) -> Result<()> {
        self.scope.check_open()?;
        self.scope.state.flush(&self.inner.column_family).await
    }

    /// Child session sharing this State. Inherits the column family and
    /// snapshot unless `options` names its own.
    pub fn session(&self, options: SessionOptions) -> Result<Session> {
        self.scope.check_open()?;
        let mut options = options;
        if options.column_family.is_none() {
            options.column_family = Some(self.inner.column_family.clone());
        }
        if options.snapshot.is_none() && !options.fresh_snapshot {
            options.snapshot = self.inner.snapshot.clone();
        }
        Session::open(&self.scope.state, options)
    }

    pub fn column_family_session(&self, name: &str) -> Result<Session> {
        self.session(SessionOptions::new().column_family(name))
    }

    pub async fn read(&self) -> Result<Batch> {
        self.scope.read().await
    }

    pub async fn write(&self) -> Result<Batch> {
        self.scope.write().await
    }

    pub fn iterator(&self, options: IteratorOptions) -> Result<RangeIterator> {
        self.scope.iterator(options)
    }

    pub async fn peek(&self, range: KeyRange, reverse: bool) -> Result<Option<Entry>> {
        self.scope.peek(range, reverse).await
    }

    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.scope.get(key.as_ref(), None).await
    }

    pub async fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.scope.put(key.as_ref(), value.as_ref(), None).await
    }

    pub async fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        self.scope.delete(key.as_ref(), None).await
    }

    pub async fn delete_range(&self, start: impl AsRef<[u8]>, end: impl AsRef<[u8]>) -> Result<()> {
        self.scope.delete_range(start.as_ref(), end.as_ref(), None).await
    }

    pub async fn put_encoded(&self, key: impl Into<Datum>, value: impl Into<Datum>) -> Result<()> {
        self.scope.put_encoded(key.into(), value.into()).await
    }

    pub async fn get_decoded(&self, key: impl Into<Datum>) -> Result<Option<Datum>> {
        self.scope.get_decoded(key.into()).await
    }

    pub fn is_idle(&self) -> bool {
        self.scope.state.is_idle()
    }

    pub async fn idle(&self) {
        self.scope.state.idle().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::substrate::MemorySubstrate;

    fn state() -> Arc<State> {
        let config = EngineConfig::new().substrate(MemorySubstrate::new());
        State::new("session-tests", config).unwrap()
    }

    fn assert_index_invariant(state: &State) {
        for (i, index) in state.session_indexes().unwrap().into_iter().enumerate() {
            assert_eq!(index, Some(i));
        }
    }

    #[tokio::test]
    async fn test_index_invariant_under_removal() {
        let state = state();
        let sessions: Vec<Session> = (0..5)
            .map(|_| Session::open(&state, SessionOptions::new()).unwrap())
            .collect();
        assert_index_invariant(&state);

        sessions[1].close().await.unwrap();
        assert_eq!(sessions[1].index(), None);
        assert_eq!(sessions[4].index(), Some(1));
        assert_index_invariant(&state);

        sessions[4].close().await.unwrap();
        sessions[0].close().await.unwrap();
        assert_eq!(state.session_count(), 2);
        assert_index_invariant(&state);
    }

    #[tokio::test]
    async fn test_removing_last_session() {
        let state = state();
        let a = Session::open(&state, SessionOptions::new()).unwrap();
        let b = Session::open(&state, SessionOptions::new()).unwrap();

        b.close().await.unwrap();
        assert_eq!(a.index(), Some(0));
        assert_eq!(state.session_count(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_referenced_once_per_session() {
        let state = state();
        let snapshot = state.snapshot().unwrap();
        let a = Session::open(&state, SessionOptions::new().snapshot(&snapshot)).unwrap();
        let b = a.session(SessionOptions::new()).unwrap();
        assert_eq!(snapshot.ref_count(), 2);

        a.close().await.unwrap();
        a.close().await.unwrap();
        assert_eq!(snapshot.ref_count(), 1);

        snapshot.close();
        assert!(!snapshot.is_released());
        b.close().await.unwrap();
        assert!(snapshot.is_released());
    }

    #[tokio::test]
    async fn test_fresh_snapshot_closes_with_session() {
        let state = state();
        let session = Session::open(&state, SessionOptions::new().fresh_snapshot()).unwrap();
        let snapshot = session.snapshot().cloned().unwrap();
        assert_eq!(state.live_snapshots(), 1);

        session.close().await.unwrap();
        assert!(snapshot.is_released());
        assert_eq!(state.live_snapshots(), 0);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_operations() {
        let state = state();
        let session = Session::open(&state, SessionOptions::new()).unwrap();
        session.put(b"k", b"v").await.unwrap();
        session.close().await.unwrap();

        assert!(matches!(session.get(b"k").await, Err(DbError::Closed(_))));
        assert!(matches!(session.write().await, Err(DbError::Closed(_))));
        assert!(!state.is_closed());
    }

    #[tokio::test]
    async fn test_state_close_force_closes_sessions() {
        let state = state();
        let session = Session::open(&state, SessionOptions::new().fresh_snapshot()).unwrap();
        let snapshot = session.snapshot().cloned().unwrap();

        state.close().await.unwrap();
        assert!(session.is_closed());
        assert_eq!(session.index(), None);
        assert!(snapshot.is_closed());
        assert!(matches!(session.put(b"k", b"v").await, Err(DbError::Closed(_))));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_column_family_session_is_isolated() {
        let state = state();
        let default = Session::open(&state, SessionOptions::new()).unwrap();
        let users = default.column_family_session("users").unwrap();

        users.put(b"alice", b"1").await.unwrap();
        assert_eq!(users.get(b"alice").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(default.get(b"alice").await.unwrap(), None);
    }
}
