use crate::batch::Batch;
use crate::column_family::{ColumnFamily, ColumnFamilyOptions};
use crate::config::EngineConfig;
use crate::core::{DEFAULT_COLUMN_FAMILY, Entry, KeyRange, Result};
use crate::encoding::Datum;
use crate::iterator::{IteratorOptions, RangeIterator};
use crate::session::{Scope, Session, SessionOptions};
use crate::snapshot::Snapshot;
use crate::state::{EngineStats, Phase, State, StateEvent};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Storage engine handle
///
/// Clones share one State, and with it one substrate connection. The
/// connection is opened lazily by `ready()` or the first data operation.
///
/// # Examples
///
/// ```ignore
/// let engine = StorageEngine::open("app", EngineConfig::new())?;
/// engine.put(b"k", b"v", None).await?;
/// assert_eq!(engine.get(b"k", None).await?, Some(b"v".to_vec()));
/// engine.close().await?;
/// ```
#[derive(Debug, Clone)]
pub struct StorageEngine {
    scope: Scope,
}

impl StorageEngine {
    /// Create an engine for `path`. Only validates; nothing is opened yet.
    pub fn open(path: &str, config: EngineConfig) -> Result<Self> {
        let state = State::new(path, config)?;
        debug!(path, "storage engine created");
        Ok(Self {
            scope: Scope {
                state,
                column_family: DEFAULT_COLUMN_FAMILY.to_string(),
                snapshot: None,
                session: None,
            },
        })
    }

    /// Create an engine with the default configuration
    pub fn new(path: &str) -> Result<Self> {
        Self::open(path, EngineConfig::default())
    }

    pub fn path(&self) -> &str {
        self.scope.state.path()
    }

    pub fn config(&self) -> &EngineConfig {
        self.scope.state.config()
    }

    pub fn state(&self) -> &Arc<State> {
        &self.scope.state
    }

    pub fn phase(&self) -> Result<Phase> {
        self.scope.state.phase()
    }

    pub fn is_opened(&self) -> bool {
        self.scope.state.is_opened()
    }

    pub fn is_suspended(&self) -> bool {
        self.scope.state.is_suspended()
    }

    pub fn is_closed(&self) -> bool {
        self.scope.state.is_closed()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub async fn ready(&self) -> Result<()> {
        self.scope.state.ready().await
    }

    pub async fn close(&self) -> Result<()> {
        self.scope.state.close().await
    }

    pub async fn suspend(&self) -> Result<()> {
        self.scope.state.suspend().await
    }

    pub async fn resume(&self) -> Result<()> {
        self.scope.state.resume().await
    }

    /// Completion barrier; `default` when no family is named
    pub async fn flush(&self, column_family: Option<&str>) -> Result<()> {
        self.scope
            .state
            .flush(column_family.unwrap_or(DEFAULT_COLUMN_FAMILY))
            .await
    }

    pub fn is_idle(&self) -> bool {
        self.scope.state.is_idle()
    }

    pub async fn idle(&self) {
        self.scope.state.idle().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.scope.state.subscribe()
    }

    pub fn stats(&self) -> Result<EngineStats> {
        self.scope.state.stats()
    }

    // ------------------------------------------------------------------
    // Handles
    // ------------------------------------------------------------------

    pub fn session(&self, options: SessionOptions) -> Result<Session> {
        Session::open(&self.scope.state, options)
    }

    /// Session bound to `name`, registering the family if it is new
    pub fn column_family(&self, name: &str) -> Result<Session> {
        self.session(SessionOptions::new().column_family(name))
    }

    /// Register `name` with explicit options. An existing family keeps its own.
    pub fn column_family_with_options(
        &self,
        name: &str,
        options: ColumnFamilyOptions,
    ) -> Result<Session> {
        self.scope
            .state
            .register_column_family(ColumnFamily::with_options(name, options))?;
        self.column_family(name)
    }

    pub fn get_column_family(&self, name: &str) -> Result<ColumnFamily> {
        self.scope.state.get_column_family(name)
    }

    /// Move the family registered as `from` to the name `to`
    pub fn rename_column_family(&self, from: &str, to: &str) -> Result<ColumnFamily> {
        self.scope.check_open()?;
        self.scope.state.rename_column_family(from, to)
    }

    pub fn column_family_names(&self) -> Result<Vec<String>> {
        self.scope.state.column_family_names()
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        self.scope.check_open()?;
        self.scope.state.snapshot()
    }

    // ------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------

    pub async fn read(&self) -> Result<Batch> {
        self.scope.read().await
    }

    pub async fn write(&self) -> Result<Batch> {
        self.scope.write().await
    }

    pub fn iterator(&self, options: IteratorOptions) -> Result<RangeIterator> {
        self.scope.iterator(options)
    }

    /// First entry of `range`, or `None`
    pub async fn peek(&self, range: KeyRange, reverse: bool) -> Result<Option<Entry>> {
        self.scope.peek(range, reverse).await
    }

    pub async fn get(
        &self,
        key: impl AsRef<[u8]>,
        column_family: Option<&str>,
    ) -> Result<Option<Vec<u8>>> {
        self.scope.get(key.as_ref(), column_family).await
    }

    pub async fn put(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        column_family: Option<&str>,
    ) -> Result<()> {
        self.scope
            .put(key.as_ref(), value.as_ref(), column_family)
            .await
    }

    pub async fn delete(&self, key: impl AsRef<[u8]>, column_family: Option<&str>) -> Result<()> {
        self.scope.delete(key.as_ref(), column_family).await
    }

    /// Delete every key in `[start, end)`
    pub async fn delete_range(
        &self,
        start: impl AsRef<[u8]>,
        end: impl AsRef<[u8]>,
        column_family: Option<&str>,
    ) -> Result<()> {
        self.scope
            .delete_range(start.as_ref(), end.as_ref(), column_family)
            .await
    }

    /// `put` with the configured key and value encodings
    pub async fn put_encoded(&self, key: impl Into<Datum>, value: impl Into<Datum>) -> Result<()> {
        self.scope.put_encoded(key.into(), value.into()).await
    }

    /// `get` with the configured key and value encodings
    pub async fn get_decoded(&self, key: impl Into<Datum>) -> Result<Option<Datum>> {
        self.scope.get_decoded(key.into()).await
    }
}
