// ============================================================================
// Shared State
// ============================================================================
//
// One State owns the substrate connection for a storage path and everything
// that hangs off it: the column-family registry, live sessions, snapshots,
// batch pools and the suspend/resume machinery. Every StorageEngine clone,
// Session, Snapshot and Batch derived from one engine shares the same State.
//
// Locking:
// - `transition` (async) serializes lifecycle changes: open, upgrade,
//   suspend, resume, close
// - `inner` (sync) guards phase, connection and the queue of operations
//   parked while the connection is unavailable; never held across .await
//
// ============================================================================

pub mod handles;
pub mod lifecycle;

pub use handles::{HandleGuard, HandleRefCounter};
pub use lifecycle::{Phase, StateEvent};

use crate::batch::pool::{BatchPool, BatchPoolStats};
use crate::batch::BatchCore;
use crate::column_family::ColumnFamily;
use crate::config::EngineConfig;
use crate::core::{BatchKind, DEFAULT_COLUMN_FAMILY, DbError, Result};
use crate::session::SessionInner;
use crate::snapshot::{Snapshot, SnapshotInner};
use crate::substrate::{
    MemorySubstrate, OpenRequest, SubstrateConnection, SubstrateTransaction, TransactionMode,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, broadcast, oneshot};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct StateInner {
    phase: Phase,
    connection: Option<Arc<SubstrateConnection>>,
    /// Operations parked until the connection is available again, in issue order
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Substrate access for one operation. The guard keeps the State from
/// suspending or closing until the operation is done with the transaction.
pub(crate) struct Access {
    pub(crate) txn: SubstrateTransaction,
    /// Requested stores that are not materialized yet
    pub(crate) missing: HashSet<String>,
    _guard: HandleGuard,
}

pub struct State {
    path: String,
    config: EngineConfig,
    substrate: MemorySubstrate,
    closed: AtomicBool,
    close_done: AtomicBool,
    inner: Mutex<StateInner>,
    transition: tokio::sync::Mutex<()>,
    column_families: Mutex<HashMap<String, ColumnFamily>>,
    columns_flushed: AtomicBool,
    sessions: Mutex<Vec<Arc<SessionInner>>>,
    snapshots: Mutex<HashMap<u64, Arc<SnapshotInner>>>,
    next_snapshot_id: AtomicU64,
    batch_pool: Mutex<BatchPool>,
    handles: Arc<HandleRefCounter>,
    closed_notify: Notify,
    events: broadcast::Sender<StateEvent>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl State {
    pub fn new(path: &str, config: EngineConfig) -> Result<Arc<Self>> {
        if path.is_empty() {
            return Err(DbError::InvalidArgument("storage path cannot be empty".into()));
        }
        config.validate().map_err(DbError::InvalidArgument)?;

        let substrate = config.substrate.clone().unwrap_or_else(MemorySubstrate::global);

        let mut column_families = HashMap::new();
        let default = ColumnFamily::with_options(
            DEFAULT_COLUMN_FAMILY,
            config
                .column_family_options
                .get(DEFAULT_COLUMN_FAMILY)
                .cloned()
                .unwrap_or_default(),
        );
        for name in &config.column_families {
            let family = match config.column_family_options.get(name) {
                Some(options) => ColumnFamily::with_options(name, options.clone()),
                None => default.clone_settings(name),
            };
            column_families.insert(name.clone(), family);
        }
        column_families.insert(DEFAULT_COLUMN_FAMILY.to_string(), default);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let batch_pool = BatchPool::new(config.max_batch_reuse);

        Ok(Arc::new(Self {
            path: path.to_string(),
            config,
            substrate,
            closed: AtomicBool::new(false),
            close_done: AtomicBool::new(false),
            inner: Mutex::new(StateInner::default()),
            transition: tokio::sync::Mutex::new(()),
            column_families: Mutex::new(column_families),
            columns_flushed: AtomicBool::new(false),
            sessions: Mutex::new(Vec::new()),
            snapshots: Mutex::new(HashMap::new()),
            next_snapshot_id: AtomicU64::new(1),
            batch_pool: Mutex::new(batch_pool),
            handles: Arc::new(HandleRefCounter::new()),
            closed_notify: Notify::new(),
            events,
        }))
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn substrate(&self) -> &MemorySubstrate {
        &self.substrate
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> Result<Phase> {
        Ok(self.inner.lock()?.phase)
    }

    pub fn is_opened(&self) -> bool {
        matches!(self.phase(), Ok(Phase::Opened))
    }

    pub fn is_suspended(&self) -> bool {
        self.phase().map(|p| p.is_suspended()).unwrap_or(false)
    }

    pub fn columns_flushed(&self) -> bool {
        self.columns_flushed.load(Ordering::SeqCst)
    }

    pub fn handles(&self) -> &Arc<HandleRefCounter> {
        &self.handles
    }

    pub fn is_idle(&self) -> bool {
        self.handles.is_idle()
    }

    pub async fn idle(&self) {
        self.handles.idle().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StateEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn closed_error(&self) -> DbError {
        DbError::Closed(format!("'{}' is closed", self.path))
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn set_phase(&self, phase: Phase) -> Result<()> {
        let mut inner = self.inner.lock()?;
        debug!(path = %self.path, from = %inner.phase, to = %phase, "phase transition");
        inner.phase = phase;
        Ok(())
    }

    /// Install a connection and release every parked operation in issue order
    fn install_connection(&self, connection: SubstrateConnection) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.connection = Some(Arc::new(connection));
        inner.phase = Phase::Opened;
        while let Some(waiter) = inner.waiters.pop_front() {
            let _ = waiter.send(());
        }
        Ok(())
    }

    fn take_connection(&self) -> Result<Option<Arc<SubstrateConnection>>> {
        Ok(self.inner.lock()?.connection.take())
    }

    fn release_waiters(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        while let Some(waiter) = inner.waiters.pop_front() {
            let _ = waiter.send(());
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open the substrate connection. Idempotent; concurrent callers wait
    /// behind the same open.
    pub async fn ready(&self) -> Result<()> {
        self.check_open()?;
        let _transition = self.transition.lock().await;
        self.check_open()?;
        if self.phase()? == Phase::Unopened {
            self.open_locked().await?;
        }
        Ok(())
    }

    async fn open_locked(&self) -> Result<()> {
        self.set_phase(Phase::Opening)?;
        match self.connect().await {
            Ok(connection) => {
                let version = connection.version();
                self.install_connection(connection)?;
                info!(path = %self.path, version, read_only = self.config.read_only, "state opened");
                self.emit(StateEvent::Opened { version });
                Ok(())
            }
            Err(e) => {
                self.set_phase(Phase::Unopened)?;
                // Parked operations retry the open themselves
                self.release_waiters()?;
                warn!(path = %self.path, error = %e, "open failed");
                Err(e)
            }
        }
    }

    /// Open a connection and materialize every registered column family
    async fn connect(&self) -> Result<SubstrateConnection> {
        let request = if self.config.read_only {
            OpenRequest::readonly()
        } else {
            OpenRequest::writable()
        };
        let connection = self.substrate.open(&self.path, request).await?;

        if self.config.read_only {
            return Ok(connection);
        }

        let registered = self.column_family_store_names()?;
        let missing: Vec<String> = registered
            .into_iter()
            .filter(|name| !connection.has_object_store(name))
            .collect();
        let connection = if missing.is_empty() {
            connection
        } else {
            self.upgrade(&connection, missing).await?
        };
        self.columns_flushed.store(true, Ordering::SeqCst);
        Ok(connection)
    }

    /// Close `connection`, reopen one version higher creating `missing`
    async fn upgrade(
        &self,
        connection: &SubstrateConnection,
        missing: Vec<String>,
    ) -> Result<SubstrateConnection> {
        let version = connection.version() + 1;
        connection.close();

        let created = missing.clone();
        let request = OpenRequest::writable().version(version).on_upgrade(move |txn| {
            for name in &created {
                if !txn.has_object_store(name) {
                    txn.create_object_store(name)?;
                }
            }
            Ok(())
        });

        let upgraded = self.substrate.open(&self.path, request).await?;
        info!(path = %self.path, version, stores = ?missing, "column families materialized");
        self.emit(StateEvent::Upgraded {
            version,
            created: missing,
        });
        Ok(upgraded)
    }

    /// Make sure object stores exist for every family in `names`.
    ///
    /// Record creation is separate: the names must already be registered or
    /// are registered here with default settings.
    pub async fn ensure_column_families(&self, names: &[String]) -> Result<()> {
        if self.config.read_only || names.is_empty() {
            return Ok(());
        }
        for name in names {
            self.get_column_family(name)?;
        }

        loop {
            self.wait_until_opened().await?;
            let _transition = self.transition.lock().await;
            self.check_open()?;

            let connection = {
                let inner = self.inner.lock()?;
                if inner.phase != Phase::Opened {
                    None
                } else {
                    inner.connection.clone()
                }
            };
            let Some(connection) = connection else {
                continue;
            };

            let missing: Vec<String> = names
                .iter()
                .filter(|name| !connection.has_object_store(name))
                .cloned()
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            if missing.is_empty() {
                return Ok(());
            }

            self.set_phase(Phase::Upgrading)?;
            self.take_connection()?;
            match self.upgrade(&connection, missing).await {
                Ok(upgraded) => {
                    self.install_connection(upgraded)?;
                    self.columns_flushed.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                Err(e) => {
                    warn!(path = %self.path, error = %e, "column family upgrade failed");
                    // Best effort: get back to serving the stores we have
                    match self.substrate.open(&self.path, OpenRequest::writable()).await {
                        Ok(restored) => self.install_connection(restored)?,
                        Err(reopen) => {
                            debug!(path = %self.path, error = %reopen, "reopen after failed upgrade");
                            self.set_phase(Phase::Unopened)?;
                            self.release_waiters()?;
                        }
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Release the connection after in-flight operations finish. Operations
    /// issued meanwhile are parked until `resume()`.
    pub async fn suspend(&self) -> Result<()> {
        self.check_open()?;
        let _transition = self.transition.lock().await;
        self.check_open()?;

        match self.phase()? {
            Phase::Suspended => return Ok(()),
            Phase::Unopened => self.open_locked().await?,
            Phase::Opened => {}
            other => {
                return Err(DbError::InvalidState(format!("cannot suspend while {}", other)));
            }
        }

        self.set_phase(Phase::Suspending)?;
        self.handles.idle().await;
        if let Some(connection) = self.take_connection()? {
            connection.close();
        }
        self.set_phase(Phase::Suspended)?;

        info!(path = %self.path, "state suspended");
        self.emit(StateEvent::Suspended);
        Ok(())
    }

    /// Reclaim the connection. Fails with `Contention` while another writer
    /// holds the path; loses to a concurrent `close()` with `Cancelled`.
    pub async fn resume(&self) -> Result<()> {
        self.check_open()?;
        let _transition = self.transition.lock().await;
        if self.is_closed() {
            return Err(DbError::Cancelled(format!("resume of '{}' lost to close", self.path)));
        }

        match self.phase()? {
            Phase::Suspended => {}
            Phase::Unopened | Phase::Opened => return Ok(()),
            other => {
                return Err(DbError::InvalidState(format!("cannot resume while {}", other)));
            }
        }

        self.set_phase(Phase::Resuming)?;
        match self.connect().await {
            Ok(connection) => {
                if self.is_closed() {
                    connection.close();
                    self.set_phase(Phase::Suspended)?;
                    debug!(path = %self.path, "resume cancelled by close");
                    return Err(DbError::Cancelled(format!(
                        "resume of '{}' lost to close",
                        self.path
                    )));
                }
                self.install_connection(connection)?;
                info!(path = %self.path, "state resumed");
                self.emit(StateEvent::Resumed);
                Ok(())
            }
            Err(e) => {
                self.set_phase(Phase::Suspended)?;
                warn!(path = %self.path, error = %e, "resume failed");
                Err(e)
            }
        }
    }

    /// Close the State. New operations fail from the moment this is called.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return self.wait_closed().await;
        }
        // Parked operations wake up, see the flag and fail
        self.release_waiters()?;

        let result = self.close_locked().await;
        self.close_done.store(true, Ordering::SeqCst);
        self.closed_notify.notify_waiters();
        result
    }

    /// Settles when the first `close()` call has finished
    async fn wait_closed(&self) -> Result<()> {
        let notified = self.closed_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.close_done.load(Ordering::SeqCst) {
            notified.await;
        }
        Ok(())
    }

    async fn close_locked(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        self.set_phase(Phase::Closing)?;
        self.handles.idle().await;
        if let Some(connection) = self.take_connection()? {
            connection.close();
        }

        let sessions: Vec<Arc<SessionInner>> = {
            let mut list = self.sessions.lock()?;
            for session in list.iter() {
                session.detach();
            }
            std::mem::take(&mut *list)
        };
        let session_count = sessions.len();
        for session in sessions {
            session.mark_closed();
            if let Some(snapshot) = session.snapshot() {
                snapshot.release();
            }
        }

        let snapshots: Vec<Arc<SnapshotInner>> =
            self.snapshots.lock()?.drain().map(|(_, s)| s).collect();
        for snapshot in snapshots {
            snapshot.force_close();
        }

        self.batch_pool.lock()?.clear();
        self.set_phase(Phase::Closed)?;

        info!(path = %self.path, sessions = session_count, "state closed");
        self.emit(StateEvent::Closed);
        Ok(())
    }

    /// Completion barrier. Settles once the connection is usable, so while
    /// suspended it waits for `resume()`.
    pub async fn flush(&self, column_family: &str) -> Result<()> {
        self.check_open()?;
        self.wait_until_opened().await?;
        debug!(path = %self.path, column_family, "flush barrier passed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Operation gate
    // ------------------------------------------------------------------

    async fn wait_until_opened(&self) -> Result<()> {
        loop {
            let waiter = {
                let mut inner = self.inner.lock()?;
                if self.is_closed() || inner.phase.is_terminal() {
                    return Err(self.closed_error());
                }
                if inner.phase.accepts_operations() {
                    return Ok(());
                }
                park(&mut inner)
            };
            match waiter {
                None => self.ready().await?,
                Some(rx) => {
                    let _ = rx.await;
                }
            }
        }
    }

    /// Start a substrate transaction over `stores`, waiting while the
    /// connection is suspended or being upgraded.
    ///
    /// Read-only access skips stores that are not materialized yet; the
    /// caller reports them through `Access::missing`.
    pub(crate) async fn begin(&self, stores: &[String], mode: TransactionMode) -> Result<Access> {
        loop {
            let waiter = {
                let mut inner = self.inner.lock()?;
                if self.is_closed() || inner.phase.is_terminal() {
                    return Err(self.closed_error());
                }
                if inner.phase.accepts_operations() {
                    let connection = inner.connection.as_ref().ok_or_else(|| {
                        DbError::InvalidState("opened without a connection".into())
                    })?;
                    let mut present = Vec::with_capacity(stores.len());
                    let mut missing = HashSet::new();
                    for name in stores {
                        if connection.has_object_store(name) {
                            if !present.contains(name) {
                                present.push(name.clone());
                            }
                        } else {
                            missing.insert(name.clone());
                        }
                    }
                    if mode == TransactionMode::ReadWrite && !missing.is_empty() {
                        return Err(DbError::Transaction(format!(
                            "NotFoundError: object stores {:?} are not materialized",
                            missing
                        )));
                    }
                    let txn = connection.transaction(&present, mode)?;
                    return Ok(Access {
                        txn,
                        missing,
                        _guard: HandleGuard::new(Arc::clone(&self.handles)),
                    });
                }
                park(&mut inner)
            };
            match waiter {
                None => self.ready().await?,
                Some(rx) => {
                    let _ = rx.await;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Column families
    // ------------------------------------------------------------------

    /// Get the in-memory record for `name`, creating it if needed.
    ///
    /// Creation works even after the registry was flushed; the object store
    /// is materialized separately by `ensure_column_families`.
    pub fn get_column_family(&self, name: &str) -> Result<ColumnFamily> {
        if name.is_empty() {
            return Err(DbError::InvalidArgument("column family name cannot be empty".into()));
        }
        let mut families = self.column_families.lock()?;
        if let Some(family) = families.get(name) {
            return Ok(family.clone());
        }

        let family = match self.config.column_family_options.get(name) {
            Some(options) => ColumnFamily::with_options(name, options.clone()),
            None => families
                .get(DEFAULT_COLUMN_FAMILY)
                .map(|default| default.clone_settings(name))
                .unwrap_or_else(|| ColumnFamily::new(name)),
        };
        debug!(path = %self.path, column_family = name, "column family registered");
        families.insert(name.to_string(), family.clone());
        Ok(family)
    }

    /// Register a family with explicit options. An existing record wins.
    pub fn register_column_family(&self, family: ColumnFamily) -> Result<ColumnFamily> {
        let mut families = self.column_families.lock()?;
        Ok(families
            .entry(family.name().to_string())
            .or_insert(family)
            .clone())
    }

    /// Re-key a registered family under `to`. Later operations on `to` go to
    /// the store named `to`; data already written stays in the old store.
    pub fn rename_column_family(&self, from: &str, to: &str) -> Result<ColumnFamily> {
        if to.is_empty() {
            return Err(DbError::InvalidArgument("column family name cannot be empty".into()));
        }
        if from == DEFAULT_COLUMN_FAMILY {
            return Err(DbError::InvalidArgument(format!(
                "column family '{}' cannot be renamed",
                DEFAULT_COLUMN_FAMILY
            )));
        }
        let mut families = self.column_families.lock()?;
        if families.contains_key(to) {
            return Err(DbError::InvalidArgument(format!("column family '{}' already exists", to)));
        }
        let mut family = families
            .remove(from)
            .ok_or_else(|| DbError::InvalidArgument(format!("column family '{}' not found", from)))?;
        family.set_name(to);
        families.insert(to.to_string(), family.clone());
        debug!(path = %self.path, from, to, "column family renamed");
        Ok(family)
    }

    pub fn column_family_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.column_families.lock()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Backing store name of a registered family
    pub(crate) fn store_name(&self, family: &str) -> Result<String> {
        Ok(self.get_column_family(family)?.store_name().to_string())
    }

    fn column_family_store_names(&self) -> Result<Vec<String>> {
        let families = self.column_families.lock()?;
        let mut names: Vec<String> = families.values().map(|f| f.store_name().to_string()).collect();
        names.sort();
        Ok(names)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub(crate) fn add_session(&self, session: &Arc<SessionInner>) -> Result<()> {
        let mut sessions = self.sessions.lock()?;
        // close() sets the flag before it drains the list
        self.check_open()?;
        if let Some(snapshot) = session.snapshot() {
            snapshot.acquire();
        }
        sessions.push(Arc::clone(session));
        session.set_index(sessions.len() - 1);
        Ok(())
    }

    /// Swap-remove `session`. No-op for a detached session.
    pub(crate) fn remove_session(&self, session: &Arc<SessionInner>) -> Result<()> {
        let mut sessions = self.sessions.lock()?;
        let Some(index) = session.index() else {
            return Ok(());
        };
        if index >= sessions.len() || !Arc::ptr_eq(&sessions[index], session) {
            return Err(DbError::InvalidState(format!(
                "session index {} does not match the session list",
                index
            )));
        }

        sessions.swap_remove(index);
        if let Some(moved) = sessions.get(index) {
            moved.set_index(index);
        }
        session.detach();
        drop(sessions);

        if let Some(snapshot) = session.snapshot() {
            snapshot.release();
        }
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Positions recorded by each live session, in list order
    pub fn session_indexes(&self) -> Result<Vec<Option<usize>>> {
        Ok(self.sessions.lock()?.iter().map(|s| s.index()).collect())
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn snapshot(self: &Arc<Self>) -> Result<Snapshot> {
        self.check_open()?;
        let id = self.next_snapshot_id.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::new(SnapshotInner::new(id));
        self.snapshots.lock()?.insert(id, Arc::clone(&inner));
        debug!(path = %self.path, id, "snapshot taken");
        Ok(Snapshot::new(inner, Arc::downgrade(self)))
    }

    pub(crate) fn forget_snapshot(&self, id: u64) {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            snapshots.remove(&id);
        }
    }

    pub fn live_snapshots(&self) -> usize {
        self.snapshots.lock().map(|s| s.len()).unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    pub(crate) fn create_batch(&self, kind: BatchKind) -> Result<BatchCore> {
        self.check_open()?;
        if kind.is_write() && self.config.read_only {
            return Err(DbError::ReadOnly(format!("'{}' was opened read-only", self.path)));
        }
        Ok(self.batch_pool.lock()?.acquire(kind))
    }

    /// Return a destroyed batch's core to its pool, or drop it
    pub(crate) fn free_batch(&self, core: BatchCore, auto_destroyed: bool) {
        if self.is_closed() {
            return;
        }
        match self.batch_pool.lock() {
            Ok(mut pool) => {
                pool.release(core, auto_destroyed);
            }
            Err(e) => warn!(path = %self.path, error = %e, "batch pool poisoned, dropping batch"),
        }
    }

    pub fn batch_pool_stats(&self) -> Result<BatchPoolStats> {
        Ok(self.batch_pool.lock()?.stats())
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    pub fn stats(&self) -> Result<EngineStats> {
        let pool = self.batch_pool_stats()?;
        Ok(EngineStats {
            phase: self.phase()?,
            sessions: self.session_count(),
            column_families: self.column_families.lock()?.len(),
            pooled_read_batches: pool.pooled_read,
            pooled_write_batches: pool.pooled_write,
            outstanding_handles: self.handles.count(),
            live_snapshots: self.live_snapshots(),
        })
    }
}

/// Queue the caller behind the connection change in progress. `None` when
/// the State is unopened and the caller should open it.
fn park(inner: &mut StateInner) -> Option<oneshot::Receiver<()>> {
    if !inner.phase.queues_operations() {
        return None;
    }
    let (tx, rx) = oneshot::channel();
    inner.waiters.push_back(tx);
    Some(rx)
}

/// Point-in-time counters of a State
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub phase: Phase,
    pub sessions: usize,
    pub column_families: usize,
    pub pooled_read_batches: usize,
    pub pooled_write_batches: usize,
    pub outstanding_handles: usize,
    pub live_snapshots: usize,
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Engine Stats: {}, {} sessions, {} column families, {}/{} pooled read/write batches, {} handles, {} snapshots",
            self.phase,
            self.sessions,
            self.column_families,
            self.pooled_read_batches,
            self.pooled_write_batches,
            self.outstanding_handles,
            self.live_snapshots
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn state() -> Arc<State> {
        let config = EngineConfig::new().substrate(MemorySubstrate::new());
        State::new("state-tests", config).unwrap()
    }

    #[tokio::test]
    async fn test_add_session_after_close_leaves_snapshot_untouched() {
        let state = state();
        let snapshot = state.snapshot().unwrap();
        state.close().await.unwrap();

        let inner = Arc::new(SessionInner::new(DEFAULT_COLUMN_FAMILY, Some(snapshot.clone()), false));
        assert!(state.add_session(&inner).unwrap_err().is_closed());
        assert_eq!(snapshot.ref_count(), 0);
        assert_eq!(state.session_count(), 0);
    }

    #[tokio::test]
    async fn test_second_close_waits_for_first() {
        let state = state();
        state.ready().await.unwrap();
        let access = state
            .begin(&[DEFAULT_COLUMN_FAMILY.to_string()], TransactionMode::ReadOnly)
            .await
            .unwrap();

        let first = tokio::spawn({
            let state = Arc::clone(&state);
            async move { state.close().await }
        });
        tokio::task::yield_now().await;
        let second = tokio::spawn({
            let state = Arc::clone(&state);
            async move { state.close().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished(), "second close returned while a handle was held");
        assert!(!first.is_finished());

        drop(access);
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(state.phase().unwrap(), Phase::Closed);

        // Later calls settle at once
        state.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_column_family_rekeys_registry() {
        let state = state();
        state.get_column_family("users").unwrap();

        let renamed = state.rename_column_family("users", "people").unwrap();
        assert_eq!(renamed.name(), "people");
        assert_eq!(renamed.store_name(), "people");
        assert_eq!(state.store_name("people").unwrap(), "people");
        assert_eq!(
            state.column_family_names().unwrap(),
            vec![DEFAULT_COLUMN_FAMILY.to_string(), "people".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rename_column_family_rejects_bad_names() {
        let state = state();
        state.get_column_family("a").unwrap();
        state.get_column_family("b").unwrap();

        assert!(matches!(state.rename_column_family("a", "b"), Err(DbError::InvalidArgument(_))));
        assert!(matches!(state.rename_column_family("missing", "c"), Err(DbError::InvalidArgument(_))));
        assert!(matches!(
            state.rename_column_family(DEFAULT_COLUMN_FAMILY, "c"),
            Err(DbError::InvalidArgument(_))
        ));
        assert!(matches!(state.rename_column_family("a", ""), Err(DbError::InvalidArgument(_))));
        assert_eq!(state.store_name("a").unwrap(), "a");
    }
}
