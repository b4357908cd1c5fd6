use super::ObjectStore;
use super::transaction::{SubstrateTransaction, TransactionMode};
use crate::core::{DbError, Result};
use lazy_static::lazy_static;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

// Process-wide substrate shared by every engine that does not bring its own
lazy_static! {
    static ref GLOBAL_SUBSTRATE: MemorySubstrate = MemorySubstrate::new();
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Committed contents of one physical database
#[derive(Debug, Clone, Default)]
pub(crate) struct DatabaseImage {
    pub(crate) version: u32,
    pub(crate) stores: HashMap<String, ObjectStore>,
}

#[derive(Debug, Default)]
struct ConnectionRegistry {
    open: HashSet<u64>,
    writer: Option<u64>,
}

/// A database as the substrate owns it. Outlives every connection to it.
#[derive(Debug)]
pub(crate) struct PhysicalDatabase {
    path: String,
    pub(crate) image: RwLock<DatabaseImage>,
    registry: Mutex<ConnectionRegistry>,
}

impl PhysicalDatabase {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            image: RwLock::new(DatabaseImage::default()),
            registry: Mutex::new(ConnectionRegistry::default()),
        }
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }
}

type UpgradeFn = Box<dyn FnOnce(&mut UpgradeTransaction<'_>) -> Result<()> + Send>;

/// Parameters of an open request
pub struct OpenRequest {
    /// Requested schema version; `None` opens at the current version
    pub version: Option<u32>,
    /// Writable connections are exclusive per path
    pub writable: bool,
    upgrade: Option<UpgradeFn>,
}

impl OpenRequest {
    pub fn readonly() -> Self {
        Self {
            version: None,
            writable: false,
            upgrade: None,
        }
    }

    pub fn writable() -> Self {
        Self {
            version: None,
            writable: true,
            upgrade: None,
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Callback run inside the version-change transaction, only when the
    /// requested version is above the stored one
    pub fn on_upgrade<F>(mut self, upgrade: F) -> Self
    where
        F: FnOnce(&mut UpgradeTransaction<'_>) -> Result<()> + Send + 'static,
    {
        self.upgrade = Some(Box::new(upgrade));
        self
    }
}

impl std::fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRequest")
            .field("version", &self.version)
            .field("writable", &self.writable)
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}

/// The only place object stores can be created
pub struct UpgradeTransaction<'a> {
    image: &'a mut DatabaseImage,
    old_version: u32,
    new_version: u32,
}

impl UpgradeTransaction<'_> {
    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    pub fn has_object_store(&self, name: &str) -> bool {
        self.image.stores.contains_key(name)
    }

    pub fn create_object_store(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(DbError::InvalidArgument(
                "object store name cannot be empty".into(),
            ));
        }
        if self.image.stores.contains_key(name) {
            return Err(DbError::Transaction(format!(
                "ConstraintError: object store '{}' already exists",
                name
            )));
        }
        self.image.stores.insert(name.to_string(), ObjectStore::new());
        Ok(())
    }
}

/// In-process object-store substrate.
///
/// Cloning the handle shares the same set of physical databases, the way two
/// browser tabs share one origin's storage.
#[derive(Clone, Default)]
pub struct MemorySubstrate {
    databases: Arc<Mutex<HashMap<String, Arc<PhysicalDatabase>>>>,
}

impl std::fmt::Debug for MemorySubstrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySubstrate").finish()
    }
}

impl MemorySubstrate {
    /// Get the process-wide substrate
    pub fn global() -> MemorySubstrate {
        GLOBAL_SUBSTRATE.clone()
    }

    /// Create an isolated substrate. Useful for tests that must not see each
    /// other's databases.
    pub fn new() -> Self {
        Self {
            databases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn database(&self, path: &str) -> Result<Arc<PhysicalDatabase>> {
        let mut databases = self.databases.lock()?;
        Ok(databases
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(PhysicalDatabase::new(path)))
            .clone())
    }

    /// Open a connection, running a version upgrade when one is requested
    pub async fn open(&self, path: &str, request: OpenRequest) -> Result<SubstrateConnection> {
        // Every substrate request completes asynchronously
        tokio::task::yield_now().await;

        let db = self.database(path)?;
        let mut registry = db.registry.lock()?;

        if request.writable && registry.writer.is_some() {
            warn!(path, "writable open refused: another writer holds the database");
            return Err(DbError::Contention(format!(
                "database '{}' is held by another writer",
                path
            )));
        }

        let (version, store_names) = {
            let current = db.image.read()?.version;
            let target = request.version.unwrap_or_else(|| current.max(1));

            if target < current {
                return Err(DbError::Transaction(format!(
                    "VersionError: requested version {} is less than existing version {}",
                    target, current
                )));
            }

            if target > current {
                if !registry.open.is_empty() {
                    warn!(
                        path,
                        target,
                        open_connections = registry.open.len(),
                        "version upgrade blocked"
                    );
                    return Err(DbError::Contention(format!(
                        "upgrade of '{}' to version {} blocked by {} open connection(s)",
                        path,
                        target,
                        registry.open.len()
                    )));
                }

                let mut image = db.image.write()?;
                // Stage the upgrade so a failing callback leaves the image untouched
                let mut staged = image.clone();
                staged.version = target;
                if let Some(upgrade) = request.upgrade {
                    let mut txn = UpgradeTransaction {
                        image: &mut staged,
                        old_version: current,
                        new_version: target,
                    };
                    upgrade(&mut txn).map_err(|e| match e {
                        DbError::Transaction(msg) => DbError::Transaction(msg),
                        other => DbError::Transaction(format!("AbortError: {}", other)),
                    })?;
                }
                *image = staged;
                info!(path, from = current, to = target, "database upgraded");
            }

            let image = db.image.read()?;
            let names: BTreeSet<String> = image.stores.keys().cloned().collect();
            (image.version, names)
        };

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst);
        registry.open.insert(id);
        if request.writable {
            registry.writer = Some(id);
        }
        drop(registry);

        debug!(path, id, version, writable = request.writable, "connection opened");

        Ok(SubstrateConnection {
            db,
            id,
            version,
            writable: request.writable,
            store_names,
            closed: AtomicBool::new(false),
        })
    }

    /// Stored schema version of a database, if it exists
    pub fn database_version(&self, path: &str) -> Result<Option<u32>> {
        let databases = self.databases.lock()?;
        match databases.get(path) {
            Some(db) => Ok(Some(db.image.read()?.version)),
            None => Ok(None),
        }
    }

    /// Object stores of a database as currently committed
    pub fn object_store_names(&self, path: &str) -> Result<Vec<String>> {
        let databases = self.databases.lock()?;
        match databases.get(path) {
            Some(db) => {
                let mut names: Vec<String> = db.image.read()?.stores.keys().cloned().collect();
                names.sort();
                Ok(names)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Number of live connections to a database
    pub fn open_connections(&self, path: &str) -> Result<usize> {
        let databases = self.databases.lock()?;
        match databases.get(path) {
            Some(db) => Ok(db.registry.lock()?.open.len()),
            None => Ok(0),
        }
    }

    /// Delete a database. Refused while connections are open.
    pub fn delete_database(&self, path: &str) -> Result<bool> {
        let mut databases = self.databases.lock()?;
        if let Some(db) = databases.get(path) {
            let open = db.registry.lock()?.open.len();
            if open > 0 {
                return Err(DbError::Contention(format!(
                    "cannot delete '{}' with {} open connection(s)",
                    path, open
                )));
            }
        }
        Ok(databases.remove(path).is_some())
    }
}

/// A live connection to one physical database.
///
/// The set of object stores is fixed at open time, like the schema a
/// connection sees after its version-change transaction.
#[derive(Debug)]
pub struct SubstrateConnection {
    db: Arc<PhysicalDatabase>,
    id: u64,
    version: u32,
    writable: bool,
    store_names: BTreeSet<String>,
    closed: AtomicBool,
}

impl SubstrateConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        self.db.path()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.store_names.iter().cloned().collect()
    }

    pub fn has_object_store(&self, name: &str) -> bool {
        self.store_names.contains(name)
    }

    /// Start a transaction scoped to `stores`
    pub fn transaction(&self, stores: &[String], mode: TransactionMode) -> Result<SubstrateTransaction> {
        if self.is_closed() {
            return Err(DbError::Transaction(
                "InvalidStateError: the connection is closed".into(),
            ));
        }
        if mode == TransactionMode::ReadWrite && !self.writable {
            return Err(DbError::Transaction(
                "ReadOnlyError: connection was opened read-only".into(),
            ));
        }

        let image = self.db.image.read()?;
        let mut staged = HashMap::with_capacity(stores.len());
        for name in stores {
            if !self.store_names.contains(name) {
                return Err(DbError::Transaction(format!(
                    "NotFoundError: object store '{}' not found",
                    name
                )));
            }
            let store = image.stores.get(name).cloned().ok_or_else(|| {
                DbError::Transaction(format!("NotFoundError: object store '{}' not found", name))
            })?;
            staged.insert(name.clone(), store);
        }
        drop(image);

        Ok(SubstrateTransaction::new(Arc::clone(&self.db), mode, staged))
    }

    /// Release the connection. Transactions already started keep running.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.db.registry.lock() {
            Ok(mut registry) => {
                registry.open.remove(&self.id);
                if registry.writer == Some(self.id) {
                    registry.writer = None;
                }
            }
            Err(e) => warn!(id = self.id, error = %e, "connection registry poisoned on close"),
        }
        debug!(path = self.db.path(), id = self.id, "connection closed");
    }
}

impl Drop for SubstrateConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_stores(names: &'static [&'static str]) -> OpenRequest {
        OpenRequest::writable().version(1).on_upgrade(move |txn| {
            for name in names {
                txn.create_object_store(name)?;
            }
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_open_creates_version_one() {
        let substrate = MemorySubstrate::new();
        let conn = substrate.open("db", OpenRequest::readonly()).await.unwrap();

        assert_eq!(conn.version(), 1);
        assert!(conn.object_store_names().is_empty());
        assert_eq!(substrate.database_version("db").unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_upgrade_creates_stores() {
        let substrate = MemorySubstrate::new();
        let conn = substrate.open("db", create_stores(&["a", "b"])).await.unwrap();

        assert!(conn.has_object_store("a"));
        assert!(conn.has_object_store("b"));
        assert_eq!(substrate.object_store_names("db").unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_second_writer_is_refused() {
        let substrate = MemorySubstrate::new();
        let _first = substrate.open("db", OpenRequest::writable()).await.unwrap();

        let second = substrate.open("db", OpenRequest::writable()).await;
        assert!(matches!(second, Err(DbError::Contention(_))));

        // Readers coexist with the writer
        let reader = substrate.open("db", OpenRequest::readonly()).await;
        assert!(reader.is_ok());
    }

    #[tokio::test]
    async fn test_writer_released_on_close() {
        let substrate = MemorySubstrate::new();
        let first = substrate.open("db", OpenRequest::writable()).await.unwrap();
        first.close();

        assert!(substrate.open("db", OpenRequest::writable()).await.is_ok());
    }

    #[tokio::test]
    async fn test_upgrade_blocked_by_open_connection() {
        let substrate = MemorySubstrate::new();
        let _reader = substrate.open("db", OpenRequest::readonly()).await.unwrap();

        let result = substrate.open("db", create_stores(&["a"]).version(2)).await;
        assert!(matches!(result, Err(DbError::Contention(_))));
    }

    #[tokio::test]
    async fn test_lower_version_is_rejected() {
        let substrate = MemorySubstrate::new();
        substrate.open("db", create_stores(&["a"]).version(3)).await.unwrap().close();

        let result = substrate.open("db", OpenRequest::readonly().version(2)).await;
        assert!(matches!(result, Err(DbError::Transaction(_))));
    }

    #[tokio::test]
    async fn test_failed_upgrade_leaves_image_untouched() {
        let substrate = MemorySubstrate::new();
        let request = OpenRequest::writable().version(1).on_upgrade(|txn| {
            txn.create_object_store("a")?;
            txn.create_object_store("a")
        });

        assert!(substrate.open("db", request).await.is_err());
        assert_eq!(substrate.database_version("db").unwrap(), Some(0));
        assert!(substrate.object_store_names("db").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transaction_on_missing_store() {
        let substrate = MemorySubstrate::new();
        let conn = substrate.open("db", OpenRequest::writable()).await.unwrap();

        let result = conn.transaction(&["missing".to_string()], TransactionMode::ReadOnly);
        assert!(matches!(result, Err(DbError::Transaction(_))));
    }

    #[tokio::test]
    async fn test_delete_database() {
        let substrate = MemorySubstrate::new();
        let conn = substrate.open("db", OpenRequest::writable()).await.unwrap();

        assert!(substrate.delete_database("db").is_err());
        conn.close();
        assert!(substrate.delete_database("db").unwrap());
        assert_eq!(substrate.database_version("db").unwrap(), None);
    }
}
