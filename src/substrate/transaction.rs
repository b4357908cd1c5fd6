use super::ObjectStore;
use super::database::PhysicalDatabase;
use crate::core::{DbError, Entry, Result};
use std::collections::HashMap;
use std::ops::Bound;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Next,
    Prev,
}

#[derive(Debug, Clone)]
enum LoggedOp {
    Put { store: String, key: Vec<u8>, value: Vec<u8> },
    Delete { store: String, key: Vec<u8> },
}

/// A substrate transaction.
///
/// Reads see the stores as committed when the transaction started plus this
/// transaction's own writes. Writes are logged and replayed onto the latest
/// committed image at commit, all at once.
#[derive(Debug)]
pub struct SubstrateTransaction {
    db: Arc<PhysicalDatabase>,
    mode: TransactionMode,
    staged: HashMap<String, ObjectStore>,
    log: Vec<LoggedOp>,
}

impl SubstrateTransaction {
    pub(crate) fn new(
        db: Arc<PhysicalDatabase>,
        mode: TransactionMode,
        staged: HashMap<String, ObjectStore>,
    ) -> Self {
        Self {
            db,
            mode,
            staged,
            log: Vec::new(),
        }
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn store(&self, name: &str) -> Result<&ObjectStore> {
        self.staged.get(name).ok_or_else(|| {
            DbError::Transaction(format!(
                "NotFoundError: object store '{}' is not in the transaction scope",
                name
            ))
        })
    }

    fn store_mut(&mut self, name: &str) -> Result<&mut ObjectStore> {
        if self.mode == TransactionMode::ReadOnly {
            return Err(DbError::Transaction(
                "ReadOnlyError: the transaction is read-only".into(),
            ));
        }
        self.staged.get_mut(name).ok_or_else(|| {
            DbError::Transaction(format!(
                "NotFoundError: object store '{}' is not in the transaction scope",
                name
            ))
        })
    }

    pub fn get(&self, store: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.store(store)?.get(key).cloned())
    }

    pub fn put(&mut self, store: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.store_mut(store)?.insert(key.to_vec(), value.to_vec());
        self.log.push(LoggedOp::Put {
            store: store.to_string(),
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    pub fn delete(&mut self, store: &str, key: &[u8]) -> Result<()> {
        self.store_mut(store)?.remove(key);
        self.log.push(LoggedOp::Delete {
            store: store.to_string(),
            key: key.to_vec(),
        });
        Ok(())
    }

    pub fn count(&self, store: &str) -> Result<usize> {
        Ok(self.store(store)?.len())
    }

    /// Open a cursor over `store` restricted to `(lower, upper)`
    pub fn open_cursor(
        &mut self,
        store: &str,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        direction: Direction,
    ) -> Result<Cursor<'_>> {
        self.store(store)?;
        Ok(Cursor {
            txn: self,
            store: store.to_string(),
            lower,
            upper,
            direction,
            current: None,
        })
    }

    /// Commit logged writes atomically
    pub async fn commit(self) -> Result<()> {
        tokio::task::yield_now().await;

        if self.log.is_empty() {
            return Ok(());
        }

        let mut image = self.db.image.write()?;
        for op in &self.log {
            let name = match op {
                LoggedOp::Put { store, .. } | LoggedOp::Delete { store, .. } => store,
            };
            if !image.stores.contains_key(name) {
                return Err(DbError::Transaction(format!(
                    "AbortError: object store '{}' no longer exists",
                    name
                )));
            }
        }
        for op in self.log {
            match op {
                LoggedOp::Put { store, key, value } => {
                    if let Some(target) = image.stores.get_mut(&store) {
                        target.insert(key, value);
                    }
                }
                LoggedOp::Delete { store, key } => {
                    if let Some(target) = image.stores.get_mut(&store) {
                        target.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    /// Drop every logged write
    pub fn abort(self) {}
}

fn is_empty_range(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    match (lower, upper) {
        (Bound::Included(a), Bound::Included(b)) => a > b,
        (Bound::Included(a), Bound::Excluded(b))
        | (Bound::Excluded(a), Bound::Included(b))
        | (Bound::Excluded(a), Bound::Excluded(b)) => a >= b,
        _ => false,
    }
}

/// Cursor over one object store of a transaction
pub struct Cursor<'t> {
    txn: &'t mut SubstrateTransaction,
    store: String,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    direction: Direction,
    current: Option<Vec<u8>>,
}

impl Cursor<'_> {
    /// Step to the next record in cursor direction. Never leaves the bounds.
    pub fn advance(&mut self) -> Result<Option<Entry>> {
        let (lower, upper) = match (&self.current, self.direction) {
            (None, _) => (self.lower.clone(), self.upper.clone()),
            (Some(key), Direction::Next) => (Bound::Excluded(key.clone()), self.upper.clone()),
            (Some(key), Direction::Prev) => (self.lower.clone(), Bound::Excluded(key.clone())),
        };
        if is_empty_range(&lower, &upper) {
            return Ok(None);
        }

        let found = {
            let store = self.txn.store(&self.store)?;
            let mut range = store.range((lower, upper));
            match self.direction {
                Direction::Next => range.next(),
                Direction::Prev => range.next_back(),
            }
            .map(|(k, v)| Entry::new(k.clone(), v.clone()))
        };

        if let Some(entry) = &found {
            self.current = Some(entry.key.clone());
        }
        Ok(found)
    }

    /// Delete the record the cursor is positioned on
    pub fn delete(&mut self) -> Result<()> {
        let key = self
            .current
            .clone()
            .ok_or_else(|| DbError::InvalidState("cursor is not positioned on a record".into()))?;
        let store = self.store.clone();
        self.txn.delete(&store, &key)
    }
}
