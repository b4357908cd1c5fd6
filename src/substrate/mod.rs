// ============================================================================
// Object-Store Substrate
// ============================================================================
//
// The transactional object store the engine runs on. It is weaker than the
// engine it backs:
// - no atomic range delete (callers walk a cursor and delete key by key)
// - no point-in-time snapshots (transactions see the latest committed state)
// - object stores can only be created inside a version upgrade, which needs
//   every other connection to the database closed
// - at most one writable connection per path; readers may coexist
//
// ============================================================================

pub mod database;
pub mod transaction;

pub use database::{MemorySubstrate, OpenRequest, SubstrateConnection, UpgradeTransaction};
pub use transaction::{Cursor, Direction, SubstrateTransaction, TransactionMode};

/// One object store: ordered byte keys to byte values.
///
/// Each transaction stages its own clone.
pub(crate) type ObjectStore = im::OrdMap<Vec<u8>, Vec<u8>>;
