// ============================================================================
// RustMemoKV Library
// ============================================================================
//
// Sessions, batches, column families and snapshots of an embedded LSM
// key-value engine, emulated over a transactional object-store substrate.
//
// ============================================================================

pub mod batch;
pub mod column_family;
pub mod config;
pub mod core;
pub mod encoding;
pub mod facade;
pub mod iterator;
pub mod session;
pub mod snapshot;
pub mod state;
pub mod substrate;

// Re-export main types for convenience
pub use batch::pool::{BatchPool, BatchPoolStats, MAX_BATCH_REUSE};
pub use batch::{Batch, PendingRead, WriteOp};
pub use column_family::{ColumnFamily, ColumnFamilyOptions, FilterPolicy};
pub use config::EngineConfig;
pub use core::{BatchKind, DEFAULT_COLUMN_FAMILY, DbError, Entry, KeyRange, Result};
pub use encoding::{Datum, Encoding};
pub use facade::StorageEngine;
pub use iterator::{IteratorOptions, RangeIterator};
pub use session::{Session, SessionOptions};
pub use snapshot::Snapshot;
pub use state::{EngineStats, HandleRefCounter, Phase, State, StateEvent};
pub use substrate::MemorySubstrate;

/// Storage kind tag read by hosting layers when loading an adapter
pub const STORAGE_KIND: &str = "rocksdb";

/// Adapter compatibility version checked alongside `STORAGE_KIND`
pub const COMPAT_VERSION: u32 = 1;
