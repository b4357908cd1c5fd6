use super::BatchCore;
use crate::core::BatchKind;
use tracing::debug;

/// Upper bound on pooled batches of each kind
pub const MAX_BATCH_REUSE: usize = 64;

/// Free-list of batch cores.
///
/// The pool owns cores sitting in it; a checked-out core belongs to the
/// `Batch` wrapping it until that batch is destroyed.
#[derive(Debug)]
pub struct BatchPool {
    capacity: usize,
    read: Vec<BatchCore>,
    write: Vec<BatchCore>,
    next_id: u64,
    created: u64,
    reused: u64,
    discarded: u64,
}

impl BatchPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            read: Vec::new(),
            write: Vec::new(),
            next_id: 1,
            created: 0,
            reused: 0,
            discarded: 0,
        }
    }

    fn list(&mut self, kind: BatchKind) -> &mut Vec<BatchCore> {
        match kind {
            BatchKind::Read => &mut self.read,
            BatchKind::Write => &mut self.write,
        }
    }

    /// Pop a pooled core of `kind`, or build a fresh one
    pub fn acquire(&mut self, kind: BatchKind) -> BatchCore {
        if let Some(core) = self.list(kind).pop() {
            self.reused += 1;
            debug!(id = core.id(), %kind, "reusing pooled batch");
            return core;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.created += 1;
        BatchCore::new(id, kind)
    }

    /// Return a core to the pool. Returns false when the pool is full and the
    /// core was dropped.
    pub fn release(&mut self, mut core: BatchCore, auto_destroyed: bool) -> bool {
        core.reset();
        let capacity = self.capacity;
        let kind = core.kind();
        let list = self.list(kind);
        if list.len() >= capacity {
            self.discarded += 1;
            debug!(id = core.id(), %kind, auto_destroyed, "batch pool full, discarding batch");
            return false;
        }
        list.push(core);
        true
    }

    pub fn len(&self, kind: BatchKind) -> usize {
        match kind {
            BatchKind::Read => self.read.len(),
            BatchKind::Write => self.write.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.read.clear();
        self.write.clear();
    }

    pub fn stats(&self) -> BatchPoolStats {
        BatchPoolStats {
            pooled_read: self.read.len(),
            pooled_write: self.write.len(),
            created: self.created,
            reused: self.reused,
            discarded: self.discarded,
            capacity: self.capacity,
        }
    }
}

impl Default for BatchPool {
    fn default() -> Self {
        Self::new(MAX_BATCH_REUSE)
    }
}

/// Batch pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPoolStats {
    pub pooled_read: usize,
    pub pooled_write: usize,
    pub created: u64,
    pub reused: u64,
    pub discarded: u64,
    pub capacity: usize,
}

impl std::fmt::Display for BatchPoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Batch Pool: {} read / {} write pooled (cap {}), {} created, {} reused, {} discarded",
            self.pooled_read,
            self.pooled_write,
            self.capacity,
            self.created,
            self.reused,
            self.discarded
        )
    }
}
