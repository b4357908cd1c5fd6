use serde::{Deserialize, Serialize};
use std::ops::Bound;

/// Name of the column family every State starts with
pub const DEFAULT_COLUMN_FAMILY: &str = "default";

/// A key/value pair produced by reads and iterators
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Kind of a batch; also selects which pool a freed batch returns to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchKind {
    Read,
    Write,
}

impl BatchKind {
    pub fn is_write(&self) -> bool {
        matches!(self, BatchKind::Write)
    }
}

impl std::fmt::Display for BatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchKind::Read => write!(f, "read"),
            BatchKind::Write => write!(f, "write"),
        }
    }
}

/// Key range with the `gt/gte/lt/lte` vocabulary of the emulated engine.
///
/// When both an inclusive and an exclusive bound are set on the same side,
/// the exclusive one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub gt: Option<Vec<u8>>,
    pub gte: Option<Vec<u8>>,
    pub lt: Option<Vec<u8>>,
    pub lte: Option<Vec<u8>>,
}

impl KeyRange {
    pub fn all() -> Self {
        Self::default()
    }

    /// Half-open `[start, end)`
    pub fn half_open(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self::default().gte(start).lt(end)
    }

    pub fn gt(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.gt = Some(key.into());
        self
    }

    pub fn gte(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.gte = Some(key.into());
        self
    }

    pub fn lt(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.lt = Some(key.into());
        self
    }

    pub fn lte(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.lte = Some(key.into());
        self
    }

    pub fn lower_bound(&self) -> Bound<Vec<u8>> {
        match (&self.gt, &self.gte) {
            (Some(k), _) => Bound::Excluded(k.clone()),
            (None, Some(k)) => Bound::Included(k.clone()),
            (None, None) => Bound::Unbounded,
        }
    }

    pub fn upper_bound(&self) -> Bound<Vec<u8>> {
        match (&self.lt, &self.lte) {
            (Some(k), _) => Bound::Excluded(k.clone()),
            (None, Some(k)) => Bound::Included(k.clone()),
            (None, None) => Bound::Unbounded,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let above = match self.lower_bound() {
            Bound::Included(k) => key >= k.as_slice(),
            Bound::Excluded(k) => key > k.as_slice(),
            Bound::Unbounded => true,
        };
        let below = match self.upper_bound() {
            Bound::Included(k) => key <= k.as_slice(),
            Bound::Excluded(k) => key < k.as_slice(),
            Bound::Unbounded => true,
        };
        above && below
    }
}
