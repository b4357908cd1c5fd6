pub mod error;
pub mod types;

pub use error::{DbError, Result};
pub use types::{BatchKind, DEFAULT_COLUMN_FAMILY, Entry, KeyRange};
