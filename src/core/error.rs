use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("Database is closed: {0}")]
    Closed(String),

    #[error("Database is read-only: {0}")]
    ReadOnly(String),

    #[error("Contention: {0}")]
    Contention(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl DbError {
    pub fn is_closed(&self) -> bool {
        matches!(self, DbError::Closed(_))
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, DbError::Contention(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}
