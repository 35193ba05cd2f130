//! Common error types for CAE

use thiserror::Error;

/// Common result type for CAE operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across CAE services
#[derive(Error, Debug)]
pub enum Error {
    /// Image bytes could not be decoded into a usable pixel grid
    #[error("Decode error: {0}")]
    Decode(String),

    /// Requested document not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Document store could not be reached
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Work queue broker could not be reached
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// Worker never reported back for a request
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map a sqlx error raised while talking to the document store.
    ///
    /// Connection-class failures become `StorageUnavailable`; everything else
    /// stays a `Database` error.
    pub fn from_store(err: sqlx::Error) -> Self {
        if is_connection_error(&err) {
            Error::StorageUnavailable(err.to_string())
        } else {
            Error::Database(err)
        }
    }

    /// Map a sqlx error raised while talking to the broker.
    pub fn from_broker(err: sqlx::Error) -> Self {
        if is_connection_error(&err) {
            Error::BrokerUnavailable(err.to_string())
        } else {
            Error::Database(err)
        }
    }

    /// True for infrastructure failures worth redelivering a message for
    pub fn is_transient(&self) -> bool {
        match self {
            Error::StorageUnavailable(_) | Error::BrokerUnavailable(_) => true,
            Error::Database(err) => is_lock_error(err),
            _ => false,
        }
    }
}

fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
    )
}

/// SQLite reports writer contention as "database is locked"
pub(crate) fn is_lock_error(err: &sqlx::Error) -> bool {
    err.to_string().contains("database is locked")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_map_to_unavailable() {
        assert!(matches!(
            Error::from_store(sqlx::Error::PoolTimedOut),
            Error::StorageUnavailable(_)
        ));
        assert!(matches!(
            Error::from_broker(sqlx::Error::PoolClosed),
            Error::BrokerUnavailable(_)
        ));
    }

    #[test]
    fn test_row_not_found_stays_database_error() {
        let err = Error::from_store(sqlx::Error::RowNotFound);
        assert!(matches!(err, Error::Database(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::StorageUnavailable("down".into()).is_transient());
        assert!(Error::BrokerUnavailable("down".into()).is_transient());
        assert!(!Error::NotFound("img".into()).is_transient());
        assert!(!Error::Decode("garbage".into()).is_transient());
    }
}
