//! Pool error types.

use thiserror::Error;

use virtdb_connector::ConnectorError;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors raised by the connection pooling layer.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    Config(String),

    #[error("connection pool exhausted for {identity}: no connection within {waited_ms}ms (limit {limit})")]
    Exhausted {
        identity: String,
        waited_ms: u64,
        limit: usize,
    },

    #[error("connection pool is shut down")]
    ShutDown,

    #[error("failed to open connection for {identity}")]
    OpenFailed {
        identity: String,
        #[source]
        source: ConnectorError,
    },

    #[error("transaction enlistment failed")]
    Enlistment {
        #[source]
        source: ConnectorError,
    },

    #[error("connector does not support XA connections")]
    XaUnsupported,
}
