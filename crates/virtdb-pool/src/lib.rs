//! virtdb-pool — connection pooling for VirtDB connectors.
//!
//! The query-execution layer leases source connections per connector
//! identity; this crate manages their lifecycle:
//!
//! ```text
//! Caller requests a connection for an identity
//!   → PooledConnector picks the plain or XA ConnectionPool
//!     → idle connection for that identity alive → lease and return it
//!     → capacity available → open a new connection via the factory
//!     → pool exhausted → wait (bounded by the configured budget) or error
//! Caller releases
//!   → still leased or bound to a transaction → stays checked out
//!   → otherwise returned to the identity's idle list (or destroyed)
//! Background cleaner
//!   → periodically evicts dead and idle-too-long connections
//! ```
//!
//! Connections are partitioned by [`ConnectorIdentity`]: a connection
//! opened under one identity is never handed to a request made under a
//! different one. XA checkouts inside one distributed transaction all
//! share a single physical connection, tracked by transaction id and
//! unbound by a completion hook.
//!
//! [`ConnectorIdentity`]: virtdb_connector::ConnectorIdentity

pub mod config;
pub mod error;
pub mod pool;
pub mod pooled;
pub mod status;
pub mod wrapper;

#[cfg(test)]
pub(crate) mod testing;

pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use pool::ConnectionPool;
pub use pooled::PooledConnector;
pub use status::{ConnectionAttemptFailure, PoolStats, PoolStatus, SourceStatus};
pub use wrapper::ConnectionWrapper;
