//! virtdb-connector — connector abstractions for VirtDB.
//!
//! Defines the contracts between the query-execution layer, the
//! connection pooling layer, and the per-source connector
//! implementations:
//! - **identity**: the opaque key that partitions pooled connections
//! - **connection**: the raw source-connection trait (ping, release
//!   notification, close)
//! - **factory**: the connector factory invoked by the pool to open
//!   plain and XA connections
//! - **transaction**: the transaction-context abstraction with
//!   completion hooks, used for XA connection affinity

pub mod connection;
pub mod error;
pub mod factory;
pub mod identity;
pub mod transaction;

pub use connection::SourceConnection;
pub use error::{ConnectorError, ConnectorResult};
pub use factory::ConnectorFactory;
pub use identity::ConnectorIdentity;
pub use transaction::{
    CompletionHook, LocalTransactionContext, TransactionContext, TransactionOutcome,
};
