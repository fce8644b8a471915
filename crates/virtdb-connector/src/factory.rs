//! Connector factory — opens raw connections for the pool.

use async_trait::async_trait;

use crate::connection::SourceConnection;
use crate::error::{ConnectorError, ConnectorResult};
use crate::identity::ConnectorIdentity;
use crate::transaction::TransactionContext;

/// Factory for raw source connections, injected into the pool.
///
/// A single factory instance is shared and invoked concurrently to
/// open independent connections; implementations must tolerate
/// concurrent `open_connection`/`open_xa_connection` calls.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    /// Open a new connection for the given identity.
    async fn open_connection(
        &self,
        identity: &ConnectorIdentity,
    ) -> ConnectorResult<Box<dyn SourceConnection>>;

    /// Open a new XA-capable connection, optionally enlisted in the
    /// given ambient transaction.
    ///
    /// Only meaningful when [`supports_xa`](Self::supports_xa) is true.
    async fn open_xa_connection(
        &self,
        _identity: &ConnectorIdentity,
        _txn: Option<&dyn TransactionContext>,
    ) -> ConnectorResult<Box<dyn SourceConnection>> {
        Err(ConnectorError::Unsupported(
            "connector does not support XA connections".to_string(),
        ))
    }

    /// Whether this connector can participate in distributed
    /// transactions.
    fn supports_xa(&self) -> bool {
        false
    }

    /// Whether an identity-less ([`ConnectorIdentity::Shared`])
    /// connection is meaningful for this connector.
    ///
    /// Gates the pool's health probe: a connector that requires
    /// per-user credentials cannot be probed with a throwaway shared
    /// connection, and a single failed identity says nothing about the
    /// others.
    fn supports_single_identity(&self) -> bool;
}
