//! Pooled connector facade.
//!
//! Presents a uniform pooled-connection interface over a possibly
//! XA-capable connector factory. Plain and XA connections draw from
//! two independent pools. XA checkouts are additionally bound to the
//! ambient transaction by transaction id, so all work inside one
//! distributed transaction shares a single physical connection; a
//! completion hook unbinds the connection when the transaction
//! finishes, whatever the outcome.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use virtdb_connector::{ConnectorFactory, ConnectorIdentity, TransactionContext};

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::pool::ConnectionPool;
use crate::status::PoolStatus;
use crate::wrapper::ConnectionWrapper;

/// Pooled facade over one connector.
pub struct PooledConnector {
    pool: Arc<ConnectionPool>,
    /// Present only when the factory supports XA.
    xa_pool: Option<Arc<ConnectionPool>>,
    /// Transaction id → connection bound to that transaction.
    bound: Arc<Mutex<HashMap<String, Arc<ConnectionWrapper>>>>,
}

impl PooledConnector {
    /// Start the plain pool and, for XA-capable factories, the XA
    /// pool, both from the same configuration.
    pub fn start(config: PoolConfig, factory: Arc<dyn ConnectorFactory>) -> PoolResult<Self> {
        let xa_pool = if factory.supports_xa() {
            Some(ConnectionPool::start(
                config.clone(),
                Arc::clone(&factory),
                true,
            )?)
        } else {
            None
        };
        let pool = ConnectionPool::start(config, factory, false)?;
        Ok(Self {
            pool,
            xa_pool,
            bound: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Lease a plain connection for the given identity.
    pub async fn connection(
        &self,
        identity: &ConnectorIdentity,
    ) -> PoolResult<Arc<ConnectionWrapper>> {
        self.pool.obtain(identity, None).await
    }

    /// Lease an XA connection, reusing the connection already bound to
    /// the ambient transaction when there is one.
    ///
    /// With a transaction context, the returned connection is bound to
    /// the transaction id and stays checked out until both the caller
    /// releases it and the transaction completes. Without a context it
    /// behaves like a plain checkout against the XA pool.
    pub async fn xa_connection(
        &self,
        identity: &ConnectorIdentity,
        txn: Option<&dyn TransactionContext>,
    ) -> PoolResult<Arc<ConnectionWrapper>> {
        let Some(xa_pool) = self.xa_pool.as_ref() else {
            return Err(PoolError::XaUnsupported);
        };

        if let Some(txn) = txn {
            let bound = self.bound.lock().await;
            if let Some(wrapper) = bound.get(txn.transaction_id()) {
                wrapper.lease();
                debug!(
                    transaction_id = txn.transaction_id(),
                    connection = wrapper.id(),
                    "reusing transaction-bound connection"
                );
                return Ok(Arc::clone(wrapper));
            }
        }

        let wrapper = xa_pool.obtain(identity, txn).await?;

        if let Some(txn) = txn {
            wrapper.set_in_transaction(true);
            let txid = txn.transaction_id().to_string();
            self.bound
                .lock()
                .await
                .insert(txid.clone(), Arc::clone(&wrapper));

            let bound = Arc::clone(&self.bound);
            let pool = Arc::clone(xa_pool);
            let hook_wrapper = Arc::clone(&wrapper);
            let registered = txn.add_completion_hook(Box::new(move |_outcome| {
                Box::pin(async move {
                    bound.lock().await.remove(&txid);
                    hook_wrapper.set_in_transaction(false);
                    pool.release(&hook_wrapper, false).await;
                })
            }));

            if let Err(err) = registered {
                // No leak on setup failure: unbind and hand the
                // connection straight back.
                self.bound.lock().await.remove(txn.transaction_id());
                wrapper.set_in_transaction(false);
                xa_pool.release(&wrapper, false).await;
                return Err(PoolError::Enlistment { source: err });
            }

            debug!(
                transaction_id = txn.transaction_id(),
                connection = wrapper.id(),
                "bound connection to transaction"
            );
        }

        Ok(wrapper)
    }

    /// Release a leased connection back to whichever pool owns it.
    pub async fn release(&self, wrapper: &Arc<ConnectionWrapper>, force_close: bool) {
        match (self.xa_pool.as_ref(), wrapper.is_xa()) {
            (Some(xa_pool), true) => xa_pool.release(wrapper, force_close).await,
            _ => self.pool.release(wrapper, force_close).await,
        }
    }

    /// Aggregate health, reported off the plain pool.
    pub async fn status(&self) -> PoolStatus {
        self.pool.status().await
    }

    /// Shut down both pools.
    pub async fn stop(&self) {
        self.pool.shut_down().await;
        if let Some(xa_pool) = self.xa_pool.as_ref() {
            xa_pool.shut_down().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::SourceStatus;
    use crate::testing::MockFactory;
    use virtdb_connector::{LocalTransactionContext, TransactionOutcome};

    fn shared() -> ConnectorIdentity {
        ConnectorIdentity::Shared
    }

    fn test_config() -> PoolConfig {
        PoolConfig::default()
            .with_max_connections(3)
            .with_wait_for_source_ms(200)
            .with_shrinking(false)
    }

    fn make_connector(factory: MockFactory) -> (PooledConnector, Arc<MockFactory>) {
        let factory = Arc::new(factory);
        let connector = PooledConnector::start(test_config(), factory.clone()).unwrap();
        (connector, factory)
    }

    // ── Plain connections ───────────────────────────────────────────

    #[tokio::test]
    async fn plain_connection_delegates_to_plain_pool() {
        let (connector, factory) = make_connector(MockFactory::new());

        let wrapper = connector.connection(&shared()).await.unwrap();
        assert_eq!(wrapper.lease_count(), 1);
        assert!(!wrapper.is_xa());
        assert_eq!(factory.opens(), 1);

        connector.release(&wrapper, false).await;
        assert_eq!(connector.pool.stats().await.idle, 1);
    }

    // ── XA connections ──────────────────────────────────────────────

    #[tokio::test]
    async fn xa_connection_without_factory_support_fails() {
        let (connector, _) = make_connector(MockFactory::new());
        let err = connector.xa_connection(&shared(), None).await.unwrap_err();
        assert!(matches!(err, PoolError::XaUnsupported));
    }

    #[tokio::test]
    async fn xa_connection_without_transaction_is_plain_checkout() {
        let (connector, factory) = make_connector(MockFactory::xa_capable());

        let wrapper = connector.xa_connection(&shared(), None).await.unwrap();
        assert!(wrapper.is_xa());
        assert_eq!(wrapper.lease_count(), 1);
        assert!(!wrapper.in_transaction());
        assert_eq!(factory.opens(), 1);

        connector.release(&wrapper, false).await;
        let xa_stats = connector.xa_pool.as_ref().unwrap().stats().await;
        assert_eq!(xa_stats.idle, 1);
    }

    #[tokio::test]
    async fn same_transaction_reuses_the_same_connection() {
        let (connector, factory) = make_connector(MockFactory::xa_capable());
        let txn = LocalTransactionContext::new("txn-1");

        let first = connector.xa_connection(&shared(), Some(&txn)).await.unwrap();
        let second = connector.xa_connection(&shared(), Some(&txn)).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(first.lease_count(), 2);
        assert!(first.in_transaction());
        assert_eq!(factory.opens(), 1);
    }

    #[tokio::test]
    async fn completion_drops_one_lease_and_keeps_connection_checked_out() {
        let (connector, _) = make_connector(MockFactory::xa_capable());
        let txn = LocalTransactionContext::new("txn-1");

        let first = connector.xa_connection(&shared(), Some(&txn)).await.unwrap();
        let _second = connector.xa_connection(&shared(), Some(&txn)).await.unwrap();
        assert_eq!(first.lease_count(), 2);

        txn.complete(TransactionOutcome::Committed).await;

        // The transaction's hold is gone, the caller's lease remains.
        assert_eq!(first.lease_count(), 1);
        assert!(!first.in_transaction());
        assert!(connector.bound.lock().await.is_empty());
        let xa_stats = connector.xa_pool.as_ref().unwrap().stats().await;
        assert_eq!(xa_stats.used, 1);
        assert_eq!(xa_stats.idle, 0);

        // Releasing the remaining lease returns it to the pool.
        connector.release(&first, false).await;
        let xa_stats = connector.xa_pool.as_ref().unwrap().stats().await;
        assert_eq!(xa_stats.used, 0);
        assert_eq!(xa_stats.idle, 1);
    }

    #[tokio::test]
    async fn caller_release_before_completion_keeps_connection_bound() {
        let (connector, _) = make_connector(MockFactory::xa_capable());
        let txn = LocalTransactionContext::new("txn-1");

        let wrapper = connector.xa_connection(&shared(), Some(&txn)).await.unwrap();
        connector.release(&wrapper, false).await;

        // Still bound to the open transaction, so still checked out.
        let xa_stats = connector.xa_pool.as_ref().unwrap().stats().await;
        assert_eq!(xa_stats.used, 1);
        assert_eq!(xa_stats.idle, 0);

        txn.complete(TransactionOutcome::RolledBack).await;

        // Completion was the last holder; the connection is pooled.
        let xa_stats = connector.xa_pool.as_ref().unwrap().stats().await;
        assert_eq!(xa_stats.used, 0);
        assert_eq!(xa_stats.idle, 1);
    }

    #[tokio::test]
    async fn enlistment_failure_releases_the_connection() {
        let (connector, _) = make_connector(MockFactory::xa_capable());
        let txn = LocalTransactionContext::new("txn-1");
        txn.complete(TransactionOutcome::Committed).await;

        // Hook registration against a finished transaction fails; the
        // just-obtained connection must not leak.
        let err = connector
            .xa_connection(&shared(), Some(&txn))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Enlistment { .. }));

        assert!(connector.bound.lock().await.is_empty());
        let xa_stats = connector.xa_pool.as_ref().unwrap().stats().await;
        assert_eq!(xa_stats.used, 0);
        assert_eq!(xa_stats.idle, 1);
    }

    #[tokio::test]
    async fn different_transactions_get_different_connections() {
        let (connector, factory) = make_connector(MockFactory::xa_capable());
        let txn_a = LocalTransactionContext::new("txn-a");
        let txn_b = LocalTransactionContext::new("txn-b");

        let a = connector.xa_connection(&shared(), Some(&txn_a)).await.unwrap();
        let b = connector.xa_connection(&shared(), Some(&txn_b)).await.unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(factory.opens(), 2);
    }

    // ── Release routing ─────────────────────────────────────────────

    #[tokio::test]
    async fn release_routes_to_the_owning_pool() {
        let (connector, _) = make_connector(MockFactory::xa_capable());

        let plain = connector.connection(&shared()).await.unwrap();
        let xa = connector.xa_connection(&shared(), None).await.unwrap();

        connector.release(&plain, false).await;
        connector.release(&xa, false).await;

        assert_eq!(connector.pool.stats().await.idle, 1);
        assert_eq!(connector.xa_pool.as_ref().unwrap().stats().await.idle, 1);
    }

    // ── Status and shutdown ─────────────────────────────────────────

    #[tokio::test]
    async fn status_reports_off_the_plain_pool() {
        let (connector, _) = make_connector(MockFactory::per_user());
        let status = connector.status().await;
        assert_eq!(status.status, SourceStatus::Unknown);
    }

    #[tokio::test]
    async fn stop_shuts_down_both_pools() {
        let (connector, _) = make_connector(MockFactory::xa_capable());
        connector.stop().await;

        assert!(matches!(
            connector.connection(&shared()).await,
            Err(PoolError::ShutDown)
        ));
        assert!(matches!(
            connector.xa_connection(&shared(), None).await,
            Err(PoolError::ShutDown)
        ));
    }
}
