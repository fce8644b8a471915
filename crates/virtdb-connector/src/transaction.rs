//! Transaction contexts and completion hooks.
//!
//! The pool binds XA connections to an ambient transaction and needs
//! to know when that transaction finishes, whatever coordinator drives
//! it. The contract here is deliberately small: an opaque transaction
//! id plus registration of a completion hook invoked exactly once with
//! the outcome.

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ConnectorError, ConnectorResult};

/// How a transaction finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
}

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Hook invoked once when the transaction completes.
pub type CompletionHook = Box<dyn FnOnce(TransactionOutcome) -> BoxFuture + Send>;

/// An ambient transaction as seen by the pooling layer.
pub trait TransactionContext: Send + Sync {
    /// Opaque identifier for this transaction.
    ///
    /// Connections are bound per id: all pool checkouts inside one
    /// transaction share a single physical connection.
    fn transaction_id(&self) -> &str;

    /// Register a hook invoked exactly once at transaction completion,
    /// regardless of outcome.
    ///
    /// Fails with [`ConnectorError::Transaction`] if the transaction
    /// has already completed.
    fn add_completion_hook(&self, hook: CompletionHook) -> ConnectorResult<()>;
}

struct HookState {
    completed: bool,
    hooks: Vec<CompletionHook>,
}

/// A coordinator-owned transaction context.
///
/// Embedders without an external transaction coordinator create one of
/// these per transaction and call [`complete`](Self::complete) when
/// the transaction commits or rolls back. Hooks run in registration
/// order on the completing task.
pub struct LocalTransactionContext {
    id: String,
    state: Mutex<HookState>,
}

impl LocalTransactionContext {
    /// Create a context for the given transaction id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(HookState {
                completed: false,
                hooks: Vec::new(),
            }),
        }
    }

    /// Complete the transaction, draining and running all hooks.
    ///
    /// Only the first call runs hooks; later calls are no-ops.
    pub async fn complete(&self, outcome: TransactionOutcome) {
        let hooks = {
            let mut state = self.state.lock();
            if state.completed {
                return;
            }
            state.completed = true;
            std::mem::take(&mut state.hooks)
        };

        debug!(
            transaction_id = %self.id,
            ?outcome,
            hooks = hooks.len(),
            "transaction completed"
        );

        for hook in hooks {
            hook(outcome).await;
        }
    }

    /// Whether [`complete`](Self::complete) has been called.
    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }
}

impl TransactionContext for LocalTransactionContext {
    fn transaction_id(&self) -> &str {
        &self.id
    }

    fn add_completion_hook(&self, hook: CompletionHook) -> ConnectorResult<()> {
        let mut state = self.state.lock();
        if state.completed {
            return Err(ConnectorError::Transaction(format!(
                "transaction {} already completed",
                self.id
            )));
        }
        state.hooks.push(hook);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn hook_fires_on_complete() {
        let txn = LocalTransactionContext::new("txn-1");
        let fired = Arc::new(AtomicU32::new(0));

        let fired_clone = fired.clone();
        txn.add_completion_hook(Box::new(move |outcome| {
            Box::pin(async move {
                assert_eq!(outcome, TransactionOutcome::Committed);
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })
        }))
        .unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        txn.complete(TransactionOutcome::Committed).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let txn = LocalTransactionContext::new("txn-1");
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            txn.add_completion_hook(Box::new(move |_| {
                Box::pin(async move {
                    order.lock().push(i);
                })
            }))
            .unwrap();
        }

        txn.complete(TransactionOutcome::RolledBack).await;
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn complete_twice_fires_hooks_once() {
        let txn = LocalTransactionContext::new("txn-1");
        let fired = Arc::new(AtomicU32::new(0));

        let fired_clone = fired.clone();
        txn.add_completion_hook(Box::new(move |_| {
            Box::pin(async move {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })
        }))
        .unwrap();

        txn.complete(TransactionOutcome::Committed).await;
        txn.complete(TransactionOutcome::Committed).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn register_after_complete_fails() {
        let txn = LocalTransactionContext::new("txn-1");
        txn.complete(TransactionOutcome::Committed).await;
        assert!(txn.is_completed());

        let result = txn.add_completion_hook(Box::new(|_| Box::pin(async {})));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("already completed"));
    }

    #[test]
    fn transaction_id_round_trip() {
        let txn = LocalTransactionContext::new("global-42");
        assert_eq!(txn.transaction_id(), "global-42");
        assert!(!txn.is_completed());
    }
}
