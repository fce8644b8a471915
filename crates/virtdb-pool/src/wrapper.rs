//! Pooled connection wrapper.
//!
//! Wraps one raw source connection with the state the pool needs:
//! lease count, transaction binding, time returned to the pool, and a
//! cached liveness verdict so high-frequency reuse does not probe the
//! source on every checkout.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use virtdb_connector::{ConnectorIdentity, SourceConnection};

/// Liveness verdict for a pooled connection. Dead is absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Liveness {
    Untested,
    Alive,
    Dead,
}

struct LivenessState {
    liveness: Liveness,
    last_tested: Option<Instant>,
}

/// A pooled handle around one raw source connection.
///
/// A wrapper is checked out to at most one caller, but a distributed
/// transaction may lease the same wrapper again so that all work
/// inside the transaction shares one physical connection. The wrapper
/// leaves the used list only when the lease count reaches zero and no
/// transaction holds it.
pub struct ConnectionWrapper {
    id: u64,
    identity: ConnectorIdentity,
    conn: Box<dyn SourceConnection>,
    test_interval: Duration,
    /// Whether the owning pool is the XA pool.
    xa: bool,
    liveness: Mutex<LivenessState>,
    lease_count: AtomicU32,
    in_transaction: AtomicBool,
    returned_at: Mutex<Instant>,
}

impl ConnectionWrapper {
    pub(crate) fn new(
        id: u64,
        identity: ConnectorIdentity,
        conn: Box<dyn SourceConnection>,
        test_interval: Duration,
        xa: bool,
    ) -> Self {
        Self {
            id,
            identity,
            conn,
            test_interval,
            xa,
            liveness: Mutex::new(LivenessState {
                liveness: Liveness::Untested,
                last_tested: None,
            }),
            lease_count: AtomicU32::new(0),
            in_transaction: AtomicBool::new(false),
            returned_at: Mutex::new(Instant::now()),
        }
    }

    /// Unique id of this wrapper within its pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Identity this connection was opened under.
    pub fn identity(&self) -> &ConnectorIdentity {
        &self.identity
    }

    /// The underlying source connection.
    pub fn connection(&self) -> &dyn SourceConnection {
        self.conn.as_ref()
    }

    /// Whether this connection came from the XA pool.
    pub fn is_xa(&self) -> bool {
        self.xa
    }

    /// Whether the connection is believed usable.
    ///
    /// Once dead, always dead. An alive verdict is re-checked against
    /// the source only when the configured test interval has elapsed
    /// since the last probe; in between, the cached verdict is
    /// returned. Probe failures mark the connection dead, they are
    /// never surfaced as errors.
    pub async fn is_alive(&self) -> bool {
        {
            let state = self.liveness.lock();
            match state.liveness {
                Liveness::Dead => return false,
                Liveness::Alive => {
                    if let Some(tested) = state.last_tested {
                        if tested.elapsed() < self.test_interval {
                            return true;
                        }
                    }
                }
                Liveness::Untested => {}
            }
        }

        // Probe outside the lock; the source may block.
        let alive = self.conn.ping().await;

        let mut state = self.liveness.lock();
        if state.liveness == Liveness::Dead {
            return false;
        }
        state.liveness = if alive { Liveness::Alive } else { Liveness::Dead };
        state.last_tested = Some(Instant::now());
        if !alive {
            debug!(
                connection = self.id,
                identity = %self.identity,
                "connection failed liveness probe"
            );
        }
        alive
    }

    /// Number of outstanding leases.
    pub fn lease_count(&self) -> u32 {
        self.lease_count.load(Ordering::SeqCst)
    }

    /// Whether the wrapper is bound to an active transaction.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    /// Record one more holder of this wrapper.
    pub(crate) fn lease(&self) {
        self.lease_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop one lease (the count never goes below zero).
    ///
    /// Returns true when the wrapper is now fully released — no
    /// outstanding lease and no transaction binding — and should go
    /// through pool-level release.
    pub(crate) fn end_lease(&self) -> bool {
        let count = self
            .lease_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                Some(c.saturating_sub(1))
            })
            .map(|prev| prev.saturating_sub(1))
            .unwrap_or(0);
        count == 0 && !self.in_transaction()
    }

    pub(crate) fn set_in_transaction(&self, bound: bool) {
        self.in_transaction.store(bound, Ordering::SeqCst);
    }

    /// Stamp the time this wrapper came back to the pool.
    pub(crate) fn mark_returned(&self) {
        *self.returned_at.lock() = Instant::now();
    }

    /// How long this wrapper has sat since it was last returned.
    pub(crate) fn idle_for(&self) -> Duration {
        self.returned_at.lock().elapsed()
    }

    /// Notify the source that the pool took the connection back.
    pub(crate) async fn released(&self) {
        self.conn.released().await;
    }

    /// Release the raw connection resource. Pool-internal: only
    /// eviction and shutdown paths call this.
    pub(crate) async fn close(&self) {
        self.conn.close().await;
    }
}

impl std::fmt::Debug for ConnectionWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWrapper")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("lease_count", &self.lease_count())
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}
