//! Identity-partitioned connection pooling engine.
//!
//! One `ConnectionPool` pools either plain or XA connections for a
//! single connector. Connections are bucketed by identity and bounded
//! twice: a fair global semaphore caps checked-out connections across
//! all identities, and a per-identity semaphore (allocated only when
//! the per-identity limit is stricter) caps each bucket.
//!
//! ```text
//! obtain(identity)
//!   → global permit, then per-identity permit, against one deadline
//!     → alive idle connection in the bucket → move to used, return
//!     → dead idle connection → destroy, try the next
//!     → nothing idle → open via the factory (outside all locks)
//!       → total over budget → evict one idle from another bucket
//! release(wrapper)
//!   → outstanding lease or transaction binding → no-op
//!   → otherwise used → unused (or destroyed), permits returned once
//! ```
//!
//! A permit is held for every checked-out connection and returned
//! exactly once when the connection leaves the used list. Idle
//! connections hold no permits, so the live total can transiently
//! overshoot `max_connections` while a new connection is opened; the
//! overshoot is corrected by best-effort eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use virtdb_connector::{
    ConnectorError, ConnectorFactory, ConnectorIdentity, TransactionContext,
};

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::status::{ConnectionAttemptFailure, PoolStats, PoolStatus, SourceStatus};
use crate::wrapper::ConnectionWrapper;

/// Per-identity bucket of used and idle connections.
struct IdentityBucket {
    lists: Mutex<BucketLists>,
    /// Present only when the per-identity limit is stricter than the
    /// global one.
    semaphore: Option<Arc<Semaphore>>,
}

struct BucketLists {
    /// Checked-out connections.
    used: Vec<Arc<ConnectionWrapper>>,
    /// Idle connections available for reuse, oldest first.
    unused: VecDeque<Arc<ConnectionWrapper>>,
}

/// Background cleaner task plus its shutdown signal.
struct CleanerTask {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Pools connections for one connector, partitioned by identity.
pub struct ConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn ConnectorFactory>,
    /// Whether this pool opens XA connections.
    xa: bool,
    /// Identity → bucket. The map lock is the structural lock; list
    /// mutation goes through each bucket's own lock.
    buckets: Mutex<HashMap<ConnectorIdentity, Arc<IdentityBucket>>>,
    /// Wrapper id → owning identity, for release-time lookup.
    owners: Mutex<HashMap<u64, ConnectorIdentity>>,
    /// Fair semaphore bounding checked-out connections globally.
    global_semaphore: Arc<Semaphore>,
    /// Live connections across all identities, used and idle.
    total_connections: AtomicUsize,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
    /// Most recent failed connection attempt, for status reporting.
    last_failure: parking_lot::Mutex<Option<ConnectionAttemptFailure>>,
    cleaner: parking_lot::Mutex<Option<CleanerTask>>,
}

impl ConnectionPool {
    /// Validate the configuration and start a pool.
    ///
    /// When shrinking is enabled this spawns the periodic cleaner, so
    /// it must run inside a tokio runtime. The cleaner holds only a
    /// weak reference and dies with the pool.
    pub fn start(
        config: PoolConfig,
        factory: Arc<dyn ConnectorFactory>,
        xa: bool,
    ) -> PoolResult<Arc<Self>> {
        config.validate()?;

        let pool = Arc::new(Self {
            global_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            config,
            factory,
            xa,
            buckets: Mutex::new(HashMap::new()),
            owners: Mutex::new(HashMap::new()),
            total_connections: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            last_failure: parking_lot::Mutex::new(None),
            cleaner: parking_lot::Mutex::new(None),
        });

        if pool.config.shrinking_enabled {
            pool.spawn_cleaner();
        }

        Ok(pool)
    }

    /// Obtain a leased connection for the given identity.
    ///
    /// Reuses an alive idle connection when the bucket has one,
    /// otherwise opens a new connection through the factory. The wait
    /// budget is one absolute deadline spanning every blocking step;
    /// when it elapses the call fails with a pool-exhaustion error.
    /// For XA pools the transaction context, when present, is passed
    /// through to the factory for enlistment.
    pub async fn obtain(
        &self,
        identity: &ConnectorIdentity,
        txn: Option<&dyn TransactionContext>,
    ) -> PoolResult<Arc<ConnectionWrapper>> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShutDown);
        }

        let started = Instant::now();
        let deadline = started + self.config.wait_for_source();

        let bucket = self.bucket_for(identity).await;

        // Global permit first, then the stricter per-identity permit,
        // both against the same deadline: the budget is cumulative.
        let global_permit = match tokio::time::timeout_at(
            deadline,
            Arc::clone(&self.global_semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::ShutDown),
            Err(_) => {
                return Err(self.exhausted(identity, started, self.config.max_connections));
            }
        };

        let identity_permit = match bucket.semaphore.as_ref() {
            Some(sem) => {
                match tokio::time::timeout_at(deadline, Arc::clone(sem).acquire_owned()).await {
                    Ok(Ok(permit)) => Some(permit),
                    Ok(Err(_)) => return Err(PoolError::ShutDown),
                    Err(_) => {
                        // The global permit drops (and is returned) here.
                        return Err(self.exhausted(
                            identity,
                            started,
                            self.config.max_connections_per_identity,
                        ));
                    }
                }
            }
            None => None,
        };

        // Reuse an alive idle connection; discard dead ones as found.
        while Instant::now() < deadline {
            let candidate = { bucket.lists.lock().await.unused.pop_front() };
            let Some(wrapper) = candidate else { break };

            if wrapper.is_alive().await {
                wrapper.lease();
                bucket.lists.lock().await.used.push(Arc::clone(&wrapper));
                global_permit.forget();
                if let Some(permit) = identity_permit {
                    permit.forget();
                }
                debug!(connection = wrapper.id(), %identity, "reused idle connection");
                return Ok(wrapper);
            }
            self.destroy(&wrapper).await;
        }

        // Nothing reusable — open a fresh connection outside all locks;
        // the factory may block on network I/O.
        let open = if self.xa {
            self.factory.open_xa_connection(identity, txn).await
        } else {
            self.factory.open_connection(identity).await
        };
        let raw = match open {
            Ok(conn) => conn,
            Err(err) => {
                // Permits drop and are returned on this path.
                self.record_failure(&err);
                warn!(%identity, error = %err, "failed to open source connection");
                return Err(PoolError::OpenFailed {
                    identity: identity.to_string(),
                    source: err,
                });
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let wrapper = Arc::new(ConnectionWrapper::new(
            id,
            identity.clone(),
            raw,
            self.config.source_test_interval(),
            self.xa,
        ));
        wrapper.lease();

        self.owners.lock().await.insert(id, identity.clone());
        bucket.lists.lock().await.used.push(Arc::clone(&wrapper));
        let total = self.total_connections.fetch_add(1, Ordering::SeqCst) + 1;

        global_permit.forget();
        if let Some(permit) = identity_permit {
            permit.forget();
        }

        debug!(connection = id, %identity, total, xa = self.xa, "opened new source connection");

        // Opening happens outside the locks, so the live total can
        // overshoot the cap; give back someone else's idle connection.
        if total > self.config.max_connections {
            self.evict_one_idle(identity).await;
        }

        Ok(wrapper)
    }

    /// Release a leased connection back to the pool.
    ///
    /// While other leases are outstanding or a transaction holds the
    /// wrapper this is a no-op. Releasing a wrapper the pool no longer
    /// tracks as checked out is also a no-op, so racing double
    /// releases are harmless. A successful release returns the
    /// connection to the idle list, or destroys it when `force_close`
    /// is set or the pool is shutting down, and gives back the permits
    /// exactly once.
    pub async fn release(&self, wrapper: &Arc<ConnectionWrapper>, force_close: bool) {
        if !wrapper.end_lease() {
            return;
        }

        wrapper.released().await;
        wrapper.mark_returned();

        let identity = { self.owners.lock().await.get(&wrapper.id()).cloned() };
        let Some(identity) = identity else { return };

        let bucket = { self.buckets.lock().await.get(&identity).cloned() };
        let Some(bucket) = bucket else { return };

        let was_used = {
            let mut lists = bucket.lists.lock().await;
            match lists.used.iter().position(|w| w.id() == wrapper.id()) {
                Some(pos) => {
                    lists.used.swap_remove(pos);
                    true
                }
                None => false,
            }
        };
        if !was_used {
            return;
        }

        if force_close || self.shutting_down.load(Ordering::SeqCst) {
            self.destroy(wrapper).await;
        } else {
            bucket.lists.lock().await.unused.push_back(Arc::clone(wrapper));
            debug!(connection = wrapper.id(), %identity, "returned connection to pool");
        }

        if let Some(sem) = bucket.semaphore.as_ref() {
            sem.add_permits(1);
        }
        self.global_semaphore.add_permits(1);
    }

    /// Aggregate health of this pooled source.
    ///
    /// Alive when any connection is checked out or an idle connection
    /// answers its liveness probe. With no evidence either way, a
    /// throwaway shared connection is probed — but only for connectors
    /// that support identity-less connections; per-user connectors are
    /// never reported dead off a single probe identity.
    pub async fn status(&self) -> PoolStatus {
        let buckets: Vec<Arc<IdentityBucket>> =
            self.buckets.lock().await.values().cloned().collect();

        let mut status = SourceStatus::Unknown;
        'scan: for bucket in &buckets {
            let idle: Vec<Arc<ConnectionWrapper>> = {
                let lists = bucket.lists.lock().await;
                if !lists.used.is_empty() {
                    status = SourceStatus::Alive;
                    break 'scan;
                }
                lists.unused.iter().cloned().collect()
            };
            for wrapper in idle {
                if wrapper.is_alive().await {
                    status = SourceStatus::Alive;
                    break 'scan;
                }
            }
        }

        if status == SourceStatus::Unknown
            && self.factory.supports_single_identity()
            && !self.shutting_down.load(Ordering::SeqCst)
        {
            match self.obtain(&ConnectorIdentity::Shared, None).await {
                Ok(wrapper) => {
                    self.release(&wrapper, false).await;
                    status = SourceStatus::Alive;
                }
                Err(_) => status = SourceStatus::Dead,
            }
        }

        PoolStatus {
            status,
            total_connections: self.total_connections.load(Ordering::SeqCst),
            last_failure: self.last_failure.lock().clone(),
        }
    }

    /// Evict idle connections that are dead or, when shrinking is
    /// enabled, idle longer than the configured threshold. With
    /// `force_close` every idle connection is destroyed unprobed.
    pub async fn clean_up(&self, force_close: bool) {
        let buckets: Vec<(ConnectorIdentity, Arc<IdentityBucket>)> = {
            self.buckets
                .lock()
                .await
                .iter()
                .map(|(identity, bucket)| (identity.clone(), Arc::clone(bucket)))
                .collect()
        };
        let threshold = self.config.live_and_unused();

        for (identity, bucket) in buckets {
            let candidates: Vec<Arc<ConnectionWrapper>> =
                { bucket.lists.lock().await.unused.drain(..).collect() };
            if candidates.is_empty() {
                continue;
            }

            let mut kept = Vec::new();
            let mut evicted = 0usize;
            for wrapper in candidates {
                let evict = if force_close {
                    true
                } else if !wrapper.is_alive().await {
                    true
                } else {
                    self.config.shrinking_enabled && wrapper.idle_for() > threshold
                };

                if evict {
                    self.destroy(&wrapper).await;
                    evicted += 1;
                } else {
                    kept.push(wrapper);
                }
            }

            if !kept.is_empty() {
                let mut lists = bucket.lists.lock().await;
                // Survivors go back ahead of anything released meanwhile.
                for wrapper in kept.into_iter().rev() {
                    lists.unused.push_front(wrapper);
                }
            }
            if evicted > 0 {
                info!(%identity, evicted, "evicted idle connections");
            }
        }
    }

    /// Shut the pool down: subsequent obtains fail fast, in-flight
    /// releases force-close, the cleaner stops, and every idle
    /// connection is destroyed.
    pub async fn shut_down(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_cleaner();
        self.clean_up(true).await;
        info!(xa = self.xa, "connection pool shut down");
    }

    /// Live connections across all identities, used and idle.
    pub fn total_connections(&self) -> usize {
        self.total_connections.load(Ordering::SeqCst)
    }

    /// Current used/idle/total counts.
    pub async fn stats(&self) -> PoolStats {
        let buckets: Vec<Arc<IdentityBucket>> =
            self.buckets.lock().await.values().cloned().collect();
        let mut used = 0;
        let mut idle = 0;
        for bucket in buckets {
            let lists = bucket.lists.lock().await;
            used += lists.used.len();
            idle += lists.unused.len();
        }
        PoolStats {
            used,
            idle,
            total: self.total_connections.load(Ordering::SeqCst),
        }
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn bucket_for(&self, identity: &ConnectorIdentity) -> Arc<IdentityBucket> {
        let mut buckets = self.buckets.lock().await;
        Arc::clone(buckets.entry(identity.clone()).or_insert_with(|| {
            let semaphore = (self.config.max_connections_per_identity
                < self.config.max_connections)
                .then(|| Arc::new(Semaphore::new(self.config.max_connections_per_identity)));
            Arc::new(IdentityBucket {
                lists: Mutex::new(BucketLists {
                    used: Vec::new(),
                    unused: VecDeque::new(),
                }),
                semaphore,
            })
        }))
    }

    /// Close a connection that is in neither list and drop it from the
    /// pool's books. Idle connections hold no permits, so there is no
    /// semaphore bookkeeping here.
    async fn destroy(&self, wrapper: &Arc<ConnectionWrapper>) {
        self.owners.lock().await.remove(&wrapper.id());
        wrapper.close().await;
        let total = self
            .total_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                Some(count.saturating_sub(1))
            })
            .unwrap_or(1)
            .saturating_sub(1);
        debug!(
            connection = wrapper.id(),
            identity = %wrapper.identity(),
            total,
            "destroyed source connection"
        );
    }

    /// Best-effort overshoot correction: destroy one idle connection
    /// from the first other bucket that has one.
    async fn evict_one_idle(&self, requesting: &ConnectorIdentity) {
        let buckets: Vec<(ConnectorIdentity, Arc<IdentityBucket>)> = {
            self.buckets
                .lock()
                .await
                .iter()
                .map(|(identity, bucket)| (identity.clone(), Arc::clone(bucket)))
                .collect()
        };
        for (identity, bucket) in buckets {
            if identity == *requesting {
                continue;
            }
            let victim = { bucket.lists.lock().await.unused.pop_front() };
            if let Some(wrapper) = victim {
                debug!(
                    connection = wrapper.id(),
                    %identity,
                    "evicting idle connection to get back under the connection cap"
                );
                self.destroy(&wrapper).await;
                return;
            }
        }
    }

    fn spawn_cleaner(self: &Arc<Self>) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let weak = Arc::downgrade(self);
        let interval = self.config.cleaning_interval();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let Some(pool) = weak.upgrade() else { break };
                        pool.clean_up(false).await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("connection cleaner shutting down");
                        break;
                    }
                }
            }
        });

        *self.cleaner.lock() = Some(CleanerTask {
            handle,
            shutdown_tx,
        });
    }

    fn stop_cleaner(&self) {
        if let Some(task) = self.cleaner.lock().take() {
            let _ = task.shutdown_tx.send(true);
            task.handle.abort();
        }
    }

    fn record_failure(&self, err: &ConnectorError) {
        *self.last_failure.lock() = Some(ConnectionAttemptFailure {
            message: err.to_string(),
            at: SystemTime::now(),
        });
    }

    fn exhausted(
        &self,
        identity: &ConnectorIdentity,
        started: Instant,
        limit: usize,
    ) -> PoolError {
        PoolError::Exhausted {
            identity: identity.to_string(),
            waited_ms: started.elapsed().as_millis() as u64,
            limit,
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("xa", &self.xa)
            .field("total_connections", &self.total_connections())
            .field("shutting_down", &self.shutting_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
