//! Test doubles shared by the pool test suites.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use virtdb_connector::{
    ConnectorError, ConnectorFactory, ConnectorIdentity, ConnectorResult, SourceConnection,
    TransactionContext,
};

/// Install a tracing subscriber for test debugging. No-op when one is
/// already set.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Shared view of one mock connection's state.
#[derive(Clone)]
pub(crate) struct ConnProbe {
    pub alive: Arc<AtomicBool>,
    pub closed: Arc<AtomicBool>,
    pub pings: Arc<AtomicU32>,
    pub releases: Arc<AtomicU32>,
}

impl ConnProbe {
    fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
            closed: Arc::new(AtomicBool::new(false)),
            pings: Arc::new(AtomicU32::new(0)),
            releases: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

pub(crate) struct MockConnection {
    probe: ConnProbe,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            probe: ConnProbe::new(),
        }
    }

    pub fn probe(&self) -> ConnProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl SourceConnection for MockConnection {
    async fn ping(&self) -> bool {
        self.probe.pings.fetch_add(1, Ordering::SeqCst);
        self.probe.alive.load(Ordering::SeqCst)
    }

    async fn released(&self) {
        self.probe.releases.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }
}

/// Configurable connector factory recording every connection it opens.
pub(crate) struct MockFactory {
    opens: AtomicU32,
    xa_opens: AtomicU32,
    pub fail: AtomicBool,
    xa: bool,
    single_identity: bool,
    created: Mutex<Vec<ConnProbe>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            opens: AtomicU32::new(0),
            xa_opens: AtomicU32::new(0),
            fail: AtomicBool::new(false),
            xa: false,
            single_identity: true,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Factory that supports XA connections.
    pub fn xa_capable() -> Self {
        Self { xa: true, ..Self::new() }
    }

    /// Factory that requires per-user identities (no shared probe).
    pub fn per_user() -> Self {
        Self {
            single_identity: false,
            ..Self::new()
        }
    }

    /// Total connections opened, plain and XA.
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst) + self.xa_opens.load(Ordering::SeqCst)
    }

    /// Probe for the n-th connection opened by this factory.
    pub fn probe(&self, index: usize) -> ConnProbe {
        self.created.lock()[index].clone()
    }

    fn open(&self) -> Box<dyn SourceConnection> {
        let conn = MockConnection::new();
        self.created.lock().push(conn.probe());
        Box::new(conn)
    }
}

#[async_trait]
impl ConnectorFactory for MockFactory {
    async fn open_connection(
        &self,
        _identity: &ConnectorIdentity,
    ) -> ConnectorResult<Box<dyn SourceConnection>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConnectorError::Connection("connection refused".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.open())
    }

    async fn open_xa_connection(
        &self,
        _identity: &ConnectorIdentity,
        _txn: Option<&dyn TransactionContext>,
    ) -> ConnectorResult<Box<dyn SourceConnection>> {
        if !self.xa {
            return Err(ConnectorError::Unsupported(
                "connector does not support XA connections".to_string(),
            ));
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConnectorError::Connection("connection refused".to_string()));
        }
        self.xa_opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.open())
    }

    fn supports_xa(&self) -> bool {
        self.xa
    }

    fn supports_single_identity(&self) -> bool {
        self.single_identity
    }
}
