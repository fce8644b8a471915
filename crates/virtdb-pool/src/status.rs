//! Pool status surface for operational callers.

use std::time::SystemTime;

use serde::Serialize;

/// Aggregate health of a pooled source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// At least one connection is checked out or a pooled connection
    /// answers liveness probes.
    Alive,
    /// A probe connection could not be opened. Only reported for
    /// connectors that support identity-less connections.
    Dead,
    /// Nothing is known — no connections exist and no probe is
    /// meaningful.
    Unknown,
}

/// The most recent failed connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionAttemptFailure {
    /// Rendered connector error.
    pub message: String,
    /// When the attempt failed.
    pub at: SystemTime,
}

/// Snapshot returned by `ConnectionPool::status`.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub status: SourceStatus,
    /// Live connections across all identities, used and idle.
    pub total_connections: usize,
    /// Most recent failed connection attempt, if any.
    pub last_failure: Option<ConnectionAttemptFailure>,
}

/// Per-pool connection counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Connections currently checked out.
    pub used: usize,
    /// Connections sitting idle, available for reuse.
    pub idle: usize,
    /// Live connections (used + idle).
    pub total: usize,
}
