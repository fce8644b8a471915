//! Raw source-connection trait.

use async_trait::async_trait;

/// A single raw connection to a data source.
///
/// Implementations front whatever the source actually speaks (a
/// database wire protocol, an HTTP client, a SaaS session) and must be
/// usable through a shared reference: the pool hands the same
/// connection to at most one leaseholder at a time, but liveness
/// probes and close may race with late releases.
#[async_trait]
pub trait SourceConnection: Send + Sync {
    /// Liveness probe.
    ///
    /// Returns `false` when the connection is no longer usable. Probe
    /// failures are expressed as `false`, never as an error — a dead
    /// connection is disposed of, not reported. Sources without a
    /// cheap probe inherit the default and are assumed alive.
    async fn ping(&self) -> bool {
        true
    }

    /// Notification that the pool has taken this connection back.
    ///
    /// Invoked before the connection re-enters the idle list. Sources
    /// can use it to reset session state.
    async fn released(&self) {}

    /// Release the underlying resource unconditionally.
    ///
    /// Called by the pool during eviction and shutdown, never by
    /// ordinary leaseholders.
    async fn close(&self);
}
