//! Pool configuration.
//!
//! Sizing and timing knobs for a connector's connection pools. The
//! same configuration drives both the plain and the XA pool of a
//! connector. Embeds in TOML deployment specs (every field has a
//! default) and parses from flat string property bags.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{PoolError, PoolResult};

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum live connections across all identities (default: 20).
    pub max_connections: usize,
    /// Maximum live connections per identity (default: 20). A
    /// per-identity semaphore is only allocated when this is stricter
    /// than `max_connections`.
    pub max_connections_per_identity: usize,
    /// Idle age after which a connection is eligible for shrinking
    /// eviction, in seconds (default: 60).
    pub live_and_unused_secs: u64,
    /// Total wait budget for obtaining a connection, in milliseconds
    /// (default: 120000). Spent cumulatively across the global permit,
    /// the per-identity permit, and idle-reuse attempts.
    pub wait_for_source_ms: u64,
    /// Period of the background cleaner, in seconds (default: 60).
    pub cleaning_interval_secs: u64,
    /// Whether the background cleaner runs and idle-too-long
    /// connections are evicted (default: true).
    pub shrinking_enabled: bool,
    /// Minimum spacing between liveness re-tests of one connection, in
    /// seconds (default: 600).
    pub source_test_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            max_connections_per_identity: 20,
            live_and_unused_secs: 60,
            wait_for_source_ms: 120_000,
            cleaning_interval_secs: 60,
            shrinking_enabled: true,
            source_test_interval_secs: 600,
        }
    }
}

impl PoolConfig {
    /// Check the configuration for values the pool cannot run with.
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_connections < 1 {
            return Err(PoolError::Config(format!(
                "max_connections must be at least 1, got {}",
                self.max_connections
            )));
        }
        if self.max_connections_per_identity < 1 {
            return Err(PoolError::Config(format!(
                "max_connections_per_identity must be at least 1, got {}",
                self.max_connections_per_identity
            )));
        }
        Ok(())
    }

    /// Build a configuration from a flat string property bag.
    ///
    /// Unknown keys are ignored; malformed values for known keys are
    /// configuration errors.
    pub fn from_properties(props: &HashMap<String, String>) -> PoolResult<Self> {
        let mut config = Self::default();
        if let Some(v) = props.get("max_connections") {
            config.max_connections = parse_prop("max_connections", v)?;
        }
        if let Some(v) = props.get("max_connections_per_identity") {
            config.max_connections_per_identity = parse_prop("max_connections_per_identity", v)?;
        }
        if let Some(v) = props.get("live_and_unused_secs") {
            config.live_and_unused_secs = parse_prop("live_and_unused_secs", v)?;
        }
        if let Some(v) = props.get("wait_for_source_ms") {
            config.wait_for_source_ms = parse_prop("wait_for_source_ms", v)?;
        }
        if let Some(v) = props.get("cleaning_interval_secs") {
            config.cleaning_interval_secs = parse_prop("cleaning_interval_secs", v)?;
        }
        if let Some(v) = props.get("shrinking_enabled") {
            config.shrinking_enabled = parse_prop("shrinking_enabled", v)?;
        }
        if let Some(v) = props.get("source_test_interval_secs") {
            config.source_test_interval_secs = parse_prop("source_test_interval_secs", v)?;
        }
        Ok(config)
    }

    /// Set the global connection cap.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-identity connection cap.
    pub fn with_max_connections_per_identity(mut self, max: usize) -> Self {
        self.max_connections_per_identity = max;
        self
    }

    /// Set the idle age threshold for shrinking eviction.
    pub fn with_live_and_unused(mut self, secs: u64) -> Self {
        self.live_and_unused_secs = secs;
        self
    }

    /// Set the obtain wait budget in milliseconds.
    pub fn with_wait_for_source_ms(mut self, ms: u64) -> Self {
        self.wait_for_source_ms = ms;
        self
    }

    /// Set the cleaner period.
    pub fn with_cleaning_interval(mut self, secs: u64) -> Self {
        self.cleaning_interval_secs = secs;
        self
    }

    /// Enable or disable shrinking.
    pub fn with_shrinking(mut self, enabled: bool) -> Self {
        self.shrinking_enabled = enabled;
        self
    }

    /// Set the liveness re-test spacing.
    pub fn with_source_test_interval(mut self, secs: u64) -> Self {
        self.source_test_interval_secs = secs;
        self
    }

    /// Idle age threshold as a duration.
    pub fn live_and_unused(&self) -> Duration {
        Duration::from_secs(self.live_and_unused_secs)
    }

    /// Obtain wait budget as a duration.
    pub fn wait_for_source(&self) -> Duration {
        Duration::from_millis(self.wait_for_source_ms)
    }

    /// Cleaner period as a duration.
    pub fn cleaning_interval(&self) -> Duration {
        Duration::from_secs(self.cleaning_interval_secs)
    }

    /// Liveness re-test spacing as a duration.
    pub fn source_test_interval(&self) -> Duration {
        Duration::from_secs(self.source_test_interval_secs)
    }
}

fn parse_prop<T: std::str::FromStr>(key: &str, value: &str) -> PoolResult<T> {
    value.trim().parse().map_err(|_| {
        PoolError::Config(format!("invalid value for {key}: {value:?}"))
    })
}
