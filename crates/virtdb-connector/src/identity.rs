//! Connector identity — the key that partitions pooled connections.
//!
//! Every pooled connection is owned by exactly one identity. The pool
//! never hands a connection opened under one identity to a request
//! made under a different one.

use std::fmt;

/// Identifies "who is connecting" to a source.
///
/// Connectors that authenticate once for the whole virtual database
/// use [`ConnectorIdentity::Shared`]; connectors that pass caller
/// credentials through use [`ConnectorIdentity::User`] with the
/// caller's user name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConnectorIdentity {
    /// Single shared identity for sources that do not distinguish users.
    Shared,
    /// Per-user identity carrying the caller's user name.
    User(String),
}

impl ConnectorIdentity {
    /// Create a per-user identity.
    pub fn user(name: impl Into<String>) -> Self {
        Self::User(name.into())
    }
}

impl fmt::Display for ConnectorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorIdentity::Shared => write!(f, "shared"),
            ConnectorIdentity::User(name) => write!(f, "user:{name}"),
        }
    }
}
