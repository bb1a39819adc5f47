//! Events delivered to the embedding application.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::peer::CommonName;

/// Application-level events emitted by the supervisor.
///
/// Delivered through a bounded channel; when the embedder falls behind,
/// new events are dropped and logged rather than queued without limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DaemonEvent {
    /// The tunnel is up (peer mode) or the daemon is serving (authority mode)
    Connected {
        /// Local tunnel address reported in the CONNECTED state
        #[serde(skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },

    /// The daemon is reconnecting or exiting
    Disconnected,

    /// A peer appeared for the first time
    ClientConnected { name: CommonName },

    /// A peer's environment was merged from an env block
    ClientUpdated { name: CommonName },

    /// A peer was evicted after missing too many snapshots
    ClientRemoved { name: CommonName },

    /// The daemon process terminated
    Exited {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
    },
}

impl DaemonEvent {
    /// Short event name, as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "Connected",
            Self::Disconnected => "Disconnected",
            Self::ClientConnected { .. } => "client connected",
            Self::ClientUpdated { .. } => "client updated",
            Self::ClientRemoved { .. } => "client removed",
            Self::Exited { .. } => "exited",
        }
    }
}

impl fmt::Display for DaemonEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected {
                address: Some(address),
            } => write!(f, "{} ({address})", self.name()),
            Self::ClientConnected { name }
            | Self::ClientUpdated { name }
            | Self::ClientRemoved { name } => write!(f, "{}: {name}", self.name()),
            Self::Exited { code: Some(code) } => write!(f, "{} (code {code})", self.name()),
            _ => write!(f, "{}", self.name()),
        }
    }
}
