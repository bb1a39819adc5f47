//! Daemon lifecycle states and operating modes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;

/// Lifecycle state of the supervised daemon process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    /// No process is running
    #[default]
    Stopped,

    /// The management endpoint is up and the process is being launched
    Starting,

    /// The process has been spawned and has not exited
    Running,

    /// A kill has been requested and the exit has not been observed yet
    Stopping,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// How the daemon participates in the VPN.
///
/// An authority accepts many tunnel peers and has to be polled for its
/// client table; a peer dials out to one authority and is never polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Server mode: many peers, periodic status polling
    Authority,

    /// Client mode: one outbound tunnel, no polling
    Peer,
}

impl OperatingMode {
    /// Returns true if the management channel should poll for snapshots.
    pub fn polls(&self) -> bool {
        matches!(self, Self::Authority)
    }

    /// Infers the mode from a daemon argument list.
    ///
    /// A daemon told to `--client` or given a `--remote` is a peer;
    /// everything else is treated as an authority.
    pub fn infer<S: AsRef<str>>(args: &[S]) -> Self {
        let dials_out = args
            .iter()
            .any(|arg| matches!(arg.as_ref(), "--client" | "--remote"));

        if dials_out {
            Self::Peer
        } else {
            Self::Authority
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authority => write!(f, "authority"),
            Self::Peer => write!(f, "peer"),
        }
    }
}

impl FromStr for OperatingMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "authority" | "server" => Ok(Self::Authority),
            "peer" | "client" => Ok(Self::Peer),
            _ => Err(DomainError::UnknownMode(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_inference() {
        assert_eq!(
            OperatingMode::infer(&["--dev", "tun", "--mode", "server"]),
            OperatingMode::Authority
        );
        assert_eq!(
            OperatingMode::infer(&["--remote", "vpn.example.com", "--port", "1194"]),
            OperatingMode::Peer
        );
        assert_eq!(OperatingMode::infer(&["--client"]), OperatingMode::Peer);
        assert_eq!(OperatingMode::infer::<&str>(&[]), OperatingMode::Authority);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!(
            "authority".parse::<OperatingMode>(),
            Ok(OperatingMode::Authority)
        );
        assert_eq!("Server".parse::<OperatingMode>(), Ok(OperatingMode::Authority));
        assert_eq!("peer".parse::<OperatingMode>(), Ok(OperatingMode::Peer));
        assert_eq!(
            "mesh".parse::<OperatingMode>(),
            Err(DomainError::UnknownMode("mesh".to_string()))
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(DaemonState::Stopped.to_string(), "stopped");
        assert_eq!(DaemonState::Stopping.to_string(), "stopping");
    }
}
