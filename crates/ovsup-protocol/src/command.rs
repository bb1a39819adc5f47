//! Commands written back to the daemon's management interface.

use std::fmt;

/// A management command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagementCommand {
    /// Enable real-time echo notifications
    EchoOn,

    /// Enable real-time state notifications
    StateOn,

    /// Let a daemon started with `--management-hold` proceed
    HoldRelease,

    /// Request a full client/routing table dump
    Status,
}

/// Commands answering a `>HOLD:` notice, in the order they must be sent.
pub const HOLD_RELEASE_SEQUENCE: [ManagementCommand; 3] = [
    ManagementCommand::EchoOn,
    ManagementCommand::StateOn,
    ManagementCommand::HoldRelease,
];

impl ManagementCommand {
    /// Command text without the line terminator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EchoOn => "echo on",
            Self::StateOn => "state on",
            Self::HoldRelease => "hold release",
            Self::Status => "status",
        }
    }

    /// Command text as written to the socket.
    pub fn to_line(&self) -> String {
        format!("{}\n", self.as_str())
    }
}

impl fmt::Display for ManagementCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
