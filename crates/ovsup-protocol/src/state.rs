//! `>STATE:` payload decoding.
//!
//! Payload layout: `<unix-time>,<phase>,<description>,<local-ip>,<remote-ip>,...`

use std::fmt;

/// Connection phase reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DaemonPhase {
    Connecting,
    Resolve,
    Wait,
    Auth,
    GetConfig,
    AssignIp,
    AddRoutes,
    Connected,
    Reconnecting,
    Exiting,
    /// A phase this client does not act on
    Other(String),
}

impl DaemonPhase {
    /// Parses a phase token.
    pub fn from_token(token: &str) -> Self {
        match token {
            "CONNECTING" => Self::Connecting,
            "RESOLVE" => Self::Resolve,
            "WAIT" => Self::Wait,
            "AUTH" => Self::Auth,
            "GET_CONFIG" => Self::GetConfig,
            "ASSIGN_IP" => Self::AssignIp,
            "ADD_ROUTES" => Self::AddRoutes,
            "CONNECTED" => Self::Connected,
            "RECONNECTING" => Self::Reconnecting,
            "EXITING" => Self::Exiting,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns true for phases that are only progress reports.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::Resolve
                | Self::Wait
                | Self::Auth
                | Self::GetConfig
                | Self::AssignIp
                | Self::AddRoutes
        )
    }
}

impl fmt::Display for DaemonPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Self::Connecting => "CONNECTING",
            Self::Resolve => "RESOLVE",
            Self::Wait => "WAIT",
            Self::Auth => "AUTH",
            Self::GetConfig => "GET_CONFIG",
            Self::AssignIp => "ASSIGN_IP",
            Self::AddRoutes => "ADD_ROUTES",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
            Self::Exiting => "EXITING",
            Self::Other(token) => token.as_str(),
        };
        write!(f, "{token}")
    }
}

/// A decoded state notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateNotice {
    pub timestamp: String,
    pub phase: DaemonPhase,
    pub description: Option<String>,
    /// Tunnel address (4th field), set once CONNECTED
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
}

impl StateNotice {
    /// Decodes a `>STATE:` payload. Returns `None` without a phase field.
    pub fn parse(payload: &str) -> Option<Self> {
        let mut fields = payload.split(',');
        let timestamp = fields.next()?.to_string();
        let phase = DaemonPhase::from_token(fields.next()?);

        let mut optional = || {
            fields
                .next()
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let description = optional();
        let local_address = optional();
        let remote_address = optional();

        Some(Self {
            timestamp,
            phase,
            description,
            local_address,
            remote_address,
        })
    }
}
