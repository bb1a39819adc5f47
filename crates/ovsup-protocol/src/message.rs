//! Classified management messages.
//!
//! One variant per message kind, with named fields, so consumers never
//! index into positional captures.

use std::fmt;

use ovsup_core::{CommonName, PeerRow, RouteRow, Snapshot};

use crate::error::ProtocolError;
use crate::table::{parse_table, Record};

/// Kind tag of a management message, in classification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ClientList,
    ClientEnvEnd,
    ClientEnv,
    ClientConnect,
    ClientReauth,
    ClientEstablished,
    ClientDisconnect,
    ClientAddress,
    Log,
    Info,
    Hold,
    State,
    UpDown,
    UpDownPhase,
    Fatal,
    Error,
    Success,
    Unrecognized,
}

impl MessageKind {
    /// Name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientList => "client-list",
            Self::ClientEnvEnd => "client-end",
            Self::ClientEnv => "client-env",
            Self::ClientConnect => "client-connect",
            Self::ClientReauth => "client-reauth",
            Self::ClientEstablished => "client-established",
            Self::ClientDisconnect => "client-disconnect",
            Self::ClientAddress => "client-address",
            Self::Log => "log",
            Self::Info => "info",
            Self::Hold => "hold",
            Self::State => "state",
            Self::UpDown => "updown",
            Self::UpDownPhase => "updown-phase",
            Self::Fatal => "fatal",
            Self::Error => "error",
            Self::Success => "success",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A message read from the management interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagementMessage {
    /// Full `status` dump
    ClientList(ClientListDump),

    /// `>LOG:` line
    Log(String),

    /// `>INFO:` line, e.g. the welcome banner
    Info(String),

    /// `ERROR:` reply or `>ERROR:` notice
    Error(String),

    /// `>FATAL:` notice, printed just before the daemon exits
    Fatal(String),

    /// `>HOLD:` - the daemon waits for `hold release`
    Hold(String),

    /// `>STATE:` payload, decoded with [`crate::StateNotice::parse`]
    State(String),

    /// `SUCCESS:` reply to a command
    Success(String),

    /// `>UPDOWN:<phase>,<key>=<value>`
    UpDown {
        phase: String,
        key: String,
        value: String,
    },

    /// `>UPDOWN:<phase>` without a key/value pair
    UpDownPhase(String),

    /// `>CLIENT:CONNECT,{CID},{KID}`
    ClientConnect { cid: u64, kid: u64 },

    /// `>CLIENT:REAUTH,{CID},{KID}`
    ClientReauth { cid: u64, kid: u64 },

    /// `>CLIENT:ESTABLISHED,{CID}`
    ClientEstablished { cid: u64 },

    /// `>CLIENT:DISCONNECT,{CID}`
    ClientDisconnect { cid: u64 },

    /// `>CLIENT:ADDRESS,{CID},{ADDR},{PRI}`
    ClientAddress {
        cid: u64,
        address: String,
        primary: bool,
    },

    /// `>CLIENT:ENV,<key>=<value>`
    ClientEnv { key: String, value: String },

    /// `>CLIENT:ENV,END`
    ClientEnvEnd,

    /// Any other `>KIND:payload` notice
    Unrecognized { kind: String, payload: String },
}

impl ManagementMessage {
    /// Returns the kind tag of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::ClientList(_) => MessageKind::ClientList,
            Self::Log(_) => MessageKind::Log,
            Self::Info(_) => MessageKind::Info,
            Self::Error(_) => MessageKind::Error,
            Self::Fatal(_) => MessageKind::Fatal,
            Self::Hold(_) => MessageKind::Hold,
            Self::State(_) => MessageKind::State,
            Self::Success(_) => MessageKind::Success,
            Self::UpDown { .. } => MessageKind::UpDown,
            Self::UpDownPhase(_) => MessageKind::UpDownPhase,
            Self::ClientConnect { .. } => MessageKind::ClientConnect,
            Self::ClientReauth { .. } => MessageKind::ClientReauth,
            Self::ClientEstablished { .. } => MessageKind::ClientEstablished,
            Self::ClientDisconnect { .. } => MessageKind::ClientDisconnect,
            Self::ClientAddress { .. } => MessageKind::ClientAddress,
            Self::ClientEnv { .. } => MessageKind::ClientEnv,
            Self::ClientEnvEnd => MessageKind::ClientEnvEnd,
            Self::Unrecognized { .. } => MessageKind::Unrecognized,
        }
    }
}

// ============================================================================
// Client List
// ============================================================================

const PEER_TABLE: &str = "client";
const ROUTING_TABLE: &str = "routing";

const COMMON_NAME: &str = "Common Name";
const REAL_ADDRESS: &str = "Real Address";
const BYTES_RECEIVED: &str = "Bytes Received";
const BYTES_SENT: &str = "Bytes Sent";
const CONNECTED_SINCE: &str = "Connected Since";
const VIRTUAL_ADDRESS: &str = "Virtual Address";
const LAST_REF: &str = "Last Ref";

/// Raw sections of an `OpenVPN CLIENT LIST` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientListDump {
    /// Text after `Updated,`
    pub updated: String,

    /// Peer table, header row included
    pub clients: String,

    /// Routing table, header row included
    pub routes: String,

    /// `GLOBAL STATS` section
    pub stats: String,
}

impl ClientListDump {
    /// Parses both tables into typed rows.
    ///
    /// Rows without a common name are skipped; a header missing a key
    /// column fails the whole snapshot.
    pub fn snapshot(&self) -> Result<Snapshot, ProtocolError> {
        let clients = parse_table(&self.clients);
        let routes = parse_table(&self.routes);

        require_column(&self.clients, PEER_TABLE, COMMON_NAME)?;
        require_column(&self.routes, ROUTING_TABLE, COMMON_NAME)?;
        require_column(&self.routes, ROUTING_TABLE, VIRTUAL_ADDRESS)?;

        let peers = clients.iter().filter_map(peer_row).collect();
        let routes = routes.iter().filter_map(route_row).collect();

        Ok(Snapshot {
            updated: self.updated.trim().to_string(),
            peers,
            routes,
        })
    }

    /// `GLOBAL STATS` as name/value pairs.
    pub fn global_stats(&self) -> Vec<(String, String)> {
        self.stats
            .lines()
            .filter_map(|line| line.split_once(','))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }
}

fn require_column(
    table: &str,
    table_name: &'static str,
    column: &'static str,
) -> Result<(), ProtocolError> {
    let header = table.lines().next().unwrap_or_default();
    if header.split(',').any(|col| col == column) {
        Ok(())
    } else {
        Err(ProtocolError::MissingColumn {
            table: table_name,
            column,
        })
    }
}

fn field(record: &Record, column: &str) -> String {
    record.get(column).cloned().unwrap_or_default()
}

fn counter(record: &Record, column: &str) -> u64 {
    record
        .get(column)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

fn common_name(record: &Record) -> Option<CommonName> {
    record
        .get(COMMON_NAME)
        .filter(|name| !name.is_empty())
        .map(|name| CommonName::new(name.as_str()))
}

fn peer_row(record: &Record) -> Option<PeerRow> {
    Some(PeerRow {
        common_name: common_name(record)?,
        real_address: field(record, REAL_ADDRESS),
        bytes_received: counter(record, BYTES_RECEIVED),
        bytes_sent: counter(record, BYTES_SENT),
        connected_since: field(record, CONNECTED_SINCE),
    })
}

fn route_row(record: &Record) -> Option<RouteRow> {
    Some(RouteRow {
        virtual_address: field(record, VIRTUAL_ADDRESS),
        common_name: common_name(record)?,
        real_address: field(record, REAL_ADDRESS),
        last_ref: field(record, LAST_REF),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> ClientListDump {
        ClientListDump {
            updated: " Thu Feb 13 23:39:20 2014".to_string(),
            clients: "Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since\n\
                      VPN_client,10.13.156.4:1194,12563,14885,Thu Feb 13 23:39:20 2014"
                .to_string(),
            routes: "Virtual Address,Common Name,Real Address,Last Ref\n\
                     192.168.11.4,VPN_client,10.13.156.4:1194,Thu Feb 13 23:39:20 2014"
                .to_string(),
            stats: "Max bcast/mcast queue length,0".to_string(),
        }
    }

    #[test]
    fn test_snapshot_from_fixture() {
        let snapshot = fixture().snapshot().unwrap();

        assert_eq!(snapshot.updated, "Thu Feb 13 23:39:20 2014");
        assert_eq!(
            snapshot.peers,
            vec![PeerRow {
                common_name: CommonName::new("VPN_client"),
                real_address: "10.13.156.4:1194".to_string(),
                bytes_received: 12563,
                bytes_sent: 14885,
                connected_since: "Thu Feb 13 23:39:20 2014".to_string(),
            }]
        );
        assert_eq!(
            snapshot.routes,
            vec![RouteRow {
                virtual_address: "192.168.11.4".to_string(),
                common_name: CommonName::new("VPN_client"),
                real_address: "10.13.156.4:1194".to_string(),
                last_ref: "Thu Feb 13 23:39:20 2014".to_string(),
            }]
        );
    }

    #[test]
    fn test_snapshot_with_empty_tables() {
        let dump = ClientListDump {
            updated: "Thu Feb 13 23:39:20 2014".to_string(),
            clients: "Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since"
                .to_string(),
            routes: "Virtual Address,Common Name,Real Address,Last Ref".to_string(),
            stats: String::new(),
        };

        let snapshot = dump.snapshot().unwrap();
        assert!(snapshot.peers.is_empty());
        assert!(snapshot.routes.is_empty());
    }

    #[test]
    fn test_snapshot_missing_column() {
        let mut dump = fixture();
        dump.clients = "Name,Real Address\nVPN_client,10.13.156.4:1194".to_string();

        assert_eq!(
            dump.snapshot(),
            Err(ProtocolError::MissingColumn {
                table: "client",
                column: "Common Name",
            })
        );
    }

    #[test]
    fn test_global_stats() {
        assert_eq!(
            fixture().global_stats(),
            vec![("Max bcast/mcast queue length".to_string(), "0".to_string())]
        );
    }

    #[test]
    fn test_message_kind() {
        assert_eq!(
            ManagementMessage::ClientEnvEnd.kind(),
            MessageKind::ClientEnvEnd
        );
        assert_eq!(MessageKind::ClientEnvEnd.to_string(), "client-end");
        assert_eq!(ManagementMessage::Hold(String::new()).kind().as_str(), "hold");
    }
}
