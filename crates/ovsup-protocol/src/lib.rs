//! ovsup Protocol - OpenVPN management interface
//!
//! This crate turns the daemon's line-oriented management output into
//! typed messages and renders the commands written back to it:
//! - `classify` - ordered, first-match-wins pattern classification
//! - `frame` - line buffering with resynchronization of multi-line blocks
//! - `table` - parsing of the `status` client/routing tables
//! - `state` - `>STATE:` payload decoding
//! - `command` - outbound commands

pub mod classify;
pub mod command;
pub mod error;
pub mod frame;
pub mod message;
pub mod state;
pub mod table;

pub use classify::{classify, Classified};
pub use command::{ManagementCommand, HOLD_RELEASE_SEQUENCE};
pub use error::ProtocolError;
pub use frame::{Frame, FrameBuffer, MAX_PENDING_BYTES};
pub use message::{ClientListDump, ManagementMessage, MessageKind};
pub use state::{DaemonPhase, StateNotice};
pub use table::{parse_table, Record};
