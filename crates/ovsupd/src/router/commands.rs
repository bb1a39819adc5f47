//! Router commands and errors.
//!
//! All access to the peer registry goes through [`RouterCommand`] values
//! sent to the router task. Queries carry a oneshot channel for the reply.

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use ovsup_core::{CommonName, PeerView};
use ovsup_protocol::{ManagementCommand, ManagementMessage};

// ============================================================================
// Router Commands
// ============================================================================

/// Commands sent to the router actor.
#[derive(Debug)]
pub enum RouterCommand {
    /// A message read from the management connection.
    Message(ManagementMessage),

    /// A daemon connected; commands produced by the router go to `writer`.
    Attach {
        writer: mpsc::Sender<ManagementCommand>,
    },

    /// The management connection closed.
    Detach,

    /// Owned copy of every known peer, ordered by common name.
    GetPeers {
        respond_to: oneshot::Sender<Vec<PeerView>>,
    },

    /// Owned copy of one peer.
    GetPeer {
        name: CommonName,
        respond_to: oneshot::Sender<Option<PeerView>>,
    },

    /// Owned copy of the daemon's up/down environment.
    GetEnv {
        respond_to: oneshot::Sender<BTreeMap<String, String>>,
    },

    /// Resolve once `name` has a virtual address.
    ///
    /// Answered immediately when the address is already known, otherwise
    /// when a routing-table row supplies it. If the peer is evicted first
    /// the reply is `RouterError::PeerRemoved`.
    WaitForAddress {
        name: CommonName,
        respond_to: oneshot::Sender<Result<String, RouterError>>,
    },
}

// ============================================================================
// Router Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The router task has stopped.
    #[error("router channel closed")]
    ChannelClosed,

    /// The router did not accept the message within the delivery timeout.
    #[error("router busy, message dropped")]
    DeliveryTimeout,

    /// The peer was evicted while a caller waited for its address.
    #[error("peer {0} was removed")]
    PeerRemoved(CommonName),
}
