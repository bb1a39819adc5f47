//! Client interface for the router actor.
//!
//! `RouterHandle` is cheap to clone. Every method maps a closed channel to
//! `RouterError::ChannelClosed`.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::oneshot;

use ovsup_core::{CommonName, PeerView};
use ovsup_protocol::{ManagementCommand, ManagementMessage};

use super::commands::{RouterCommand, RouterError};

/// How long message delivery may wait for room in the router's queue.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle for interacting with the router actor.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    sender: mpsc::Sender<RouterCommand>,
}

impl RouterHandle {
    pub fn new(sender: mpsc::Sender<RouterCommand>) -> Self {
        Self { sender }
    }

    /// Hands a management message to the router.
    ///
    /// Waits at most [`DELIVERY_TIMEOUT`]. On timeout the message is
    /// dropped and `RouterError::DeliveryTimeout` returned, so a slow
    /// router never stalls the reader for long.
    pub async fn deliver(&self, message: ManagementMessage) -> Result<(), RouterError> {
        self.sender
            .send_timeout(RouterCommand::Message(message), DELIVERY_TIMEOUT)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => RouterError::DeliveryTimeout,
                SendTimeoutError::Closed(_) => RouterError::ChannelClosed,
            })
    }

    /// Registers the outbound command queue of a new connection.
    pub async fn attach(
        &self,
        writer: mpsc::Sender<ManagementCommand>,
    ) -> Result<(), RouterError> {
        self.send(RouterCommand::Attach { writer }).await
    }

    /// Tells the router the connection is gone.
    pub async fn detach(&self) -> Result<(), RouterError> {
        self.send(RouterCommand::Detach).await
    }

    /// Returns every known peer, ordered by common name.
    pub async fn peers(&self) -> Result<Vec<PeerView>, RouterError> {
        let (tx, rx) = oneshot::channel();
        self.send(RouterCommand::GetPeers { respond_to: tx }).await?;
        rx.await.map_err(|_| RouterError::ChannelClosed)
    }

    /// Returns one peer by common name.
    pub async fn peer(&self, name: CommonName) -> Result<Option<PeerView>, RouterError> {
        let (tx, rx) = oneshot::channel();
        self.send(RouterCommand::GetPeer {
            name,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| RouterError::ChannelClosed)
    }

    /// Returns the daemon's up/down environment.
    pub async fn env(&self) -> Result<BTreeMap<String, String>, RouterError> {
        let (tx, rx) = oneshot::channel();
        self.send(RouterCommand::GetEnv { respond_to: tx }).await?;
        rx.await.map_err(|_| RouterError::ChannelClosed)
    }

    /// Waits until `name` is assigned a virtual address.
    ///
    /// # Errors
    ///
    /// - `RouterError::PeerRemoved` if the peer is evicted first
    /// - `RouterError::ChannelClosed` if the router stops first
    pub async fn wait_for_address(&self, name: CommonName) -> Result<String, RouterError> {
        let (tx, rx) = oneshot::channel();
        self.send(RouterCommand::WaitForAddress {
            name,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| RouterError::ChannelClosed)?
    }

    async fn send(&self, command: RouterCommand) -> Result<(), RouterError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| RouterError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(text: &str) -> ManagementMessage {
        ManagementMessage::Info(text.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_times_out_when_router_stalls() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = RouterHandle::new(tx);

        assert_eq!(handle.deliver(info("first")).await, Ok(()));

        let started = tokio::time::Instant::now();
        assert_eq!(
            handle.deliver(info("second")).await,
            Err(RouterError::DeliveryTimeout)
        );
        assert!(started.elapsed() >= DELIVERY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_deliver_to_stopped_router() {
        let (tx, rx) = mpsc::channel(1);
        let handle = RouterHandle::new(tx);
        drop(rx);

        assert_eq!(
            handle.deliver(info("lost")).await,
            Err(RouterError::ChannelClosed)
        );
    }
}
