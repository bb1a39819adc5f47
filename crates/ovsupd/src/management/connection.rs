//! One daemon connection on the management socket.
//!
//! A session runs three loops over the same stream:
//! - the read loop frames lines into messages and hands them to the router
//! - the writer drains the outbound command queue onto the socket
//! - in authority mode, a ticker queues a `status` request every poll interval
//!
//! The read loop re-checks cancellation at least every
//! [`READ_POLL_INTERVAL`], so shutdown never waits on a silent daemon.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use ovsup_protocol::{Frame, FrameBuffer, ManagementCommand};

use super::{ManagementError, SessionSettings};
use crate::router::{RouterError, RouterHandle};

/// How often a blocked read wakes up to check for shutdown.
pub const READ_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Capacity of the outbound command queue.
const OUTBOUND_BUFFER: usize = 16;

/// A connected daemon.
pub struct ManagementSession {
    stream: UnixStream,
    router: RouterHandle,
    settings: SessionSettings,
    cancel: CancellationToken,
}

impl ManagementSession {
    pub fn new(
        stream: UnixStream,
        router: RouterHandle,
        settings: SessionSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream,
            router,
            settings,
            cancel,
        }
    }

    /// Serves the connection until the daemon hangs up, a transport error
    /// occurs or shutdown is requested.
    pub async fn run(self) -> Result<(), ManagementError> {
        let Self {
            stream,
            router,
            settings,
            cancel,
        } = self;

        let (reader, writer) = stream.into_split();
        // Ends the writer and ticker together with the read loop
        let session = cancel.child_token();
        let (cmd_tx, cmd_rx) = mpsc::channel(OUTBOUND_BUFFER);

        if router.attach(cmd_tx.clone()).await.is_err() {
            debug!("Router gone, closing management connection");
            return Ok(());
        }

        let writer_task = tokio::spawn(write_commands(writer, cmd_rx, session.clone()));
        let ticker_task = if settings.mode.polls() {
            Some(tokio::spawn(poll_status(
                cmd_tx,
                settings.poll_interval,
                session.clone(),
            )))
        } else {
            info!(mode = %settings.mode, "Client list polling disabled");
            drop(cmd_tx);
            None
        };

        let result = read_messages(reader, &router, &session).await;

        session.cancel();
        let _ = router.detach().await;
        let _ = writer_task.await;
        if let Some(task) = ticker_task {
            let _ = task.await;
        }

        result
    }
}

// ============================================================================
// Read Loop
// ============================================================================

async fn read_messages(
    reader: OwnedReadHalf,
    router: &RouterHandle,
    cancel: &CancellationToken,
) -> Result<(), ManagementError> {
    let mut reader = BufReader::new(reader);
    let mut frames = FrameBuffer::new();
    let mut line = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),

            read = timeout(READ_POLL_INTERVAL, reader.read_until(b'\n', &mut line)) => {
                match read {
                    // Bytes read so far stay in `line` for the next attempt
                    Err(_elapsed) => continue,
                    Ok(Ok(0)) => {
                        info!("Daemon closed management connection");
                        return Ok(());
                    }
                    Ok(Ok(_)) => {
                        let ready = {
                            let text = String::from_utf8_lossy(&line);
                            let text = text.trim_end_matches(|c: char| c == '\n' || c == '\r');
                            trace!(line = %text, "Management line");
                            frames.push_line(text)
                        };
                        line.clear();

                        for frame in ready {
                            if !dispatch(frame, router).await {
                                return Ok(());
                            }
                        }
                    }
                    Ok(Err(e)) => return Err(ManagementError::Io(e)),
                }
            }
        }
    }
}

/// Hands one frame to the router. Returns false once the router is gone.
async fn dispatch(frame: Frame, router: &RouterHandle) -> bool {
    match frame {
        Frame::Message { message, skipped } => {
            if let Some(skipped) = skipped {
                warn!(skipped = %skipped, "Discarding unmatched management output");
            }

            let kind = message.kind();
            match router.deliver(message).await {
                Ok(()) => true,
                Err(RouterError::DeliveryTimeout) => {
                    warn!(kind = %kind, "Router busy, management message lost");
                    true
                }
                Err(e) => {
                    debug!(error = %e, "Router unavailable, closing session");
                    false
                }
            }
        }
        Frame::Overflow { discarded } => {
            warn!(bytes = discarded, "Management frame buffer overflow, pending text discarded");
            true
        }
    }
}

// ============================================================================
// Writer and Ticker
// ============================================================================

async fn write_commands(
    mut writer: OwnedWriteHalf,
    mut commands: mpsc::Receiver<ManagementCommand>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            next = commands.recv() => {
                let Some(command) = next else { break };

                let written = async {
                    writer.write_all(command.to_line().as_bytes()).await?;
                    writer.flush().await
                }
                .await;

                match written {
                    Ok(()) => debug!(command = %command, "Sent management command"),
                    Err(e) => {
                        warn!(command = %command, error = %e, "Failed to write management command");
                        break;
                    }
                }
            }
        }
    }
}

async fn poll_status(
    commands: mpsc::Sender<ManagementCommand>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {
                if let Err(e) = commands.try_send(ManagementCommand::Status) {
                    match e {
                        mpsc::error::TrySendError::Full(_) => {
                            warn!("Management writer busy, skipping status poll");
                        }
                        mpsc::error::TrySendError::Closed(_) => break,
                    }
                }
            }
        }
    }

    debug!("Status poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouterCommand;
    use ovsup_core::OperatingMode;
    use ovsup_protocol::ManagementMessage;

    fn peer_settings() -> SessionSettings {
        SessionSettings {
            mode: OperatingMode::Peer,
            poll_interval: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_session_keeps_reading_after_delivery_timeout() {
        let (daemon, local) = UnixStream::pair().unwrap();
        let (cmd_tx, mut cmd_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let session = ManagementSession::new(
            local,
            RouterHandle::new(cmd_tx),
            peer_settings(),
            cancel.clone(),
        );
        let task = tokio::spawn(session.run());

        assert!(matches!(
            cmd_rx.recv().await,
            Some(RouterCommand::Attach { .. })
        ));

        let (_daemon_read, mut daemon_write) = daemon.into_split();
        daemon_write
            .write_all(b">INFO:first\n>INFO:second\n>INFO:third\n")
            .await
            .unwrap();

        // "first" fills the queue, "second" times out after one second and
        // "third" waits for the room made below
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let mut delivered = Vec::new();
        for _ in 0..2 {
            match timeout(Duration::from_secs(3), cmd_rx.recv()).await {
                Ok(Some(RouterCommand::Message(ManagementMessage::Info(text)))) => {
                    delivered.push(text)
                }
                other => panic!("unexpected router command: {other:?}"),
            }
        }
        assert_eq!(delivered, vec!["first".to_string(), "third".to_string()]);

        cancel.cancel();
        assert!(matches!(cmd_rx.recv().await, Some(RouterCommand::Detach)));
        assert!(task.await.unwrap().is_ok());
    }
}
