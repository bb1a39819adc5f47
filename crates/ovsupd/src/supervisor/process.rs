//! Tasks attached to a running daemon process.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use ovsup_core::{DaemonEvent, DaemonState};

use crate::events::EventSink;

/// Which pipe a line of daemon output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One line the daemon printed, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
    pub received_at: DateTime<Utc>,
}

/// Forwards lines from a daemon pipe until EOF or cancellation.
///
/// Delivery is best effort: a line that finds the channel full is dropped.
pub(super) async fn forward_output<R>(
    pipe: R,
    stream: OutputStream,
    sink: mpsc::Sender<OutputLine>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    let output = OutputLine {
                        stream,
                        line,
                        received_at: Utc::now(),
                    };
                    match sink.try_send(output) {
                        Ok(()) => {}
                        Err(TrySendError::Full(dropped) | TrySendError::Closed(dropped)) => {
                            trace!(stream = %stream, line = %dropped.line, "Output channel full, dropping line");
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(stream = %stream, error = %e, "Failed to read daemon output");
                    break;
                }
            },
        }
    }

    debug!(stream = %stream, "Output reader stopped");
}

/// Where the exit watcher reports termination.
pub(super) struct ExitReport {
    pub exited: watch::Sender<bool>,
    pub state: Arc<watch::Sender<DaemonState>>,
    pub events: EventSink,
}

/// Waits for the daemon to exit, killing it first if `cancel` fires.
pub(super) async fn watch_exit(mut child: Child, cancel: CancellationToken, report: ExitReport) {
    let status = tokio::select! {
        status = child.wait() => status,

        _ = cancel.cancelled() => {
            report.state.send_replace(DaemonState::Stopping);
            debug!(pid = ?child.id(), "Killing daemon process");
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to kill daemon process");
            }
            child.wait().await
        }
    };

    let code = match &status {
        Ok(status) => {
            info!(status = %status, "Daemon process exited");
            status.code()
        }
        Err(e) => {
            error!(error = %e, "Failed to wait for daemon process");
            None
        }
    };

    report.state.send_replace(DaemonState::Stopped);
    report.exited.send_replace(true);
    report.events.emit(DaemonEvent::Exited { code });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_output_lines() {
        let (tx, mut rx) = mpsc::channel(8);
        let pipe: &[u8] = b"first\nsecond\r\nthird";

        forward_output(pipe, OutputStream::Stdout, tx, CancellationToken::new()).await;

        let mut lines = Vec::new();
        while let Ok(out) = rx.try_recv() {
            assert_eq!(out.stream, OutputStream::Stdout);
            lines.push(out.line);
        }
        assert_eq!(lines, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_forward_output_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let pipe: &[u8] = b"kept\ndropped\nalso dropped\n";

        forward_output(pipe, OutputStream::Stderr, tx, CancellationToken::new()).await;

        assert_eq!(rx.try_recv().map(|o| o.line).ok(), Some("kept".to_string()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_output_stream_display() {
        assert_eq!(OutputStream::Stdout.to_string(), "stdout");
        assert_eq!(OutputStream::Stderr.to_string(), "stderr");
    }
}
