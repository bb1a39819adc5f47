//! Management endpoint the daemon dials into.
//!
//! The daemon is started with `--management <path> unix --management-client`,
//! so it connects to us. The server:
//! - Binds a Unix socket at a path unique to its supervisor
//! - Serves one daemon connection at a time
//! - Keeps accepting afterwards, so a restarted daemon can reconnect
//! - Stops on cancellation and removes the socket file
//!
//! ```text
//! ┌──────────────────┐ accept() ┌───────────────────┐ deliver ┌──────────────┐
//! │ ManagementServer │─────────▶│ ManagementSession │────────▶│ RouterHandle │
//! │  (UnixListener)  │          │  reader + writer  │         └──────────────┘
//! └──────────────────┘          │  + status ticker  │
//!                               └───────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Transport errors end the affected loop and are logged

mod connection;

pub use connection::{ManagementSession, READ_POLL_INTERVAL};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ovsup_core::OperatingMode;

use crate::router::RouterHandle;

/// Errors raised by the management endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ManagementError {
    #[error("failed to create socket directory: {0}")]
    SocketDir(#[source] std::io::Error),

    #[error("failed to bind management socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("management connection failed: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Socket Allocation
// ============================================================================

/// Hands out management socket paths unique to one supervisor.
///
/// Paths live either in a private temporary directory (removed on drop)
/// or in a caller-supplied directory. The process id and a per-allocator
/// counter keep paths distinct when several supervisors share a directory.
#[derive(Debug)]
pub struct SocketAllocator {
    dir: PathBuf,
    _temp: Option<TempDir>,
    next: AtomicU64,
}

impl SocketAllocator {
    /// Allocates inside a fresh temporary directory.
    pub fn temporary() -> Result<Self, ManagementError> {
        let temp = tempfile::Builder::new()
            .prefix("ovsup-")
            .tempdir()
            .map_err(ManagementError::SocketDir)?;

        Ok(Self {
            dir: temp.path().to_path_buf(),
            _temp: Some(temp),
            next: AtomicU64::new(0),
        })
    }

    /// Allocates inside `dir`, which is created on bind if missing.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _temp: None,
            next: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns a path no earlier call on this allocator returned.
    pub fn next_path(&self) -> PathBuf {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!("mgmt-{}-{}.sock", std::process::id(), n))
    }
}

// ============================================================================
// Management Server
// ============================================================================

/// Per-connection behaviour.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub mode: OperatingMode,
    /// Status request cadence in authority mode
    pub poll_interval: Duration,
}

/// Listener for the daemon's management connection.
pub struct ManagementServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl ManagementServer {
    /// Binds the socket, replacing a stale file at the same path.
    pub fn bind(socket_path: impl Into<PathBuf>) -> Result<Self, ManagementError> {
        let socket_path = socket_path.into();
        let bind_error = |source| ManagementError::Bind {
            path: socket_path.clone(),
            source,
        };

        if socket_path.exists() {
            std::fs::remove_file(&socket_path).map_err(bind_error)?;
        }

        if let Some(parent) = socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(bind_error)?;
            }
        }

        let listener = UnixListener::bind(&socket_path).map_err(bind_error)?;

        info!(socket = %socket_path.display(), "Management socket listening");

        Ok(Self {
            listener,
            socket_path,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accepts daemon connections until cancelled.
    ///
    /// Connections are served one after another. An accept failure ends
    /// the loop.
    pub async fn run(
        self,
        router: RouterHandle,
        settings: SessionSettings,
        cancel: CancellationToken,
    ) {
        let mut connections: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Management server shutdown requested");
                    break;
                }

                result = self.listener.accept() => match result {
                    Ok((stream, _addr)) => {
                        connections += 1;
                        info!(connection = connections, "Daemon connected to management socket");

                        let session = ManagementSession::new(
                            stream,
                            router.clone(),
                            settings,
                            cancel.clone(),
                        );
                        if let Err(e) = session.run().await {
                            if !cancel.is_cancelled() {
                                error!(error = %e, "Management connection failed");
                            }
                        }
                    }
                    Err(e) => {
                        if !cancel.is_cancelled() {
                            error!(error = %e, "Failed to accept management connection");
                        }
                        break;
                    }
                },
            }
        }

        self.cleanup();
    }

    fn cleanup(&self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove management socket"
                );
            }
        }
    }
}
