//! Daemon process supervision.
//!
//! `ProcessSupervisor` owns the daemon's OS process and everything
//! attached to it:
//! - the management endpoint and router, created on first start and kept
//!   for the supervisor's lifetime
//! - stdout/stderr readers feeding a bounded output channel
//! - an exit watcher that reports termination
//!
//! Every task runs on one `TaskTracker` under one root
//! `CancellationToken`. `stop()` cancels the token, kills the daemon if
//! it is still alive and waits for the tracker to drain, so no task
//! outlives the supervisor.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Spawn failures are returned to the caller of `start`/`restart`
//! - Kill failures during shutdown are logged

mod process;

pub use process::{OutputLine, OutputStream};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use ovsup_core::{CommonName, DaemonEvent, DaemonState, PeerView};

use crate::config::{ConfigError, SupervisorConfig};
use crate::events::EventSink;
use crate::management::{ManagementError, ManagementServer, SessionSettings, SocketAllocator};
use crate::router::{spawn_router, RouterError, RouterHandle};

use process::{forward_output, watch_exit, ExitReport};

/// Errors surfaced by supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("daemon is already running")]
    AlreadyRunning,

    #[error("supervisor has been shut down")]
    ShutDown,

    #[error("daemon has not been started")]
    NotStarted,

    #[error("failed to launch {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Management(#[from] ManagementError),

    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Management endpoint shared by every daemon run.
struct Endpoint {
    socket_path: PathBuf,
    router: RouterHandle,
    /// Keeps a temporary socket directory alive
    _allocator: SocketAllocator,
}

/// The current daemon process.
struct RunningProcess {
    pid: Option<u32>,
    cancel: CancellationToken,
    exited: watch::Receiver<bool>,
}

/// Supervises one OpenVPN daemon.
///
/// # Usage
///
/// ```ignore
/// let mut supervisor = ProcessSupervisor::new(config);
/// let mut events = supervisor.take_events().unwrap();
///
/// supervisor.start().await?;
/// while let Some(event) = events.recv().await {
///     println!("{event}");
/// }
/// supervisor.stop().await;
/// ```
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    state: Arc<watch::Sender<DaemonState>>,
    events: EventSink,
    event_rx: Option<mpsc::Receiver<DaemonEvent>>,
    output_tx: mpsc::Sender<OutputLine>,
    output_rx: Option<mpsc::Receiver<OutputLine>>,
    endpoint: Option<Endpoint>,
    process: Option<RunningProcess>,
}

impl ProcessSupervisor {
    /// Creates a supervisor. Nothing is spawned until [`start`](Self::start).
    pub fn new(config: SupervisorConfig) -> Self {
        let (events, event_rx) = EventSink::channel(config.event_buffer);
        let (output_tx, output_rx) = mpsc::channel(config.output_buffer.max(1));
        let (state, _) = watch::channel(DaemonState::Stopped);

        Self {
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            state: Arc::new(state),
            events,
            event_rx: Some(event_rx),
            output_tx,
            output_rx: Some(output_rx),
            endpoint: None,
            process: None,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<DaemonEvent>> {
        self.event_rx.take()
    }

    /// Takes the daemon output receiver. Returns `None` after the first call.
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<OutputLine>> {
        self.output_rx.take()
    }

    pub fn state(&self) -> DaemonState {
        *self.state.borrow()
    }

    /// Subscribes to lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<DaemonState> {
        self.state.subscribe()
    }

    /// Returns true while the daemon process has not exited.
    pub fn is_running(&self) -> bool {
        self.process
            .as_ref()
            .is_some_and(|process| !*process.exited.borrow())
    }

    /// OS process id of the running daemon.
    pub fn pid(&self) -> Option<u32> {
        self.process
            .as_ref()
            .filter(|_| self.is_running())
            .and_then(|process| process.pid)
    }

    /// Management socket path, once started.
    pub fn socket_path(&self) -> Option<&Path> {
        self.endpoint
            .as_ref()
            .map(|endpoint| endpoint.socket_path.as_path())
    }

    /// Handle to the router, once started.
    pub fn router(&self) -> Option<&RouterHandle> {
        self.endpoint.as_ref().map(|endpoint| &endpoint.router)
    }

    /// Known peers, ordered by common name. Empty before the first start.
    pub async fn peers(&self) -> Result<Vec<PeerView>, SupervisorError> {
        match self.router() {
            Some(router) => Ok(router.peers().await?),
            None => Ok(Vec::new()),
        }
    }

    /// The daemon's up/down environment. Empty before the first start.
    pub async fn env(&self) -> Result<BTreeMap<String, String>, SupervisorError> {
        match self.router() {
            Some(router) => Ok(router.env().await?),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Waits until `name` is assigned a virtual address.
    pub async fn wait_for_address(&self, name: CommonName) -> Result<String, SupervisorError> {
        let router = self.router().ok_or(SupervisorError::NotStarted)?;
        Ok(router.wait_for_address(name).await?)
    }

    /// Starts the daemon.
    ///
    /// The first call binds the management socket and spawns the router.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::AlreadyRunning` if the daemon has not exited
    /// - `SupervisorError::ShutDown` after [`stop`](Self::stop)
    /// - `SupervisorError::Config` if the configuration is invalid
    /// - `SupervisorError::Spawn` if the program cannot be executed
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        if self.shutdown.is_cancelled() {
            return Err(SupervisorError::ShutDown);
        }
        if self.is_running() {
            return Err(SupervisorError::AlreadyRunning);
        }

        self.config.validate()?;
        let socket_path = self.ensure_endpoint()?;
        self.launch(&socket_path)
    }

    /// Relaunches the daemon, terminating a running process first.
    ///
    /// The management endpoint is kept, so the new process connects to
    /// the same socket.
    pub async fn restart(&mut self) -> Result<(), SupervisorError> {
        if self.shutdown.is_cancelled() {
            return Err(SupervisorError::ShutDown);
        }

        self.config.validate()?;

        let Some(socket_path) = self.socket_path().map(Path::to_path_buf) else {
            return self.start().await;
        };

        info!("Restarting daemon");
        self.terminate_process().await;
        self.launch(&socket_path)
    }

    /// Stops the daemon and every supervisor task.
    ///
    /// Safe to call more than once.
    pub async fn stop(&mut self) {
        let first = !self.shutdown.is_cancelled();
        if first && self.state() != DaemonState::Stopped {
            self.state.send_replace(DaemonState::Stopping);
        }

        self.shutdown.cancel();
        self.terminate_process().await;

        self.tracker.close();
        self.tracker.wait().await;

        self.endpoint = None;
        self.state.send_replace(DaemonState::Stopped);

        if first {
            info!("Supervisor stopped");
        } else {
            debug!("Supervisor already stopped");
        }
    }

    fn ensure_endpoint(&mut self) -> Result<PathBuf, SupervisorError> {
        if let Some(path) = self.socket_path() {
            return Ok(path.to_path_buf());
        }

        let allocator = match &self.config.socket_dir {
            Some(dir) => SocketAllocator::in_dir(dir.clone()),
            None => SocketAllocator::temporary()?,
        };
        let server = ManagementServer::bind(allocator.next_path())?;
        let socket_path = server.socket_path().to_path_buf();

        let router = spawn_router(self.events.clone(), self.shutdown.clone(), &self.tracker);
        let settings = SessionSettings {
            mode: self.config.resolved_mode(),
            poll_interval: self.config.poll_interval(),
        };
        self.tracker
            .spawn(server.run(router.clone(), settings, self.shutdown.clone()));

        info!(
            socket = %socket_path.display(),
            mode = %settings.mode,
            "Management endpoint ready"
        );

        self.endpoint = Some(Endpoint {
            socket_path: socket_path.clone(),
            router,
            _allocator: allocator,
        });
        Ok(socket_path)
    }

    fn launch(&mut self, socket_path: &Path) -> Result<(), SupervisorError> {
        let args = self.config.args.clone().with_management(socket_path);
        args.validate().map_err(ConfigError::from)?;

        self.state.send_replace(DaemonState::Starting);

        let spawned = Command::new(&self.config.program)
            .args(args.as_slice())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                self.state.send_replace(DaemonState::Stopped);
                return Err(SupervisorError::Spawn {
                    program: self.config.program.clone(),
                    source,
                });
            }
        };

        let pid = child.id();
        // Set before the exit watcher runs, which may report Stopped at once
        self.state.send_replace(DaemonState::Running);

        let cancel = self.shutdown.child_token();

        if let Some(stdout) = child.stdout.take() {
            self.tracker.spawn(forward_output(
                stdout,
                OutputStream::Stdout,
                self.output_tx.clone(),
                cancel.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            self.tracker.spawn(forward_output(
                stderr,
                OutputStream::Stderr,
                self.output_tx.clone(),
                cancel.clone(),
            ));
        }

        let (exited_tx, exited) = watch::channel(false);
        let report = ExitReport {
            exited: exited_tx,
            state: Arc::clone(&self.state),
            events: self.events.clone(),
        };
        self.tracker.spawn(watch_exit(child, cancel.clone(), report));

        info!(
            pid = ?pid,
            program = %self.config.program.display(),
            args = args.len(),
            "Daemon started"
        );

        self.process = Some(RunningProcess {
            pid,
            cancel,
            exited,
        });
        Ok(())
    }

    /// Kills the current process, if any, and waits for the exit watcher.
    async fn terminate_process(&mut self) {
        let Some(process) = self.process.take() else {
            return;
        };

        process.cancel.cancel();

        let mut exited = process.exited;
        if exited.wait_for(|done| *done).await.is_err() {
            debug!("Exit watcher ended without reporting");
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsup_core::DaemonArgs;

    #[test]
    fn test_new_supervisor_is_stopped() {
        let supervisor = ProcessSupervisor::new(SupervisorConfig::default());

        assert_eq!(supervisor.state(), DaemonState::Stopped);
        assert!(!supervisor.is_running());
        assert!(supervisor.pid().is_none());
        assert!(supervisor.socket_path().is_none());
        assert!(supervisor.router().is_none());
    }

    #[test]
    fn test_receivers_taken_once() {
        let mut supervisor = ProcessSupervisor::new(SupervisorConfig::default());

        assert!(supervisor.take_events().is_some());
        assert!(supervisor.take_events().is_none());
        assert!(supervisor.take_output().is_some());
        assert!(supervisor.take_output().is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let config = SupervisorConfig::new("", DaemonArgs::default());
        let mut supervisor = ProcessSupervisor::new(config);

        let result = supervisor.start().await;
        assert!(matches!(
            result,
            Err(SupervisorError::Config(ConfigError::EmptyProgram))
        ));
        assert!(supervisor.socket_path().is_none());
    }

    #[tokio::test]
    async fn test_queries_before_start() {
        let supervisor = ProcessSupervisor::new(SupervisorConfig::default());

        assert!(supervisor.peers().await.unwrap().is_empty());
        assert!(supervisor.env().await.unwrap().is_empty());
        assert!(matches!(
            supervisor.wait_for_address(CommonName::new("alice")).await,
            Err(SupervisorError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let mut supervisor = ProcessSupervisor::new(SupervisorConfig::default());

        supervisor.stop().await;
        supervisor.stop().await;

        assert_eq!(supervisor.state(), DaemonState::Stopped);
        assert!(matches!(
            supervisor.start().await,
            Err(SupervisorError::ShutDown)
        ));
        assert!(matches!(
            supervisor.restart().await,
            Err(SupervisorError::ShutDown)
        ));
    }
}
