//! Router actor - owns the peer registry and dispatches management messages.
//!
//! The router consumes one channel and processes commands sequentially, so
//! every registry mutation is totally ordered. Readers only ever receive
//! owned copies.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply and event send failures are logged or ignored, never fatal

use std::collections::{BTreeMap, HashMap};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use ovsup_core::{ClientRegistry, CommonName, DaemonEvent, Snapshot, COMMON_NAME_ENV_KEY};
use ovsup_protocol::{
    ClientListDump, DaemonPhase, ManagementCommand, ManagementMessage, StateNotice,
    HOLD_RELEASE_SEQUENCE,
};

use super::commands::{RouterCommand, RouterError};
use crate::events::EventSink;

type AddressWaiter = oneshot::Sender<Result<String, RouterError>>;

// ============================================================================
// Pending Env Block
// ============================================================================

/// Env pairs accumulated between a `>CLIENT:` marker and `>CLIENT:ENV,END`.
#[derive(Debug)]
struct PendingEnvBlock {
    cid: u64,
    /// Opened by `>CLIENT:DISCONNECT`; such blocks describe a leaving peer
    /// and are not merged into the registry.
    disconnect: bool,
    env: BTreeMap<String, String>,
}

impl PendingEnvBlock {
    fn open(cid: u64) -> Self {
        Self {
            cid,
            disconnect: false,
            env: BTreeMap::new(),
        }
    }

    fn disconnect(cid: u64) -> Self {
        Self {
            disconnect: true,
            ..Self::open(cid)
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// The router actor.
///
/// # Ownership
///
/// The router owns:
/// - `registry`: known peers keyed by common name
/// - `env`: the daemon's global up/down environment
/// - `pending`: the env block currently being received, if any
/// - `waiters`: callers blocked on a peer's virtual address
pub struct Router {
    receiver: mpsc::Receiver<RouterCommand>,
    registry: ClientRegistry,
    env: BTreeMap<String, String>,
    pending: Option<PendingEnvBlock>,
    waiters: HashMap<CommonName, Vec<AddressWaiter>>,
    /// Command queue of the connected daemon, if any
    outbound: Option<mpsc::Sender<ManagementCommand>>,
    events: EventSink,
    cancel: CancellationToken,
}

impl Router {
    pub fn new(
        receiver: mpsc::Receiver<RouterCommand>,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            registry: ClientRegistry::new(),
            env: BTreeMap::new(),
            pending: None,
            waiters: HashMap::new(),
            outbound: None,
            events,
            cancel,
        }
    }

    /// Runs the actor loop until cancelled or every handle is dropped.
    pub async fn run(mut self) {
        info!("Router starting");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
            }
        }

        info!(peers = self.registry.len(), "Router stopped");
    }

    fn handle_command(&mut self, cmd: RouterCommand) {
        match cmd {
            RouterCommand::Message(message) => self.handle_message(message),
            RouterCommand::Attach { writer } => {
                debug!("Management connection attached");
                self.outbound = Some(writer);
                self.pending = None;
            }
            RouterCommand::Detach => {
                debug!("Management connection detached");
                self.outbound = None;
                self.pending = None;
            }
            RouterCommand::GetPeers { respond_to } => {
                let _ = respond_to.send(self.registry.snapshot());
            }
            RouterCommand::GetPeer { name, respond_to } => {
                let _ = respond_to.send(self.registry.view(&name));
            }
            RouterCommand::GetEnv { respond_to } => {
                let _ = respond_to.send(self.env.clone());
            }
            RouterCommand::WaitForAddress { name, respond_to } => {
                self.handle_wait_for_address(name, respond_to);
            }
        }
    }

    /// Applies one management message.
    pub fn handle_message(&mut self, message: ManagementMessage) {
        match message {
            ManagementMessage::Log(line) => trace!(daemon = %line, "Daemon log"),
            ManagementMessage::Info(line) => info!(daemon = %line, "Daemon info"),
            ManagementMessage::Error(line) => error!(daemon = %line, "Daemon error"),
            ManagementMessage::Fatal(line) => error!(daemon = %line, "Daemon fatal error"),
            ManagementMessage::Success(line) => debug!(reply = %line, "Command acknowledged"),

            ManagementMessage::Hold(line) => {
                info!(hold = %line, "Daemon on hold, releasing");
                for command in HOLD_RELEASE_SEQUENCE {
                    self.write(command);
                }
            }

            ManagementMessage::State(payload) => self.handle_state(&payload),
            ManagementMessage::ClientList(dump) => self.handle_client_list(&dump),

            ManagementMessage::UpDown { phase, key, value } => {
                debug!(phase = %phase, key = %key, "Daemon environment update");
                self.env.insert(key, value);
            }
            ManagementMessage::UpDownPhase(phase) => {
                info!(phase = %phase, "Daemon up/down phase");
            }

            ManagementMessage::ClientConnect { cid, .. }
            | ManagementMessage::ClientReauth { cid, .. }
            | ManagementMessage::ClientEstablished { cid }
            | ManagementMessage::ClientAddress { cid, .. } => {
                trace!(cid, "Opening client env block");
                self.pending = Some(PendingEnvBlock::open(cid));
            }
            ManagementMessage::ClientDisconnect { cid } => {
                debug!(cid, "Client disconnecting");
                self.pending = Some(PendingEnvBlock::disconnect(cid));
            }
            ManagementMessage::ClientEnv { key, value } => match self.pending.as_mut() {
                Some(block) => {
                    block.env.insert(key, value);
                }
                None => warn!(key = %key, "Client env with no open block, dropping"),
            },
            ManagementMessage::ClientEnvEnd => self.handle_env_end(),

            ManagementMessage::Unrecognized { kind, payload } => {
                error!(kind = %kind, payload = %payload, "Unrecognized management message");
            }
        }
    }

    fn handle_state(&mut self, payload: &str) {
        let Some(notice) = StateNotice::parse(payload) else {
            error!(payload = %payload, "Malformed state notice");
            return;
        };

        debug!(phase = %notice.phase, "Daemon state");

        match &notice.phase {
            phase if phase.is_transitional() => {}
            DaemonPhase::Connected => {
                info!(address = ?notice.local_address, "Daemon connected");
                self.events.emit(DaemonEvent::Connected {
                    address: notice.local_address,
                });
            }
            DaemonPhase::Reconnecting | DaemonPhase::Exiting => {
                info!(phase = %notice.phase, "Daemon disconnected");
                self.events.emit(DaemonEvent::Disconnected);
            }
            other => error!(phase = %other, "Unknown daemon state"),
        }
    }

    fn handle_client_list(&mut self, dump: &ClientListDump) {
        match dump.snapshot() {
            Ok(snapshot) => self.reconcile(&snapshot),
            Err(e) => warn!(error = %e, "Discarding malformed client list"),
        }
    }

    fn reconcile(&mut self, snapshot: &Snapshot) {
        self.prune_waiters();

        let outcome = self.registry.reconcile(snapshot);
        if outcome.is_empty() {
            return;
        }

        for name in outcome.connected {
            info!(common_name = %name, "Client connected");
            self.events.emit(DaemonEvent::ClientConnected { name });
        }

        for (name, address) in outcome.addressed {
            if let Some(waiters) = self.waiters.remove(&name) {
                debug!(common_name = %name, count = waiters.len(), "Releasing address waiters");
                for waiter in waiters {
                    let _ = waiter.send(Ok(address.clone()));
                }
            }
        }

        for name in outcome.removed {
            info!(common_name = %name, "Client removed");
            if let Some(waiters) = self.waiters.remove(&name) {
                for waiter in waiters {
                    let _ = waiter.send(Err(RouterError::PeerRemoved(name.clone())));
                }
            }
            self.events.emit(DaemonEvent::ClientRemoved { name });
        }
    }

    /// Drops waiters whose callers already gave up.
    fn prune_waiters(&mut self) {
        self.waiters.retain(|_, waiters| {
            waiters.retain(|w| !w.is_closed());
            !waiters.is_empty()
        });
    }

    fn handle_env_end(&mut self) {
        let Some(block) = self.pending.take() else {
            warn!("Client env end with no open block");
            return;
        };

        if block.disconnect {
            debug!(cid = block.cid, "Discarding env of disconnecting client");
            return;
        }

        let Some(name) = block.env.get(COMMON_NAME_ENV_KEY).map(|cn| CommonName::new(cn.as_str()))
        else {
            warn!(cid = block.cid, "Client env without common name, discarding");
            return;
        };

        if self.registry.merge_env(name.clone(), block.env) {
            info!(common_name = %name, cid = block.cid, "Client connected");
            self.events
                .emit(DaemonEvent::ClientConnected { name: name.clone() });
        }
        self.events.emit(DaemonEvent::ClientUpdated { name });
    }

    fn handle_wait_for_address(&mut self, name: CommonName, respond_to: AddressWaiter) {
        let known = self
            .registry
            .get(&name)
            .and_then(|peer| peer.virtual_address.clone());

        match known {
            Some(address) => {
                let _ = respond_to.send(Ok(address));
            }
            None => {
                // Drop waiters whose callers already gave up
                let waiters = self.waiters.entry(name).or_default();
                waiters.retain(|w| !w.is_closed());
                waiters.push(respond_to);
            }
        }
    }

    fn write(&self, command: ManagementCommand) {
        let Some(outbound) = &self.outbound else {
            warn!(command = %command, "No management connection, dropping command");
            return;
        };

        match outbound.try_send(command) {
            Ok(()) => trace!(command = %command, "Queued management command"),
            Err(TrySendError::Full(command)) => {
                warn!(command = %command, "Management writer busy, dropping command")
            }
            Err(TrySendError::Closed(command)) => {
                debug!(command = %command, "Management writer gone, dropping command")
            }
        }
    }
}
