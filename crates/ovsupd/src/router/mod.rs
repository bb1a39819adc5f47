//! Message router using the actor pattern.
//!
//! The router is the only writer of the peer registry and the daemon
//! environment. The management session feeds it classified messages; the
//! supervisor and embedders query it through [`RouterHandle`].
//!
//! ```text
//! ┌──────────────────┐  RouterCommand  ┌──────────────┐  DaemonEvent  ┌───────────┐
//! │ ManagementSession│────────────────▶│    Router    │──────────────▶│ EventSink │
//! └──────────────────┘   (mpsc)        └──────┬───────┘  (try_send)   └───────────┘
//!          ▲                                  │
//!          └──────────── ManagementCommand ───┘
//!                  (echo on / state on / hold release)
//! ```

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

mod actor;
mod commands;
mod handle;

pub use actor::Router;
pub use commands::{RouterCommand, RouterError};
pub use handle::{RouterHandle, DELIVERY_TIMEOUT};

use crate::events::EventSink;

/// Capacity of the router's inbound queue.
const COMMAND_BUFFER: usize = 64;

/// Spawns the router on `tracker` and returns a handle to it.
///
/// The router runs until `cancel` fires or every handle is dropped.
pub fn spawn_router(
    events: EventSink,
    cancel: CancellationToken,
    tracker: &TaskTracker,
) -> RouterHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let router = Router::new(cmd_rx, events, cancel);
    tracker.spawn(router.run());
    RouterHandle::new(cmd_tx)
}
