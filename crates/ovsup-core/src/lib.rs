//! ovsup Core - Shared domain types for OpenVPN supervision
//!
//! This crate provides the domain model shared between the protocol
//! layer (`ovsup-protocol`) and the runtime (`ovsupd`): peers and their
//! registry, the reconciliation algorithm, lifecycle states and the
//! events delivered to embedding applications.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod args;
pub mod error;
pub mod event;
pub mod peer;
pub mod registry;
pub mod snapshot;
pub mod state;

// Re-exports for convenience
pub use args::DaemonArgs;
pub use error::{DomainError, DomainResult};
pub use event::DaemonEvent;
pub use peer::{CommonName, Peer, PeerView, COMMON_NAME_ENV_KEY};
pub use registry::{ClientRegistry, ReconcileOutcome, MISSING_CYCLE_LIMIT};
pub use snapshot::{PeerRow, RouteRow, Snapshot};
pub use state::{DaemonState, OperatingMode};
