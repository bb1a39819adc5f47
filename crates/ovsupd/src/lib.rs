//! ovsup Daemon Runtime - management channel, router and process supervisor
//!
//! This crate provides the moving parts that supervise an OpenVPN daemon:
//! - `supervisor` - spawns the daemon, captures its output, detects exit
//! - `management` - Unix socket the daemon dials into, read loop and polling
//! - `router` - single-writer actor owning the peer registry
//! - `events` - bounded, non-blocking event delivery to the embedder
//! - `config` - supervisor configuration
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     ProcessSupervisor                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────┐  lines  ┌──────────────┐  messages        │
//! │  │   openvpn    │────────▶│ Management   │──────────┐       │
//! │  │  (child)     │◀────────│  Session     │          ▼       │
//! │  └──────┬───────┘ commands└──────────────┘   ┌────────────┐ │
//! │         │ stdout/stderr          ▲           │   Router   │ │
//! │         ▼                        └───────────│  (actor)   │ │
//! │  ┌──────────────┐                  hold/poll └─────┬──────┘ │
//! │  │ OutputLine   │                                  │ events │
//! │  │  channel     │                                  ▼        │
//! │  └──────────────┘                           ┌────────────┐  │
//! │                                             │ EventSink  │  │
//! │                                             └────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod events;
pub mod management;
pub mod router;
pub mod supervisor;

pub use config::{ConfigError, SupervisorConfig};
pub use events::EventSink;
pub use supervisor::{OutputLine, OutputStream, ProcessSupervisor, SupervisorError};
