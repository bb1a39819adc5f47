//! Supervisor configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file at all) yields a usable configuration:
//!
//! ```toml
//! program = "/usr/sbin/openvpn"
//! args = ["--config", "/etc/openvpn/server.conf"]
//! mode = "authority"          # optional, inferred from args when absent
//! socket_dir = "/run/ovsup"   # optional, a private temp dir when absent
//! poll_interval_secs = 10
//! event_buffer = 10
//! output_buffer = 100
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ovsup_core::{DaemonArgs, DomainError, OperatingMode};

use crate::events::DEFAULT_EVENT_BUFFER;

/// Default daemon executable, resolved through `PATH`.
pub const DEFAULT_PROGRAM: &str = "openvpn";

/// Default client-list poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Default capacity of the daemon output channel.
pub const DEFAULT_OUTPUT_BUFFER: usize = 100;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("program must not be empty")]
    EmptyProgram,

    #[error("poll interval must be at least one second")]
    ZeroPollInterval,

    #[error("{0} must be greater than zero")]
    ZeroBuffer(&'static str),

    #[error(transparent)]
    Args(#[from] DomainError),
}

/// Settings for one supervised daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Daemon executable.
    pub program: PathBuf,
    /// Arguments passed to the daemon, before management options are added.
    pub args: DaemonArgs,
    /// Explicit operating mode. Inferred from `args` when absent.
    pub mode: Option<OperatingMode>,
    /// Directory for the management socket.
    pub socket_dir: Option<PathBuf>,
    pub poll_interval_secs: u64,
    pub event_buffer: usize,
    pub output_buffer: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            args: DaemonArgs::default(),
            mode: None,
            socket_dir: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            output_buffer: DEFAULT_OUTPUT_BUFFER,
        }
    }
}

impl SupervisorConfig {
    /// Creates a configuration for `program` with the given arguments.
    pub fn new(program: impl Into<PathBuf>, args: DaemonArgs) -> Self {
        Self {
            program: program.into(),
            args,
            ..Self::default()
        }
    }

    /// Sets an explicit operating mode.
    pub fn with_mode(mut self, mode: OperatingMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the poll interval in seconds.
    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    /// Sets the directory the management socket is created in.
    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = Some(dir.into());
        self
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Per-user configuration file location, e.g. `~/.config/ovsup/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ovsup").join("config.toml"))
    }

    /// Checks the configuration before anything is spawned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.program.as_os_str().is_empty() {
            return Err(ConfigError::EmptyProgram);
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::ZeroBuffer("event_buffer"));
        }
        if self.output_buffer == 0 {
            return Err(ConfigError::ZeroBuffer("output_buffer"));
        }
        self.args.validate()?;
        Ok(())
    }

    /// Operating mode, explicit or inferred from the daemon arguments.
    pub fn resolved_mode(&self) -> OperatingMode {
        self.mode
            .unwrap_or_else(|| OperatingMode::infer(self.args.as_slice()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
