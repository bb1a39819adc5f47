//! Daemon argument list with management endpoint injection.
//!
//! The argument list itself is produced by an external configuration
//! builder. This type only owns it and knows how to point the daemon at
//! our management socket.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{DomainError, DomainResult};

/// Flag carrying the management endpoint (`--management <path> unix`).
pub const MANAGEMENT_FLAG: &str = "--management";

/// Flags enabled alongside the management endpoint.
///
/// - `--management-client`: the daemon dials our socket instead of listening
/// - `--management-hold`: start suspended until `hold release`
/// - `--management-signal`: route SIGUSR1/SIGTERM through the interface
/// - `--management-up-down`: report `>UPDOWN:` notices
pub const MANAGEMENT_MODE_FLAGS: [&str; 4] = [
    "--management-client",
    "--management-hold",
    "--management-signal",
    "--management-up-down",
];

/// Flat argument list for the daemon process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DaemonArgs(Vec<String>);

impl DaemonArgs {
    /// Creates an argument list from any iterable of strings.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    /// Returns the arguments as a slice.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Returns the number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the injected management socket path, if any.
    pub fn management_path(&self) -> Option<&str> {
        let pos = self.0.iter().position(|arg| arg == MANAGEMENT_FLAG)?;
        self.0.get(pos + 1).map(String::as_str)
    }

    /// Points the daemon at a Unix management socket.
    ///
    /// Any previously injected management flags are removed first, so
    /// calling this on every launch never duplicates them.
    #[must_use]
    pub fn with_management(mut self, socket_path: &Path) -> Self {
        self.strip_management();

        self.0.push(MANAGEMENT_FLAG.to_string());
        self.0.push(socket_path.to_string_lossy().into_owned());
        self.0.push("unix".to_string());
        self.0
            .extend(MANAGEMENT_MODE_FLAGS.iter().map(|flag| (*flag).to_string()));
        self
    }

    /// Checks that every argument can be handed to `exec`.
    pub fn validate(&self) -> DomainResult<()> {
        for (index, arg) in self.0.iter().enumerate() {
            if arg.contains('\0') {
                return Err(DomainError::InvalidArgument {
                    index,
                    reason: "contains a NUL byte".to_string(),
                });
            }
        }
        Ok(())
    }

    fn strip_management(&mut self) {
        let previous = std::mem::take(&mut self.0);
        let mut iter = previous.into_iter().peekable();

        while let Some(arg) = iter.next() {
            if arg == MANAGEMENT_FLAG {
                // Drop the flag's values up to the next option
                while iter.peek().is_some_and(|next| !next.starts_with("--")) {
                    iter.next();
                }
                continue;
            }
            if MANAGEMENT_MODE_FLAGS.contains(&arg.as_str()) {
                continue;
            }
            self.0.push(arg);
        }
    }
}

impl From<Vec<String>> for DaemonArgs {
    fn from(args: Vec<String>) -> Self {
        Self(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_with_management_appends_flags() {
        let args = DaemonArgs::new(["--dev", "tun"])
            .with_management(&PathBuf::from("/tmp/ovsup/mgmt-0.sock"));

        assert_eq!(
            args.as_slice(),
            &[
                "--dev",
                "tun",
                "--management",
                "/tmp/ovsup/mgmt-0.sock",
                "unix",
                "--management-client",
                "--management-hold",
                "--management-signal",
                "--management-up-down",
            ]
        );
        assert_eq!(args.management_path(), Some("/tmp/ovsup/mgmt-0.sock"));
    }

    #[test]
    fn test_with_management_replaces_previous_injection() {
        let args = DaemonArgs::new(["--dev", "tun"])
            .with_management(&PathBuf::from("/tmp/a.sock"))
            .with_management(&PathBuf::from("/tmp/b.sock"));

        assert_eq!(args.management_path(), Some("/tmp/b.sock"));
        assert_eq!(
            args.as_slice()
                .iter()
                .filter(|arg| *arg == "--management-hold")
                .count(),
            1
        );
        assert_eq!(args.len(), 2 + 3 + MANAGEMENT_MODE_FLAGS.len());
    }

    #[test]
    fn test_validate_rejects_nul() {
        let args = DaemonArgs::new(["--dev", "tu\0n"]);
        assert_eq!(
            args.validate(),
            Err(DomainError::InvalidArgument {
                index: 1,
                reason: "contains a NUL byte".to_string(),
            })
        );
        assert!(DaemonArgs::new(["--dev", "tun"]).validate().is_ok());
    }
}
