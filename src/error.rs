//! Error types for gangway.
//!
//! Failures are tagged enums with payload (hop index, command text) so
//! callers switch on kind rather than downcasting. Connection-layer and
//! command-layer kinds live in their own enums and are wrapped by [`Error`].

use std::time::Duration;

use thiserror::Error;

/// Main error type for gangway operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed connection-target configuration, detected before any I/O.
    #[error("Invalid hop info: {message}")]
    InvalidHopInfo {
        /// What was wrong with the URL or hop sequence.
        message: String,
    },

    /// Transport or negotiation failure while establishing or holding a chain.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Command execution failure on an established session.
    #[error("Command error: {0}")]
    Command(#[from] CommandError),
}

/// Connection establishment and chain-liveness errors.
///
/// Every variant carries the 1-based index of the hop that failed; for a
/// single-hop target that index is always 1.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Host unreachable, connection refused, reset by peer, or any other
    /// negotiation failure that is not authentication or timeout.
    #[error("hop {hop}: {message}")]
    Failed { hop: usize, message: String },

    /// Credentials rejected or the password retry budget exhausted.
    #[error("hop {hop}: authentication failed: {message}")]
    Authentication { hop: usize, message: String },

    /// No expected pattern matched within the allotted time.
    #[error("hop {hop}: timed out after {timeout:?}")]
    Timeout { hop: usize, timeout: Duration },

    /// The session stream ended unexpectedly (remote reset, child exit).
    #[error("hop {hop}: session closed unexpectedly")]
    Closed { hop: usize },

    /// Failed to spawn the local ssh/telnet client process.
    #[error("hop {hop}: failed to spawn session: {message}")]
    Spawn { hop: usize, message: String },
}

impl ConnectionError {
    /// The 1-based index of the hop where the failure occurred.
    pub fn hop(&self) -> usize {
        match self {
            ConnectionError::Failed { hop, .. }
            | ConnectionError::Authentication { hop, .. }
            | ConnectionError::Timeout { hop, .. }
            | ConnectionError::Closed { hop }
            | ConnectionError::Spawn { hop, .. } => *hop,
        }
    }
}

/// Command execution errors. Every variant carries the offending command.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The device reported the command as invalid, ambiguous or incomplete.
    #[error("syntax error: '{command}'")]
    Syntax { command: String },

    /// Command issued but no completion pattern observed before the timeout.
    #[error("'{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// Execution aborted for another reason (session lost mid-command).
    #[error("'{command}' failed: {message}")]
    Failed { command: String, message: String },
}

impl CommandError {
    /// The command text that triggered the failure.
    pub fn command(&self) -> &str {
        match self {
            CommandError::Syntax { command }
            | CommandError::Timeout { command, .. }
            | CommandError::Failed { command, .. } => command,
        }
    }
}

impl Error {
    /// Hop index for connection-kind errors, `None` otherwise.
    pub fn hop(&self) -> Option<usize> {
        match self {
            Error::Connection(e) => Some(e.hop()),
            _ => None,
        }
    }

    /// Offending command for command-kind errors, `None` otherwise.
    pub fn command(&self) -> Option<&str> {
        match self {
            Error::Command(e) => Some(e.command()),
            _ => None,
        }
    }

    /// True for the authentication kind.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Connection(ConnectionError::Authentication { .. }))
    }
}

/// Result type alias using gangway's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_index_propagates() {
        let err: Error = ConnectionError::Timeout {
            hop: 2,
            timeout: Duration::from_secs(30),
        }
        .into();
        assert_eq!(err.hop(), Some(2));
        assert_eq!(err.command(), None);
    }

    #[test]
    fn test_command_payload() {
        let err: Error = CommandError::Syntax {
            command: "frobnicate".to_string(),
        }
        .into();
        assert_eq!(err.command(), Some("frobnicate"));
        assert!(!err.is_authentication());
    }

    #[test]
    fn test_display() {
        let err = ConnectionError::Authentication {
            hop: 1,
            message: "password rejected".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "hop 1: authentication failed: password rejected"
        );
    }
}
