//! Error taxonomy shared by every lifecycle operation
//!
//! - Connection errors: the remote session could not be established or was lost
//! - Command errors: non-empty stderr (or non-zero exit on a local shell)
//! - Protocol errors: the service starter printed something that is not a pid
//! - Exhaustion errors: a rebooted host never answered on its SSH port

use thiserror::Error;

/// Errors raised by the command-execution and lifecycle subsystem
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Connection to {address} failed: {reason}")]
    Connection { address: String, reason: String },

    /// Raw stderr text suffixed with the numeric exit status
    #[error("{stderr}Exit status:{exit_status}")]
    Command { stderr: String, exit_status: i32 },

    #[error("Could not start the service {0}")]
    StartFailed(String),

    #[error("Unexpected service starter output: {0:?}")]
    Protocol(String),

    #[error("Impossible to reach the {address} address after {attempts} attempts, you need to restart it manually as needed")]
    Exhausted { address: String, attempts: u32 },

    #[error("{operation} is not supported on the local host {host}")]
    NotSupported { operation: &'static str, host: String },

    #[error("Host {0} has no Wake-on-LAN target (MAC and broadcast address)")]
    MissingWakeTarget(String),

    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("Malformed {field} stat: {value:?}")]
    StatsParse { field: &'static str, value: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl WardenError {
    pub fn connection(address: impl Into<String>, reason: impl ToString) -> Self {
        WardenError::Connection {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, WardenError::Connection { .. })
    }
}

impl From<tokio::task::JoinError> for WardenError {
    fn from(e: tokio::task::JoinError) -> Self {
        WardenError::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_keeps_raw_stderr() {
        let err = WardenError::Command {
            stderr: "kill: (4242) - No such process\n".to_string(),
            exit_status: 1,
        };
        assert_eq!(err.to_string(), "kill: (4242) - No such process\nExit status:1");
    }

    #[test]
    fn test_exhaustion_names_address() {
        let err = WardenError::Exhausted {
            address: "10.0.0.7".to_string(),
            attempts: 10,
        };
        assert!(err.to_string().contains("10.0.0.7"));
        assert!(err.to_string().contains("manually"));
    }
}
