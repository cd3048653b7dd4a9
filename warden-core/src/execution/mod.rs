//! Command execution against a host shell
//!
//! One contract, two transports:
//! - Local: a `bash -s` child process fed through its stdin
//! - Remote: an exec channel over an authenticated SSH session
//!
//! Which one a host gets is decided by [`ChannelKind::for_host`] and nothing else.

mod local;
mod remote;

pub use local::LocalChannel;
pub use remote::RemoteChannel;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::LifecycleConfig;
use crate::error::{Result, WardenError};
use crate::models::Host;
use crate::session::RemoteSession;

/// What gets written to the target shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellRequest {
    /// A single command line
    Command(String),
    /// A whole script fed to `bash -s` over the input stream
    Script(String),
}

/// Raw outcome of one channel round trip
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    /// Applies the failure contract and returns the normalized stdout.
    ///
    /// Non-empty stderr always fails. A non-zero exit status only fails when
    /// `strict_exit` is set (local shells).
    pub fn into_result(self, strict_exit: bool) -> Result<String> {
        if !self.stderr.is_empty() || (strict_exit && self.exit_status != 0) {
            return Err(WardenError::Command {
                stderr: self.stderr,
                exit_status: self.exit_status,
            });
        }
        Ok(normalize_output(&self.stdout))
    }
}

/// Drops every line break and trims, so results read as single-line tokens
pub fn normalize_output(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect::<String>()
        .trim()
        .to_string()
}

#[async_trait]
pub trait CommandChannel: Send {
    /// Sends the request and collects stdout, stderr and exit status without judging them
    async fn run(&mut self, request: ShellRequest) -> Result<CommandOutput>;

    /// Whether a non-zero exit status alone counts as a failure
    fn strict_exit(&self) -> bool;

    /// Releases the underlying process or session
    async fn close(&mut self) -> Result<()>;

    /// Executes one command line and returns its normalized stdout
    async fn execute(&mut self, command: &str) -> Result<String> {
        debug!("exec: {}", command);
        let strict = self.strict_exit();
        self.run(ShellRequest::Command(command.to_string()))
            .await?
            .into_result(strict)
    }
}

/// Transport selected for a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Local,
    Remote,
}

impl ChannelKind {
    /// Remote iff the host declares SSH credentials
    pub fn for_host(host: &Host) -> Self {
        if host.is_remote() {
            ChannelKind::Remote
        } else {
            ChannelKind::Local
        }
    }
}

/// Opens one transient channel per logical operation
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn open(&self, host: &Host) -> Result<Box<dyn CommandChannel>>;
}

/// Production factory: local child processes or SSH sessions
#[derive(Debug, Clone)]
pub struct ShellChannelFactory {
    config: LifecycleConfig,
}

impl ShellChannelFactory {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ChannelFactory for ShellChannelFactory {
    async fn open(&self, host: &Host) -> Result<Box<dyn CommandChannel>> {
        match (ChannelKind::for_host(host), &host.ssh) {
            (ChannelKind::Remote, Some(credentials)) => {
                let session = RemoteSession::connect(&host.address, credentials, &self.config).await?;
                Ok(Box::new(RemoteChannel::new(session)))
            }
            _ => Ok(Box::new(LocalChannel::new(&self.config.shell))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_output() {
        assert_eq!(normalize_output("4242\n"), "4242");
        assert_eq!(normalize_output("aa:bb:cc\r\n:dd:ee:ff\n"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(normalize_output("  \n"), "");
    }

    #[test]
    fn test_stderr_fails_even_with_zero_exit() {
        let output = CommandOutput {
            stdout: "partial".to_string(),
            stderr: "sudo: a password is required\n".to_string(),
            exit_status: 0,
        };
        let err = output.into_result(false).unwrap_err();
        assert_eq!(err.to_string(), "sudo: a password is required\nExit status:0");
    }

    #[test]
    fn test_exit_status_only_fails_when_strict() {
        let output = CommandOutput {
            stdout: "done\n".to_string(),
            stderr: String::new(),
            exit_status: 3,
        };
        assert_eq!(output.clone().into_result(false).unwrap(), "done");
        assert!(matches!(
            output.into_result(true),
            Err(WardenError::Command { exit_status: 3, .. })
        ));
    }

    #[test]
    fn test_channel_kind_follows_credentials() {
        let local = Host::new("h1", "laptop", "127.0.0.1");
        let remote = Host::new("h2", "nas", "192.168.1.20").with_ssh("admin", "pw");
        assert_eq!(ChannelKind::for_host(&local), ChannelKind::Local);
        assert_eq!(ChannelKind::for_host(&remote), ChannelKind::Remote);
    }
}
