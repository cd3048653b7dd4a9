//! Local transport: a shell child process per request

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use super::{CommandChannel, CommandOutput, ShellRequest};
use crate::error::Result;

/// Runs requests through `<shell> -s` on the machine hosting the kernel
#[derive(Debug, Clone)]
pub struct LocalChannel {
    shell: String,
}

impl LocalChannel {
    pub fn new(shell: &str) -> Self {
        Self {
            shell: shell.to_string(),
        }
    }
}

#[async_trait]
impl CommandChannel for LocalChannel {
    async fn run(&mut self, request: ShellRequest) -> Result<CommandOutput> {
        let input = match request {
            ShellRequest::Command(command) => format!("{}\n", command),
            ShellRequest::Script(script) => script,
        };

        let mut child = AsyncCommand::new(&self.shell)
            .arg("-s")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
            stdin.flush().await?;
            // dropping stdin sends EOF, the shell exits after the last line
        }

        let output = child.wait_with_output().await?;
        let exit_status = output.status.code().unwrap_or(-1);
        debug!("local shell exited with {}", exit_status);

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_status,
        })
    }

    fn strict_exit(&self) -> bool {
        true
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::WardenError;

    #[tokio::test]
    async fn test_shell_command_execution() {
        let mut channel = LocalChannel::new("bash");
        let result = channel.execute("echo 'Hello World'").await.unwrap();
        assert_eq!(result, "Hello World");
    }

    #[tokio::test]
    async fn test_multiline_output_is_flattened() {
        let mut channel = LocalChannel::new("bash");
        let result = channel.execute("printf '12\\n34\\n'").await.unwrap();
        assert_eq!(result, "1234");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_a_failure() {
        let mut channel = LocalChannel::new("bash");
        let err = channel.execute("exit 4").await.unwrap_err();
        assert!(matches!(err, WardenError::Command { exit_status: 4, .. }));
    }

    #[tokio::test]
    async fn test_stderr_is_reported_with_exit_status() {
        let mut channel = LocalChannel::new("bash");
        let err = channel.execute("echo boom >&2; exit 2").await.unwrap_err();
        assert_eq!(err.to_string(), "boom\nExit status:2");
    }

    #[tokio::test]
    async fn test_script_reads_positional_parameters() {
        let mut channel = LocalChannel::new("bash");
        let output = channel
            .run(ShellRequest::Script("set -- 'a b' c\necho \"$1|$2\"\n".to_string()))
            .await
            .unwrap();
        assert_eq!(output.stdout, "a b|c\n");
        assert_eq!(output.exit_status, 0);
    }
}
