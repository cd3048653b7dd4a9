//! Authenticated SSH session bound to one remote host
//!
//! libssh2 is blocking, so every round trip runs on tokio's blocking pool. A
//! session backs one logical operation (possibly several sequential channels) and
//! is not meant to be shared between concurrent operations.
//!
//! Host keys are NOT verified: the first key presented is trusted. Operators are
//! warned about this at kernel start-up.

use parking_lot::Mutex;
use ssh2::Session;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::LifecycleConfig;
use crate::error::{Result, WardenError};
use crate::execution::{CommandOutput, ShellRequest};
use crate::models::SshCredentials;

pub struct RemoteSession {
    address: String,
    shell: String,
    session: Arc<Mutex<Session>>,
    connected: bool,
}

impl RemoteSession {
    /// Connects and authenticates with a password. Never retried here.
    pub async fn connect(address: &str, credentials: &SshCredentials, config: &LifecycleConfig) -> Result<Self> {
        let target = address.to_string();
        let credentials = credentials.clone();
        let port = config.ssh_port;
        let timeout = config.ssh_connect_timeout();

        let session =
            tokio::task::spawn_blocking(move || connect_blocking(&target, port, &credentials, timeout)).await??;

        info!("SSH session opened on {}", address);
        Ok(Self {
            address: address.to_string(),
            shell: config.shell.clone(),
            session: Arc::new(Mutex::new(session)),
            connected: true,
        })
    }

    /// Opens a fresh exec channel, runs the request, closes the channel
    pub async fn exec(&self, request: ShellRequest) -> Result<CommandOutput> {
        if !self.connected {
            return Err(WardenError::connection(&self.address, "session already closed"));
        }
        let session = Arc::clone(&self.session);
        let address = self.address.clone();
        let shell = self.shell.clone();
        tokio::task::spawn_blocking(move || {
            let session = session.lock();
            exec_blocking(&session, &address, &shell, request)
        })
        .await?
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        let session = Arc::clone(&self.session);
        let address = self.address.clone();
        tokio::task::spawn_blocking(move || {
            session
                .lock()
                .disconnect(None, "closing session", None)
                .map_err(|e| WardenError::connection(&address, e))
        })
        .await??;
        debug!("SSH session closed on {}", self.address);
        Ok(())
    }
}

fn connect_blocking(address: &str, port: u16, credentials: &SshCredentials, timeout: Duration) -> Result<Session> {
    let socket = (address, port)
        .to_socket_addrs()
        .map_err(|e| WardenError::connection(address, e))?
        .next()
        .ok_or_else(|| WardenError::connection(address, "address did not resolve"))?;

    let tcp = TcpStream::connect_timeout(&socket, timeout).map_err(|e| WardenError::connection(address, e))?;

    let mut session = Session::new().map_err(|e| WardenError::connection(address, e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout_ms(timeout));
    session
        .handshake()
        .map_err(|e| WardenError::connection(address, e))?;
    session
        .userauth_password(&credentials.user, &credentials.password)
        .map_err(|e| WardenError::connection(address, e))?;
    if !session.authenticated() {
        return Err(WardenError::connection(address, "SSH authentication failed"));
    }
    // commands themselves are not bounded
    session.set_timeout(0);
    Ok(session)
}

fn exec_blocking(session: &Session, address: &str, shell: &str, request: ShellRequest) -> Result<CommandOutput> {
    let lost = |e: &dyn std::fmt::Display| WardenError::connection(address, e);

    let mut channel = session.channel_session().map_err(|e| lost(&e))?;
    match request {
        ShellRequest::Command(command) => {
            channel.exec(&command).map_err(|e| lost(&e))?;
        }
        ShellRequest::Script(script) => {
            channel.exec(&format!("{} -s", shell)).map_err(|e| lost(&e))?;
            channel.write_all(script.as_bytes()).map_err(|e| lost(&e))?;
            channel.send_eof().map_err(|e| lost(&e))?;
        }
    }

    session.set_blocking(false);
    let drained = drain_streams(&mut channel);
    session.set_blocking(true);
    let (stdout, stderr) = drained.map_err(|e| lost(&e))?;

    // the peer may vanish right after answering (reboot, shutdown)
    let _ = channel.wait_close();
    let exit_status = channel.exit_status().unwrap_or(-1);

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_status,
    })
}

/// libssh2 timeouts are u32 milliseconds, 0 meaning none
fn timeout_ms(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

const DRAIN_PAUSE: Duration = Duration::from_millis(10);

/// The two output streams of one exec channel, read without blocking
trait ChannelStreams {
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn at_eof(&self) -> bool;
}

impl ChannelStreams for ssh2::Channel {
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stderr().read(buf)
    }

    fn at_eof(&self) -> bool {
        self.eof()
    }
}

/// Reads stdout and stderr alternately until the remote side is done, so a
/// full stderr window never stalls the stdout read (and the other way round)
fn drain_streams(channel: &mut impl ChannelStreams) -> io::Result<(String, String)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        let mut progressed = read_some(|b| channel.read_stdout(b), &mut buf, &mut stdout)?;
        progressed |= read_some(|b| channel.read_stderr(b), &mut buf, &mut stderr)?;
        if !progressed {
            if channel.at_eof() {
                break;
            }
            std::thread::sleep(DRAIN_PAUSE);
        }
    }

    Ok((
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    ))
}

fn read_some(
    read: impl FnOnce(&mut [u8]) -> io::Result<usize>,
    buf: &mut [u8],
    into: &mut Vec<u8>,
) -> io::Result<bool> {
    match read(buf) {
        Ok(0) => Ok(false),
        Ok(n) => {
            into.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// stdout stays blocked while stderr holds unread data, like a full SSH window
    struct WindowedChannel {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        chunk: usize,
    }

    fn take(source: &mut Vec<u8>, buf: &mut [u8], chunk: usize) -> usize {
        let n = chunk.min(buf.len()).min(source.len());
        buf[..n].copy_from_slice(&source[..n]);
        source.drain(..n);
        n
    }

    impl ChannelStreams for WindowedChannel {
        fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.stderr.is_empty() {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "window full"));
            }
            Ok(take(&mut self.stdout, buf, self.chunk))
        }

        fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            Ok(take(&mut self.stderr, buf, self.chunk))
        }

        fn at_eof(&self) -> bool {
            self.stdout.is_empty() && self.stderr.is_empty()
        }
    }

    #[test]
    fn test_large_stderr_does_not_stall_stdout() {
        let mut channel = WindowedChannel {
            stdout: b"4242\n".to_vec(),
            stderr: vec![b'x'; 100_000],
            chunk: 4096,
        };

        let (stdout, stderr) = drain_streams(&mut channel).unwrap();

        assert_eq!(stdout, "4242\n");
        assert_eq!(stderr.len(), 100_000);
    }

    #[test]
    fn test_drain_propagates_read_errors() {
        struct Broken;
        impl ChannelStreams for Broken {
            fn read_stdout(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            }
            fn read_stderr(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn at_eof(&self) -> bool {
                false
            }
        }

        let err = drain_streams(&mut Broken).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_timeout_saturates_instead_of_wrapping() {
        assert_eq!(timeout_ms(Duration::from_millis(2000)), 2000);
        assert_eq!(timeout_ms(Duration::from_secs(60 * 60 * 24 * 365)), u32::MAX);
    }
}
