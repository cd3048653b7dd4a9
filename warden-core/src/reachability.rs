//! Post-reboot reachability wait
//!
//! A rebooted host is polled on its SSH port until it accepts a TCP connection.
//! The wait is an explicit bounded state machine:
//!
//! ```text
//! Waiting(n) --probe ok--------------------> Reachable
//! Waiting(n) --refused / timed out---------> Waiting(n + 1)
//! Waiting(n) --n >= max--------------------> Exhausted
//! Waiting(n) --any other io error----------> fatal (not counted)
//! ```
//!
//! [`ReachabilityWaiter::spawn`] runs it on its own task so that issuing a reboot
//! returns immediately; the continuation receives the outcome.

use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LifecycleConfig;
use crate::error::{Result, WardenError};

/// Result of a single connection attempt
#[derive(Debug)]
pub enum ProbeOutcome {
    Reachable,
    /// Host is up but nothing listens yet
    Refused,
    TimedOut,
    Failed(io::Error),
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str, port: u16, timeout: Duration) -> ProbeOutcome;
}

/// Plain TCP connect, the stream is dropped right away
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, address: &str, port: u16, timeout: Duration) -> ProbeOutcome {
        match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await {
            Ok(Ok(_stream)) => ProbeOutcome::Reachable,
            Ok(Err(e)) => match e.kind() {
                io::ErrorKind::ConnectionRefused => ProbeOutcome::Refused,
                io::ErrorKind::TimedOut => ProbeOutcome::TimedOut,
                _ => ProbeOutcome::Failed(e),
            },
            Err(_elapsed) => ProbeOutcome::TimedOut,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Waiting(u32),
    Reachable,
    Exhausted(u32),
}

#[derive(Clone)]
pub struct ReachabilityWaiter {
    prober: Arc<dyn Prober>,
    config: LifecycleConfig,
}

impl ReachabilityWaiter {
    pub fn new(prober: Arc<dyn Prober>, config: LifecycleConfig) -> Self {
        Self { prober, config }
    }

    pub fn tcp(config: LifecycleConfig) -> Self {
        Self::new(Arc::new(TcpProber), config)
    }

    /// Polls `address` until reachable. Starting at or above the ceiling fails
    /// without a single connection attempt.
    pub async fn wait(&self, address: &str, starting_attempts: u32) -> Result<()> {
        let max = self.config.max_reachability_attempts;
        let mut state = WaitState::Waiting(starting_attempts);

        loop {
            state = match state {
                WaitState::Waiting(attempts) if attempts >= max => WaitState::Exhausted(attempts),
                WaitState::Waiting(attempts) => {
                    match self
                        .prober
                        .probe(address, self.config.ssh_port, self.config.probe_timeout())
                        .await
                    {
                        ProbeOutcome::Reachable => WaitState::Reachable,
                        ProbeOutcome::Refused | ProbeOutcome::TimedOut => {
                            let next = attempts + 1;
                            debug!("{} not reachable yet ({}/{})", address, next, max);
                            if next < max {
                                tokio::time::sleep(self.config.probe_retry_interval()).await;
                            }
                            WaitState::Waiting(next)
                        }
                        ProbeOutcome::Failed(e) => {
                            warn!("reachability probe on {} failed: {}", address, e);
                            return Err(WardenError::connection(address, e));
                        }
                    }
                }
                WaitState::Reachable => {
                    info!("{} is reachable again", address);
                    return Ok(());
                }
                WaitState::Exhausted(attempts) => {
                    warn!("giving up on {} after {} attempts", address, attempts);
                    return Err(WardenError::Exhausted {
                        address: address.to_string(),
                        attempts,
                    });
                }
            };
        }
    }

    /// Runs the wait on its own task and hands the outcome to `continuation`
    pub fn spawn<F, Fut>(&self, address: String, continuation: F) -> JoinHandle<Fut::Output>
    where
        F: FnOnce(Result<()>) -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let waiter = self.clone();
        tokio::spawn(async move {
            let outcome = waiter.wait(&address, 0).await;
            continuation(outcome).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProber {
        outcomes: Mutex<VecDeque<ProbeOutcome>>,
        calls: AtomicU32,
    }

    impl ScriptedProber {
        fn new(outcomes: Vec<ProbeOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, _address: &str, _port: u16, _timeout: Duration) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes.lock().pop_front().unwrap_or(ProbeOutcome::Refused)
        }
    }

    fn config(max: u32) -> LifecycleConfig {
        LifecycleConfig {
            max_reachability_attempts: max,
            probe_retry_interval_ms: 0,
            ..LifecycleConfig::default()
        }
    }

    #[tokio::test]
    async fn test_reachable_after_refusals() {
        let prober = ScriptedProber::new(vec![
            ProbeOutcome::Refused,
            ProbeOutcome::TimedOut,
            ProbeOutcome::Reachable,
        ]);
        let waiter = ReachabilityWaiter::new(prober.clone(), config(10));
        waiter.wait("10.0.0.7", 0).await.unwrap();
        assert_eq!(prober.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_after_ceiling() {
        let prober = ScriptedProber::new(vec![]);
        let waiter = ReachabilityWaiter::new(prober.clone(), config(4));
        let err = waiter.wait("10.0.0.7", 0).await.unwrap_err();
        assert!(matches!(err, WardenError::Exhausted { attempts: 4, .. }));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_at_ceiling_never_probes() {
        let prober = ScriptedProber::new(vec![ProbeOutcome::Reachable]);
        let waiter = ReachabilityWaiter::new(prober.clone(), config(10));
        let err = waiter.wait("10.0.0.7", 10).await.unwrap_err();
        assert!(err.to_string().contains("10.0.0.7"));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_other_io_error_is_fatal() {
        let prober = ScriptedProber::new(vec![
            ProbeOutcome::Refused,
            ProbeOutcome::Failed(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
            ProbeOutcome::Reachable,
        ]);
        let waiter = ReachabilityWaiter::new(prober.clone(), config(10));
        let err = waiter.wait("10.0.0.7", 0).await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_spawn_runs_continuation() {
        let prober = ScriptedProber::new(vec![ProbeOutcome::Reachable]);
        let waiter = ReachabilityWaiter::new(prober, config(10));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = waiter.spawn("10.0.0.7".to_string(), move |outcome| async move {
            let _ = tx.send(outcome.is_ok());
        });
        handle.await.unwrap();
        assert!(rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_tcp_prober_against_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let outcome = TcpProber.probe("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(matches!(outcome, ProbeOutcome::Reachable));
    }
}
