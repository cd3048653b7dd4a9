/*!
Test Harness pour les contrôleurs Warden

Assemble shell mockée + gateway en mémoire + prober scripté dans de vrais
contrôleurs warden-core, puis expose des helpers d'attente et d'assertion.
*/

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use warden_core::{
    ExhaustionPolicy, Host, HostLifecycleController, HostStatsCollector, HostStatus, LifecycleConfig,
    ReachabilityWaiter, ServiceLifecycleController,
};

use crate::memory_gateway::InMemoryGateway;
use crate::prober_stub::ScriptedProber;
use crate::shell_stub::{MockChannelFactory, MockShell};

pub struct TestHarness {
    pub shell: MockShell,
    pub gateway: Arc<InMemoryGateway>,
    pub prober: Arc<ScriptedProber>,
    pub config: LifecycleConfig,
    pub hosts: HostLifecycleController,
    pub stats: HostStatsCollector,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Self::fast_config())
    }

    /// Pas d'attente entre deux sondes, plafond de tentatives réduit
    pub fn fast_config() -> LifecycleConfig {
        LifecycleConfig {
            max_reachability_attempts: 5,
            probe_retry_interval_ms: 0,
            probe_timeout_secs: 1,
            ..LifecycleConfig::default()
        }
    }

    pub fn with_policy(policy: ExhaustionPolicy) -> Self {
        Self::with_config(LifecycleConfig {
            exhaustion_policy: policy,
            ..Self::fast_config()
        })
    }

    pub fn with_config(config: LifecycleConfig) -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        let shell = MockShell::new();
        let gateway = Arc::new(InMemoryGateway::new());
        let prober = Arc::new(ScriptedProber::new());
        let factory = Arc::new(MockChannelFactory::new(shell.clone()));
        let waiter = ReachabilityWaiter::new(prober.clone(), config.clone());
        let hosts = HostLifecycleController::new(gateway.clone(), factory.clone(), waiter, config.clone());
        let stats = HostStatsCollector::new(factory);

        Self {
            shell,
            gateway,
            prober,
            config,
            hosts,
            stats,
        }
    }

    pub fn services(&self) -> &ServiceLifecycleController {
        self.hosts.services()
    }

    /// Enregistre l'hôte et renvoie sa copie persistée
    pub fn add_host(&self, host: Host) -> Host {
        let id = host.id.clone();
        self.gateway.insert_host(host);
        self.reload(&id)
    }

    /// Relit l'hôte depuis la gateway (panique s'il est inconnu)
    pub fn reload(&self, host_id: &str) -> Host {
        match self.gateway.host(host_id) {
            Some(host) => host,
            None => panic!("unknown host {}", host_id),
        }
    }

    /// Attend que l'hôte atteigne `status`, false après `timeout_ms`
    pub async fn wait_for_host_status(&self, host_id: &str, status: HostStatus, timeout_ms: u64) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if self.gateway.host_status(host_id) == Some(status) {
                log::info!("host {} reached {:?}", host_id, status);
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        log::warn!("timeout waiting for host {} to reach {:?}", host_id, status);
        false
    }

    /// Vérifie que la commande a été envoyée telle quelle
    pub fn assert_command_sent(&self, command: &str) -> Result<()> {
        let commands = self.shell.commands();
        if !commands.iter().any(|c| c == command) {
            anyhow::bail!("command '{}' was not sent, got {:?}", command, commands);
        }
        Ok(())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
