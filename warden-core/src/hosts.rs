//! Host lifecycle: ONLINE <-> OFFLINE <-> REBOOTING
//!
//! Start is a Wake-on-LAN broadcast. Stop and reboot go through the host's SSH
//! channel and are refused for local hosts. A successful reboot command hands the
//! rest of the transition to the [`ReachabilityWaiter`]; the caller gets a
//! [`RebootHandle`] back immediately.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{ExhaustionPolicy, LifecycleConfig};
use crate::error::{Result, WardenError};
use crate::events::EventLog;
use crate::execution::{ChannelFactory, ChannelKind};
use crate::gateway::Gateway;
use crate::models::{Host, HostStatus, WakeTarget};
use crate::reachability::ReachabilityWaiter;
use crate::services::{close_quietly, ServiceLifecycleController};
use crate::wol;

pub const SHUTDOWN_COMMAND: &str = "sudo shutdown now";
pub const REBOOT_COMMAND: &str = "sudo reboot";
pub const MAC_ADDRESS_COMMAND: &str = "ip link show | awk -F': ' '/^[0-9]+: e/{print $2}' | head -n 1 | xargs -I {} ip link show {} | awk '/ether/ {print $2}'";
pub const BROADCAST_ADDRESS_COMMAND: &str = "ip -4 addr show | grep -E 'inet .*brd' | awk '{print $4}'";

/// Pending post-reboot wait of one host
///
/// Dropping it leaves the wait running in the background.
pub struct RebootHandle {
    host_id: String,
    task: JoinHandle<Result<()>>,
}

impl RebootHandle {
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Resolves once the host is back (and its services handled) or the wait gave up
    pub async fn wait(self) -> Result<()> {
        self.task.await?
    }
}

#[derive(Clone)]
pub struct HostLifecycleController {
    gateway: Arc<dyn Gateway>,
    factory: Arc<dyn ChannelFactory>,
    waiter: ReachabilityWaiter,
    services: ServiceLifecycleController,
    events: EventLog,
    config: LifecycleConfig,
}

impl HostLifecycleController {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        factory: Arc<dyn ChannelFactory>,
        waiter: ReachabilityWaiter,
        config: LifecycleConfig,
    ) -> Self {
        let services = ServiceLifecycleController::new(Arc::clone(&gateway), Arc::clone(&factory));
        let events = EventLog::new(Arc::clone(&gateway));
        Self {
            gateway,
            factory,
            waiter,
            services,
            events,
            config,
        }
    }

    pub fn services(&self) -> &ServiceLifecycleController {
        &self.services
    }

    /// Wakes the host with a magic packet and records it ONLINE
    pub async fn start(&self, host: &Host) -> Result<()> {
        let target = host
            .wake_target()
            .ok_or_else(|| WardenError::MissingWakeTarget(host.name.clone()))?;
        wol::send_magic_packet(&target, self.config.wol_port).await?;
        self.set_status(&host.id, HostStatus::Online).await?;
        info!("{} woken up", host.name);
        Ok(())
    }

    /// `sudo shutdown now`, then OFFLINE with every service STOPPED
    pub async fn stop(&self, host: &Host) -> Result<()> {
        self.ensure_remote(host, "stop")?;
        let mut channel = self.factory.open(host).await?;
        let outcome = channel.execute(SHUTDOWN_COMMAND).await;
        close_quietly(channel.as_mut()).await;
        outcome?;

        self.set_status(&host.id, HostStatus::Offline).await?;
        for service in &host.services {
            if let Err(e) = self.services.mark_stopped(&host.id, &service.id).await {
                warn!("could not mark {} stopped after shutdown: {}", service.name, e);
            }
        }
        info!("{} shut down", host.name);
        Ok(())
    }

    /// `sudo reboot`, then REBOOTING with every service REBOOTING while the waiter polls.
    /// Once the command went through, the waiter is always started.
    pub async fn reboot(&self, host: &Host) -> Result<RebootHandle> {
        self.ensure_remote(host, "reboot")?;
        let mut channel = self.factory.open(host).await?;
        let outcome = channel.execute(REBOOT_COMMAND).await;
        close_quietly(channel.as_mut()).await;
        outcome?;

        // the host is going down either way, the waiter must run to settle its status
        if let Err(e) = self.set_status(&host.id, HostStatus::Rebooting).await {
            error!("could not record {} as rebooting: {}", host.name, e);
        }
        for service in &host.services {
            if let Err(e) = self.services.mark_rebooting(&host.id, &service.id).await {
                warn!("could not mark {} rebooting: {}", service.name, e);
            }
        }
        info!("{} rebooting, waiting for {}", host.name, host.address);

        let controller = self.clone();
        let host_id = host.id.clone();
        let address = host.address.clone();
        let task = self.waiter.spawn(host.address.clone(), move |outcome| async move {
            controller.after_reboot(&host_id, &address, outcome).await
        });

        Ok(RebootHandle {
            host_id: host.id.clone(),
            task,
        })
    }

    /// Reads the MAC and broadcast addresses of the host over one session and stores them
    pub async fn capture_wake_target(&self, host: &Host) -> Result<WakeTarget> {
        self.ensure_remote(host, "wake target capture")?;
        let mut channel = self.factory.open(host).await?;
        let mac_address = channel.execute(MAC_ADDRESS_COMMAND).await;
        let broadcast_ip = match &mac_address {
            Ok(_) => channel.execute(BROADCAST_ADDRESS_COMMAND).await,
            Err(_) => Ok(String::new()),
        };
        close_quietly(channel.as_mut()).await;

        let target = WakeTarget {
            mac_address: mac_address?,
            broadcast_ip: broadcast_ip?,
        };
        wol::parse_mac(&target.mac_address)?;
        self.gateway.update_host_wake_target(&host.id, &target).await?;
        info!("{} wake target: {} via {}", host.name, target.mac_address, target.broadcast_ip);
        Ok(target)
    }

    async fn after_reboot(&self, host_id: &str, address: &str, outcome: Result<()>) -> Result<()> {
        if let Err(e) = outcome {
            error!("{} did not come back: {}", address, e);
            self.events.host_reboot_failed(host_id, address).await?;
            if self.config.exhaustion_policy == ExhaustionPolicy::RevertOnline {
                self.set_status(host_id, HostStatus::Online).await?;
            }
            return Err(e);
        }

        self.gateway.update_host_status(host_id, HostStatus::Online).await?;
        self.events.host_restarted(host_id).await?;

        let host = self
            .gateway
            .get_host_by_id(host_id)
            .await?
            .ok_or_else(|| WardenError::NotFound(format!("host {}", host_id)))?;

        for service in &host.services {
            if !service.configuration.auto_run_after_host_reboot {
                self.services.mark_stopped(host_id, &service.id).await?;
                continue;
            }
            if let Err(e) = self.services.start_after_host_reboot(&host, service).await {
                warn!("auto-run of {} after reboot failed: {}", service.name, e);
                self.services.mark_stopped(host_id, &service.id).await?;
            }
        }
        info!("{} restarted", host.name);
        Ok(())
    }

    async fn set_status(&self, host_id: &str, status: HostStatus) -> Result<()> {
        self.gateway.update_host_status(host_id, status).await?;
        self.events.host_status_changed(host_id, status).await
    }

    fn ensure_remote(&self, host: &Host, operation: &'static str) -> Result<()> {
        match ChannelKind::for_host(host) {
            ChannelKind::Remote => Ok(()),
            ChannelKind::Local => Err(WardenError::NotSupported {
                operation,
                host: host.name.clone(),
            }),
        }
    }
}
