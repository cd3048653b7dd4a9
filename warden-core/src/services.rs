//! Service lifecycle: STOPPED <-> RUNNING <-> REBOOTING
//!
//! Every operation opens one channel for the service's host, runs its commands
//! sequentially on it and closes it before touching the persisted status.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{Result, WardenError};
use crate::events::EventLog;
use crate::execution::{normalize_output, ChannelFactory, CommandChannel, ShellRequest};
use crate::gateway::Gateway;
use crate::models::{Host, Pid, Service, ServiceStatus, NO_PID};
use crate::starter::start_service;

pub fn kill_command(pid: Pid) -> String {
    format!("kill {}", pid)
}

pub fn remove_file_command(path: &str) -> String {
    format!("rm {}", shell_words::quote(path))
}

/// `find / -type f -name "<name>" 2>/dev/null`
pub fn find_service_command(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '"' | '$' | '`' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("find / -type f -name \"{}\" 2>/dev/null", escaped)
}

/// Comma separated pids of the processes matching any of `names`
pub fn running_pids_command(names: &[&str]) -> String {
    let pattern = names.join("|");
    format!(
        "ps -ef | grep -E {} | grep -v grep | awk '{{print $2}}' | paste -sd ','",
        shell_words::quote(&pattern)
    )
}

#[derive(Clone)]
pub struct ServiceLifecycleController {
    gateway: Arc<dyn Gateway>,
    factory: Arc<dyn ChannelFactory>,
    events: EventLog,
}

impl ServiceLifecycleController {
    pub fn new(gateway: Arc<dyn Gateway>, factory: Arc<dyn ChannelFactory>) -> Self {
        let events = EventLog::new(Arc::clone(&gateway));
        Self {
            gateway,
            factory,
            events,
        }
    }

    /// Starts the service and records it RUNNING with the recovered pid
    pub async fn start(&self, host: &Host, service: &Service) -> Result<Pid> {
        self.launch(host, service, false).await
    }

    /// Same as [`start`](Self::start) but recorded as a restart, used once a rebooted host is back
    pub async fn start_after_host_reboot(&self, host: &Host, service: &Service) -> Result<Pid> {
        self.launch(host, service, true).await
    }

    async fn launch(&self, host: &Host, service: &Service, restarted: bool) -> Result<Pid> {
        let mut channel = self.factory.open(host).await?;
        let pid = start_service(channel.as_mut(), service).await;
        close_quietly(channel.as_mut()).await;

        let pid = pid?;
        if pid == NO_PID {
            warn!("{} on {} printed no pid", service.name, host.name);
            return Err(WardenError::StartFailed(service.name.clone()));
        }

        self.gateway
            .update_service_status(&service.id, ServiceStatus::Running, pid)
            .await?;
        if restarted {
            self.events.service_restarted(&service.id, pid).await?;
        } else {
            self.events.service_started(&service.id, pid).await?;
        }
        info!("{} running on {} with pid {}", service.name, host.name, pid);
        Ok(pid)
    }

    /// Kills the service process and records it STOPPED
    pub async fn stop(&self, host: &Host, service: &Service) -> Result<()> {
        if service.pid > 0 {
            let mut channel = self.factory.open(host).await?;
            let outcome = channel.execute(&kill_command(service.pid)).await;
            close_quietly(channel.as_mut()).await;
            outcome?;
        } else {
            debug!("{} has no pid, nothing to kill", service.name);
        }
        self.mark_stopped(&host.id, &service.id).await?;
        info!("{} stopped on {}", service.name, host.name);
        Ok(())
    }

    /// Stop then start on a single channel. REBOOTING is written up front and
    /// always resolved: rolled back when the stop fails, STOPPED when the start fails.
    pub async fn reboot(&self, host: &Host, service: &Service) -> Result<Pid> {
        self.mark_rebooting(&host.id, &service.id).await?;

        let mut channel = match self.factory.open(host).await {
            Ok(channel) => channel,
            Err(e) => {
                self.roll_back(service).await;
                return Err(e);
            }
        };

        if service.pid > 0 {
            if let Err(e) = channel.execute(&kill_command(service.pid)).await {
                close_quietly(channel.as_mut()).await;
                warn!("could not stop {} for reboot: {}", service.name, e);
                self.roll_back(service).await;
                return Err(e);
            }
        }

        let started = start_service(channel.as_mut(), service).await;
        close_quietly(channel.as_mut()).await;

        match started {
            Ok(pid) if pid != NO_PID => {
                self.gateway
                    .update_service_status(&service.id, ServiceStatus::Running, pid)
                    .await?;
                self.events.service_restarted(&service.id, pid).await?;
                info!("{} rebooted on {} with pid {}", service.name, host.name, pid);
                Ok(pid)
            }
            outcome => {
                error!("{} was stopped but did not come back on {}", service.name, host.name);
                if let Err(e) = self.mark_stopped(&host.id, &service.id).await {
                    error!("could not mark {} stopped: {}", service.name, e);
                }
                match outcome {
                    Err(e) => Err(e),
                    Ok(_) => Err(WardenError::StartFailed(service.name.clone())),
                }
            }
        }
    }

    /// Deletes the service record, optionally removing its file from the host first
    pub async fn remove(&self, host: &Host, service: &Service, purge_from_host: bool) -> Result<()> {
        if purge_from_host {
            let mut channel = self.factory.open(host).await?;
            let outcome = channel.execute(&remove_file_command(&service.path)).await;
            close_quietly(channel.as_mut()).await;
            outcome?;
        }
        self.gateway.delete_service(&service.id).await?;
        self.events
            .service_removed(&host.id, &service.name, purge_from_host)
            .await?;
        info!("{} removed from {} (purged: {})", service.name, host.name, purge_from_host);
        Ok(())
    }

    /// First path on the host's filesystem matching `name`
    pub async fn locate_service(&self, host: &Host, name: &str) -> Result<String> {
        let mut channel = self.factory.open(host).await?;
        let output = channel.run(ShellRequest::Command(find_service_command(name))).await;
        close_quietly(channel.as_mut()).await;
        let output = output?;

        // unreadable directories make find exit non-zero, only stderr counts here
        if !output.stderr.is_empty() {
            return Err(WardenError::Command {
                stderr: output.stderr,
                exit_status: output.exit_status,
            });
        }
        output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| WardenError::NotFound(format!("{} on {}", name, host.name)))
    }

    /// RUNNING services whose pid no longer shows up in the host's process table
    pub async fn detect_stopped_services(&self, host: &Host) -> Result<Vec<Service>> {
        let running: Vec<&Service> = host.running_services().collect();
        if running.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<&str> = running.iter().map(|s| s.name.as_str()).collect();

        let mut channel = self.factory.open(host).await?;
        let output = channel.execute(&running_pids_command(&names)).await;
        close_quietly(channel.as_mut()).await;
        let output = normalize_output(&output?);

        let alive: HashSet<&str> = output.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
        Ok(running
            .into_iter()
            .filter(|s| !alive.contains(s.pid.to_string().as_str()))
            .cloned()
            .collect())
    }

    /// Marks every silently dead service STOPPED, returns their ids
    pub async fn sync_stopped_services(&self, host: &Host) -> Result<Vec<String>> {
        let stopped = self.detect_stopped_services(host).await?;
        let mut ids = Vec::with_capacity(stopped.len());
        for service in stopped {
            warn!("{} (pid {}) is no longer running on {}", service.name, service.pid, host.name);
            self.mark_stopped(&host.id, &service.id).await?;
            ids.push(service.id);
        }
        Ok(ids)
    }

    pub async fn mark_stopped(&self, host_id: &str, service_id: &str) -> Result<()> {
        self.gateway
            .update_service_status(service_id, ServiceStatus::Stopped, NO_PID)
            .await?;
        self.events.service_stopped(host_id, service_id).await
    }

    pub async fn mark_rebooting(&self, host_id: &str, service_id: &str) -> Result<()> {
        self.gateway
            .update_service_status(service_id, ServiceStatus::Rebooting, NO_PID)
            .await?;
        self.events.service_rebooting(host_id, service_id).await
    }

    /// Restores the status and pid held before a failed reboot
    async fn roll_back(&self, service: &Service) {
        if let Err(e) = self
            .gateway
            .update_service_status(&service.id, service.status, service.pid)
            .await
        {
            error!("could not restore {} to {:?}: {}", service.name, service.status, e);
        }
    }
}

pub(crate) async fn close_quietly(channel: &mut dyn CommandChannel) {
    if let Err(e) = channel.close().await {
        debug!("channel close failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_commands() {
        assert_eq!(kill_command(4242), "kill 4242");
        assert_eq!(remove_file_command("/opt/apps/api.jar"), "rm /opt/apps/api.jar");
        assert_eq!(remove_file_command("/opt/my apps/api.jar"), "rm '/opt/my apps/api.jar'");
    }

    #[test]
    fn test_find_command_escapes_name() {
        assert_eq!(
            find_service_command("api.jar"),
            "find / -type f -name \"api.jar\" 2>/dev/null"
        );
        assert_eq!(
            find_service_command("a$b"),
            "find / -type f -name \"a\\$b\" 2>/dev/null"
        );
    }

    #[test]
    fn test_running_pids_command() {
        assert_eq!(
            running_pids_command(&["api.jar", "worker.py"]),
            "ps -ef | grep -E 'api.jar|worker.py' | grep -v grep | awk '{print $2}' | paste -sd ','"
        );
    }
}
