//! Hosts, services and their event history

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Process id as reported by the target shell, `NO_PID` when nothing runs
pub type Pid = i64;

pub const NO_PID: Pid = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostStatus {
    Online,
    Offline,
    Rebooting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Stopped,
    Running,
    Rebooting,
}

impl ServiceStatus {
    pub fn is_running(&self) -> bool {
        *self == ServiceStatus::Running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostEventType {
    Online,
    Offline,
    Rebooting,
    Restarted,
    /// Reachability wait gave up, the payload names the address
    RebootFailed,
    ServiceAdded,
    /// Service record deleted, file left on the host
    ServiceRemoved,
    /// Service record deleted and file purged from the host
    ServiceDeleted,
}

impl HostEventType {
    /// Events after which the host counts as "up"
    pub fn marks_up(&self) -> bool {
        matches!(self, HostEventType::Online | HostEventType::Restarted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceEventType {
    Running,
    Stopped,
    Rebooting,
    Restarted,
}

impl ServiceEventType {
    pub fn marks_up(&self) -> bool {
        matches!(self, ServiceEventType::Running | ServiceEventType::Restarted)
    }
}

/// Immutable history record, never edited once appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<T> {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "type")]
    pub event_type: T,
    pub extra: Option<String>,
}

pub type HostEvent = Event<HostEventType>;
pub type ServiceEvent = Event<ServiceEventType>;

/// SSH login for a remote host. The password is never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredentials")
            .field("user", &self.user)
            .field("password", &"********")
            .finish()
    }
}

/// MAC + broadcast address captured from the target, used for Wake-on-LAN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeTarget {
    pub mac_address: String,
    pub broadcast_ip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfiguration {
    #[serde(default)]
    pub program_arguments: String,
    #[serde(default)]
    pub purge_nohup_out_after_reboot: bool,
    #[serde(default)]
    pub auto_run_after_host_reboot: bool,
}

impl Default for ServiceConfiguration {
    fn default() -> Self {
        Self {
            program_arguments: String::new(),
            purge_nohup_out_after_reboot: false,
            auto_run_after_host_reboot: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    /// Absolute path of the executable on its host
    pub path: String,
    pub status: ServiceStatus,
    pub pid: Pid,
    #[serde(with = "time::serde::rfc3339")]
    pub inserted_at: OffsetDateTime,
    pub configuration: ServiceConfiguration,
    #[serde(default)]
    pub events: Vec<ServiceEvent>,
}

impl Service {
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            status: ServiceStatus::Stopped,
            pid: NO_PID,
            inserted_at: OffsetDateTime::now_utc(),
            configuration: ServiceConfiguration::default(),
            events: Vec::new(),
        }
    }

    /// Path of the output file left by the starter next to the executable
    pub fn nohup_out_path(&self) -> String {
        match self.path.rfind('/') {
            Some(idx) => format!("{}/nohup.out", &self.path[..idx]),
            None => "nohup.out".to_string(),
        }
    }

    pub fn events_newest_first(&self) -> Vec<&ServiceEvent> {
        let mut events: Vec<_> = self.events.iter().collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub name: String,
    /// IP address or DNS name
    pub address: String,
    /// Present on remote hosts only
    pub ssh: Option<SshCredentials>,
    pub status: HostStatus,
    pub mac_address: Option<String>,
    pub broadcast_ip: Option<String>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub events: Vec<HostEvent>,
}

impl Host {
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            ssh: None,
            status: HostStatus::Online,
            mac_address: None,
            broadcast_ip: None,
            services: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn with_ssh(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.ssh = Some(SshCredentials {
            user: user.into(),
            password: password.into(),
        });
        self
    }

    /// Remote hosts are exactly the ones declaring SSH credentials
    pub fn is_remote(&self) -> bool {
        self.ssh.is_some()
    }

    pub fn wake_target(&self) -> Option<WakeTarget> {
        match (&self.mac_address, &self.broadcast_ip) {
            (Some(mac), Some(broadcast)) => Some(WakeTarget {
                mac_address: mac.clone(),
                broadcast_ip: broadcast.clone(),
            }),
            _ => None,
        }
    }

    pub fn service(&self, service_id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == service_id)
    }

    pub fn running_services(&self) -> impl Iterator<Item = &Service> {
        self.services.iter().filter(|s| s.status.is_running())
    }

    pub fn events_newest_first(&self) -> Vec<&HostEvent> {
        let mut events: Vec<_> = self.events.iter().collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events
    }
}
