//! Append-only event history for hosts and services
//!
//! Every lifecycle transition ends up here. "Down" transitions (offline, rebooting,
//! stopped) carry as payload the number of whole days the owner had been up, counted
//! from its most recent "up" event.

use std::sync::Arc;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::Result;
use crate::gateway::Gateway;
use crate::models::{Event, HostEventType, HostStatus, Pid, ServiceEventType};

/// Whole days between the newest "up" event and `now`, 0 without any
pub fn days_since_last_up<T>(events: &[Event<T>], marks_up: impl Fn(&T) -> bool, now: OffsetDateTime) -> i64 {
    events
        .iter()
        .filter(|e| marks_up(&e.event_type))
        .map(|e| e.timestamp)
        .max()
        .map(|last_up| (now - last_up).whole_days().max(0))
        .unwrap_or(0)
}

#[derive(Clone)]
pub struct EventLog {
    gateway: Arc<dyn Gateway>,
}

impl EventLog {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    pub async fn host_status_changed(&self, host_id: &str, status: HostStatus) -> Result<()> {
        let (event_type, extra) = match status {
            HostStatus::Online => (HostEventType::Online, None),
            HostStatus::Offline => (HostEventType::Offline, Some(self.host_up_days(host_id).await?)),
            HostStatus::Rebooting => (HostEventType::Rebooting, Some(self.host_up_days(host_id).await?)),
        };
        self.host_event(host_id, event_type, extra.map(|d| d.to_string())).await
    }

    pub async fn host_restarted(&self, host_id: &str) -> Result<()> {
        self.host_event(host_id, HostEventType::Restarted, None).await
    }

    pub async fn host_reboot_failed(&self, host_id: &str, address: &str) -> Result<()> {
        self.host_event(host_id, HostEventType::RebootFailed, Some(address.to_string()))
            .await
    }

    pub async fn service_removed(&self, host_id: &str, service_name: &str, purged_from_host: bool) -> Result<()> {
        let event_type = if purged_from_host {
            HostEventType::ServiceDeleted
        } else {
            HostEventType::ServiceRemoved
        };
        self.host_event(host_id, event_type, Some(service_name.to_string())).await
    }

    pub async fn service_started(&self, service_id: &str, pid: Pid) -> Result<()> {
        self.service_event(service_id, ServiceEventType::Running, Some(pid.to_string()))
            .await
    }

    pub async fn service_restarted(&self, service_id: &str, pid: Pid) -> Result<()> {
        self.service_event(service_id, ServiceEventType::Restarted, Some(pid.to_string()))
            .await
    }

    pub async fn service_stopped(&self, host_id: &str, service_id: &str) -> Result<()> {
        let days = self.service_up_days(host_id, service_id).await?;
        self.service_event(service_id, ServiceEventType::Stopped, Some(days.to_string()))
            .await
    }

    pub async fn service_rebooting(&self, host_id: &str, service_id: &str) -> Result<()> {
        let days = self.service_up_days(host_id, service_id).await?;
        self.service_event(service_id, ServiceEventType::Rebooting, Some(days.to_string()))
            .await
    }

    async fn host_up_days(&self, host_id: &str) -> Result<i64> {
        let now = OffsetDateTime::now_utc();
        Ok(match self.gateway.get_host_by_id(host_id).await? {
            Some(host) => days_since_last_up(&host.events, HostEventType::marks_up, now),
            None => 0,
        })
    }

    async fn service_up_days(&self, host_id: &str, service_id: &str) -> Result<i64> {
        let now = OffsetDateTime::now_utc();
        let host = self.gateway.get_host_by_id(host_id).await?;
        Ok(host
            .as_ref()
            .and_then(|h| h.service(service_id))
            .map(|s| days_since_last_up(&s.events, ServiceEventType::marks_up, now))
            .unwrap_or(0))
    }

    async fn host_event(&self, host_id: &str, event_type: HostEventType, extra: Option<String>) -> Result<()> {
        debug!("host {} event {:?} ({:?})", host_id, event_type, extra);
        self.gateway
            .append_host_event(host_id, event_type, OffsetDateTime::now_utc(), extra)
            .await
    }

    async fn service_event(&self, service_id: &str, event_type: ServiceEventType, extra: Option<String>) -> Result<()> {
        debug!("service {} event {:?} ({:?})", service_id, event_type, extra);
        self.gateway
            .append_service_event(service_id, event_type, OffsetDateTime::now_utc(), extra)
            .await
    }
}
