//! Persistence & query gateways consumed by the controllers
//!
//! The core never talks to a database directly: status updates, event appends and
//! host lookups go through these two traits. The kernel backs them with a JSON
//! inventory, the devkit with an in-memory map.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::Result;
use crate::models::{Host, HostEventType, HostStatus, Pid, ServiceEventType, ServiceStatus, WakeTarget};

/// Read side: supplies host records (with their services and events)
#[async_trait]
pub trait QueryGateway: Send + Sync {
    async fn get_host_by_id(&self, host_id: &str) -> Result<Option<Host>>;
}

/// Write side: status transitions and append-only event history
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn update_host_status(&self, host_id: &str, status: HostStatus) -> Result<()>;

    async fn append_host_event(
        &self,
        host_id: &str,
        event_type: HostEventType,
        timestamp: OffsetDateTime,
        extra: Option<String>,
    ) -> Result<()>;

    async fn update_service_status(&self, service_id: &str, status: ServiceStatus, pid: Pid) -> Result<()>;

    async fn append_service_event(
        &self,
        service_id: &str,
        event_type: ServiceEventType,
        timestamp: OffsetDateTime,
        extra: Option<String>,
    ) -> Result<()>;

    /// Deletes the service with its configuration and events
    async fn delete_service(&self, service_id: &str) -> Result<()>;

    async fn update_host_wake_target(&self, host_id: &str, target: &WakeTarget) -> Result<()>;
}

/// Both sides at once, what the controllers actually hold
pub trait Gateway: QueryGateway + PersistenceGateway {}

impl<T: QueryGateway + PersistenceGateway> Gateway for T {}
