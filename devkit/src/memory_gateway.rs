/*!
Gateway en mémoire

Implémente QueryGateway + PersistenceGateway sur une map protégée par un Mutex,
avec des accesseurs pratiques pour les assertions (statuts, historiques).
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;
use warden_core::{
    Event, Host, HostEventType, HostStatus, PersistenceGateway, Pid, QueryGateway, Result, Service,
    ServiceEventType, ServiceStatus, WakeTarget, WardenError,
};

#[derive(Default)]
pub struct InMemoryGateway {
    hosts: Mutex<HashMap<String, Host>>,
    service_updates: Mutex<UpdateBudget>,
}

#[derive(Default)]
struct UpdateBudget {
    done: usize,
    allowed: Option<usize>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Les mises à jour de statut de service échouent après `allowed` succès
    pub fn fail_service_updates_after(&self, allowed: usize) {
        let mut budget = self.service_updates.lock();
        budget.done = 0;
        budget.allowed = Some(allowed);
    }

    pub fn insert_host(&self, host: Host) {
        self.hosts.lock().insert(host.id.clone(), host);
    }

    /// Copie courante de l'hôte
    pub fn host(&self, host_id: &str) -> Option<Host> {
        self.hosts.lock().get(host_id).cloned()
    }

    pub fn service(&self, host_id: &str, service_id: &str) -> Option<Service> {
        self.host(host_id).and_then(|h| h.service(service_id).cloned())
    }

    pub fn host_status(&self, host_id: &str) -> Option<HostStatus> {
        self.host(host_id).map(|h| h.status)
    }

    /// Types des événements de l'hôte, dans l'ordre d'ajout
    pub fn host_event_types(&self, host_id: &str) -> Vec<HostEventType> {
        self.host(host_id)
            .map(|h| h.events.iter().map(|e| e.event_type).collect())
            .unwrap_or_default()
    }

    pub fn service_event_types(&self, host_id: &str, service_id: &str) -> Vec<ServiceEventType> {
        self.service(host_id, service_id)
            .map(|s| s.events.iter().map(|e| e.event_type).collect())
            .unwrap_or_default()
    }

    pub fn last_service_event(&self, host_id: &str, service_id: &str) -> Option<Event<ServiceEventType>> {
        self.service(host_id, service_id).and_then(|s| s.events.last().cloned())
    }

    pub fn last_host_event(&self, host_id: &str) -> Option<Event<HostEventType>> {
        self.host(host_id).and_then(|h| h.events.last().cloned())
    }

    fn spend_service_update(&self) -> Result<()> {
        let mut budget = self.service_updates.lock();
        if let Some(allowed) = budget.allowed {
            if budget.done >= allowed {
                return Err(WardenError::Persistence("service store unavailable".to_string()));
            }
        }
        budget.done += 1;
        Ok(())
    }

    fn with_service<T>(&self, service_id: &str, apply: impl FnOnce(&mut Service) -> T) -> Result<T> {
        let mut hosts = self.hosts.lock();
        hosts
            .values_mut()
            .flat_map(|h| h.services.iter_mut())
            .find(|s| s.id == service_id)
            .map(apply)
            .ok_or_else(|| WardenError::NotFound(format!("service {}", service_id)))
    }

    fn with_host<T>(&self, host_id: &str, apply: impl FnOnce(&mut Host) -> T) -> Result<T> {
        self.hosts
            .lock()
            .get_mut(host_id)
            .map(apply)
            .ok_or_else(|| WardenError::NotFound(format!("host {}", host_id)))
    }
}

fn event<T>(event_type: T, timestamp: OffsetDateTime, extra: Option<String>) -> Event<T> {
    Event {
        id: Uuid::new_v4().to_string(),
        timestamp,
        event_type,
        extra,
    }
}

#[async_trait]
impl QueryGateway for InMemoryGateway {
    async fn get_host_by_id(&self, host_id: &str) -> Result<Option<Host>> {
        Ok(self.host(host_id))
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn update_host_status(&self, host_id: &str, status: HostStatus) -> Result<()> {
        self.with_host(host_id, |h| h.status = status)
    }

    async fn append_host_event(
        &self,
        host_id: &str,
        event_type: HostEventType,
        timestamp: OffsetDateTime,
        extra: Option<String>,
    ) -> Result<()> {
        self.with_host(host_id, |h| h.events.push(event(event_type, timestamp, extra)))
    }

    async fn update_service_status(&self, service_id: &str, status: ServiceStatus, pid: Pid) -> Result<()> {
        self.spend_service_update()?;
        self.with_service(service_id, |s| {
            s.status = status;
            s.pid = pid;
        })
    }

    async fn append_service_event(
        &self,
        service_id: &str,
        event_type: ServiceEventType,
        timestamp: OffsetDateTime,
        extra: Option<String>,
    ) -> Result<()> {
        self.with_service(service_id, |s| s.events.push(event(event_type, timestamp, extra)))
    }

    async fn delete_service(&self, service_id: &str) -> Result<()> {
        let mut hosts = self.hosts.lock();
        for host in hosts.values_mut() {
            if let Some(idx) = host.services.iter().position(|s| s.id == service_id) {
                host.services.remove(idx);
                return Ok(());
            }
        }
        Err(WardenError::NotFound(format!("service {}", service_id)))
    }

    async fn update_host_wake_target(&self, host_id: &str, target: &WakeTarget) -> Result<()> {
        self.with_host(host_id, |h| {
            h.mac_address = Some(target.mac_address.clone());
            h.broadcast_ip = Some(target.broadcast_ip.clone());
        })
    }
}
