/**
 * INVENTORY STORE - Persistance JSON des hôtes, services et historiques
 *
 * RÔLE : Implémente QueryGateway + PersistenceGateway de warden-core sur un fichier JSON.
 * Chaque écriture est immédiatement sauvegardée sur disque.
 *
 * ARCHITECTURE : Inventaire en mémoire (RwLock tokio) + fichier `inventory.json` éditable à la main.
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;
use warden_core::{
    Event, Host, HostEventType, HostStatus, PersistenceGateway, Pid, QueryGateway, Result, Service,
    ServiceConfiguration, ServiceEventType, ServiceStatus, WakeTarget, WardenError, NO_PID,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub hosts: Vec<Host>,
}

impl Inventory {
    fn host_mut(&mut self, host_id: &str) -> Result<&mut Host> {
        self.hosts
            .iter_mut()
            .find(|h| h.id == host_id)
            .ok_or_else(|| WardenError::NotFound(format!("host {}", host_id)))
    }

    fn service_mut(&mut self, service_id: &str) -> Result<&mut Service> {
        self.hosts
            .iter_mut()
            .flat_map(|h| h.services.iter_mut())
            .find(|s| s.id == service_id)
            .ok_or_else(|| WardenError::NotFound(format!("service {}", service_id)))
    }
}

pub struct InventoryStore {
    inventory: RwLock<Inventory>,
    data_file: PathBuf,
}

impl InventoryStore {
    /// Charge l'inventaire, un fichier absent donne un inventaire vide
    pub async fn open(data_file: impl AsRef<Path>) -> Result<Self> {
        let data_file = data_file.as_ref().to_path_buf();
        let inventory = if data_file.exists() {
            let content = tokio::fs::read_to_string(&data_file).await?;
            serde_json::from_str(&content).map_err(|e| WardenError::Persistence(e.to_string()))?
        } else {
            info!("no inventory at {}, starting empty", data_file.display());
            Inventory::default()
        };
        Ok(Self {
            inventory: RwLock::new(inventory),
            data_file,
        })
    }

    /// Nouveau service STOPPED, pid -1, + événement SERVICE_ADDED sur l'hôte
    pub async fn store_service(
        &self,
        host_id: &str,
        name: &str,
        path: &str,
        configuration: ServiceConfiguration,
    ) -> Result<Service> {
        let mut service = Service::new(Uuid::new_v4().to_string(), name, path);
        service.configuration = configuration;

        let mut inventory = self.inventory.write().await;
        let host = inventory.host_mut(host_id)?;
        host.services.push(service.clone());
        host.events.push(new_event(HostEventType::ServiceAdded, Some(name.to_string())));
        self.save(&inventory).await?;

        info!("service {} stored on {}", name, host_id);
        Ok(service)
    }

    /// Met à jour nom, chemin et configuration, statut et historique restent intacts
    pub async fn edit_service(
        &self,
        service_id: &str,
        name: &str,
        path: &str,
        configuration: ServiceConfiguration,
    ) -> Result<Service> {
        let mut inventory = self.inventory.write().await;
        let service = inventory.service_mut(service_id)?;
        service.name = name.to_string();
        service.path = path.to_string();
        service.configuration = configuration;
        let edited = service.clone();
        self.save(&inventory).await?;
        Ok(edited)
    }

    async fn save(&self, inventory: &Inventory) -> Result<()> {
        if let Some(parent) = self.data_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content =
            serde_json::to_string_pretty(inventory).map_err(|e| WardenError::Persistence(e.to_string()))?;
        tokio::fs::write(&self.data_file, content).await?;
        debug!("inventory saved to {}", self.data_file.display());
        Ok(())
    }

    async fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Inventory) -> Result<()> + Send,
    {
        let mut inventory = self.inventory.write().await;
        apply(&mut inventory)?;
        self.save(&inventory).await
    }
}

fn new_event<T>(event_type: T, extra: Option<String>) -> Event<T> {
    Event {
        id: Uuid::new_v4().to_string(),
        timestamp: OffsetDateTime::now_utc(),
        event_type,
        extra,
    }
}

#[async_trait]
impl QueryGateway for InventoryStore {
    async fn get_host_by_id(&self, host_id: &str) -> Result<Option<Host>> {
        Ok(self.inventory.read().await.hosts.iter().find(|h| h.id == host_id).cloned())
    }
}

#[async_trait]
impl PersistenceGateway for InventoryStore {
    async fn update_host_status(&self, host_id: &str, status: HostStatus) -> Result<()> {
        self.update(|inv| {
            inv.host_mut(host_id)?.status = status;
            Ok(())
        })
        .await
    }

    async fn append_host_event(
        &self,
        host_id: &str,
        event_type: HostEventType,
        timestamp: OffsetDateTime,
        extra: Option<String>,
    ) -> Result<()> {
        self.update(|inv| {
            let mut event = new_event(event_type, extra);
            event.timestamp = timestamp;
            inv.host_mut(host_id)?.events.push(event);
            Ok(())
        })
        .await
    }

    async fn update_service_status(&self, service_id: &str, status: ServiceStatus, pid: Pid) -> Result<()> {
        self.update(|inv| {
            let service = inv.service_mut(service_id)?;
            service.status = status;
            service.pid = if status.is_running() { pid } else { NO_PID };
            Ok(())
        })
        .await
    }

    async fn append_service_event(
        &self,
        service_id: &str,
        event_type: ServiceEventType,
        timestamp: OffsetDateTime,
        extra: Option<String>,
    ) -> Result<()> {
        self.update(|inv| {
            let mut event = new_event(event_type, extra);
            event.timestamp = timestamp;
            inv.service_mut(service_id)?.events.push(event);
            Ok(())
        })
        .await
    }

    async fn delete_service(&self, service_id: &str) -> Result<()> {
        self.update(|inv| {
            let before: usize = inv.hosts.iter().map(|h| h.services.len()).sum();
            for host in inv.hosts.iter_mut() {
                host.services.retain(|s| s.id != service_id);
            }
            let after: usize = inv.hosts.iter().map(|h| h.services.len()).sum();
            if before == after {
                return Err(WardenError::NotFound(format!("service {}", service_id)));
            }
            Ok(())
        })
        .await
    }

    async fn update_host_wake_target(&self, host_id: &str, target: &WakeTarget) -> Result<()> {
        self.update(|inv| {
            let host = inv.host_mut(host_id)?;
            host.mac_address = Some(target.mac_address.clone());
            host.broadcast_ip = Some(target.broadcast_ip.clone());
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store_with_host() -> (TempDir, InventoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        let inventory = Inventory {
            hosts: vec![Host::new("h1", "nas", "192.168.1.20").with_ssh("admin", "pw")],
        };
        std::fs::write(&path, serde_json::to_string(&inventory).unwrap()).unwrap();
        let store = InventoryStore::open(&path).await.unwrap();
        (dir, store)
    }

    fn configuration() -> ServiceConfiguration {
        ServiceConfiguration {
            program_arguments: "--port 8080".to_string(),
            purge_nohup_out_after_reboot: true,
            auto_run_after_host_reboot: false,
        }
    }

    #[tokio::test]
    async fn test_store_service_starts_stopped() {
        let (_dir, store) = store_with_host().await;
        let service = store
            .store_service("h1", "api.jar", "/opt/apps/api.jar", configuration())
            .await
            .unwrap();
        assert_eq!(service.status, ServiceStatus::Stopped);
        assert_eq!(service.pid, NO_PID);

        let host = store.get_host_by_id("h1").await.unwrap().unwrap();
        assert_eq!(host.services.len(), 1);
        assert_eq!(host.events[0].event_type, HostEventType::ServiceAdded);
        assert_eq!(host.events[0].extra.as_deref(), Some("api.jar"));
    }

    #[tokio::test]
    async fn test_edit_with_same_values_is_a_no_op() {
        let (_dir, store) = store_with_host().await;
        let stored = store
            .store_service("h1", "api.jar", "/opt/apps/api.jar", configuration())
            .await
            .unwrap();
        let before = serde_json::to_value(&stored).unwrap();

        store
            .edit_service(&stored.id, "api.jar", "/opt/apps/api.jar", configuration())
            .await
            .unwrap();

        let host = store.get_host_by_id("h1").await.unwrap().unwrap();
        let after = serde_json::to_value(host.service(&stored.id).unwrap()).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_changes_survive_reopen() {
        let (dir, store) = store_with_host().await;
        let service = store
            .store_service("h1", "api.jar", "/opt/apps/api.jar", configuration())
            .await
            .unwrap();
        store
            .update_service_status(&service.id, ServiceStatus::Running, 4242)
            .await
            .unwrap();
        store.update_host_status("h1", HostStatus::Rebooting).await.unwrap();

        let reopened = InventoryStore::open(dir.path().join("inventory.json")).await.unwrap();
        let host = reopened.get_host_by_id("h1").await.unwrap().unwrap();
        assert_eq!(host.status, HostStatus::Rebooting);
        assert_eq!(host.service(&service.id).unwrap().pid, 4242);
    }

    #[tokio::test]
    async fn test_pid_is_reset_off_running() {
        let (_dir, store) = store_with_host().await;
        let service = store
            .store_service("h1", "api.jar", "/opt/apps/api.jar", configuration())
            .await
            .unwrap();
        store
            .update_service_status(&service.id, ServiceStatus::Stopped, 4242)
            .await
            .unwrap();
        let host = store.get_host_by_id("h1").await.unwrap().unwrap();
        assert_eq!(host.service(&service.id).unwrap().pid, NO_PID);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let (_dir, store) = store_with_host().await;
        assert!(matches!(
            store.update_host_status("nope", HostStatus::Online).await,
            Err(WardenError::NotFound(_))
        ));
        assert!(matches!(store.delete_service("nope").await, Err(WardenError::NotFound(_))));
    }
}
