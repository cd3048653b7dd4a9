/*!
Fixtures: hôtes et services prêts à l'emploi pour les tests
*/

use time::{Duration, OffsetDateTime};
use uuid::Uuid;
use warden_core::{Event, Host, Pid, Service, ServiceStatus};

pub const REMOTE_ADDRESS: &str = "192.168.1.20";

/// Hôte distant ONLINE avec identifiants SSH et cible WoL
pub fn remote_host(id: &str) -> Host {
    let mut host = Host::new(id, format!("{}-nas", id), REMOTE_ADDRESS).with_ssh("admin", "s3cret");
    host.mac_address = Some("aa:bb:cc:dd:ee:ff".to_string());
    host.broadcast_ip = Some("127.0.0.1".to_string());
    host
}

/// Hôte local, sans identifiants SSH
pub fn local_host(id: &str) -> Host {
    Host::new(id, format!("{}-local", id), "127.0.0.1")
}

pub fn stopped_service(id: &str, name: &str) -> Service {
    Service::new(id, name, format!("/opt/apps/{}", name))
}

pub fn running_service(id: &str, name: &str, pid: Pid) -> Service {
    let mut service = stopped_service(id, name);
    service.status = ServiceStatus::Running;
    service.pid = pid;
    service
}

/// Événement daté de `days_ago` jours
pub fn event_days_ago<T>(event_type: T, days_ago: i64) -> Event<T> {
    Event {
        id: Uuid::new_v4().to_string(),
        timestamp: OffsetDateTime::now_utc() - Duration::days(days_ago),
        event_type,
        extra: None,
    }
}
