/**
 * WARDEN KERNEL - Point d'entrée de l'orchestrateur d'hôtes et de services
 *
 * RÔLE : Bootstrap (.env, config YAML, logging, inventaire JSON) puis exécution
 * d'une opération de cycle de vie demandée en ligne de commande.
 *
 * ARCHITECTURE : CLI clap -> contrôleurs warden-core -> InventoryStore (gateway JSON).
 * UTILITÉ : Surface opérateur minimale, les résultats sont imprimés en JSON.
 */

mod config;
mod store;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warden_core::{
    Host, HostLifecycleController, HostStatsCollector, QueryGateway, ReachabilityWaiter, Service,
    ServiceConfiguration, ShellChannelFactory,
};

use crate::store::InventoryStore;

#[derive(Parser)]
#[command(name = "warden-kernel", version, about = "Host and service lifecycle orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Host power and diagnostics
    Host {
        #[command(subcommand)]
        action: HostAction,
    },
    /// Services deployed on a host
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
}

#[derive(Subcommand)]
enum HostAction {
    /// Wake-on-LAN
    Start { host_id: String },
    Stop { host_id: String },
    /// Reboot and wait until the host answers again
    Reboot { host_id: String },
    Stats { host_id: String },
    /// Capture MAC and broadcast address for Wake-on-LAN
    Capture { host_id: String },
}

#[derive(Subcommand)]
enum ServiceAction {
    Start { host_id: String, service_id: String },
    Stop { host_id: String, service_id: String },
    Reboot { host_id: String, service_id: String },
    Remove {
        host_id: String,
        service_id: String,
        /// Also delete the executable from the host
        #[arg(long)]
        purge: bool,
    },
    /// Find the path of an executable on the host
    Locate { host_id: String, name: String },
    /// Locate an executable on the host and register it as a service
    Add {
        host_id: String,
        name: String,
        #[command(flatten)]
        options: ServiceOptions,
    },
    Edit {
        host_id: String,
        service_id: String,
        /// New executable name, located again on the host when it changes
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        options: ServiceOptions,
    },
    /// Mark services whose process disappeared as stopped
    Sync { host_id: String },
}

#[derive(Args)]
struct ServiceOptions {
    #[arg(long, default_value = "")]
    args: String,
    #[arg(long)]
    purge_nohup_out: bool,
    #[arg(long)]
    auto_run: bool,
}

impl ServiceOptions {
    fn into_configuration(self) -> ServiceConfiguration {
        ServiceConfiguration {
            program_arguments: self.args,
            purge_nohup_out_after_reboot: self.purge_nohup_out,
            auto_run_after_host_reboot: self.auto_run,
        }
    }
}

struct Kernel {
    store: Arc<InventoryStore>,
    hosts: HostLifecycleController,
    stats: HostStatsCollector,
}

impl Kernel {
    async fn host(&self, host_id: &str) -> Result<Host> {
        self.store
            .get_host_by_id(host_id)
            .await?
            .with_context(|| format!("unknown host {}", host_id))
    }

    async fn host_and_service(&self, host_id: &str, service_id: &str) -> Result<(Host, Service)> {
        let host = self.host(host_id).await?;
        let service = host
            .service(service_id)
            .cloned()
            .with_context(|| format!("unknown service {} on {}", service_id, host.name))?;
        Ok((host, service))
    }

    async fn run(&self, command: Command) -> Result<serde_json::Value> {
        match command {
            Command::Host { action } => self.run_host(action).await,
            Command::Service { action } => self.run_service(action).await,
        }
    }

    async fn run_host(&self, action: HostAction) -> Result<serde_json::Value> {
        match action {
            HostAction::Start { host_id } => {
                let host = self.host(&host_id).await?;
                self.hosts.start(&host).await?;
                done(&host_id)
            }
            HostAction::Stop { host_id } => {
                let host = self.host(&host_id).await?;
                self.hosts.stop(&host).await?;
                done(&host_id)
            }
            HostAction::Reboot { host_id } => {
                let host = self.host(&host_id).await?;
                let handle = self.hosts.reboot(&host).await?;
                info!("waiting for {} to come back", handle.host_id());
                handle.wait().await?;
                done(&host_id)
            }
            HostAction::Stats { host_id } => {
                let host = self.host(&host_id).await?;
                to_json(&self.stats.overview(&host).await?)
            }
            HostAction::Capture { host_id } => {
                let host = self.host(&host_id).await?;
                to_json(&self.hosts.capture_wake_target(&host).await?)
            }
        }
    }

    async fn run_service(&self, action: ServiceAction) -> Result<serde_json::Value> {
        let services = self.hosts.services();
        match action {
            ServiceAction::Start { host_id, service_id } => {
                let (host, service) = self.host_and_service(&host_id, &service_id).await?;
                let pid = services.start(&host, &service).await?;
                to_json(&serde_json::json!({ "service": service_id, "pid": pid }))
            }
            ServiceAction::Stop { host_id, service_id } => {
                let (host, service) = self.host_and_service(&host_id, &service_id).await?;
                services.stop(&host, &service).await?;
                done(&service_id)
            }
            ServiceAction::Reboot { host_id, service_id } => {
                let (host, service) = self.host_and_service(&host_id, &service_id).await?;
                let pid = services.reboot(&host, &service).await?;
                to_json(&serde_json::json!({ "service": service_id, "pid": pid }))
            }
            ServiceAction::Remove {
                host_id,
                service_id,
                purge,
            } => {
                let (host, service) = self.host_and_service(&host_id, &service_id).await?;
                services.remove(&host, &service, purge).await?;
                done(&service_id)
            }
            ServiceAction::Locate { host_id, name } => {
                let host = self.host(&host_id).await?;
                let path = services.locate_service(&host, &name).await?;
                to_json(&serde_json::json!({ "name": name, "path": path }))
            }
            ServiceAction::Add {
                host_id,
                name,
                options,
            } => {
                let host = self.host(&host_id).await?;
                let path = services.locate_service(&host, &name).await?;
                let service = self
                    .store
                    .store_service(&host.id, &name, &path, options.into_configuration())
                    .await?;
                to_json(&service)
            }
            ServiceAction::Edit {
                host_id,
                service_id,
                name,
                options,
            } => {
                let (host, current) = self.host_and_service(&host_id, &service_id).await?;
                let (name, path) = match name {
                    Some(name) if name != current.name => {
                        let path = services.locate_service(&host, &name).await?;
                        (name, path)
                    }
                    _ => (current.name.clone(), current.path.clone()),
                };
                let service = self
                    .store
                    .edit_service(&service_id, &name, &path, options.into_configuration())
                    .await?;
                to_json(&service)
            }
            ServiceAction::Sync { host_id } => {
                let host = self.host(&host_id).await?;
                let stopped = services.sync_stopped_services(&host).await?;
                to_json(&serde_json::json!({ "host": host_id, "stopped": stopped }))
            }
        }
    }
}

fn done(id: &str) -> Result<serde_json::Value> {
    Ok(serde_json::json!({ "id": id, "ok": true }))
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).context("serializing result")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden_core=info,warden_kernel=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cfg = config::load_config().await?;
    warn!("SSH host keys are NOT verified: the first key presented by a host is trusted");

    let store = Arc::new(
        InventoryStore::open(&cfg.inventory)
            .await
            .with_context(|| format!("loading inventory {}", cfg.inventory.display()))?,
    );
    info!("inventory loaded from {}", cfg.inventory.display());

    let factory = Arc::new(ShellChannelFactory::new(cfg.lifecycle.clone()));
    let waiter = ReachabilityWaiter::tcp(cfg.lifecycle.clone());
    let hosts = HostLifecycleController::new(store.clone(), factory.clone(), waiter, cfg.lifecycle.clone());
    let stats = HostStatsCollector::new(factory);

    let kernel = Kernel { store, hosts, stats };
    let result = kernel.run(cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
