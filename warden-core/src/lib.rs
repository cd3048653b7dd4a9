//! Warden core: command execution and lifecycle orchestration for hosts and services
//!
//! Controllers acquire a [`CommandChannel`] per operation (local shell or SSH),
//! run the target-side commands, then report status changes and events through
//! the [`Gateway`] they were built with.

pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod gateway;
pub mod hosts;
pub mod models;
pub mod reachability;
pub mod services;
pub mod session;
pub mod starter;
pub mod stats;
pub mod wol;

pub use config::{ExhaustionPolicy, LifecycleConfig};
pub use error::{Result, WardenError};
pub use events::EventLog;
pub use execution::{ChannelFactory, ChannelKind, CommandChannel, CommandOutput, ShellChannelFactory, ShellRequest};
pub use gateway::{Gateway, PersistenceGateway, QueryGateway};
pub use hosts::{HostLifecycleController, RebootHandle};
pub use models::*;
pub use reachability::{ProbeOutcome, Prober, ReachabilityWaiter, TcpProber};
pub use services::ServiceLifecycleController;
pub use session::RemoteSession;
pub use stats::{HostOverview, HostStats, HostStatsCollector, StorageKind};
