//! Lifecycle tuning knobs, injected into the controllers

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens to a host whose reachability wait gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Leave the host REBOOTING until an operator intervenes
    KeepRebooting,
    /// Put the host back ONLINE
    RevertOnline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Interpreter used by the local channel and the starter script
    pub shell: String,
    pub ssh_port: u16,
    pub ssh_connect_timeout_ms: u64,
    /// Per-attempt TCP connect timeout of the reachability wait
    pub probe_timeout_secs: u64,
    pub max_reachability_attempts: u32,
    /// Pause between two failed reachability attempts
    pub probe_retry_interval_ms: u64,
    pub wol_port: u16,
    pub exhaustion_policy: ExhaustionPolicy,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            ssh_port: 22,
            ssh_connect_timeout_ms: 2000,
            probe_timeout_secs: 120,
            max_reachability_attempts: 10,
            probe_retry_interval_ms: 5000,
            wol_port: 9,
            exhaustion_policy: ExhaustionPolicy::KeepRebooting,
        }
    }
}

impl LifecycleConfig {
    pub fn ssh_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.ssh_connect_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn probe_retry_interval(&self) -> Duration {
        Duration::from_millis(self.probe_retry_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LifecycleConfig::default();
        assert_eq!(config.ssh_port, 22);
        assert_eq!(config.max_reachability_attempts, 10);
        assert_eq!(config.probe_timeout(), Duration::from_secs(120));
        assert_eq!(config.exhaustion_policy, ExhaustionPolicy::KeepRebooting);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "max_reachability_attempts: 3\nexhaustion_policy: revert_online\n";
        let config: LifecycleConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_reachability_attempts, 3);
        assert_eq!(config.exhaustion_policy, ExhaustionPolicy::RevertOnline);
        assert_eq!(config.wol_port, 9);
        assert_eq!(config.shell, "bash");
    }
}
