/**
 * CONFIG KERNEL - Chargement de la configuration YAML du kernel Warden
 *
 * RÔLE : Chemin de l'inventaire JSON + paramètres du cycle de vie (SSH, WoL, attente reboot).
 * Fichier désigné par WARDEN_KERNEL_CONFIG (défaut : warden.yaml).
 *
 * UTILITÉ : Config injectée explicitement dans les contrôleurs, aucun singleton global.
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;
use warden_core::LifecycleConfig;

pub const CONFIG_ENV: &str = "WARDEN_KERNEL_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "warden.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub inventory: PathBuf,
    pub lifecycle: LifecycleConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            inventory: PathBuf::from("./data/inventory.json"),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

/// Lit le chemin depuis l'environnement puis charge le fichier
pub async fn load_config() -> Result<KernelConfig> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    load_config_from(Path::new(&path)).await
}

/// Fichier absent ou vide => défauts (avec warning), YAML invalide => erreur
pub async fn load_config_from(path: &Path) -> Result<KernelConfig> {
    if !path.exists() {
        warn!("no {}, using default configuration", path.display());
        return Ok(KernelConfig::default());
    }
    let txt = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    if txt.trim().is_empty() {
        warn!("{} is empty, using default configuration", path.display());
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(&txt).with_context(|| format!("invalid configuration in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::ExhaustionPolicy;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("nope.yaml")).await.unwrap();
        assert_eq!(config.inventory, PathBuf::from("./data/inventory.json"));
        assert_eq!(config.lifecycle.ssh_port, 22);
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.yaml");
        std::fs::write(
            &path,
            "inventory: /srv/warden/inventory.json\nlifecycle:\n  max_reachability_attempts: 3\n  exhaustion_policy: revert_online\n",
        )
        .unwrap();

        let config = load_config_from(&path).await.unwrap();
        assert_eq!(config.inventory, PathBuf::from("/srv/warden/inventory.json"));
        assert_eq!(config.lifecycle.max_reachability_attempts, 3);
        assert_eq!(config.lifecycle.exhaustion_policy, ExhaustionPolicy::RevertOnline);
        assert_eq!(config.lifecycle.wol_port, 9);
    }

    #[tokio::test]
    async fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.yaml");
        std::fs::write(&path, "lifecycle: [not, a, map]\n").unwrap();
        assert!(load_config_from(&path).await.is_err());
    }
}
