// ! Configuration management
// !
// ! Module handles the YAML configuration of the plugin manager: the plugins
// ! directory, directory scanning, automatic updates and the ignore list.

use crate::core::error::{PlugError, PlugResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default remote version feed
pub const DEFAULT_API_BASE: &str = "https://download.geysermc.org/v2/projects";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PlugConfig {
    /// Directory holding plugin archives
    pub plugins_dir: PathBuf,

    /// Remote version polling and installation
    pub auto_update: AutoUpdateConfig,

    /// Load archives that appear in the plugins directory
    pub auto_load: ScanConfig,

    /// Unload modules whose archive disappeared
    pub auto_unload: ScanConfig,

    /// Reload modules whose archive changed
    pub auto_reload: ScanConfig,

    /// Modules exempt from automated actions and destructive commands
    pub ignored_plugins: Vec<String>,

    /// Log each broken command segment removed during unload
    pub notify_on_broken_command_removal: bool,

    /// Marketplace resource map (`Resources:` section)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources_file: Option<PathBuf>,
}

impl Default for PlugConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("plugins"),
            auto_update: AutoUpdateConfig::default(),
            auto_load: ScanConfig::default(),
            auto_unload: ScanConfig::default(),
            auto_reload: ScanConfig::default(),
            ignored_plugins: Vec::new(),
            notify_on_broken_command_removal: true,
            resources_file: None,
        }
    }
}

/// Interval settings of one watcher behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScanConfig {
    pub enabled: bool,
    pub check_every_seconds: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_every_seconds: 10,
        }
    }
}

impl ScanConfig {
    pub fn every(seconds: u64) -> Self {
        Self {
            enabled: true,
            check_every_seconds: seconds,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_every_seconds.max(1))
    }
}

/// Automatic update settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AutoUpdateConfig {
    pub enabled: bool,

    /// Module names to monitor
    pub plugins: Vec<String>,

    /// Tell `modswap.admin` holders about updates
    pub notify_admins: bool,

    /// Download and swap in updates
    pub auto_install: bool,

    /// Stage a restart after installing
    pub auto_restart: bool,

    /// Seconds between the restart announcement and the restart
    pub restart_delay: u64,

    /// Minutes between update cycles
    pub check_interval: u64,

    pub api_base: String,

    /// Download platform segment, e.g. `spigot`
    pub platform: String,

    /// Extra module name to upstream project mappings
    pub projects: HashMap<String, String>,
}

impl Default for AutoUpdateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            plugins: Vec::new(),
            notify_admins: true,
            auto_install: true,
            auto_restart: true,
            restart_delay: 60,
            check_interval: 60,
            api_base: DEFAULT_API_BASE.to_string(),
            platform: "spigot".to_string(),
            projects: HashMap::new(),
        }
    }
}

impl AutoUpdateConfig {
    pub fn check_period(&self) -> Duration {
        Duration::from_secs(self.check_interval.max(1) * 60)
    }
}

impl PlugConfig {
    /// Parse configuration from YAML
    pub fn from_yaml_str(source: &str) -> PlugResult<Self> {
        let config: PlugConfig = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub async fn from_file(path: impl AsRef<Path>) -> PlugResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PlugError::config(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&content)
    }

    /// Save configuration to a YAML file
    pub async fn to_file(&self, path: impl AsRef<Path>) -> PlugResult<()> {
        let content = serde_yaml::to_string(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    fn validate(&self) -> PlugResult<()> {
        if self.plugins_dir.as_os_str().is_empty() {
            return Err(PlugError::config("plugins-dir must not be empty"));
        }
        if self.auto_update.enabled {
            url::Url::parse(&self.auto_update.api_base)?;
            if self.auto_update.platform.trim().is_empty() {
                return Err(PlugError::config("auto-update.platform must not be empty"));
            }
        }
        Ok(())
    }

    /// Whether any watcher behavior is on
    pub fn watching(&self) -> bool {
        self.auto_load.enabled || self.auto_unload.enabled || self.auto_reload.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = PlugConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, PlugConfig::default());
        assert!(config.auto_update.enabled);
        assert_eq!(config.auto_update.restart_delay, 60);
        assert_eq!(config.auto_load.check_every_seconds, 10);
        assert!(!config.watching());
        assert!(config.notify_on_broken_command_removal);
    }

    #[test]
    fn test_kebab_case_keys() {
        let yaml = r#"
plugins-dir: /srv/host/plugins
auto-update:
  plugins: [Geyser-Spigot, floodgate]
  restart-delay: 40
  check-interval: 30
  projects:
    ViaVersion: viaversion
auto-reload:
  enabled: true
  check-every-seconds: 5
ignored-plugins: [Essentials]
notify-on-broken-command-removal: false
"#;
        let config = PlugConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.plugins_dir, PathBuf::from("/srv/host/plugins"));
        assert_eq!(config.auto_update.plugins, vec!["Geyser-Spigot", "floodgate"]);
        assert_eq!(config.auto_update.restart_delay, 40);
        assert_eq!(config.auto_update.check_period(), Duration::from_secs(1800));
        assert_eq!(config.auto_update.projects["ViaVersion"], "viaversion");
        assert_eq!(config.auto_reload, ScanConfig::every(5));
        assert!(!config.auto_load.enabled);
        assert_eq!(config.ignored_plugins, vec!["Essentials"]);
        assert!(!config.notify_on_broken_command_removal);
    }

    #[test]
    fn test_invalid_api_base() {
        let err = PlugConfig::from_yaml_str("auto-update:\n  api-base: not a url\n").unwrap_err();
        assert!(matches!(err, PlugError::Config(_)));

        // Ignored while updates are off
        assert!(
            PlugConfig::from_yaml_str("auto-update:\n  enabled: false\n  api-base: nope\n").is_ok()
        );
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        let mut config = PlugConfig::default();
        config.ignored_plugins.push("Essentials".into());
        config.auto_unload = ScanConfig::every(30);

        config.to_file(&path).await.unwrap();
        assert_eq!(PlugConfig::from_file(&path).await.unwrap(), config);

        let err = PlugConfig::from_file(dir.path().join("missing.yml")).await.unwrap_err();
        assert!(err.to_string().contains("missing.yml"));
    }
}
