// ! Update orchestrator
// !
// ! Module polls the version feed for every monitored module, installs
// ! newer builds by swapping the archive on disk (keeping a `.old` backup)
// ! and stages a restart so the new build is picked up.

use crate::core::error::{PlugError, PlugResult};
use crate::core::logging::{ErrorContext, ErrorLogger};
use crate::core::metrics::MetricsCollector;
use crate::host::{Broadcaster, MainContext, ServerControl};
use crate::plugin::config::AutoUpdateConfig;
use crate::plugin::descriptor::{ARCHIVE_EXTENSION, list_archives};
use crate::update::catalog::UpstreamCatalog;
use crate::update::client::VersionClient;
use crate::update::restart::{self, RestartPlan};
use crate::update::version::{UpdateResult, UpdateResultType, compare};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Permission whose holders receive update notices
pub const ADMIN_PERMISSION: &str = "modswap.admin";

/// Delay before the first update cycle
pub const WARMUP: Duration = Duration::from_secs(5 * 60);

/// What the orchestrator needs to know about installed modules
#[async_trait]
pub trait InstalledModules: Send + Sync {
    async fn installed_version(&self, name: &str) -> Option<String>;

    async fn artifact_path(&self, name: &str) -> Option<PathBuf>;
}

/// Outcome of one update cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub results: Vec<(String, UpdateResult)>,
    pub installed: Vec<String>,
    pub restart: Option<RestartPlan>,
}

/// Periodic update checker
pub struct UpdateChecker {
    config: AutoUpdateConfig,
    plugins_dir: PathBuf,
    client: VersionClient,
    catalog: UpstreamCatalog,
    installed: Arc<dyn InstalledModules>,
    broadcaster: Arc<dyn Broadcaster>,
    control: Arc<dyn ServerControl>,
    main: MainContext,
    metrics: MetricsCollector,
}

impl UpdateChecker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AutoUpdateConfig,
        plugins_dir: impl Into<PathBuf>,
        client: VersionClient,
        installed: Arc<dyn InstalledModules>,
        broadcaster: Arc<dyn Broadcaster>,
        control: Arc<dyn ServerControl>,
        main: MainContext,
    ) -> Self {
        let catalog = UpstreamCatalog::new(&config.projects);
        Self {
            config,
            plugins_dir: plugins_dir.into(),
            client,
            catalog,
            installed,
            broadcaster,
            control,
            main,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_catalog(mut self, catalog: UpstreamCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &AutoUpdateConfig {
        &self.config
    }

    /// Check one module against its upstream
    pub async fn check(&self, name: &str) -> UpdateResult {
        let current = self.installed.installed_version(name).await;

        let Some(project) = self.catalog.project_for(name) else {
            return match current {
                Some(current) => UpdateResult::with_versions(
                    UpdateResultType::InvalidPlugin,
                    Some(current),
                    None,
                ),
                None => UpdateResult::new(UpdateResultType::NotInstalled),
            };
        };
        let Some(current) = current else {
            return UpdateResult::new(UpdateResultType::NotInstalled);
        };
        let Some(latest) = self.client.latest_version(project).await else {
            return UpdateResult::with_versions(UpdateResultType::CheckFailed, Some(current), None);
        };

        let kind = compare(&current, &latest);
        UpdateResult::with_versions(kind, Some(current), Some(latest))
    }

    /// Check every monitored module, install what is stale and stage a restart
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for name in &self.config.plugins {
            let result = self.check(name).await;
            self.metrics
                .record_update_check(name, result.kind.as_str())
                .await;
            debug!("Update check {}: {}", name, result.kind);

            match result.kind {
                UpdateResultType::OutOfDate => {
                    if let Err(e) = self.handle_out_of_date(name, &result).await {
                        self.log_failure(&e, name).await;
                    } else if self.config.auto_install {
                        report.installed.push(name.clone());
                    }
                }
                UpdateResultType::CheckFailed => {
                    let e = PlugError::check_failed(name, "no version from the feed");
                    self.log_failure(&e, name).await;
                }
                _ => {}
            }
            report.results.push((name.clone(), result));
        }

        if !report.installed.is_empty() && self.config.auto_restart {
            let plan = RestartPlan::new(self.config.restart_delay, report.installed.clone());
            match restart::stage(
                &plan,
                &self.main,
                self.broadcaster.clone(),
                self.control.clone(),
            ) {
                Ok(()) => report.restart = Some(plan),
                Err(e) => self.log_failure(&e, "restart").await,
            }
        }

        report
    }

    async fn handle_out_of_date(&self, name: &str, result: &UpdateResult) -> PlugResult<()> {
        let current = result.current.as_deref().unwrap_or("?");
        let latest = result.latest.as_deref().unwrap_or("?");
        info!("Update available for {}: {} -> {}", name, current, latest);

        if self.config.notify_admins {
            let mut notice = format!("Update available for {name}: {current} -> {latest}");
            if let Some(resource) = self.catalog.resource(name) {
                notice.push_str(&format!(" ({})", resource.page_url()));
            }
            self.broadcaster
                .broadcast_to_permission(ADMIN_PERMISSION, &notice);
        }

        if !self.config.auto_install {
            return Ok(());
        }

        let project = self
            .catalog
            .project_for(name)
            .ok_or_else(|| PlugError::download_failed(name, "no upstream project"))?;
        let installed = self.download_and_install(name, project).await?;
        info!("Installed {} {} into {}", name, latest, installed.display());

        if self.config.notify_admins {
            let notice = format!("{name} updated to {latest}; it takes effect after a restart");
            self.broadcaster
                .broadcast_to_permission(ADMIN_PERMISSION, &notice);
        }
        Ok(())
    }

    /// Download the latest build and swap it into place
    ///
    /// Returns the path of the replaced archive. On any failure the temp
    /// file is removed and the installed archive is untouched.
    pub async fn download_and_install(&self, name: &str, project: &str) -> PlugResult<PathBuf> {
        let temp = self
            .plugins_dir
            .join(format!("{name}-UPDATE.{ARCHIVE_EXTENSION}.tmp"));

        let outcome = async {
            self.client
                .download_to(project, &self.config.platform, &temp)
                .await?;
            let reported = self.installed.artifact_path(name).await;
            let existing = find_artifact(&self.plugins_dir, name, &self.config.platform, reported)
                .await
                .ok_or_else(|| PlugError::download_failed(name, "installed archive not found"))?;
            swap_artifact(&existing, &temp)
                .await
                .map_err(|e| PlugError::download_failed(name, e.to_string()))?;
            Ok::<_, PlugError>(existing)
        }
        .await;

        if outcome.is_err() && tokio::fs::try_exists(&temp).await.unwrap_or(false) {
            if let Err(e) = tokio::fs::remove_file(&temp).await {
                warn!("Could not delete {}: {}", temp.display(), e);
            }
        }
        outcome
    }

    /// Run cycles forever: first after [`WARMUP`], then every check interval
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            "Auto-update enabled for {} plugins, checking every {} minutes",
            self.config.plugins.len(),
            self.config.check_interval
        );
        if self.config.auto_restart {
            info!("Auto-restart is enabled; the server restarts automatically after updates");
        }

        tokio::spawn(async move {
            tokio::time::sleep(WARMUP).await;
            let mut interval = tokio::time::interval(self.config.check_period());
            loop {
                interval.tick().await;
                let report = self.run_cycle().await;
                debug!(
                    "Update cycle finished: {} checked, {} installed",
                    report.results.len(),
                    report.installed.len()
                );
            }
        })
    }

    async fn log_failure(&self, error: &PlugError, name: &str) {
        ErrorLogger::log_error(
            error,
            &ErrorContext::new("update")
                .with_module(name)
                .with_component("updater"),
        );
        self.metrics.record_error(error, "update").await;
    }
}

/// Replace `existing` with `temp`, keeping the previous archive as `<file>.old`
pub async fn swap_artifact(existing: &Path, temp: &Path) -> PlugResult<()> {
    swap_with(existing, temp, |from, to| tokio::fs::rename(from, to)).await
}

async fn swap_with<F, Fut>(existing: &Path, temp: &Path, rename: F) -> PlugResult<()>
where
    F: Fn(PathBuf, PathBuf) -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let mut backup = existing.as_os_str().to_owned();
    backup.push(".old");
    let backup = PathBuf::from(backup);

    if tokio::fs::try_exists(&backup).await? {
        tokio::fs::remove_file(&backup).await?;
    }
    rename(existing.to_path_buf(), backup.clone()).await?;

    let Err(install) = rename(temp.to_path_buf(), existing.to_path_buf()).await else {
        return Ok(());
    };
    warn!("Installing {} failed, restoring backup", existing.display());
    match rename(backup.clone(), existing.to_path_buf()).await {
        Ok(()) => Err(install.into()),
        Err(restore) => {
            let error = PlugError::Io(format!(
                "{install}; restoring {} from {} also failed: {restore}",
                existing.display(),
                backup.display()
            ));
            ErrorLogger::log_error(
                &error,
                &ErrorContext::new("swap")
                    .with_component("updater")
                    .with_extra("archive", existing.display().to_string())
                    .with_extra("backup", backup.display().to_string()),
            );
            Err(error)
        }
    }
}

/// Locate the installed archive of `name`
///
/// Tries the path the host reports, then `<name>.zip`, `<name>-<Platform>.zip`,
/// `<lowercase>.zip` and `<name without dashes>.zip`, then any archive whose
/// file name contains the module name.
pub async fn find_artifact(
    dir: &Path,
    name: &str,
    platform: &str,
    reported: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(path) = reported {
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }
    }

    let candidates = [
        format!("{name}.{ARCHIVE_EXTENSION}"),
        format!("{name}-{}.{ARCHIVE_EXTENSION}", capitalize(platform)),
        format!("{}.{ARCHIVE_EXTENSION}", name.to_lowercase()),
        format!("{}.{ARCHIVE_EXTENSION}", name.replace('-', "")),
    ];
    for candidate in candidates {
        let path = dir.join(candidate);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Some(path);
        }
    }

    let dir = dir.to_path_buf();
    let needle = name.to_lowercase();
    tokio::task::spawn_blocking(move || {
        list_archives(&dir).ok()?.into_iter().find(|path| {
            path.file_name()
                .map(|f| f.to_string_lossy().to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
    })
    .await
    .ok()
    .flatten()
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_swap_keeps_single_backup() {
        let dir = TempDir::new().unwrap();
        let existing = dir.path().join("floodgate.zip");
        let temp = dir.path().join("floodgate-UPDATE.zip.tmp");
        std::fs::write(&existing, b"v1").unwrap();
        std::fs::write(dir.path().join("floodgate.zip.old"), b"v0").unwrap();
        std::fs::write(&temp, b"v2").unwrap();

        swap_artifact(&existing, &temp).await.unwrap();

        assert_eq!(std::fs::read(&existing).unwrap(), b"v2");
        assert_eq!(std::fs::read(dir.path().join("floodgate.zip.old")).unwrap(), b"v1");
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn test_swap_missing_temp_restores_original() {
        let dir = TempDir::new().unwrap();
        let existing = dir.path().join("floodgate.zip");
        std::fs::write(&existing, b"v1").unwrap();

        let result = swap_artifact(&existing, &dir.path().join("absent.tmp")).await;
        assert!(result.is_err());
        assert_eq!(std::fs::read(&existing).unwrap(), b"v1");
        assert!(!dir.path().join("floodgate.zip.old").exists());
    }

    #[tokio::test]
    async fn test_swap_reports_failed_restore() {
        let dir = TempDir::new().unwrap();
        let existing = dir.path().join("floodgate.zip");
        let temp = dir.path().join("floodgate-UPDATE.zip.tmp");
        std::fs::write(&existing, b"v1").unwrap();
        std::fs::write(&temp, b"v2").unwrap();

        // Only the move to the backup goes through
        let calls = AtomicUsize::new(0);
        let err = swap_with(&existing, &temp, |from, to| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    tokio::fs::rename(from, to).await
                } else {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "read-only directory",
                    ))
                }
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, PlugError::Io(_)));
        assert!(err.to_string().contains("floodgate.zip.old also failed"));
        assert!(!existing.exists());
        assert_eq!(std::fs::read(dir.path().join("floodgate.zip.old")).unwrap(), b"v1");
        assert_eq!(std::fs::read(&temp).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_find_artifact_conventions() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Geyser-Spigot.zip"), b"").unwrap();
        assert_eq!(
            find_artifact(dir.path(), "Geyser", "spigot", None).await,
            Some(dir.path().join("Geyser-Spigot.zip"))
        );

        std::fs::write(dir.path().join("floodgate-spigot-2.2.zip"), b"").unwrap();
        assert_eq!(
            find_artifact(dir.path(), "Floodgate", "spigot", None).await,
            Some(dir.path().join("floodgate-spigot-2.2.zip"))
        );

        assert_eq!(find_artifact(dir.path(), "ViaVersion", "spigot", None).await, None);
    }

    #[tokio::test]
    async fn test_find_artifact_prefers_reported_path() {
        let dir = TempDir::new().unwrap();
        let reported = dir.path().join("custom-name.zip");
        std::fs::write(&reported, b"").unwrap();
        std::fs::write(dir.path().join("floodgate.zip"), b"").unwrap();

        assert_eq!(
            find_artifact(dir.path(), "floodgate", "spigot", Some(reported.clone())).await,
            Some(reported)
        );
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("spigot"), "Spigot");
        assert_eq!(capitalize(""), "");
    }
}
