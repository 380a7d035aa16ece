// ! Plugin service
// !
// ! Module wires a configuration into a running system: the main context,
// ! the lifecycle manager, the directory watcher and the update checker.

use crate::core::error::PlugResult;
use crate::core::metrics::MetricsCollector;
use crate::host::{Broadcaster, HostState, MainContext, ServerControl};
use crate::plugin::config::PlugConfig;
use crate::plugin::fingerprint::{FingerprintStore, IgnoreSet};
use crate::plugin::loader::ModuleLoader;
use crate::plugin::manager::PluginManager;
use crate::plugin::registry::probe;
use crate::plugin::watcher::DirectoryWatcher;
use crate::update::catalog::{ResourceMap, UpstreamCatalog};
use crate::update::checker::UpdateChecker;
use crate::update::client::VersionClient;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running plugin manager with its background tasks
pub struct PlugService {
    config: PlugConfig,
    main: MainContext,
    manager: Arc<PluginManager>,
    watcher: DirectoryWatcher,
    checker: Option<Arc<UpdateChecker>>,
    update_task: Option<JoinHandle<()>>,
    metrics: MetricsCollector,
}

impl PlugService {
    /// Start every component `config` enables
    pub async fn start(
        config: PlugConfig,
        host: HostState,
        loader: Arc<dyn ModuleLoader>,
        broadcaster: Arc<dyn Broadcaster>,
        control: Arc<dyn ServerControl>,
    ) -> PlugResult<Self> {
        tokio::fs::create_dir_all(&config.plugins_dir).await?;

        let adapter = probe(&host);
        info!("Host registry layout: {}", adapter.layout());
        let main = MainContext::start(host);
        let metrics = MetricsCollector::new();

        let fingerprints = Arc::new(FingerprintStore::new());
        let seeded = fingerprints.seed(&config.plugins_dir).await?;
        info!("Fingerprinted {} plugin archives", seeded);

        let ignored = Arc::new(IgnoreSet::new(&config.ignored_plugins));
        let manager = Arc::new(
            PluginManager::new(main.clone(), adapter, loader, &config.plugins_dir)
                .with_fingerprints(fingerprints.clone())
                .with_ignored(ignored.clone())
                .with_broken_command_notice(config.notify_on_broken_command_removal)
                .with_metrics(metrics.clone()),
        );

        let mut watcher = DirectoryWatcher::new(
            &config.plugins_dir,
            manager.clone(),
            fingerprints,
            ignored,
        );
        if config.watching() {
            watcher.start(config.auto_load, config.auto_unload, config.auto_reload);
        }

        let (checker, update_task) = if config.auto_update.enabled {
            let checker = Arc::new(
                Self::build_checker(&config, &main, &manager, broadcaster, control, &metrics)
                    .await?,
            );
            let task = checker.clone().start();
            (Some(checker), Some(task))
        } else {
            (None, None)
        };

        Ok(Self {
            config,
            main,
            manager,
            watcher,
            checker,
            update_task,
            metrics,
        })
    }

    async fn build_checker(
        config: &PlugConfig,
        main: &MainContext,
        manager: &Arc<PluginManager>,
        broadcaster: Arc<dyn Broadcaster>,
        control: Arc<dyn ServerControl>,
        metrics: &MetricsCollector,
    ) -> PlugResult<UpdateChecker> {
        let update = &config.auto_update;
        let client = VersionClient::new(&update.api_base)?;

        let mut catalog = UpstreamCatalog::new(&update.projects);
        if let Some(path) = &config.resources_file {
            match ResourceMap::from_file(path).await {
                Ok(resources) => {
                    info!("Loaded {} marketplace resources", resources.len());
                    catalog = catalog.with_resources(resources);
                }
                Err(e) => warn!("Ignoring resource map: {}", e),
            }
        }

        Ok(UpdateChecker::new(
            update.clone(),
            &config.plugins_dir,
            client,
            manager.clone(),
            broadcaster,
            control,
            main.clone(),
        )
        .with_catalog(catalog)
        .with_metrics(metrics.clone()))
    }

    pub fn config(&self) -> &PlugConfig {
        &self.config
    }

    pub fn main(&self) -> &MainContext {
        &self.main
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    pub fn watcher(&self) -> &DirectoryWatcher {
        &self.watcher
    }

    pub fn checker(&self) -> Option<&Arc<UpdateChecker>> {
        self.checker.as_ref()
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Stop background tasks and the main context
    pub fn shutdown(&mut self) {
        self.watcher.stop();
        if let Some(task) = self.update_task.take() {
            task.abort();
        }
        self.main.stop();
        info!("Plugin service stopped");
    }
}

impl Drop for PlugService {
    fn drop(&mut self) {
        if let Some(task) = self.update_task.take() {
            task.abort();
        }
    }
}
