// ! Plugin directory watcher
// !
// ! Module periodically compares the plugins directory against the stored
// ! fingerprints and turns new, removed and changed archives into load,
// ! unload and reload requests.

use crate::core::error::{PlugError, PlugResult};
use crate::core::logging::{ErrorContext, ErrorLogger};
use crate::plugin::config::ScanConfig;
use crate::plugin::descriptor::list_archives;
use crate::plugin::fingerprint::{FingerprintStore, IgnoreSet, hash_file_async};
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Lifecycle operations the watcher drives
#[async_trait]
pub trait LifecycleOps: Send + Sync {
    async fn load(&self, name: &str) -> PlugResult<String>;

    async fn unload(&self, name: &str) -> PlugResult<String>;

    async fn reload(&self, name: &str) -> PlugResult<String>;

    async fn is_loaded(&self, name: &str) -> bool;
}

/// Shared state of the scan tasks
struct ScanState {
    plugins_dir: PathBuf,
    ops: Arc<dyn LifecycleOps>,
    fingerprints: Arc<FingerprintStore>,
    ignored: Arc<IgnoreSet>,
}

/// Interval-driven watcher over the plugins directory
pub struct DirectoryWatcher {
    state: Arc<ScanState>,
    tasks: Vec<JoinHandle<()>>,
}

impl DirectoryWatcher {
    /// Create a new, stopped watcher
    pub fn new(
        plugins_dir: impl Into<PathBuf>,
        ops: Arc<dyn LifecycleOps>,
        fingerprints: Arc<FingerprintStore>,
        ignored: Arc<IgnoreSet>,
    ) -> Self {
        Self {
            state: Arc::new(ScanState {
                plugins_dir: plugins_dir.into(),
                ops,
                fingerprints,
                ignored,
            }),
            tasks: Vec::new(),
        }
    }

    /// Start the enabled behaviors, each on its own interval
    pub fn start(&mut self, auto_load: ScanConfig, auto_unload: ScanConfig, auto_reload: ScanConfig) {
        self.stop();

        if auto_load.enabled || auto_unload.enabled || auto_reload.enabled {
            warn!(
                "Automatic load/unload/reload is enabled. Swapping plugins at runtime can break \
                 other plugins; restart the server if anything misbehaves."
            );
        }

        if auto_load.enabled {
            self.spawn("auto-load", auto_load, |state| async move {
                state.scan_new().await;
            });
        }
        if auto_unload.enabled {
            self.spawn("auto-unload", auto_unload, |state| async move {
                state.scan_removed().await;
            });
        }
        if auto_reload.enabled {
            self.spawn("auto-reload", auto_reload, |state| async move {
                state.scan_changed().await;
            });
        }

        info!("Plugin watcher started with {} scan tasks", self.tasks.len());
    }

    fn spawn<F, Fut>(&mut self, behavior: &'static str, config: ScanConfig, scan: F)
    where
        F: Fn(Arc<ScanState>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = self.state.clone();
        let period = config.interval();
        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                debug!("{} tick", behavior);
                scan(state.clone()).await;
            }
        }));
    }

    /// Stop all scan tasks
    pub fn stop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Plugin watcher stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Load archives with no fingerprint yet; returns the number attempted
    pub async fn scan_new(&self) -> usize {
        self.state.scan_new().await
    }

    /// Unload modules whose archive disappeared; returns the number unloaded
    pub async fn scan_removed(&self) -> usize {
        self.state.scan_removed().await
    }

    /// Reload modules whose archive content changed; returns the number reloaded
    pub async fn scan_changed(&self) -> usize {
        self.state.scan_changed().await
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ScanState {
    async fn archives(&self) -> Vec<PathBuf> {
        let dir = self.plugins_dir.clone();
        let listed = tokio::task::spawn_blocking(move || {
            if dir.is_dir() {
                list_archives(&dir)
            } else {
                Ok(Vec::new())
            }
        })
        .await;
        match listed {
            Ok(Ok(archives)) => archives,
            Ok(Err(e)) => {
                warn!("Could not list {}: {}", self.plugins_dir.display(), e);
                Vec::new()
            }
            Err(e) => {
                warn!("Directory listing worker failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn scan_new(&self) -> usize {
        let mut attempted = 0;
        for path in self.archives().await {
            let Some(file) = file_name(&path) else {
                continue;
            };
            if self.fingerprints.contains(&file).await {
                continue;
            }
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };

            let hash = match hash_file_async(&path).await {
                Ok(hash) => hash,
                Err(e) => {
                    warn!("Could not hash new archive {}: {}", file, e);
                    continue;
                }
            };

            attempted += 1;
            info!("New plugin archive detected: {}", file);
            match self.ops.load(&stem).await {
                Ok(status) => info!("{}", status),
                Err(e) => log_failure(&e, "auto-load", &stem),
            }
            // Recorded either way, so a broken archive is not retried every tick
            if !self.fingerprints.contains(&file).await {
                self.fingerprints.set_hash(&file, hash).await;
            }
        }
        attempted
    }

    async fn scan_removed(&self) -> usize {
        let mut unloaded = 0;
        for file in self.fingerprints.files().await {
            if tokio::fs::try_exists(self.plugins_dir.join(&file))
                .await
                .unwrap_or(true)
            {
                continue;
            }

            let Some(module) = self.fingerprints.owner_of(&file).await else {
                self.fingerprints.remove(&file).await;
                continue;
            };
            if !self.ops.is_loaded(&module).await {
                debug!("{} is gone and {} is not loaded", file, module);
                self.fingerprints.remove(&file).await;
                continue;
            }
            if self.ignored.contains(&module) {
                continue;
            }

            info!("Plugin archive {} removed, unloading {}", file, module);
            match self.ops.unload(&module).await {
                Ok(status) => {
                    info!("{}", status);
                    unloaded += 1;
                }
                Err(e) => log_failure(&e, "auto-unload", &module),
            }
            self.fingerprints.remove(&file).await;
        }
        unloaded
    }

    async fn scan_changed(&self) -> usize {
        let mut reloaded = 0;
        for file in self.fingerprints.files().await {
            let path = self.plugins_dir.join(&file);
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            let Ok(hash) = hash_file_async(&path).await else {
                continue;
            };
            if self.fingerprints.hash_of(&file).await.as_deref() == Some(hash.as_str()) {
                continue;
            }

            let module = self.fingerprints.owner_of(&file).await;
            let loaded = match &module {
                Some(module) => self.ops.is_loaded(module).await,
                None => false,
            };
            let Some(module) = module.filter(|_| loaded) else {
                debug!("{} changed but nothing loaded owns it", file);
                self.fingerprints.remove(&file).await;
                continue;
            };
            if self.ignored.contains(&module) {
                continue;
            }

            self.fingerprints.set_hash(&file, hash).await;
            info!("Plugin archive {} changed, reloading {}", file, module);
            match self.ops.reload(&module).await {
                Ok(status) => {
                    info!("{}", status);
                    reloaded += 1;
                }
                Err(e) => log_failure(&e, "auto-reload", &module),
            }
        }
        reloaded
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|f| f.to_string_lossy().to_string())
}

fn log_failure(error: &PlugError, operation: &str, module: &str) {
    ErrorLogger::log_error(
        error,
        &ErrorContext::new(operation)
            .with_module(module)
            .with_component("watcher"),
    );
}
