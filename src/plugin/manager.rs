// ! Plugin lifecycle manager
// !
// ! Module orchestrates load, unload and reload of modules. Discovery and
// ! hashing run on the blocking pool; everything that touches the host
// ! registry runs as one closure on the main context.

use crate::core::error::{PlugError, PlugResult};
use crate::core::logging::{ErrorContext, ErrorLogger};
use crate::core::metrics::MetricsCollector;
use crate::host::{HostState, MainContext, RegistryHandles};
use crate::plugin::api::ModuleContext;
use crate::plugin::descriptor::{ModuleDescriptor, find_archive};
use crate::plugin::fingerprint::{FingerprintStore, IgnoreSet, hash_file};
use crate::plugin::loader::ModuleLoader;
use crate::plugin::registry::RegistryAdapter;
use crate::plugin::types::{
    CommandEntry, LoadReport, ModuleId, ModuleInfo, ModuleRecord, PluginEvent, UnloadReport,
};
use crate::plugin::watcher::LifecycleOps;
use crate::update::checker::InstalledModules;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Type alias for event handlers to reduce complexity
type EventHandlers = Vec<Box<dyn Fn(&PluginEvent) + Send + Sync>>;

/// Lifecycle manager for modules in the plugins directory
pub struct PluginManager {
    main: MainContext,
    adapter: Arc<dyn RegistryAdapter>,
    loader: Arc<dyn ModuleLoader>,
    plugins_dir: PathBuf,
    fingerprints: Arc<FingerprintStore>,
    ignored: Arc<IgnoreSet>,
    notify_broken: bool,
    metrics: MetricsCollector,
    event_handlers: Arc<RwLock<EventHandlers>>,
}

impl PluginManager {
    /// Create a manager driving `adapter` on `main`
    pub fn new(
        main: MainContext,
        adapter: Arc<dyn RegistryAdapter>,
        loader: Arc<dyn ModuleLoader>,
        plugins_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            main,
            adapter,
            loader,
            plugins_dir: plugins_dir.into(),
            fingerprints: Arc::new(FingerprintStore::new()),
            ignored: Arc::new(IgnoreSet::default()),
            notify_broken: true,
            metrics: MetricsCollector::new(),
            event_handlers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_fingerprints(mut self, fingerprints: Arc<FingerprintStore>) -> Self {
        self.fingerprints = fingerprints;
        self
    }

    pub fn with_ignored(mut self, ignored: Arc<IgnoreSet>) -> Self {
        self.ignored = ignored;
        self
    }

    /// Log each broken command segment dropped during unload
    pub fn with_broken_command_notice(mut self, notify: bool) -> Self {
        self.notify_broken = notify;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn main(&self) -> &MainContext {
        &self.main
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub fn fingerprints(&self) -> &Arc<FingerprintStore> {
        &self.fingerprints
    }

    pub fn ignored(&self) -> &Arc<IgnoreSet> {
        &self.ignored
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Register a lifecycle event handler
    pub async fn on_event<F>(&self, handler: F)
    where
        F: Fn(&PluginEvent) + Send + Sync + 'static,
    {
        self.event_handlers.write().await.push(Box::new(handler));
    }

    async fn emit(&self, event: PluginEvent) {
        for handler in self.event_handlers.read().await.iter() {
            handler(&event);
        }
    }

    /// Load a module by name (or archive file stem)
    pub async fn load(&self, name: &str) -> PlugResult<LoadReport> {
        let result = self.load_inner(name).await;
        self.finish("load", name, result.as_ref().map(|_| ()).map_err(Clone::clone)).await;
        match &result {
            Ok(report) => {
                self.emit(PluginEvent::Loaded {
                    name: report.name.clone(),
                    version: report.version.clone(),
                })
                .await
            }
            Err(e) => self.emit_error(name, e).await,
        }
        result
    }

    /// Unload a module by name
    pub async fn unload(&self, name: &str) -> PlugResult<UnloadReport> {
        let result = self.unload_inner(name).await;
        self.finish("unload", name, result.as_ref().map(|_| ()).map_err(Clone::clone)).await;
        match &result {
            Ok(report) => {
                self.emit(PluginEvent::Unloaded {
                    name: report.name.clone(),
                })
                .await
            }
            Err(PlugError::GentleUnloadDeclined(declined)) => {
                self.emit(PluginEvent::UnloadDeclined {
                    name: declined.clone(),
                })
                .await
            }
            Err(e) => self.emit_error(name, e).await,
        }
        result
    }

    /// Unload, then load again by the canonical name
    pub async fn reload(&self, name: &str) -> PlugResult<LoadReport> {
        let result = match self.unload_inner(name).await {
            Ok(unloaded) => self.load_inner(&unloaded.name).await,
            Err(e) => Err(e),
        };
        self.finish("reload", name, result.as_ref().map(|_| ()).map_err(Clone::clone)).await;
        match &result {
            Ok(report) => {
                self.emit(PluginEvent::Reloaded {
                    name: report.name.clone(),
                    version: report.version.clone(),
                })
                .await
            }
            Err(e) => self.emit_error(name, e).await,
        }
        result
    }

    /// Reload every loaded module that is not ignored
    pub async fn reload_all(&self) -> Vec<(String, PlugResult<LoadReport>)> {
        let mut results = Vec::new();
        for name in self.loaded_names().await {
            if self.ignored.contains(&name) {
                continue;
            }
            let result = self.reload(&name).await;
            results.push((name, result));
        }
        results
    }

    /// Enable a loaded, disabled module
    pub async fn enable(&self, name: &str) -> PlugResult<()> {
        let adapter = self.adapter.clone();
        let target = name.to_string();
        let result = self
            .main
            .run(move |host| {
                let id = host
                    .find_module(&target)
                    .ok_or_else(|| PlugError::NotLoaded(target.clone()))?;
                let mut reg = adapter
                    .open(host)
                    .map_err(|reason| PlugError::invalid_module(&target, reason))?;
                enable_in(&mut reg, adapter.as_ref(), id)
                    .map_err(|reason| PlugError::invalid_module(&target, reason))
            })
            .await
            .and_then(|r| r);
        if result.is_ok() {
            self.main.run_later(1, |host| {
                host.sync_completion();
            })?;
        }
        self.finish("enable", name, result.clone()).await;
        result
    }

    /// Disable a loaded module; its listeners are removed, commands stay
    pub async fn disable(&self, name: &str) -> PlugResult<()> {
        let adapter = self.adapter.clone();
        let target = name.to_string();
        let result = self
            .main
            .run(move |host| {
                let id = host
                    .find_module(&target)
                    .ok_or_else(|| PlugError::NotLoaded(target.clone()))?;
                let mut reg = adapter
                    .open(host)
                    .map_err(|reason| PlugError::invalid_module(&target, reason))?;
                disable_in(&mut reg, adapter.as_ref(), id);
                Ok(())
            })
            .await
            .and_then(|r| r);
        self.finish("disable", name, result.clone()).await;
        result
    }

    pub async fn enable_all(&self) -> Vec<(String, PlugResult<()>)> {
        let mut results = Vec::new();
        for name in self.loaded_names().await {
            if !self.ignored.contains(&name) {
                let result = self.enable(&name).await;
                results.push((name, result));
            }
        }
        results
    }

    pub async fn disable_all(&self) -> Vec<(String, PlugResult<()>)> {
        let mut results = Vec::new();
        for name in self.loaded_names().await {
            if !self.ignored.contains(&name) {
                let result = self.disable(&name).await;
                results.push((name, result));
            }
        }
        results
    }

    /// Loaded modules, sorted by name
    pub async fn list(&self) -> PlugResult<Vec<ModuleInfo>> {
        let mut infos = self
            .main
            .run(|host| host.modules().iter().map(ModuleRecord::info).collect::<Vec<_>>())
            .await?;
        infos.sort_by_key(|i| i.name.to_lowercase());
        Ok(infos)
    }

    pub async fn info(&self, name: &str) -> PlugResult<ModuleInfo> {
        let target = name.to_string();
        self.main
            .run(move |host| {
                host.record(&target)
                    .map(ModuleRecord::info)
                    .ok_or(PlugError::NotLoaded(target))
            })
            .await?
    }

    /// Command keys a module registered
    pub async fn usages(&self, name: &str) -> PlugResult<Vec<String>> {
        let mut commands = self.info(name).await?.commands;
        commands.sort();
        Ok(commands)
    }

    /// Modules that own or contribute to a command label
    pub async fn find_by_command(&self, label: &str) -> PlugResult<Vec<String>> {
        let key = label.trim_start_matches('/').to_lowercase();
        self.main
            .run(move |host| match host.commands().get(&key) {
                Some(CommandEntry::Plugin(cmd)) => vec![cmd.owner_name.clone()],
                Some(CommandEntry::Shared(shared)) => shared
                    .segments
                    .iter()
                    .map(|s| s.owner_name.clone())
                    .collect(),
                None => Vec::new(),
            })
            .await
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        let target = name.to_string();
        self.main
            .run(move |host| host.find_module(&target).is_some())
            .await
            .unwrap_or(false)
    }

    /// Canonical names of loaded modules in load order
    pub async fn loaded_names(&self) -> Vec<String> {
        self.main
            .run(|host| {
                host.modules()
                    .iter()
                    .map(|m| m.name().to_string())
                    .collect::<Vec<_>>()
            })
            .await
            .unwrap_or_default()
    }

    async fn load_inner(&self, name: &str) -> PlugResult<LoadReport> {
        let dir = self.plugins_dir.clone();
        let target = name.to_string();
        let (artifact, descriptor, hash) = tokio::task::spawn_blocking(move || {
            let (artifact, descriptor) = find_archive(&dir, &target)?;
            let hash = hash_file(&artifact)?;
            Ok::<_, PlugError>((artifact, descriptor, hash))
        })
        .await
        .map_err(|e| PlugError::scheduler(format!("discovery worker failed: {e}")))??;

        let adapter = self.adapter.clone();
        let loader = self.loader.clone();
        let report = LoadReport {
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            artifact: artifact.clone(),
        };
        let id = self
            .main
            .run(move |host| {
                materialize(host, adapter.as_ref(), loader.as_ref(), descriptor, artifact)
            })
            .await??;

        if let Some(file) = report.artifact.file_name() {
            self.fingerprints
                .record(&file.to_string_lossy(), hash, &report.name)
                .await;
        }

        self.main.run_later(1, |host| {
            host.sync_completion();
        })?;

        info!("Loaded {} ({})", report.name, id);
        Ok(report)
    }

    async fn unload_inner(&self, name: &str) -> PlugResult<UnloadReport> {
        let adapter = self.adapter.clone();
        let target = name.to_string();
        let notify_broken = self.notify_broken;
        let report = self
            .main
            .run(move |host| unload_in(host, adapter.as_ref(), &target, notify_broken))
            .await??;

        info!(
            "Unloaded {} ({} commands, {} listeners)",
            report.name, report.commands_removed, report.listeners_removed
        );
        Ok(report)
    }

    async fn finish(&self, operation: &str, name: &str, result: PlugResult<()>) {
        self.metrics
            .record_lifecycle(operation, result.is_ok())
            .await;
        if let Err(e) = result {
            ErrorLogger::log_error(
                &e,
                &ErrorContext::new(operation)
                    .with_module(name)
                    .with_component("manager"),
            );
            self.metrics.record_error(&e, operation).await;
        }
    }

    async fn emit_error(&self, name: &str, error: &PlugError) {
        self.emit(PluginEvent::Error {
            name: name.to_string(),
            error: error.to_string(),
        })
        .await;
    }
}

/// Instantiate, register and enable a module; rolls back on any failure
fn materialize(
    host: &mut HostState,
    adapter: &dyn RegistryAdapter,
    loader: &dyn ModuleLoader,
    descriptor: ModuleDescriptor,
    artifact: PathBuf,
) -> PlugResult<ModuleId> {
    let name = descriptor.name.clone();
    let mut reg = adapter
        .open(host)
        .map_err(|reason| PlugError::invalid_module(&name, reason))?;
    if adapter.lookup(&reg, &name).is_some() {
        return Err(PlugError::AlreadyLoaded(name));
    }

    let (mut instance, mut unit) = loader.instantiate(&artifact, &descriptor)?;
    let id = ModuleId::new();
    unit.bind(id);

    if let Err(e) = instance.on_load() {
        drop(instance);
        unit.release();
        return Err(PlugError::invalid_module(&name, format!("on_load failed: {e}")));
    }

    adapter.insert(&mut reg, ModuleRecord::new(id, descriptor, artifact, instance, unit));
    if let Err(reason) = enable_in(&mut reg, adapter, id) {
        warn!("Rolling back {}: {}", name, reason);
        adapter.strip_commands(&mut reg, id, false);
        adapter.strip_listeners(&mut reg, id);
        if let Some(mut record) = adapter.remove(&mut reg, id) {
            record.release();
        }
        return Err(PlugError::invalid_module(&name, reason));
    }
    Ok(id)
}

/// Run `on_enable` and apply what the module registered
fn enable_in(reg: &mut RegistryHandles<'_>, adapter: &dyn RegistryAdapter, id: ModuleId) -> Result<(), String> {
    let record = reg
        .record_mut(id)
        .ok_or_else(|| "module is not registered".to_string())?;
    if record.enabled {
        return Ok(());
    }
    let descriptor = record.descriptor.clone();
    let handle = record.handle();
    let mut instance = record
        .instance
        .take()
        .ok_or_else(|| "module instance was released".to_string())?;

    let outcome = {
        let mut ctx = ModuleContext::new(&descriptor);
        instance.on_enable(&mut ctx).map(|()| ctx.into_parts())
    };
    if let Some(record) = reg.record_mut(id) {
        record.instance = Some(instance);
    }
    let parts = outcome.map_err(|e| format!("on_enable failed: {e}"))?;

    adapter.strip_commands(reg, id, false);
    let commands = adapter.register_commands(
        reg,
        id,
        &descriptor,
        parts.executors,
        parts.shared,
        handle,
    );
    let subscriptions = adapter.install_listeners(reg, id, parts.subscriptions);

    let record = reg
        .record_mut(id)
        .ok_or_else(|| "module is not registered".to_string())?;
    record.commands = commands;
    record.subscriptions = subscriptions;
    record.enabled = true;
    debug!("Enabled {}", descriptor.name);
    Ok(())
}

/// Run `on_disable` and strip listeners; returns the listeners removed
fn disable_in(reg: &mut RegistryHandles<'_>, adapter: &dyn RegistryAdapter, id: ModuleId) -> usize {
    let Some(record) = reg.record_mut(id) else {
        return 0;
    };
    if !record.enabled {
        return 0;
    }
    if let Some(instance) = record.instance.as_mut() {
        instance.on_disable();
    }
    record.enabled = false;
    record.subscriptions.clear();
    adapter.strip_listeners(reg, id)
}

/// The whole unload sequence as one critical section
fn unload_in(
    host: &mut HostState,
    adapter: &dyn RegistryAdapter,
    name: &str,
    notify_broken: bool,
) -> PlugResult<UnloadReport> {
    let id = host
        .find_module(name)
        .ok_or_else(|| PlugError::NotLoaded(name.to_string()))?;
    let canonical = host
        .module(id)
        .map(|m| m.name().to_string())
        .unwrap_or_else(|| name.to_string());

    // Negotiation happens before anything is touched
    if let Some(instance) = host.module_mut(id).and_then(|m| m.instance.as_mut()) {
        if let Some(gentle) = instance.gentle_unload() {
            if !gentle.asking_for_gentle_unload() {
                return Err(PlugError::GentleUnloadDeclined(canonical));
            }
        }
    }

    let mut reg = adapter
        .open(host)
        .map_err(|reason| PlugError::unload_failed(&canonical, reason))?;

    adapter.strip_completions(&mut reg, &canonical);
    let commands_removed = adapter.strip_commands(&mut reg, id, notify_broken);
    let mut listeners_removed = disable_in(&mut reg, adapter, id);
    let mut record = adapter
        .remove(&mut reg, id)
        .ok_or_else(|| PlugError::unload_failed(&canonical, "module vanished from the registry"))?;
    listeners_removed += adapter.strip_listeners(&mut reg, id);
    let unit_released = record.release();

    Ok(UnloadReport {
        name: canonical,
        commands_removed,
        listeners_removed,
        unit_released,
    })
}

#[async_trait]
impl LifecycleOps for PluginManager {
    async fn load(&self, name: &str) -> PlugResult<String> {
        PluginManager::load(self, name).await.map(|r| r.to_string())
    }

    async fn unload(&self, name: &str) -> PlugResult<String> {
        PluginManager::unload(self, name).await.map(|r| r.to_string())
    }

    async fn reload(&self, name: &str) -> PlugResult<String> {
        PluginManager::reload(self, name).await.map(|r| r.to_string())
    }

    async fn is_loaded(&self, name: &str) -> bool {
        PluginManager::is_loaded(self, name).await
    }
}

#[async_trait]
impl InstalledModules for PluginManager {
    async fn installed_version(&self, name: &str) -> Option<String> {
        let target = name.to_string();
        self.main
            .run(move |host| host.record(&target).map(|r| r.version().to_string()))
            .await
            .ok()
            .flatten()
    }

    async fn artifact_path(&self, name: &str) -> Option<PathBuf> {
        let target = name.to_string();
        self.main
            .run(move |host| host.record(&target).map(|r| r.artifact.clone()))
            .await
            .ok()
            .flatten()
    }
}
