// ! Plugin system types
// !
// ! Module defines the records the host registry stores for loaded modules,
// ! their commands and event subscriptions, and the reports the lifecycle
// ! manager hands back to callers.

use crate::plugin::api::Module;
use crate::plugin::descriptor::{CommandSpec, ModuleDescriptor};
use crate::plugin::loader::LoadUnit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Identity of one loaded instance of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(Uuid);

impl ModuleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ModuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command callback: `(label, args) -> reply`
pub type CommandExecutor = Arc<dyn Fn(&str, &[String]) -> String + Send + Sync>;

/// Event callback
pub type EventHandler = Arc<dyn Fn(&HostEvent) + Send + Sync>;

/// Listener ordering; lower priorities observe an event first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
    Monitor,
}

/// An event raised by the host and fanned out to subscribed listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEvent {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl HostEvent {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// One entry in a per-event listener set
#[derive(Clone)]
pub struct RegisteredListener {
    pub owner: ModuleId,
    pub priority: EventPriority,
    pub handler: EventHandler,
}

impl fmt::Debug for RegisteredListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredListener")
            .field("owner", &self.owner)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// A command wholly owned by one module
pub struct PluginCommand {
    pub label: String,
    pub owner: ModuleId,
    pub owner_name: String,
    pub spec: CommandSpec,
    pub executor: Option<CommandExecutor>,
}

impl fmt::Debug for PluginCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCommand")
            .field("label", &self.label)
            .field("owner", &self.owner_name)
            .field("has_executor", &self.executor.is_some())
            .finish()
    }
}

/// One module's contribution to a shared command
#[derive(Clone)]
pub struct CommandSegment {
    pub owner: ModuleId,
    pub owner_name: String,
    /// Liveness of the owner's loading unit
    pub handle: Weak<()>,
    pub executor: CommandExecutor,
}

impl CommandSegment {
    /// A segment is broken once its owner's loading unit has been released
    pub fn is_broken(&self) -> bool {
        self.handle.upgrade().is_none()
    }
}

impl fmt::Debug for CommandSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSegment")
            .field("owner", &self.owner_name)
            .field("broken", &self.is_broken())
            .finish()
    }
}

/// A command label several modules contribute to
#[derive(Debug, Clone, Default)]
pub struct SharedCommand {
    pub label: String,
    pub segments: Vec<CommandSegment>,
}

/// Value stored in the host's command map
#[derive(Debug)]
pub enum CommandEntry {
    Plugin(Arc<PluginCommand>),
    Shared(SharedCommand),
}

impl CommandEntry {
    /// Whether `id` owns this entry or any segment of it
    pub fn involves(&self, id: ModuleId) -> bool {
        match self {
            CommandEntry::Plugin(cmd) => cmd.owner == id,
            CommandEntry::Shared(shared) => shared.segments.iter().any(|s| s.owner == id),
        }
    }

    /// Name of the module completion should attribute the label to
    pub fn primary_owner(&self) -> Option<&str> {
        match self {
            CommandEntry::Plugin(cmd) => Some(cmd.owner_name.as_str()),
            CommandEntry::Shared(shared) => shared
                .segments
                .iter()
                .find(|s| !s.is_broken())
                .map(|s| s.owner_name.as_str()),
        }
    }
}

/// A listener a module installed, kept on its record for introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionBinding {
    pub kind: String,
    pub priority: EventPriority,
}

/// A loaded module as the host registry holds it
pub struct ModuleRecord {
    pub id: ModuleId,
    pub descriptor: ModuleDescriptor,
    pub artifact: PathBuf,
    pub enabled: bool,
    /// Command map keys this module registered
    pub commands: Vec<String>,
    pub subscriptions: Vec<SubscriptionBinding>,
    pub loaded_at: DateTime<Utc>,
    pub(crate) instance: Option<Box<dyn Module>>,
    pub(crate) unit: Option<LoadUnit>,
}

impl ModuleRecord {
    pub(crate) fn new(
        id: ModuleId,
        descriptor: ModuleDescriptor,
        artifact: PathBuf,
        instance: Box<dyn Module>,
        unit: LoadUnit,
    ) -> Self {
        Self {
            id,
            descriptor,
            artifact,
            enabled: false,
            commands: Vec::new(),
            subscriptions: Vec::new(),
            loaded_at: Utc::now(),
            instance: Some(instance),
            unit: Some(unit),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn version(&self) -> &str {
        &self.descriptor.version
    }

    /// Liveness handle of the loading unit; dead once released
    pub fn handle(&self) -> Weak<()> {
        self.unit.as_ref().map(LoadUnit::handle).unwrap_or_default()
    }

    pub fn is_released(&self) -> bool {
        self.unit.is_none()
    }

    /// Drop the instance, then release the loading unit.
    ///
    /// Returns false if the unit was already released.
    pub(crate) fn release(&mut self) -> bool {
        drop(self.instance.take());
        match self.unit.take() {
            Some(unit) => {
                unit.release();
                true
            }
            None => false,
        }
    }

    pub fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: self.descriptor.name.clone(),
            version: self.descriptor.version.clone(),
            full_name: self.descriptor.full_name(),
            native: self.unit.as_ref().is_some_and(LoadUnit::is_dynamic),
            enabled: self.enabled,
            artifact: self.artifact.clone(),
            description: self.descriptor.description.clone(),
            authors: self.descriptor.authors.clone(),
            depend: self.descriptor.depend.clone(),
            commands: self.commands.clone(),
            subscriptions: self.subscriptions.clone(),
            loaded_at: self.loaded_at,
        }
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("id", &self.id)
            .field("name", &self.descriptor.name)
            .field("version", &self.descriptor.version)
            .field("enabled", &self.enabled)
            .field("artifact", &self.artifact)
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a loaded module for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub version: String,
    /// Name and version as shown to operators
    pub full_name: String,
    /// Backed by a native library rather than linked into the host
    pub native: bool,
    pub enabled: bool,
    pub artifact: PathBuf,
    pub description: Option<String>,
    pub authors: Vec<String>,
    pub depend: Vec<String>,
    pub commands: Vec<String>,
    pub subscriptions: Vec<SubscriptionBinding>,
    pub loaded_at: DateTime<Utc>,
}

/// Outcome of a successful load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub name: String,
    pub version: String,
    pub artifact: PathBuf,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{} has been loaded and enabled", self.name, self.version)
    }
}

/// Outcome of a successful unload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadReport {
    pub name: String,
    pub commands_removed: usize,
    pub listeners_removed: usize,
    /// False when the loading unit had already been released
    pub unit_released: bool,
}

impl fmt::Display for UnloadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} has been unloaded", self.name)
    }
}

/// Lifecycle notifications delivered to manager event handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginEvent {
    Loaded { name: String, version: String },
    Unloaded { name: String },
    Reloaded { name: String, version: String },
    UnloadDeclined { name: String },
    Error { name: String, error: String },
}
