//! Host model
//!
//! `HostState` holds the host's live registry: the module list, the
//! name-lookup index, the command map, per-event listener sets, the
//! completion index and, on segmented hosts, a second module index. It is
//! owned by the [`MainContext`] task and read continuously by the host's
//! own dispatch; structural mutation goes through [`HostState::registry_mut`].

pub mod scheduler;
pub mod services;

pub use scheduler::MainContext;
pub use services::{Broadcaster, LogBroadcaster, LogServerControl, ServerControl};

use crate::plugin::types::{
    CommandEntry, HostEvent, ModuleId, ModuleRecord, RegisteredListener,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

/// Registry shape of the running host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostVariant {
    /// Module list plus a name-lookup map
    Legacy,
    /// Legacy structures mirrored by a segmented module index
    Segmented,
}

/// Registry shape plus the internal layout revision the host exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryLayout {
    pub variant: HostVariant,
    pub version: u32,
}

impl RegistryLayout {
    pub const fn legacy() -> Self {
        Self {
            variant: HostVariant::Legacy,
            version: 1,
        }
    }

    pub const fn segmented() -> Self {
        Self {
            variant: HostVariant::Segmented,
            version: 1,
        }
    }
}

impl fmt::Display for RegistryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/v{}", self.variant, self.version)
    }
}

/// The segmented host's own module index
#[derive(Debug, Default)]
pub struct SegmentedIndex {
    /// Load order
    pub plugins: Vec<ModuleId>,
    /// Lowercase name to module
    pub lookup_names: HashMap<String, ModuleId>,
}

/// Mutable access to every registry structure at once
///
/// Only granted for the layout the caller was written against.
pub struct RegistryHandles<'a> {
    pub modules: &'a mut Vec<ModuleRecord>,
    pub lookup: &'a mut HashMap<String, ModuleId>,
    pub commands: &'a mut HashMap<String, CommandEntry>,
    pub listeners: &'a mut HashMap<String, Vec<RegisteredListener>>,
    pub completion: &'a mut BTreeMap<String, String>,
    pub segmented: Option<&'a mut SegmentedIndex>,
}

impl RegistryHandles<'_> {
    pub fn record_mut(&mut self, id: ModuleId) -> Option<&mut ModuleRecord> {
        self.modules.iter_mut().find(|m| m.id == id)
    }
}

/// Live state of the host process
pub struct HostState {
    layout: RegistryLayout,
    modules: Vec<ModuleRecord>,
    lookup: HashMap<String, ModuleId>,
    commands: HashMap<String, CommandEntry>,
    listeners: HashMap<String, Vec<RegisteredListener>>,
    completion: BTreeMap<String, String>,
    segmented: Option<SegmentedIndex>,
    tick: u64,
}

impl HostState {
    pub fn new(layout: RegistryLayout) -> Self {
        Self {
            layout,
            modules: Vec::new(),
            lookup: HashMap::new(),
            commands: HashMap::new(),
            listeners: HashMap::new(),
            completion: BTreeMap::new(),
            segmented: match layout.variant {
                HostVariant::Legacy => None,
                HostVariant::Segmented => Some(SegmentedIndex::default()),
            },
            tick: 0,
        }
    }

    pub fn legacy() -> Self {
        Self::new(RegistryLayout::legacy())
    }

    pub fn segmented() -> Self {
        Self::new(RegistryLayout::segmented())
    }

    pub fn layout(&self) -> RegistryLayout {
        self.layout
    }

    /// Host upgrade that changes the internal layout revision
    pub fn set_layout_version(&mut self, version: u32) {
        self.layout.version = version;
    }

    /// Grant structural access when `expected` matches the live layout
    pub fn registry_mut(&mut self, expected: RegistryLayout) -> Option<RegistryHandles<'_>> {
        if expected != self.layout {
            return None;
        }
        Some(RegistryHandles {
            modules: &mut self.modules,
            lookup: &mut self.lookup,
            commands: &mut self.commands,
            listeners: &mut self.listeners,
            completion: &mut self.completion,
            segmented: self.segmented.as_mut(),
        })
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub(crate) fn advance_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn modules(&self) -> &[ModuleRecord] {
        &self.modules
    }

    pub fn module(&self, id: ModuleId) -> Option<&ModuleRecord> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub(crate) fn module_mut(&mut self, id: ModuleId) -> Option<&mut ModuleRecord> {
        self.modules.iter_mut().find(|m| m.id == id)
    }

    /// Case-insensitive name lookup through the host's own indexes
    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        let key = name.to_lowercase();
        self.lookup.get(&key).copied().or_else(|| {
            self.segmented
                .as_ref()
                .and_then(|s| s.lookup_names.get(&key).copied())
        })
    }

    pub fn record(&self, name: &str) -> Option<&ModuleRecord> {
        self.find_module(name).and_then(|id| self.module(id))
    }

    pub fn commands(&self) -> &HashMap<String, CommandEntry> {
        &self.commands
    }

    pub fn listeners(&self) -> &HashMap<String, Vec<RegisteredListener>> {
        &self.listeners
    }

    pub fn completion(&self) -> &BTreeMap<String, String> {
        &self.completion
    }

    pub fn segmented_index(&self) -> Option<&SegmentedIndex> {
        self.segmented.as_ref()
    }

    /// Rebuild the completion index from the command map
    pub fn sync_completion(&mut self) -> usize {
        self.completion = self
            .commands
            .iter()
            .filter_map(|(label, entry)| {
                entry
                    .primary_owner()
                    .map(|owner| (label.clone(), owner.to_string()))
            })
            .collect();
        debug!("Completion index synced with {} labels", self.completion.len());
        self.completion.len()
    }

    /// Run a command the way the host's dispatcher would
    ///
    /// Returns `None` for an unknown label.
    pub fn dispatch_command(&self, label: &str, args: &[String]) -> Option<String> {
        let entry = self.commands.get(&label.to_lowercase())?;
        let reply = match entry {
            CommandEntry::Plugin(cmd) => {
                let enabled = self.module(cmd.owner).is_some_and(|m| m.enabled);
                if !enabled {
                    format!(
                        "Cannot execute command '{}' in plugin {} - plugin is disabled.",
                        label, cmd.owner_name
                    )
                } else {
                    match &cmd.executor {
                        Some(executor) => executor(label, args),
                        None => cmd
                            .spec
                            .usage
                            .clone()
                            .unwrap_or_else(|| format!("/{}", cmd.label)),
                    }
                }
            }
            CommandEntry::Shared(shared) => shared
                .segments
                .iter()
                .filter(|s| !s.is_broken())
                .map(|s| (s.executor)(label, args))
                .collect::<Vec<_>>()
                .join("\n"),
        };
        Some(reply)
    }

    /// Deliver an event to its listeners in priority order
    pub fn fire_event(&self, event: &HostEvent) -> usize {
        let Some(listeners) = self.listeners.get(&event.kind) else {
            return 0;
        };
        let mut ordered: Vec<&RegisteredListener> = listeners.iter().collect();
        ordered.sort_by_key(|l| l.priority);
        for listener in &ordered {
            (listener.handler)(event);
        }
        ordered.len()
    }

    /// Number of registry entries anywhere that still reference `id`
    pub fn residuals(&self, id: ModuleId) -> usize {
        let name = self.module(id).map(|m| m.name().to_string());
        let commands = self.commands.values().filter(|e| e.involves(id)).count();
        let listeners = self
            .listeners
            .values()
            .flatten()
            .filter(|l| l.owner == id)
            .count();
        let lookup = self.lookup.values().filter(|v| **v == id).count();
        let modules = self.modules.iter().filter(|m| m.id == id).count();
        let segmented = self.segmented.as_ref().map_or(0, |s| {
            s.plugins.iter().filter(|p| **p == id).count()
                + s.lookup_names.values().filter(|v| **v == id).count()
        });
        let completion = name.map_or(0, |n| self.completion.values().filter(|v| **v == n).count());
        commands + listeners + lookup + modules + segmented + completion
    }
}

impl Default for HostState {
    fn default() -> Self {
        Self::legacy()
    }
}

impl fmt::Debug for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostState")
            .field("layout", &self.layout)
            .field("modules", &self.modules.len())
            .field("commands", &self.commands.len())
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::types::{CommandSegment, EventPriority, SharedCommand};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, Weak};

    #[test]
    fn test_layout_guard() {
        let mut host = HostState::segmented();
        assert!(host.registry_mut(RegistryLayout::legacy()).is_none());
        assert!(host.registry_mut(RegistryLayout::segmented()).is_some());

        host.set_layout_version(2);
        assert!(host.registry_mut(RegistryLayout::segmented()).is_none());
        assert_eq!(host.layout().to_string(), "Segmented/v2");
    }

    #[test]
    fn test_fire_event_in_priority_order() {
        let mut host = HostState::legacy();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let owner = ModuleId::new();
        let mut reg = host.registry_mut(RegistryLayout::legacy()).unwrap();
        for priority in [EventPriority::Monitor, EventPriority::Low, EventPriority::High] {
            let seen = seen.clone();
            reg.listeners
                .entry("player_join".into())
                .or_default()
                .push(RegisteredListener {
                    owner,
                    priority,
                    handler: Arc::new(move |_| seen.lock().unwrap().push(priority)),
                });
        }

        let count = host.fire_event(&HostEvent::new("player_join", json!({"player": "alex"})));
        assert_eq!(count, 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventPriority::Low, EventPriority::High, EventPriority::Monitor]
        );
        assert_eq!(host.fire_event(&HostEvent::new("other", json!(null))), 0);
    }

    #[test]
    fn test_shared_dispatch_skips_broken_segments() {
        let mut host = HostState::legacy();
        let live = Arc::new(());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut reg = host.registry_mut(RegistryLayout::legacy()).unwrap();
        reg.commands.insert(
            "warp".into(),
            CommandEntry::Shared(SharedCommand {
                label: "warp".into(),
                segments: vec![
                    CommandSegment {
                        owner: ModuleId::new(),
                        owner_name: "Gone".into(),
                        handle: Weak::new(),
                        executor: Arc::new(|_, _| "stale".into()),
                    },
                    CommandSegment {
                        owner: ModuleId::new(),
                        owner_name: "Warps".into(),
                        handle: Arc::downgrade(&live),
                        executor: Arc::new(move |_, args| {
                            counter.fetch_add(1, Ordering::SeqCst);
                            format!("warping to {}", args.join(" "))
                        }),
                    },
                ],
            }),
        );

        let reply = host.dispatch_command("WARP", &["spawn".to_string()]);
        assert_eq!(reply.as_deref(), Some("warping to spawn"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(host.dispatch_command("unknown", &[]).is_none());

        assert_eq!(host.sync_completion(), 1);
        assert_eq!(host.completion()["warp"], "Warps");
    }
}
