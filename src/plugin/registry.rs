// ! Registry adapters
// !
// ! Module performs structural surgery on the host registry. The lifecycle
// ! manager is written once against `RegistryAdapter`; the two host shapes
// ! differ only in how a module is inserted, looked up and removed.

use crate::host::{HostState, HostVariant, RegistryHandles, RegistryLayout};
use crate::plugin::descriptor::ModuleDescriptor;
use crate::plugin::types::{
    CommandEntry, CommandExecutor, CommandSegment, EventHandler, EventPriority, ModuleId,
    ModuleRecord, PluginCommand, RegisteredListener, SharedCommand, SubscriptionBinding,
};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Capability to mutate one host registry shape
pub trait RegistryAdapter: Send + Sync {
    /// Layout this adapter was written against
    fn layout(&self) -> RegistryLayout;

    /// Open the registry for surgery; fails without touching anything if
    /// the host exposes a different layout
    fn open<'h>(&self, host: &'h mut HostState) -> Result<RegistryHandles<'h>, String> {
        let expected = self.layout();
        let found = host.layout();
        host.registry_mut(expected)
            .ok_or_else(|| format!("host registry layout is {found}, expected {expected}"))
    }

    fn lookup(&self, reg: &RegistryHandles<'_>, name: &str) -> Option<ModuleId>;

    fn insert(&self, reg: &mut RegistryHandles<'_>, record: ModuleRecord);

    fn remove(&self, reg: &mut RegistryHandles<'_>, id: ModuleId) -> Option<ModuleRecord>;

    /// Register a module's declared commands and shared segments.
    ///
    /// Returns the command map keys the module now holds.
    fn register_commands(
        &self,
        reg: &mut RegistryHandles<'_>,
        id: ModuleId,
        descriptor: &ModuleDescriptor,
        mut executors: HashMap<String, CommandExecutor>,
        shared: Vec<(String, CommandExecutor)>,
        handle: Weak<()>,
    ) -> Vec<String> {
        let prefix = descriptor.name.to_lowercase();
        let mut keys = Vec::new();

        for (label, spec) in &descriptor.commands {
            let label = label.to_lowercase();
            let command = Arc::new(PluginCommand {
                label: label.clone(),
                owner: id,
                owner_name: descriptor.name.clone(),
                spec: spec.clone(),
                executor: executors.remove(&label),
            });

            let fallback = format!("{prefix}:{label}");
            reg.commands
                .insert(fallback.clone(), CommandEntry::Plugin(command.clone()));
            keys.push(fallback);

            let aliases = spec.aliases.iter().map(|a| a.to_lowercase());
            for key in std::iter::once(label.clone()).chain(aliases) {
                if reg.commands.contains_key(&key) {
                    debug!("Command '{}' of {} is taken, fallback only", key, descriptor.name);
                    continue;
                }
                reg.commands
                    .insert(key.clone(), CommandEntry::Plugin(command.clone()));
                keys.push(key);
            }
        }

        for label in executors.keys() {
            warn!("{} set an executor for undeclared command '{}'", descriptor.name, label);
        }

        for (label, executor) in shared {
            let segment = CommandSegment {
                owner: id,
                owner_name: descriptor.name.clone(),
                handle: handle.clone(),
                executor,
            };
            match reg.commands.get_mut(&label) {
                Some(CommandEntry::Shared(existing)) => existing.segments.push(segment),
                Some(CommandEntry::Plugin(_)) => {
                    warn!(
                        "{} cannot attach to '{}': owned by another module",
                        descriptor.name, label
                    );
                    continue;
                }
                None => {
                    reg.commands.insert(
                        label.clone(),
                        CommandEntry::Shared(SharedCommand {
                            label: label.clone(),
                            segments: vec![segment],
                        }),
                    );
                }
            }
            if !keys.contains(&label) {
                keys.push(label);
            }
        }

        keys
    }

    /// Remove every command entry and shared segment `id` owns.
    ///
    /// Segments whose unit was already released are removed too, logged
    /// when `notify_broken` is set. Returns the number of entries removed
    /// or patched.
    fn strip_commands(&self, reg: &mut RegistryHandles<'_>, id: ModuleId, notify_broken: bool) -> usize {
        let mut touched = 0;
        reg.commands.retain(|label, entry| match entry {
            CommandEntry::Plugin(cmd) => {
                if cmd.owner == id {
                    touched += 1;
                    false
                } else {
                    true
                }
            }
            CommandEntry::Shared(shared) => {
                let before = shared.segments.len();
                shared.segments.retain(|segment| {
                    if segment.owner == id {
                        return false;
                    }
                    if segment.is_broken() {
                        if notify_broken {
                            info!(
                                "Removing broken command segment '{}' left by {}",
                                label, segment.owner_name
                            );
                        }
                        return false;
                    }
                    true
                });
                if shared.segments.len() != before {
                    touched += 1;
                }
                !shared.segments.is_empty()
            }
        });
        touched
    }

    fn install_listeners(
        &self,
        reg: &mut RegistryHandles<'_>,
        id: ModuleId,
        subscriptions: Vec<(String, EventPriority, EventHandler)>,
    ) -> Vec<SubscriptionBinding> {
        subscriptions
            .into_iter()
            .map(|(kind, priority, handler)| {
                reg.listeners
                    .entry(kind.clone())
                    .or_default()
                    .push(RegisteredListener {
                        owner: id,
                        priority,
                        handler,
                    });
                SubscriptionBinding { kind, priority }
            })
            .collect()
    }

    /// Strip `id` from every per-event listener set
    fn strip_listeners(&self, reg: &mut RegistryHandles<'_>, id: ModuleId) -> usize {
        let mut removed = 0;
        reg.listeners.retain(|_, listeners| {
            let before = listeners.len();
            listeners.retain(|l| l.owner != id);
            removed += before - listeners.len();
            !listeners.is_empty()
        });
        removed
    }

    /// Drop completion entries attributed to `name`
    fn strip_completions(&self, reg: &mut RegistryHandles<'_>, name: &str) -> usize {
        let before = reg.completion.len();
        reg.completion.retain(|_, owner| !owner.eq_ignore_ascii_case(name));
        before - reg.completion.len()
    }
}

/// Adapter for hosts with a module list and a name-lookup map
#[derive(Debug, Clone, Copy)]
pub struct LegacyAdapter {
    layout: RegistryLayout,
}

impl Default for LegacyAdapter {
    fn default() -> Self {
        Self {
            layout: RegistryLayout::legacy(),
        }
    }
}

impl RegistryAdapter for LegacyAdapter {
    fn layout(&self) -> RegistryLayout {
        self.layout
    }

    fn lookup(&self, reg: &RegistryHandles<'_>, name: &str) -> Option<ModuleId> {
        reg.lookup.get(&name.to_lowercase()).copied()
    }

    fn insert(&self, reg: &mut RegistryHandles<'_>, record: ModuleRecord) {
        reg.lookup.insert(record.name().to_lowercase(), record.id);
        reg.modules.push(record);
    }

    fn remove(&self, reg: &mut RegistryHandles<'_>, id: ModuleId) -> Option<ModuleRecord> {
        reg.lookup.retain(|_, v| *v != id);
        let index = reg.modules.iter().position(|m| m.id == id)?;
        Some(reg.modules.remove(index))
    }
}

/// Adapter for hosts that mirror modules into a segmented index
#[derive(Debug, Clone, Copy)]
pub struct SegmentedAdapter {
    layout: RegistryLayout,
}

impl Default for SegmentedAdapter {
    fn default() -> Self {
        Self {
            layout: RegistryLayout::segmented(),
        }
    }
}

impl RegistryAdapter for SegmentedAdapter {
    fn layout(&self) -> RegistryLayout {
        self.layout
    }

    fn lookup(&self, reg: &RegistryHandles<'_>, name: &str) -> Option<ModuleId> {
        let key = name.to_lowercase();
        reg.segmented
            .as_deref()
            .and_then(|s| s.lookup_names.get(&key).copied())
            .or_else(|| reg.lookup.get(&key).copied())
    }

    fn insert(&self, reg: &mut RegistryHandles<'_>, record: ModuleRecord) {
        let key = record.name().to_lowercase();
        if let Some(index) = reg.segmented.as_deref_mut() {
            index.plugins.push(record.id);
            index.lookup_names.insert(key.clone(), record.id);
        }
        reg.lookup.insert(key, record.id);
        reg.modules.push(record);
    }

    fn remove(&self, reg: &mut RegistryHandles<'_>, id: ModuleId) -> Option<ModuleRecord> {
        if let Some(index) = reg.segmented.as_deref_mut() {
            index.plugins.retain(|p| *p != id);
            index.lookup_names.retain(|_, v| *v != id);
        }
        reg.lookup.retain(|_, v| *v != id);
        let position = reg.modules.iter().position(|m| m.id == id)?;
        Some(reg.modules.remove(position))
    }
}

/// Pick the adapter for the running host; done once at startup
pub fn probe(host: &HostState) -> Arc<dyn RegistryAdapter> {
    let layout = host.layout();
    info!("Detected {} host registry", layout);
    match layout.variant {
        HostVariant::Legacy => Arc::new(LegacyAdapter::default()),
        HostVariant::Segmented => Arc::new(SegmentedAdapter::default()),
    }
}
