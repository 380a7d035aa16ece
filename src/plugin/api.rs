// ! Module API definitions
// !
// ! Module defines the traits and types a loadable module implements to
// ! be driven by the lifecycle manager, plus the export macro used by
// ! modules shipped as dynamic libraries.

use crate::plugin::descriptor::ModuleDescriptor;
use crate::plugin::types::{CommandExecutor, EventHandler, EventPriority, HostEvent};
use std::collections::HashMap;
use std::sync::Arc;

/// ABI revision a dynamic module must report through `_modswap_abi_version`
pub const MODULE_ABI_VERSION: u32 = 1;

/// Error a module hook may return
pub type ModuleFault = Box<dyn std::error::Error + Send + Sync>;

/// Core trait every loadable module implements
///
/// All hooks run on the host's main context, never concurrently with
/// registry dispatch.
pub trait Module: Send {
    /// Called once after instantiation, before the module is registered
    fn on_load(&mut self) -> Result<(), ModuleFault> {
        Ok(())
    }

    /// Called when the module is enabled; registers executors and listeners
    fn on_enable(&mut self, _ctx: &mut ModuleContext<'_>) -> Result<(), ModuleFault> {
        Ok(())
    }

    /// Called when the module is disabled or about to be unloaded
    fn on_disable(&mut self) {}

    /// Cooperative unload capability; `None` means unload without asking
    fn gentle_unload(&mut self) -> Option<&mut dyn GentleUnload> {
        None
    }
}

/// Capability for modules that want a say before being unloaded
pub trait GentleUnload: Send {
    /// Return false to refuse the unload; the registry is left untouched
    fn asking_for_gentle_unload(&mut self) -> bool;
}

/// Constructor for statically linked modules
pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn Module> + Send + Sync>;

/// Dynamic library entry point signature
pub type ModuleCreateFn = unsafe extern "C" fn() -> *mut Box<dyn Module>;

/// Registrations collected while a module is being enabled
pub struct ModuleContext<'a> {
    descriptor: &'a ModuleDescriptor,
    executors: HashMap<String, CommandExecutor>,
    shared: Vec<(String, CommandExecutor)>,
    subscriptions: Vec<(String, EventPriority, EventHandler)>,
}

/// Everything a module registered during `on_enable`
pub(crate) struct ContextParts {
    pub executors: HashMap<String, CommandExecutor>,
    pub shared: Vec<(String, CommandExecutor)>,
    pub subscriptions: Vec<(String, EventPriority, EventHandler)>,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn new(descriptor: &'a ModuleDescriptor) -> Self {
        Self {
            descriptor,
            executors: HashMap::new(),
            shared: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    /// Descriptor of the module being enabled
    pub fn descriptor(&self) -> &ModuleDescriptor {
        self.descriptor
    }

    /// Bind an executor to a command declared in the descriptor.
    ///
    /// Labels the descriptor does not declare are ignored when the
    /// registrations are applied.
    pub fn set_executor<F>(&mut self, label: &str, executor: F)
    where
        F: Fn(&str, &[String]) -> String + Send + Sync + 'static,
    {
        self.executors
            .insert(label.to_ascii_lowercase(), Arc::new(executor));
    }

    /// Contribute a segment to a command label shared with other modules
    pub fn attach_command<F>(&mut self, label: &str, executor: F)
    where
        F: Fn(&str, &[String]) -> String + Send + Sync + 'static,
    {
        self.shared
            .push((label.to_ascii_lowercase(), Arc::new(executor)));
    }

    /// Subscribe to a host event kind
    pub fn subscribe<F>(&mut self, kind: &str, priority: EventPriority, handler: F)
    where
        F: Fn(&HostEvent) + Send + Sync + 'static,
    {
        self.subscriptions
            .push((kind.to_string(), priority, Arc::new(handler)));
    }

    pub(crate) fn into_parts(self) -> ContextParts {
        ContextParts {
            executors: self.executors,
            shared: self.shared,
            subscriptions: self.subscriptions,
        }
    }
}

/// Export a `Default` module type from a `cdylib` with the modswap ABI
#[macro_export]
macro_rules! export_module {
    ($module_type:ty) => {
        /// Module creation function with C ABI
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn _modswap_module_create() -> *mut Box<dyn $crate::plugin::Module> {
            let module: Box<dyn $crate::plugin::Module> = Box::new(<$module_type>::default());
            Box::into_raw(Box::new(module))
        }

        /// ABI revision the module was built against
        #[unsafe(no_mangle)]
        pub extern "C" fn _modswap_abi_version() -> u32 {
            $crate::plugin::api::MODULE_ABI_VERSION
        }
    };
}
