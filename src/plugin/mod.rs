//! Plugin lifecycle management
//!
//! This module loads, unloads and reloads modules packaged as archives in
//! the plugins directory while the host keeps running. It supports:
//!
//! - Statically linked modules and native libraries shipped in the archive
//! - Registry surgery on both Legacy and Segmented host layouts
//! - Content-fingerprint based watching of the plugins directory
//! - Operator commands for every lifecycle operation

pub mod api;
pub mod commands;
pub mod config;
pub mod descriptor;
pub mod fingerprint;
pub mod loader;
pub mod manager;
pub mod registry;
pub mod types;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{GentleUnload, Module, ModuleContext, ModuleFault};
pub use commands::OperatorCommand;
pub use config::{AutoUpdateConfig, PlugConfig, ScanConfig};
pub use descriptor::{CommandSpec, ModuleDescriptor};
pub use fingerprint::{FingerprintStore, IgnoreSet};
pub use loader::{DylibLoader, FactoryLoader, LoadUnit, LoaderChain, ModuleLoader};
pub use manager::PluginManager;
pub use registry::{LegacyAdapter, RegistryAdapter, SegmentedAdapter};
pub use types::*;
pub use watcher::{DirectoryWatcher, LifecycleOps};

// Re-export the macro
pub use crate::export_module;
