// Copyright (c) 2025 Modswap Contributors
// SPDX-License-Identifier: MIT

//! # modswap
//!
//! Live plugin lifecycle management for a running host: load, unload and
//! reload modules packaged as archives, watch the plugins directory for
//! changes, and keep selected modules up to date from a remote version feed.
//!
//! ## Features
//!
//! - **Registry surgery**: unload leaves no command, alias, listener or
//!   lookup entry behind, on both Legacy and Segmented host layouts
//! - **Gentle unload**: modules can refuse to be unloaded
//! - **Directory watching**: content fingerprints drive automatic load,
//!   unload and reload
//! - **Automatic updates**: version polling, download, swap with a `.old`
//!   backup and a staged restart with countdown warnings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modswap::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Hello;
//!
//! impl Module for Hello {
//!     fn on_enable(&mut self, ctx: &mut ModuleContext<'_>) -> Result<(), ModuleFault> {
//!         ctx.set_executor("hello", |_, _| "Hello!".to_string());
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> PlugResult<()> {
//!     let config = PlugConfig::from_file("modswap.yml").await?;
//!     let loader = FactoryLoader::new().with("hello", || Box::new(Hello) as Box<dyn Module>);
//!
//!     let service = PlugService::start(
//!         config,
//!         HostState::legacy(),
//!         Arc::new(loader),
//!         Arc::new(LogBroadcaster),
//!         Arc::new(LogServerControl),
//!     )
//!     .await?;
//!
//!     println!("{}", service.manager().execute("load Hello").await);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`core`]: Errors, structured error logging and metrics
//! - [`host`]: Host registry state and the serialized main context
//! - [`plugin`]: Descriptors, loaders, registry adapters, the lifecycle
//!   manager, the directory watcher and operator commands
//! - [`update`]: Version client, update checker and restart staging
//! - [`service`]: Wiring of all of the above from a configuration

pub mod core;
pub mod host;
pub mod plugin;
pub mod service;
pub mod update;

// Re-export commonly used types for convenience
pub use core::error::{PlugError, PlugResult};
pub use service::PlugService;

/// Prelude module for convenient imports
///
/// Use `use modswap::prelude::*;` to import everything a host embedding
/// needs.
pub mod prelude {
    pub use crate::core::error::{PlugError, PlugResult};

    pub use crate::host::{
        Broadcaster, HostState, HostVariant, LogBroadcaster, LogServerControl, MainContext,
        RegistryLayout, ServerControl,
    };

    pub use crate::plugin::{
        DylibLoader, FactoryLoader, GentleUnload, HostEvent, LoaderChain, Module, ModuleContext,
        ModuleFault, ModuleLoader, OperatorCommand, PlugConfig, PluginManager,
    };

    pub use crate::service::PlugService;
    pub use crate::update::{UpdateChecker, UpdateResult, UpdateResultType, VersionClient};

    pub use async_trait::async_trait;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let error = PlugError::NotLoaded("Greeter".to_string());
        assert_eq!(error.to_string(), "Greeter is not loaded");
    }
}
