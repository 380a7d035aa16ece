//! Fixtures shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use modswap::PlugResult;
use modswap::host::{Broadcaster, HostState, MainContext, ServerControl};
use modswap::plugin::registry::probe;
use modswap::plugin::{
    EventPriority, FactoryLoader, GentleUnload, LifecycleOps, Module, ModuleContext, ModuleFault,
    PluginManager,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use zip::write::FileOptions;

pub fn write_archive(dir: &Path, file: &str, descriptor: &str) -> PathBuf {
    let path = dir.join(file);
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    zip.start_file("plugin.yml", FileOptions::default()).unwrap();
    zip.write_all(descriptor.as_bytes()).unwrap();
    zip.finish().unwrap();
    path
}

pub fn descriptor(name: &str, version: &str, main: &str, commands: &str) -> String {
    format!("name: {name}\nversion: '{version}'\nmain: {main}\n{commands}")
}

/// One declared command with an alias, plus a listener
#[derive(Default)]
pub struct Chatty;

impl Module for Chatty {
    fn on_enable(&mut self, ctx: &mut ModuleContext<'_>) -> Result<(), ModuleFault> {
        let name = ctx.descriptor().name.clone();
        ctx.set_executor("chat", move |_, args| format!("[{name}] {}", args.join(" ")));
        ctx.subscribe("player_chat", EventPriority::Low, |_| {});
        Ok(())
    }
}

/// Contributes a segment to the shared `spawn` command
#[derive(Default)]
pub struct SpawnPart;

impl Module for SpawnPart {
    fn on_enable(&mut self, ctx: &mut ModuleContext<'_>) -> Result<(), ModuleFault> {
        let name = ctx.descriptor().name.clone();
        ctx.attach_command("spawn", move |_, _| format!("{name} spawned"));
        Ok(())
    }
}

/// Consents or refuses unload depending on `willing`
pub struct Negotiator {
    pub willing: bool,
}

impl Module for Negotiator {
    fn gentle_unload(&mut self) -> Option<&mut dyn GentleUnload> {
        Some(self)
    }
}

impl GentleUnload for Negotiator {
    fn asking_for_gentle_unload(&mut self) -> bool {
        self.willing
    }
}

/// Fails in `on_enable` after registering a listener
#[derive(Default)]
pub struct Faulty;

impl Module for Faulty {
    fn on_enable(&mut self, ctx: &mut ModuleContext<'_>) -> Result<(), ModuleFault> {
        ctx.subscribe("player_chat", EventPriority::Monitor, |_| {});
        Err("cannot start".into())
    }
}

pub fn loader() -> FactoryLoader {
    FactoryLoader::new()
        .with("chatty", || Box::new(Chatty) as Box<dyn Module>)
        .with("spawn", || Box::new(SpawnPart) as Box<dyn Module>)
        .with("willing", || Box::new(Negotiator { willing: true }) as Box<dyn Module>)
        .with("stubborn", || Box::new(Negotiator { willing: false }) as Box<dyn Module>)
        .with("faulty", || Box::new(Faulty) as Box<dyn Module>)
}

/// Route library logs to the test output; `RUST_LOG=debug` shows registry surgery
pub fn init_logging() {
    modswap::core::logging::init_tracing();
}

pub fn manager(host: HostState, dir: &Path) -> PluginManager {
    init_logging();
    let adapter = probe(&host);
    PluginManager::new(MainContext::start(host), adapter, Arc::new(loader()), dir)
}

/// Records every broadcast
#[derive(Default)]
pub struct RecordingBroadcaster {
    pub messages: Mutex<Vec<String>>,
    pub admin_messages: Mutex<Vec<String>>,
}

impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }

    fn broadcast_to_permission(&self, _permission: &str, message: &str) {
        self.admin_messages.lock().unwrap().push(message.to_string());
    }
}

/// Counts restart and shutdown requests; restart fails when `fail_restart`
#[derive(Default)]
pub struct RecordingControl {
    pub fail_restart: bool,
    pub restarts: Mutex<u32>,
    pub shutdowns: Mutex<u32>,
}

impl ServerControl for RecordingControl {
    fn restart(&self) -> PlugResult<()> {
        *self.restarts.lock().unwrap() += 1;
        if self.fail_restart {
            Err(modswap::PlugError::config("no restart script"))
        } else {
            Ok(())
        }
    }

    fn shutdown(&self) {
        *self.shutdowns.lock().unwrap() += 1;
    }
}

/// Lifecycle calls seen by the watcher
#[derive(Default)]
pub struct RecordingOps {
    pub calls: Mutex<Vec<String>>,
    pub loaded: Mutex<Vec<String>>,
}

impl RecordingOps {
    pub fn with_loaded(names: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            loaded: Mutex::new(names.iter().map(|n| n.to_string()).collect()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LifecycleOps for RecordingOps {
    async fn load(&self, name: &str) -> PlugResult<String> {
        self.calls.lock().unwrap().push(format!("load {name}"));
        Ok(format!("{name} loaded"))
    }

    async fn unload(&self, name: &str) -> PlugResult<String> {
        self.calls.lock().unwrap().push(format!("unload {name}"));
        self.loaded.lock().unwrap().retain(|n| n != name);
        Ok(format!("{name} unloaded"))
    }

    async fn reload(&self, name: &str) -> PlugResult<String> {
        self.calls.lock().unwrap().push(format!("reload {name}"));
        Ok(format!("{name} reloaded"))
    }

    async fn is_loaded(&self, name: &str) -> bool {
        self.loaded.lock().unwrap().iter().any(|n| n.eq_ignore_ascii_case(name))
    }
}
