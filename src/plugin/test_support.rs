// ! Shared fixtures for unit tests: archive builders and sample modules

use crate::host::{HostState, MainContext};
use crate::plugin::api::{GentleUnload, Module, ModuleContext, ModuleFault};
use crate::plugin::loader::FactoryLoader;
use crate::plugin::manager::PluginManager;
use crate::plugin::registry::probe;
use crate::plugin::types::EventPriority;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::write::FileOptions;

pub fn write_archive(dir: &Path, file: &str, descriptor: &str) -> PathBuf {
    write_archive_with(dir, file, descriptor, &[])
}

pub fn write_archive_with(
    dir: &Path,
    file: &str,
    descriptor: &str,
    extra: &[(&str, &[u8])],
) -> PathBuf {
    let path = dir.join(file);
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    zip.start_file("plugin.yml", FileOptions::default()).unwrap();
    zip.write_all(descriptor.as_bytes()).unwrap();
    for (name, bytes) in extra {
        zip.start_file(*name, FileOptions::default()).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
    path
}

/// Well-behaved module with one command and one listener
#[derive(Default)]
pub struct Greeter;

impl Greeter {
    pub const DESCRIPTOR: &'static str = "name: Greeter\nversion: 1.0.0\nmain: greeter\ncommands:\n  greet:\n    aliases: [hi]\n";

    pub fn boxed() -> Box<dyn Module> {
        Box::new(Self)
    }
}

impl Module for Greeter {
    fn on_enable(&mut self, ctx: &mut ModuleContext<'_>) -> Result<(), ModuleFault> {
        ctx.set_executor("greet", |_, args| format!("Hello, {}!", args.join(" ")));
        ctx.subscribe("player_join", EventPriority::Normal, |_| {});
        Ok(())
    }
}

/// Refuses every gentle unload request
#[derive(Default)]
pub struct Reluctant;

impl Reluctant {
    pub const DESCRIPTOR: &'static str = "name: Reluctant\nversion: 0.3.0\nmain: reluctant\ncommands:\n  stay: {}\n";

    pub fn boxed() -> Box<dyn Module> {
        Box::new(Self)
    }
}

impl Module for Reluctant {
    fn on_enable(&mut self, ctx: &mut ModuleContext<'_>) -> Result<(), ModuleFault> {
        ctx.set_executor("stay", |_, _| "still here".to_string());
        Ok(())
    }

    fn gentle_unload(&mut self) -> Option<&mut dyn GentleUnload> {
        Some(self)
    }
}

impl GentleUnload for Reluctant {
    fn asking_for_gentle_unload(&mut self) -> bool {
        false
    }
}

/// Fails while enabling, after registering a listener
#[derive(Default)]
pub struct Broken;

impl Broken {
    pub const DESCRIPTOR: &'static str = "name: Broken\nversion: 0.0.1\nmain: broken\ncommands:\n  crash: {}\n";

    pub fn boxed() -> Box<dyn Module> {
        Box::new(Self)
    }
}

impl Module for Broken {
    fn on_enable(&mut self, ctx: &mut ModuleContext<'_>) -> Result<(), ModuleFault> {
        ctx.subscribe("player_join", EventPriority::High, |_| {});
        Err("enable failed".into())
    }
}

pub fn sample_loader() -> FactoryLoader {
    FactoryLoader::new()
        .with("greeter", Greeter::boxed)
        .with("reluctant", Reluctant::boxed)
        .with("broken", Broken::boxed)
}

/// Manager over a fresh host of the given shape, driving `dir`
pub fn manager_for(host: HostState, dir: &Path) -> PluginManager {
    let adapter = probe(&host);
    let main = MainContext::start(host);
    PluginManager::new(main, adapter, Arc::new(sample_loader()), dir)
}
