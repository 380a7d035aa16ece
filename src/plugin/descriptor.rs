//! Plugin archives and their `plugin.yml` descriptors.
//!
//! An artifact is a zip archive in the plugins directory carrying a
//! `plugin.yml` entry at its root. Everything here is blocking file I/O
//! and is meant to run on a background worker.

use crate::core::error::{PlugError, PlugResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Extension of the host's native plugin archive
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Descriptor entry inside an archive
pub const DESCRIPTOR_ENTRY: &str = "plugin.yml";

/// Module metadata declared by an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Module name, unique case-insensitively while loaded
    pub name: String,

    /// Module version
    pub version: String,

    /// Entry point: a factory key for statically linked modules
    pub main: String,

    /// Archive entry holding the native library, for dynamic modules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    /// Hard dependencies
    #[serde(default)]
    pub depend: Vec<String>,

    /// Soft dependencies
    #[serde(default)]
    pub softdepend: Vec<String>,

    /// Commands keyed by label
    #[serde(default)]
    pub commands: BTreeMap<String, CommandSpec>,
}

/// A command declared in the descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
}

impl ModuleDescriptor {
    /// Parse and validate descriptor YAML
    pub fn from_yaml(source: &str, origin: &str) -> PlugResult<Self> {
        let descriptor: ModuleDescriptor = serde_yaml::from_str(source)
            .map_err(|e| PlugError::invalid_descriptor(origin, e.to_string()))?;
        descriptor.validate(origin)?;
        Ok(descriptor)
    }

    fn validate(&self, origin: &str) -> PlugResult<()> {
        if self.name.trim().is_empty() {
            return Err(PlugError::invalid_descriptor(origin, "name is empty"));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '.' | '-'))
        {
            return Err(PlugError::invalid_descriptor(
                origin,
                format!("name '{}' contains invalid characters", self.name),
            ));
        }
        if self.version.trim().is_empty() {
            return Err(PlugError::invalid_descriptor(origin, "version is empty"));
        }
        if self.main.trim().is_empty() {
            return Err(PlugError::invalid_descriptor(origin, "main is empty"));
        }
        Ok(())
    }

    /// Name with version, as shown to operators
    pub fn full_name(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}

/// Whether a path names a plugin archive
pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}

/// Plugin archives directly inside `dir`, sorted by file name
pub fn list_archives(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if is_archive(&path) {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}

/// Read the descriptor embedded in an archive
pub fn read_descriptor(path: &Path) -> PlugResult<ModuleDescriptor> {
    let origin = path.display().to_string();
    let file = File::open(path).map_err(|e| PlugError::invalid_descriptor(&origin, e.to_string()))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| PlugError::invalid_descriptor(&origin, format!("not an archive: {e}")))?;
    let mut entry = archive.by_name(DESCRIPTOR_ENTRY).map_err(|_| {
        PlugError::invalid_descriptor(&origin, format!("archive does not contain {DESCRIPTOR_ENTRY}"))
    })?;

    let mut source = String::new();
    entry
        .read_to_string(&mut source)
        .map_err(|e| PlugError::invalid_descriptor(&origin, e.to_string()))?;

    ModuleDescriptor::from_yaml(&source, &origin)
}

/// Read one raw entry from an archive
pub fn read_entry(path: &Path, name: &str) -> PlugResult<Vec<u8>> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut entry = archive.by_name(name)?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Resolve the archive for a module name.
///
/// An archive named `<name>.zip` wins, whatever the case of its extension;
/// otherwise the first archive (in file-name order) whose descriptor
/// declares the name case-insensitively. Archives with unreadable
/// descriptors are skipped.
pub fn find_archive(dir: &Path, name: &str) -> PlugResult<(PathBuf, ModuleDescriptor)> {
    let archives = list_archives(dir).map_err(|_| PlugError::ArtifactNotFound(name.to_string()))?;

    let direct = archives
        .iter()
        .find(|path| path.file_stem().is_some_and(|stem| stem == name));
    if let Some(path) = direct {
        let descriptor = read_descriptor(path)?;
        return Ok((path.clone(), descriptor));
    }

    for path in archives {
        match read_descriptor(&path) {
            Ok(descriptor) if descriptor.name.eq_ignore_ascii_case(name) => {
                return Ok((path, descriptor));
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("Skipping {}: {}", path.display(), e),
        }
    }

    Err(PlugError::ArtifactNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::test_support::write_archive;
    use tempfile::TempDir;

    const GREETER: &str = "name: Greeter\nversion: 1.0.0\nmain: greeter\ncommands:\n  greet:\n    aliases: [hi]\n";

    #[test]
    fn test_parse_descriptor() {
        let descriptor = ModuleDescriptor::from_yaml(GREETER, "inline").unwrap();
        assert_eq!(descriptor.name, "Greeter");
        assert_eq!(descriptor.full_name(), "Greeter v1.0.0");
        assert_eq!(descriptor.commands["greet"].aliases, vec!["hi".to_string()]);
        assert!(descriptor.library.is_none());
    }

    #[test]
    fn test_missing_fields_are_invalid() {
        let err = ModuleDescriptor::from_yaml("name: X\nversion: 1\n", "inline").unwrap_err();
        assert!(matches!(err, PlugError::InvalidDescriptor { .. }));

        let err = ModuleDescriptor::from_yaml("name: 'bad/name'\nversion: 1\nmain: m\n", "inline")
            .unwrap_err();
        assert!(err.to_string().contains("invalid characters"));
    }

    #[test]
    fn test_read_descriptor_from_archive() {
        let dir = TempDir::new().unwrap();
        let path = write_archive(dir.path(), "Greeter.zip", GREETER);

        let descriptor = read_descriptor(&path).unwrap();
        assert_eq!(descriptor.name, "Greeter");
    }

    #[test]
    fn test_archive_without_descriptor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Empty.zip");
        let file = File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("README", zip::write::FileOptions::default())
            .unwrap();
        writer.finish().unwrap();

        let err = read_descriptor(&path).unwrap_err();
        assert!(err.to_string().contains(DESCRIPTOR_ENTRY));
    }

    #[test]
    fn test_find_archive_by_declared_name() {
        let dir = TempDir::new().unwrap();
        write_archive(dir.path(), "greeter-1.0.0.zip", GREETER);
        std::fs::write(dir.path().join("notes.txt"), "not a plugin").unwrap();
        std::fs::write(dir.path().join("broken.zip"), "garbage").unwrap();

        let (path, descriptor) = find_archive(dir.path(), "greeter").unwrap();
        assert!(path.ends_with("greeter-1.0.0.zip"));
        assert_eq!(descriptor.name, "Greeter");

        let err = find_archive(dir.path(), "Missing").unwrap_err();
        assert_eq!(err, PlugError::ArtifactNotFound("Missing".to_string()));
    }

    #[test]
    fn test_find_archive_by_file_stem_with_upper_case_extension() {
        let dir = TempDir::new().unwrap();
        write_archive(dir.path(), "Tools.ZIP", GREETER);

        let (path, descriptor) = find_archive(dir.path(), "Tools").unwrap();
        assert!(path.ends_with("Tools.ZIP"));
        assert_eq!(descriptor.name, "Greeter");
    }

    #[test]
    fn test_list_archives_is_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        write_archive(dir.path(), "b.zip", GREETER);
        write_archive(dir.path(), "a.ZIP", GREETER);
        std::fs::write(dir.path().join("c.zip.old"), "").unwrap();
        std::fs::create_dir(dir.path().join("d.zip")).unwrap();

        let names: Vec<String> = list_archives(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.ZIP".to_string(), "b.zip".to_string()]);
    }
}
