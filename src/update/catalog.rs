//! Upstream project catalog
//!
//! Maps installed module names to the project the version feed knows them
//! by, plus the optional marketplace resource map.

use crate::core::error::{PlugError, PlugResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Module name to upstream project
#[derive(Debug, Clone)]
pub struct UpstreamCatalog {
    projects: HashMap<String, String>,
    resources: ResourceMap,
}

impl Default for UpstreamCatalog {
    fn default() -> Self {
        let projects = [
            ("geyser-spigot", "geyser"),
            ("geyser", "geyser"),
            ("floodgate", "floodgate"),
        ]
        .into_iter()
        .map(|(name, project)| (name.to_string(), project.to_string()))
        .collect();
        Self {
            projects,
            resources: ResourceMap::default(),
        }
    }
}

impl UpstreamCatalog {
    /// Built-in mappings extended (or overridden) by `extra`
    pub fn new(extra: &HashMap<String, String>) -> Self {
        let mut catalog = Self::default();
        for (name, project) in extra {
            catalog
                .projects
                .insert(name.to_lowercase(), project.clone());
        }
        catalog
    }

    pub fn with_resources(mut self, resources: ResourceMap) -> Self {
        self.resources = resources;
        self
    }

    /// Upstream project for a module name, case-insensitive
    pub fn project_for(&self, name: &str) -> Option<&str> {
        self.projects.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn resource(&self, name: &str) -> Option<ResourceEntry> {
        self.resources.get(name)
    }
}

/// Marketplace identity of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceEntry {
    pub id: u64,
    /// Hosted on SpigotMC rather than BukkitDev
    pub spigotmc: bool,
}

impl ResourceEntry {
    /// Public page of the resource
    pub fn page_url(&self) -> String {
        if self.spigotmc {
            format!("https://www.spigotmc.org/resources/{}", self.id)
        } else {
            format!("https://dev.bukkit.org/projects/{}", self.id)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawResource {
    #[serde(rename = "ID")]
    id: u64,
    #[serde(default)]
    spigotmc: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ResourceFile {
    #[serde(rename = "Resources", default)]
    resources: HashMap<String, RawResource>,
}

/// Resource entries keyed by lowercase module name
#[derive(Debug, Clone, Default)]
pub struct ResourceMap {
    entries: HashMap<String, ResourceEntry>,
}

impl ResourceMap {
    /// Parse the `Resources:` section of a YAML document
    pub fn from_yaml_str(source: &str) -> PlugResult<Self> {
        let file: ResourceFile = serde_yaml::from_str(source)
            .map_err(|e| PlugError::config(format!("resource map: {e}")))?;
        let entries = file
            .resources
            .into_iter()
            .map(|(name, raw)| {
                (
                    name.to_lowercase(),
                    ResourceEntry {
                        id: raw.id,
                        spigotmc: raw.spigotmc,
                    },
                )
            })
            .collect();
        Ok(Self { entries })
    }

    pub async fn from_file(path: impl AsRef<Path>) -> PlugResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PlugError::config(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&content)
    }

    pub fn get(&self, name: &str) -> Option<ResourceEntry> {
        self.entries.get(&name.to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_projects() {
        let catalog = UpstreamCatalog::default();
        assert_eq!(catalog.project_for("Geyser-Spigot"), Some("geyser"));
        assert_eq!(catalog.project_for("GEYSER"), Some("geyser"));
        assert_eq!(catalog.project_for("floodgate"), Some("floodgate"));
        assert_eq!(catalog.project_for("Essentials"), None);
    }

    #[test]
    fn test_configured_projects_extend_builtins() {
        let extra = HashMap::from([("ViaVersion".to_string(), "viaversion".to_string())]);
        let catalog = UpstreamCatalog::new(&extra);
        assert_eq!(catalog.project_for("viaversion"), Some("viaversion"));
        assert_eq!(catalog.project_for("floodgate"), Some("floodgate"));
    }

    #[test]
    fn test_resource_map() {
        let yaml = "Resources:\n  Essentials:\n    ID: 9089\n    spigotmc: true\n  WorldEdit:\n    ID: 31043\n";
        let resources = ResourceMap::from_yaml_str(yaml).unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(
            resources.get("essentials"),
            Some(ResourceEntry {
                id: 9089,
                spigotmc: true
            })
        );
        assert_eq!(
            resources.get("WorldEdit").unwrap().page_url(),
            "https://dev.bukkit.org/projects/31043"
        );

        let catalog = UpstreamCatalog::default().with_resources(resources);
        assert_eq!(catalog.resource("ESSENTIALS").unwrap().id, 9089);
    }

    #[test]
    fn test_resource_map_rejects_missing_id() {
        let err = ResourceMap::from_yaml_str("Resources:\n  Broken:\n    spigotmc: true\n").unwrap_err();
        assert!(matches!(err, PlugError::Config(_)));
        assert!(ResourceMap::from_yaml_str("{}").unwrap().is_empty());
    }
}
