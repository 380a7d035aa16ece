// ! Artifact fingerprints and the ignore set
// !
// ! Module keeps the per-file content hashes the directory watcher compares
// ! against, with a reverse map from file name to the module it produced.

use crate::core::error::{PlugError, PlugResult};
use crate::plugin::descriptor::{list_archives, read_descriptor};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Name of the manager itself; never touched by automated actions
pub const SELF_MODULE_NAME: &str = "modswap";

/// SHA-256 of a file, lowercase hex
pub fn hash_file(path: &Path) -> PlugResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// [`hash_file`] on the blocking pool
pub async fn hash_file_async(path: &Path) -> PlugResult<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file(&path))
        .await
        .map_err(|e| PlugError::Io(format!("hash worker failed: {e}")))?
}

/// File name to content hash, and file name to owning module
#[derive(Debug, Default)]
pub struct FingerprintStore {
    hashes: RwLock<HashMap<String, String>>,
    owners: RwLock<HashMap<String, String>>,
}

impl FingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash every archive in `dir` and remember which module each declares.
    ///
    /// Unreadable archives still get a hash so they are not reported as
    /// new on the first scan.
    pub async fn seed(&self, dir: &Path) -> PlugResult<usize> {
        let dir = dir.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || -> PlugResult<Vec<(String, String, Option<String>)>> {
            if !dir.is_dir() {
                return Ok(Vec::new());
            }
            let mut entries = Vec::new();
            for path in list_archives(&dir)? {
                let Some(file) = path.file_name().map(|f| f.to_string_lossy().to_string()) else {
                    continue;
                };
                let hash = match hash_file(&path) {
                    Ok(hash) => hash,
                    Err(e) => {
                        warn!("Could not hash {}: {}", path.display(), e);
                        continue;
                    }
                };
                let owner = match read_descriptor(&path) {
                    Ok(descriptor) => Some(descriptor.name),
                    Err(e) => {
                        warn!("Skipping descriptor of {}: {}", file, e);
                        None
                    }
                };
                entries.push((file, hash, owner));
            }
            Ok(entries)
        })
        .await
        .map_err(|e| PlugError::Io(format!("seed worker failed: {e}")))??;

        let count = entries.len();
        let mut hashes = self.hashes.write().await;
        let mut owners = self.owners.write().await;
        for (file, hash, owner) in entries {
            if let Some(owner) = owner {
                owners.insert(file.clone(), owner);
            }
            hashes.insert(file, hash);
        }
        debug!("Seeded {} fingerprints", count);
        Ok(count)
    }

    pub async fn hash_of(&self, file: &str) -> Option<String> {
        self.hashes.read().await.get(file).cloned()
    }

    pub async fn contains(&self, file: &str) -> bool {
        self.hashes.read().await.contains_key(file)
    }

    pub async fn set_hash(&self, file: &str, hash: String) {
        self.hashes.write().await.insert(file.to_string(), hash);
    }

    pub async fn set_owner(&self, file: &str, module: &str) {
        self.owners
            .write()
            .await
            .insert(file.to_string(), module.to_string());
    }

    /// Record both the hash and the owning module of a file
    pub async fn record(&self, file: &str, hash: String, module: &str) {
        self.set_hash(file, hash).await;
        self.set_owner(file, module).await;
    }

    pub async fn owner_of(&self, file: &str) -> Option<String> {
        self.owners.read().await.get(file).cloned()
    }

    /// Drop a file's fingerprint and owner
    pub async fn remove(&self, file: &str) {
        self.hashes.write().await.remove(file);
        self.owners.write().await.remove(file);
    }

    pub async fn files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.hashes.read().await.keys().cloned().collect();
        files.sort();
        files
    }

    pub async fn len(&self) -> usize {
        self.hashes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.hashes.read().await.is_empty()
    }
}

/// Module names exempt from automated lifecycle actions
#[derive(Debug, Clone)]
pub struct IgnoreSet {
    names: HashSet<String>,
}

impl IgnoreSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set: HashSet<String> = names
            .into_iter()
            .map(|n| n.as_ref().to_lowercase())
            .collect();
        set.insert(SELF_MODULE_NAME.to_string());
        Self { names: set }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for IgnoreSet {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}
