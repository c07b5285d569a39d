/*
[INPUT]:  String keys and values from the key vault, token store and session records
[OUTPUT]: Persisted key-value entries (in memory or in a JSON file)
[POS]:    Persistence layer - injectable storage behind every persisted record
[UPDATE]: When adding a storage backend or changing the on-disk format
*/

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use tempfile::NamedTempFile;

use crate::error::{ClearnodeError, Result};

/// Key-value storage used for all persisted client state.
///
/// Keys are plain strings scoped by the caller (`<kind>_<wallet>`). Only the
/// owning session manager writes its wallet's entries.
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if absent
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace a value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value; removing an absent key is not an error
    fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory store, lost on drop
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = self
            .entries
            .read()
            .map_err(|_| ClearnodeError::Storage("memory store lock poisoned".to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| ClearnodeError::Storage("memory store lock poisoned".to_string()))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| ClearnodeError::Storage("memory store lock poisoned".to_string()))?;
        guard.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file.
///
/// Every write rewrites the file through a temp file in the same directory
/// and then renames it, so a crash never leaves a half-written store. A
/// failed write leaves the in-memory view unchanged as well. The
/// file holds session keys and is restricted to the owner (0o600).
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }

        let mut temp = NamedTempFile::new_in(&dir)?;
        let content = serde_json::to_string_pretty(entries)?;
        temp.write_all(content.as_bytes())?;
        temp.flush()?;
        temp.persist(&self.path)
            .map_err(|e| ClearnodeError::Storage(format!("persist {}: {e}", self.path.display())))?;

        let mut perms = fs::metadata(&self.path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&self.path, perms)?;

        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| ClearnodeError::Storage("file store lock poisoned".to_string()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        next.insert(key.to_string(), value.to_string());
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut guard = self.lock()?;
        if !guard.contains_key(key) {
            return Ok(());
        }
        let mut next = guard.clone();
        next.remove(key);
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }
}
