//! Durable key/value storage and path management.
//!
//! The engine persists three logical keys per user:
//!
//! | Key | Contents |
//! |---|---|
//! | `session_current` | snapshot of the in-flight recording, absent when idle |
//! | `pending_queue_<uid>` | JSON array of finished, undelivered activities |
//! | `uploaded_ids_<uid>` | JSON array of ids the server acknowledged |
//!
//! [`FileStore`] keeps one JSON file per key under the data directory and
//! writes through a temp file + rename, so a crash mid-write leaves the old
//! value intact. An empty or corrupt value is logged
//! and treated as absent.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{Result, StrideError};

pub const SESSION_KEY: &str = "session_current";
const DATA_DIR_ENV: &str = "STRIDE_HOME";

pub fn pending_queue_key(user_id: &str) -> String {
    format!("pending_queue_{}", user_id)
}

pub fn uploaded_ids_key(user_id: &str) -> String {
    format!("uploaded_ids_{}", user_id)
}

/// Central configuration for stride's on-disk locations.
///
/// Production code uses [`StorageConfig::resolve`], which honours
/// `STRIDE_HOME` and falls back to `~/.stride`. Tests use
/// [`StorageConfig::with_root`] with a temp directory.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    pub fn resolve() -> Result<Self> {
        if let Some(root) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }
        let home = dirs::home_dir().ok_or(StrideError::DataDirNotFound)?;
        Ok(Self::with_root(home.join(".stride")))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one JSON file per storage key.
    pub fn store_dir(&self) -> PathBuf {
        self.root.join("store")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

/// Host-provided persistent key/value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// One file per key, atomically replaced on every write.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn open(storage: &StorageConfig) -> Self {
        Self::new(storage.store_dir())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

/// Keys embed user ids; keep the file name to a safe character set.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs_err::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StrideError::Io {
                context: format!("read key {}", key),
                source,
            }),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let io_err = |context: String| move |source| StrideError::Io { context, source };

        fs_err::create_dir_all(&self.dir).map_err(io_err(format!(
            "create store dir {}",
            self.dir.display()
        )))?;

        let mut temp_file =
            NamedTempFile::new_in(&self.dir).map_err(io_err(format!("temp file for {}", key)))?;
        temp_file
            .write_all(value.as_bytes())
            .map_err(io_err(format!("write key {}", key)))?;
        temp_file
            .flush()
            .map_err(io_err(format!("flush key {}", key)))?;
        temp_file
            .persist(self.path_for(key))
            .map_err(|e| StrideError::Io {
                context: format!("commit key {}", key),
                source: e.error,
            })?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs_err::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StrideError::Io {
                context: format!("remove key {}", key),
                source,
            }),
        }
    }
}

/// Volatile store for tests and hosts without durable storage.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .map(|entries| entries.get(key).cloned())
            .unwrap_or_default())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
        Ok(())
    }
}

/// Reads and decodes a key, treating unreadable or malformed values as absent.
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let content = match store.get(key) {
        Ok(Some(content)) => content,
        Ok(None) => return None,
        Err(err) => {
            warn!(key, error = %err, "Failed to read stored value, treating as absent");
            return None;
        }
    };

    if content.trim().is_empty() {
        warn!(key, "Empty stored value, treating as absent");
        return None;
    }

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, error = %err, "Corrupt stored value, treating as absent");
            None
        }
    }
}

pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let content = serde_json::to_string(value).map_err(|source| StrideError::Json {
        context: format!("encode key {}", key),
        source,
    })?;
    store.put(key, &content)
}
