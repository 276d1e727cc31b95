use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::Task;

/// Envelope version written alongside the task list.
pub const STATE_VERSION: u32 = 0;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed storage record `{key}`: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported storage record version {found} for `{key}`")]
    Version { key: String, found: u32 },
}

/// Named string records, in the manner of a browser's local storage.
pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// Backing file for `key`, when the storage lives on disk.
    fn path_for(&self, _key: &str) -> Option<PathBuf> {
        None
    }
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn file_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.file_for(key);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).map_err(|source| StorageError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.file_for(key);
        fs::write(&path, value).map_err(|source| StorageError::Io { path, source })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let path = self.file_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        Some(self.file_for(key))
    }
}

/// Process-local storage, used by tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.write().remove(key);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    state: PersistedTodos,
    #[serde(default)]
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedTodos {
    #[serde(default)]
    todos: Vec<Task>,
}

/// Serialize the snapshot into the durable envelope.
pub fn encode_snapshot(tasks: &[Task]) -> Result<String, serde_json::Error> {
    let envelope = PersistedState {
        state: PersistedTodos {
            todos: tasks.to_vec(),
        },
        version: STATE_VERSION,
    };
    serde_json::to_string(&envelope)
}

pub fn decode_snapshot(key: &str, raw: &str) -> Result<Vec<Task>, StorageError> {
    let envelope: PersistedState =
        serde_json::from_str(raw).map_err(|source| StorageError::Malformed {
            key: key.to_string(),
            source,
        })?;
    if envelope.version != STATE_VERSION {
        return Err(StorageError::Version {
            key: key.to_string(),
            found: envelope.version,
        });
    }
    Ok(envelope.state.todos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn snapshot_survives_encode_and_decode() {
        let mut done = Task::new("Call Mom");
        done.completed = true;
        let tasks = vec![Task::new("Buy milk"), done];

        let raw = encode_snapshot(&tasks).unwrap();
        assert!(raw.contains("\"state\""));
        assert!(raw.contains("\"version\":0"));

        let decoded = decode_snapshot("todo-storage", &raw).unwrap();
        assert_eq!(decoded, tasks);
    }

    #[test]
    fn decode_rejects_foreign_shapes() {
        assert!(matches!(
            decode_snapshot("k", "not json"),
            Err(StorageError::Malformed { .. })
        ));
        assert!(matches!(
            decode_snapshot("k", r#"[{"id": 1, "text": "old"}]"#),
            Err(StorageError::Malformed { .. })
        ));
        assert!(matches!(
            decode_snapshot("k", r#"{"state":{"todos":[]},"version":3}"#),
            Err(StorageError::Version { found: 3, .. })
        ));
    }

    #[test]
    fn file_storage_reads_back_what_it_wrote() {
        let temp = tempdir().unwrap();
        let storage = FileStorage::new(temp.path().join("nested"));

        assert_eq!(storage.get_item("todo-storage").unwrap(), None);
        storage.set_item("todo-storage", "{}").unwrap();
        assert_eq!(
            storage.get_item("todo-storage").unwrap().as_deref(),
            Some("{}")
        );
        assert!(storage
            .path_for("todo-storage")
            .unwrap()
            .ends_with("todo-storage.json"));

        storage.remove_item("todo-storage").unwrap();
        storage.remove_item("todo-storage").unwrap();
        assert_eq!(storage.get_item("todo-storage").unwrap(), None);
    }

    #[test]
    fn file_names_are_sanitized() {
        let storage = FileStorage::new("/tmp/x");
        let path = storage.path_for("../escape me").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/x/___escape_me.json"));
    }
}
