use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::storage::{decode_snapshot, encode_snapshot, KeyValueStorage, MemoryStorage};
use crate::task::{is_blank, Task, TaskId};

pub const DEFAULT_STORAGE_KEY: &str = "todo-storage";

/// Change notification delivered to subscribers after a mutation is flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Added(Task),
    Toggled { id: TaskId, completed: bool },
    Updated { id: TaskId, text: String },
    Deleted(Task),
    /// The durable record was replaced by another writer.
    Reloaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// Ordered task table mirrored to durable storage on every mutation.
pub struct TaskStore {
    key: String,
    storage: Arc<dyn KeyValueStorage>,
    tasks: RwLock<Vec<Task>>,
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

pub struct TaskStoreBuilder {
    key: String,
    storage: Option<Arc<dyn KeyValueStorage>>,
}

impl TaskStoreBuilder {
    pub fn new() -> Self {
        Self {
            key: DEFAULT_STORAGE_KEY.to_string(),
            storage: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn build(self) -> TaskStore {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let tasks = load_snapshot(storage.as_ref(), &self.key).unwrap_or_default();
        info!(key = %self.key, count = tasks.len(), "task store initialized");
        TaskStore {
            key: self.key,
            storage,
            tasks: RwLock::new(tasks),
            listeners: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            watcher: Mutex::new(None),
        }
    }
}

impl Default for TaskStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn builder() -> TaskStoreBuilder {
        TaskStoreBuilder::new()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.read().clone()
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.read().iter().find(|task| task.id == id).cloned()
    }

    pub fn active(&self) -> Vec<Task> {
        self.tasks
            .read()
            .iter()
            .filter(|task| task.is_active())
            .cloned()
            .collect()
    }

    pub fn completed(&self) -> Vec<Task> {
        self.tasks
            .read()
            .iter()
            .filter(|task| task.completed)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    pub fn add_task(&self, text: &str) -> Option<TaskId> {
        if is_blank(text) {
            debug!("ignoring blank task");
            return None;
        }
        let task = Task::new(text);
        let id = task.id;
        {
            let mut tasks = self.tasks.write();
            tasks.push(task.clone());
            self.flush(&tasks);
        }
        debug!(%id, "task added");
        self.emit(&StoreEvent::Added(task));
        Some(id)
    }

    /// Flips completion and returns the new state, or `None` for an unknown id.
    pub fn toggle_task(&self, id: TaskId) -> Option<bool> {
        let completed = {
            let mut tasks = self.tasks.write();
            let task = tasks.iter_mut().find(|task| task.id == id)?;
            task.completed = !task.completed;
            let completed = task.completed;
            self.flush(&tasks);
            completed
        };
        debug!(%id, completed, "task toggled");
        self.emit(&StoreEvent::Toggled { id, completed });
        Some(completed)
    }

    pub fn delete_task(&self, id: TaskId) -> bool {
        let removed = {
            let mut tasks = self.tasks.write();
            let Some(index) = tasks.iter().position(|task| task.id == id) else {
                return false;
            };
            let removed = tasks.remove(index);
            self.flush(&tasks);
            removed
        };
        debug!(%id, "task deleted");
        self.emit(&StoreEvent::Deleted(removed));
        true
    }

    pub fn update_task(&self, id: TaskId, text: &str) -> bool {
        if is_blank(text) {
            debug!(%id, "ignoring blank task update");
            return false;
        }
        {
            let mut tasks = self.tasks.write();
            let Some(task) = tasks.iter_mut().find(|task| task.id == id) else {
                return false;
            };
            task.text = text.to_string();
            self.flush(&tasks);
        }
        debug!(%id, "task updated");
        self.emit(&StoreEvent::Updated {
            id,
            text: text.to_string(),
        });
        true
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Re-read the durable record. Returns `true` when the in-memory
    /// snapshot changed as a result. An unreadable record leaves memory as is.
    pub fn reload(&self) -> bool {
        {
            // Read under the write lock so a concurrent mutation cannot be
            // overwritten by an older record.
            let mut tasks = self.tasks.write();
            let Some(loaded) = load_snapshot(self.storage.as_ref(), &self.key) else {
                return false;
            };
            if *tasks == loaded {
                return false;
            }
            *tasks = loaded;
        }
        info!(key = %self.key, "task snapshot reloaded from storage");
        self.emit(&StoreEvent::Reloaded);
        true
    }

    /// Follow writes made to the durable record by other processes.
    ///
    /// Only file-backed storage can be watched; for anything else this is a no-op.
    pub fn watch(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return Ok(());
        }
        let Some(record) = self.storage.path_for(&self.key) else {
            debug!(key = %self.key, "storage is not file-backed, skipping watch");
            return Ok(());
        };
        let Some(dir) = record.parent().map(PathBuf::from) else {
            return Ok(());
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("unable to prepare {}", dir.display()))?;

        let store: Weak<TaskStore> = Arc::downgrade(self);
        let target = record.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    warn!(%err, "storage watcher error");
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            if !event.paths.iter().any(|path| path == &target) {
                return;
            }
            debug!(?event, "storage record changed");
            if let Some(store) = store.upgrade() {
                store.reload();
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = %record.display(), "watching task record");
        *slot = Some(watcher);
        Ok(())
    }
}

impl TaskStore {
    /// Write-through flush. Failures leave the in-memory snapshot authoritative.
    fn flush(&self, tasks: &[Task]) {
        let raw = match encode_snapshot(tasks) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key = %self.key, %err, "unable to encode task snapshot");
                return;
            }
        };
        if let Err(err) = self.storage.set_item(&self.key, &raw) {
            warn!(key = %self.key, %err, "task snapshot not persisted");
        }
    }

    fn emit(&self, event: &StoreEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

// `None` when the record exists but cannot be used.
fn load_snapshot(storage: &dyn KeyValueStorage, key: &str) -> Option<Vec<Task>> {
    let raw = match storage.get_item(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Some(Vec::new()),
        Err(err) => {
            warn!(key, %err, "unable to read task record");
            return None;
        }
    };
    let tasks = match decode_snapshot(key, &raw) {
        Ok(tasks) => tasks,
        Err(err) => {
            warn!(key, %err, "discarding unreadable task record");
            return None;
        }
    };
    let mut seen = HashSet::new();
    let before = tasks.len();
    let unique: Vec<Task> = tasks.into_iter().filter(|task| seen.insert(task.id)).collect();
    if unique.len() != before {
        warn!(key, dropped = before - unique.len(), "dropped duplicate task ids");
    }
    Some(unique)
}
