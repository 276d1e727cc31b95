pub mod storage;
pub mod store;
pub mod task;

pub use crate::storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageError};
pub use crate::store::{StoreEvent, SubscriptionId, TaskStore, TaskStoreBuilder};
pub use crate::task::{Task, TaskId};
