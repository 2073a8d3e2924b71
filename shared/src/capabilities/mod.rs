//! Collaborator seams.
//!
//! The hosted backend, object storage, persistent key-value store, platform
//! connectivity and session are consumed only through these traits. Each
//! comes with an in-process implementation for previews and tests.
mod backend;
mod kv;
mod platform;
mod storage;

pub use self::backend::{Backend, BackendCall, MemoryBackend};
pub use self::kv::{
    KeyNamespace, KeyValueStore, KvError, KvKey, MemoryKvStore, StorageErrorCode, MAX_KEY_LENGTH,
    MAX_VALUE_SIZE,
};
pub use self::platform::{ConnectivitySignal, SessionProvider, StaticSession, StaticSignal};
pub use self::storage::{MemoryObjectStore, ObjectStore, StoredObject};

#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use self::kv::SqliteKvStore;
