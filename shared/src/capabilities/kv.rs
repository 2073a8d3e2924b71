use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

pub const MAX_KEY_LENGTH: usize = 512;
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey {
    namespace: KeyNamespace,
    key: String,
}

impl KvKey {
    pub fn new(namespace: KeyNamespace, key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self { namespace, key })
    }

    pub fn raw(&self) -> String {
        format!("{}:{}", self.namespace.prefix(), self.key)
    }

    fn validate_key(key: &str) -> Result<(), KvError> {
        if key.trim().is_empty() {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot be empty".to_string(),
            });
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(KvError::InvalidKey {
                key: key.chars().take(50).collect::<String>() + "...",
                reason: format!("key exceeds maximum length of {} bytes", MAX_KEY_LENGTH),
            });
        }

        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot contain path traversal sequences".to_string(),
            });
        }

        if key.chars().any(|c| c.is_control()) {
            return Err(KvError::InvalidKey {
                key: key.escape_default().to_string(),
                reason: "key contains invalid control characters".to_string(),
            });
        }

        Ok(())
    }
}

/// Stored keys are `settings:<key>`; preferences and the last known
/// connectivity state are the only things persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyNamespace {
    Settings,
}

impl KeyNamespace {
    pub fn prefix(&self) -> &str {
        match self {
            KeyNamespace::Settings => "settings",
        }
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message} (code: {code:?}, retryable: {retryable})")]
    Storage {
        code: StorageErrorCode,
        message: String,
        retryable: bool,
    },
}

impl KvError {
    pub fn is_retryable(&self) -> bool {
        match self {
            KvError::Storage { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn storage(code: StorageErrorCode, message: impl Into<String>) -> Self {
        let retryable = code.is_retryable();
        Self::Storage {
            code,
            message: message.into(),
            retryable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageErrorCode {
    Unknown,
    ConnectionFailed,
    Corrupted,
    DiskFull,
    PermissionDenied,
    Busy,
    Locked,
}

impl StorageErrorCode {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageErrorCode::ConnectionFailed | StorageErrorCode::Busy | StorageErrorCode::Locked
        )
    }
}

/// Persistent string key-value store provided by the host platform
/// (localStorage, SharedPreferences, NSUserDefaults, SQLite).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &KvKey) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError>;
    async fn remove(&self, key: &KvKey) -> Result<(), KvError>;
}

fn check_value_size(value: &str) -> Result<(), KvError> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(KvError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

/// Process-local store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
        Ok(self.entries.read().await.get(&key.raw()).cloned())
    }

    async fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError> {
        check_value_size(value)?;
        self.entries
            .write()
            .await
            .insert(key.raw(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &KvKey) -> Result<(), KvError> {
        self.entries.write().await.remove(&key.raw());
        Ok(())
    }
}

#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use self::sqlite::SqliteKvStore;

#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
mod sqlite {
    use super::*;
    use rusqlite::{params, Connection, OptionalExtension};
    use std::path::Path;
    use std::sync::{Mutex, PoisonError};

    /// SQLite-backed store for native shells.
    pub struct SqliteKvStore {
        conn: Mutex<Connection>,
    }

    fn map_err(e: rusqlite::Error) -> KvError {
        let code = match &e {
            rusqlite::Error::SqliteFailure(err, _) => match err.code {
                rusqlite::ErrorCode::DatabaseBusy => StorageErrorCode::Busy,
                rusqlite::ErrorCode::DatabaseLocked => StorageErrorCode::Locked,
                rusqlite::ErrorCode::DiskFull => StorageErrorCode::DiskFull,
                rusqlite::ErrorCode::PermissionDenied
                | rusqlite::ErrorCode::ReadOnly => StorageErrorCode::PermissionDenied,
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase => {
                    StorageErrorCode::Corrupted
                }
                rusqlite::ErrorCode::CannotOpen => StorageErrorCode::ConnectionFailed,
                _ => StorageErrorCode::Unknown,
            },
            _ => StorageErrorCode::Unknown,
        };
        KvError::storage(code, e.to_string())
    }

    impl SqliteKvStore {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
            Self::init(Connection::open(path).map_err(map_err)?)
        }

        pub fn open_in_memory() -> Result<Self, KvError> {
            Self::init(Connection::open_in_memory().map_err(map_err)?)
        }

        fn init(conn: Connection) -> Result<Self, KvError> {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kv_entries (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                "#,
            )
            .map_err(map_err)?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }
    }

    #[async_trait]
    impl KeyValueStore for SqliteKvStore {
        async fn get(&self, key: &KvKey) -> Result<Option<String>, KvError> {
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            conn.query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key.raw()],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_err)
        }

        async fn set(&self, key: &KvKey, value: &str) -> Result<(), KvError> {
            check_value_size(value)?;
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            conn.execute(
                r#"
                INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
                params![key.raw(), value, crate::model::UnixTimeMs::now().as_millis() as i64],
            )
            .map_err(map_err)?;
            Ok(())
        }

        async fn remove(&self, key: &KvKey) -> Result<(), KvError> {
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key.raw()])
                .map_err(map_err)?;
            Ok(())
        }
    }
}
