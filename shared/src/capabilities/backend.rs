use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::BackendError;
use crate::model::{Collection, DerivedState, RecordFilter, RecordId, UserId};

/// Hosted relational storage as seen by the client. Rows travel as JSON and
/// are decoded by the caller into typed records.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_records(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> Result<Vec<Value>, BackendError>;

    async fn delete_record(&self, collection: Collection, id: &RecordId)
        -> Result<(), BackendError>;

    async fn set_like(
        &self,
        collection: Collection,
        id: &RecordId,
        liked: bool,
    ) -> Result<(), BackendError>;

    async fn get_derived_state(
        &self,
        collection: Collection,
        ids: &[RecordId],
        viewer: Option<&UserId>,
    ) -> Result<HashMap<RecordId, DerivedState>, BackendError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    List(Collection),
    Delete(Collection, RecordId),
    SetLike(Collection, RecordId, bool),
    DerivedState(Collection, Vec<RecordId>),
}

#[derive(Debug, Default)]
struct Tables {
    rows: HashMap<Collection, Vec<Value>>,
    /// (collection, record) -> users who liked it
    likes: HashMap<(Collection, RecordId), HashSet<UserId>>,
    comments: HashMap<(Collection, RecordId), u32>,
}

/// In-process backend for demos, previews and tests. Records every call and
/// can be told to fail specific operations.
#[derive(Debug)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    calls: Mutex<Vec<BackendCall>>,
    viewer: Mutex<Option<UserId>>,
    fail_list: AtomicBool,
    fail_derived: AtomicBool,
    fail_delete: AtomicBool,
    fail_like: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            calls: Mutex::new(Vec::new()),
            viewer: Mutex::new(None),
            fail_list: AtomicBool::new(false),
            fail_derived: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_like: AtomicBool::new(false),
        }
    }

    /// User on whose behalf `set_like` acts.
    pub fn set_viewer(&self, viewer: Option<UserId>) {
        *self.viewer.lock().unwrap_or_else(PoisonError::into_inner) = viewer;
    }

    /// Appends a row; rows are listed in insertion order.
    pub fn insert<T: Serialize>(&self, collection: Collection, record: &T) -> Result<(), BackendError> {
        let value = serde_json::to_value(record).map_err(|e| BackendError::new(400, e.to_string()))?;
        self.tables()
            .rows
            .entry(collection)
            .or_default()
            .push(value);
        Ok(())
    }

    pub fn insert_raw(&self, collection: Collection, row: Value) {
        self.tables().rows.entry(collection).or_default().push(row);
    }

    pub fn seed_likes(&self, collection: Collection, id: &RecordId, users: &[UserId]) {
        self.tables()
            .likes
            .entry((collection, id.clone()))
            .or_default()
            .extend(users.iter().cloned());
    }

    pub fn seed_comments(&self, collection: Collection, id: &RecordId, count: u32) {
        self.tables().comments.insert((collection, id.clone()), count);
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_derived(&self, fail: bool) {
        self.fail_derived.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_like(&self, fail: bool) {
        self.fail_like.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn delete_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::Delete(..)))
            .count()
    }

    pub fn like_calls(&self) -> Vec<(RecordId, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::SetLike(_, id, liked) => Some((id, liked)),
                _ => None,
            })
            .collect()
    }

    pub fn row_count(&self, collection: Collection) -> usize {
        self.tables().rows.get(&collection).map_or(0, Vec::len)
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: BackendCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn row_matches(row: &Value, filter: &RecordFilter) -> bool {
        filter.conditions.iter().all(|(field, expected)| {
            match row.get(field) {
                Some(Value::String(s)) => s == expected,
                Some(other) => other.to_string() == *expected,
                None => false,
            }
        })
    }

    fn row_id(row: &Value) -> Option<&str> {
        row.get("id").and_then(Value::as_str)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list_records(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> Result<Vec<Value>, BackendError> {
        self.record(BackendCall::List(collection));
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(BackendError::new(503, "service unavailable"));
        }
        let tables = self.tables();
        Ok(tables
            .rows
            .get(&collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| Self::row_matches(row, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_record(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::Delete(collection, id.clone()));
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(BackendError::new(500, "delete failed"));
        }
        let mut tables = self.tables();
        let rows = tables.rows.entry(collection).or_default();
        let before = rows.len();
        rows.retain(|row| Self::row_id(row) != Some(id.as_str()));
        if rows.len() == before {
            return Err(BackendError::new(404, format!("{id} not found")));
        }
        tables.likes.remove(&(collection, id.clone()));
        tables.comments.remove(&(collection, id.clone()));
        Ok(())
    }

    async fn set_like(
        &self,
        collection: Collection,
        id: &RecordId,
        liked: bool,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::SetLike(collection, id.clone(), liked));
        if self.fail_like.load(Ordering::SeqCst) {
            return Err(BackendError::new(500, "like failed"));
        }
        let viewer = self
            .viewer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BackendError::new(401, "not signed in"))?;
        let mut tables = self.tables();
        let likers = tables.likes.entry((collection, id.clone())).or_default();
        if liked {
            likers.insert(viewer);
        } else {
            likers.remove(&viewer);
        }
        Ok(())
    }

    async fn get_derived_state(
        &self,
        collection: Collection,
        ids: &[RecordId],
        viewer: Option<&UserId>,
    ) -> Result<HashMap<RecordId, DerivedState>, BackendError> {
        self.record(BackendCall::DerivedState(collection, ids.to_vec()));
        if self.fail_derived.load(Ordering::SeqCst) {
            return Err(BackendError::new(500, "counts unavailable"));
        }
        let tables = self.tables();
        Ok(ids
            .iter()
            .map(|id| {
                let key = (collection, id.clone());
                let likers = tables.likes.get(&key);
                let state = DerivedState {
                    likes_count: likers.map_or(0, |l| l.len() as u32),
                    is_liked: matches!((likers, viewer), (Some(l), Some(v)) if l.contains(v)),
                    comments_count: tables.comments.get(&key).copied().unwrap_or(0),
                };
                (id.clone(), state)
            })
            .collect())
    }
}
