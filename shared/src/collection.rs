//! List state for one collection, with optimistic mutations.
//!
//! Every mutation captures the previous value before touching local state and
//! restores it verbatim when the backend rejects the change:
//!
//! - a delete hides the entry in place, so a rollback un-hides it at the same
//!   index with identical fields;
//! - a like flips the flag immediately and keeps the pre-toggle value as the
//!   rollback baseline until the last intent for that id is reconciled.
//!
//! Like taps on the same id coalesce: each call waits out the configured
//! window and only the most recent intent is sent.

use metrics::counter;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::authz::{require_mutate, require_signed_in};
use crate::capabilities::{Backend, SessionProvider};
use crate::config::CollectionConfig;
use crate::connectivity::{ConnectivityMonitor, Subscription};
use crate::error::{BackendError, CoreError, MutationKind};
use crate::model::{DerivedState, Payload, Record, RecordBase, RecordFilter, RecordId, UserId};

/// A record merged with the viewer-relative overlay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionItem<P: Payload> {
    pub record: Record<P>,
    pub derived: DerivedState,
}

/// Per-entry mutation lifecycle. `Confirmed` and `RolledBack` are only ever
/// seen in logs; once an operation returns the entry is back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MutationPhase {
    Idle,
    OptimisticPending,
    Confirmed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Visible,
    PendingDelete,
}

#[derive(Debug)]
struct Entry<P: Payload> {
    record: Record<P>,
    derived: DerivedState,
    removal: Removal,
}

impl<P: Payload> Entry<P> {
    fn is_visible(&self) -> bool {
        self.removal == Removal::Visible
    }

    fn item(&self) -> CollectionItem<P> {
        CollectionItem {
            record: self.record.clone(),
            derived: self.derived,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingLike {
    /// Last state the server is known to hold.
    base: DerivedState,
    /// Generation of the most recent toggle for this id.
    generation: u64,
}

#[derive(Debug)]
struct ViewState<P: Payload> {
    entries: Vec<Entry<P>>,
    pending_likes: HashMap<RecordId, PendingLike>,
    /// Newest toggle generation per id; outlives the pending entry so a late
    /// completion can tell it was superseded.
    latest_like: HashMap<RecordId, u64>,
    next_generation: u64,
}

impl<P: Payload> Default for ViewState<P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            pending_likes: HashMap::new(),
            latest_like: HashMap::new(),
            next_generation: 0,
        }
    }
}

impl<P: Payload> ViewState<P> {
    fn position(&self, id: &RecordId) -> Option<usize> {
        self.entries.iter().position(|e| e.record.id() == id)
    }

    fn visible(&self, id: &RecordId) -> Option<&Entry<P>> {
        self.entries
            .iter()
            .find(|e| e.is_visible() && e.record.id() == id)
    }
}

fn visible_mut<'a, P: Payload>(
    entries: &'a mut [Entry<P>],
    id: &RecordId,
) -> Option<&'a mut Entry<P>> {
    entries
        .iter_mut()
        .find(|e| e.is_visible() && e.record.id() == id)
}

pub struct CollectionViewModel<P: Payload> {
    backend: Arc<dyn Backend>,
    session: Arc<dyn SessionProvider>,
    state: Mutex<ViewState<P>>,
    online: Arc<AtomicBool>,
    subscription: StdMutex<Option<Subscription>>,
    disposed: AtomicBool,
    coalesce_window: Duration,
}

impl<P: Payload> CollectionViewModel<P> {
    /// Starts empty and online. Attach a monitor with
    /// [`CollectionViewModel::with_connectivity`] to track the real state.
    pub fn new(
        backend: Arc<dyn Backend>,
        session: Arc<dyn SessionProvider>,
        config: &CollectionConfig,
    ) -> Self {
        Self {
            backend,
            session,
            state: Mutex::new(ViewState::default()),
            online: Arc::new(AtomicBool::new(true)),
            subscription: StdMutex::new(None),
            disposed: AtomicBool::new(false),
            coalesce_window: config.like_coalesce_window(),
        }
    }

    /// Mirrors `monitor` for as long as this view lives (or until
    /// [`CollectionViewModel::dispose`]).
    #[must_use]
    pub fn with_connectivity(self, monitor: &ConnectivityMonitor) -> Self {
        self.online.store(monitor.is_online(), Ordering::SeqCst);
        let online = Arc::clone(&self.online);
        let subscription =
            monitor.subscribe(move |is_online| online.store(is_online, Ordering::SeqCst));
        *self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(subscription);
        self
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Releases the connectivity subscription. Completions that arrive
    /// afterwards are discarded and further calls fail with
    /// [`CoreError::Disposed`].
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(collection = %P::COLLECTION, "view disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Visible entries in backend order.
    pub async fn items(&self) -> Vec<CollectionItem<P>> {
        let state = self.state.lock().await;
        state
            .entries
            .iter()
            .filter(|e| e.is_visible())
            .map(Entry::item)
            .collect()
    }

    pub async fn get(&self, id: &RecordId) -> Option<CollectionItem<P>> {
        self.state.lock().await.visible(id).map(Entry::item)
    }

    pub async fn phase(&self, id: &RecordId) -> MutationPhase {
        let state = self.state.lock().await;
        let deleting = state
            .position(id)
            .is_some_and(|i| state.entries[i].removal == Removal::PendingDelete);
        if deleting || state.pending_likes.contains_key(id) {
            MutationPhase::OptimisticPending
        } else {
            MutationPhase::Idle
        }
    }

    /// Fetches the collection and the viewer's overlay, replacing the list
    /// only when both succeed.
    #[instrument(skip(self), fields(collection = %P::COLLECTION))]
    pub async fn load(&self, filter: &RecordFilter) -> Result<Vec<CollectionItem<P>>, CoreError> {
        self.ensure_active()?;
        self.ensure_online()?;
        let collection = P::COLLECTION;

        let rows = self
            .backend
            .list_records(collection, filter)
            .await
            .map_err(|e| CoreError::fetch(collection, &e))?;
        let records = rows
            .into_iter()
            .map(serde_json::from_value::<Record<P>>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CoreError::Fetch {
                collection,
                status: None,
                reason: format!("malformed row: {e}"),
            })?;

        let mut derived = if records.is_empty() {
            HashMap::new()
        } else {
            let ids: Vec<RecordId> = records.iter().map(|r| r.id().clone()).collect();
            let viewer = self.current_user_id();
            self.backend
                .get_derived_state(collection, &ids, viewer.as_ref())
                .await
                .map_err(|e| CoreError::fetch(collection, &e))?
        };

        let items: Vec<CollectionItem<P>> = records
            .into_iter()
            .map(|record| {
                let derived = derived.remove(record.id()).unwrap_or_default().normalized();
                CollectionItem { record, derived }
            })
            .collect();

        if self.is_disposed() {
            debug!("discarding load result for disposed view");
            return Ok(items);
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.entries = items
            .iter()
            .map(|item| Entry {
                record: item.record.clone(),
                derived: item.derived,
                removal: Removal::Visible,
            })
            .collect();
        let (entries, pending) = (&state.entries, &state.pending_likes);
        state
            .latest_like
            .retain(|id, _| pending.contains_key(id) || entries.iter().any(|e| e.record.id() == id));
        info!(count = items.len(), "collection loaded");
        Ok(items)
    }

    /// Optimistically removes `id`, restoring it in place if the backend
    /// rejects the delete.
    #[instrument(skip(self), fields(collection = %P::COLLECTION))]
    pub async fn delete(&self, id: &RecordId) -> Result<(), CoreError> {
        self.ensure_active()?;
        let user = self.current_user_id();
        {
            let mut guard = self.state.lock().await;
            let entry = visible_mut(&mut guard.entries, id)
                .ok_or_else(|| CoreError::NotFound { id: id.clone() })?;
            require_mutate(user.as_ref(), &entry.record)?;
            self.ensure_online()?;
            entry.removal = Removal::PendingDelete;
            debug!(phase = ?MutationPhase::OptimisticPending, "record hidden");
        }

        let result = self.backend.delete_record(P::COLLECTION, id).await;
        if self.is_disposed() {
            debug!("discarding delete completion for disposed view");
            return Err(CoreError::Disposed);
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        match result {
            Ok(()) => {
                if let Some(i) = state.position(id) {
                    state.entries.remove(i);
                }
                state.pending_likes.remove(id);
                state.latest_like.remove(id);
                debug!(phase = ?MutationPhase::Confirmed, "record deleted");
                Ok(())
            }
            Err(source) => {
                if let Some(entry) = state.entries.iter_mut().find(|e| e.record.id() == id) {
                    entry.removal = Removal::Visible;
                }
                Err(rolled_back(MutationKind::Delete, id, source))
            }
        }
    }

    /// Flips the viewer's like on `id`. Concurrent toggles on the same id
    /// coalesce; a call superseded by a newer toggle returns `Ok(())` and
    /// leaves reconciliation to the newer call.
    #[instrument(skip(self), fields(collection = %P::COLLECTION))]
    pub async fn toggle_like(&self, id: &RecordId) -> Result<(), CoreError> {
        self.ensure_active()?;
        require_signed_in(self.current_user_id().as_ref())?;

        let (generation, liked) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let entry = visible_mut(&mut state.entries, id)
                .ok_or_else(|| CoreError::NotFound { id: id.clone() })?;
            self.ensure_online()?;

            state.next_generation += 1;
            let generation = state.next_generation;
            let pending = state
                .pending_likes
                .entry(id.clone())
                .or_insert(PendingLike {
                    base: entry.derived,
                    generation,
                });
            pending.generation = generation;
            state.latest_like.insert(id.clone(), generation);
            entry.derived = entry.derived.toggled();
            debug!(
                generation,
                liked = entry.derived.is_liked,
                phase = ?MutationPhase::OptimisticPending,
                "like toggled"
            );
            (generation, entry.derived.is_liked)
        };

        if self.coalesce_window.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.coalesce_window).await;
        }

        if self.is_disposed() {
            return Err(CoreError::Disposed);
        }
        if !self.is_current(id, generation).await {
            debug!(generation, "like superseded before sending");
            return Ok(());
        }

        let result = self.backend.set_like(P::COLLECTION, id, liked).await;
        if self.is_disposed() {
            debug!("discarding like completion for disposed view");
            return Err(CoreError::Disposed);
        }

        let op = if liked {
            MutationKind::Like
        } else {
            MutationKind::Unlike
        };
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(pending) = state.pending_likes.get_mut(id) else {
            if state.latest_like.get(id).is_some_and(|&g| g != generation) {
                debug!(generation, "like superseded by an already reconciled toggle");
                return Ok(());
            }
            // The record was deleted meanwhile; nothing left to reconcile.
            return result.map_err(|source| CoreError::Mutation {
                op,
                id: id.clone(),
                source,
            });
        };

        if pending.generation != generation {
            if result.is_ok() {
                pending.base = pending.base.with_liked(liked);
            }
            debug!(generation, "like superseded in flight");
            return Ok(());
        }

        let base = pending.base;
        state.pending_likes.remove(id);
        match result {
            Ok(()) => {
                debug!(phase = ?MutationPhase::Confirmed, liked, "like confirmed");
                Ok(())
            }
            Err(source) => {
                if let Some(entry) = state.entries.iter_mut().find(|e| e.record.id() == id) {
                    entry.derived = base;
                }
                Err(rolled_back(op, id, source))
            }
        }
    }

    async fn is_current(&self, id: &RecordId, generation: u64) -> bool {
        self.state
            .lock()
            .await
            .pending_likes
            .get(id)
            .is_some_and(|p| p.generation == generation)
    }

    fn current_user_id(&self) -> Option<UserId> {
        self.session.current_user().map(|user| user.id)
    }

    fn ensure_active(&self) -> Result<(), CoreError> {
        if self.is_disposed() {
            Err(CoreError::Disposed)
        } else {
            Ok(())
        }
    }

    fn ensure_online(&self) -> Result<(), CoreError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(CoreError::Offline)
        }
    }
}

fn rolled_back(op: MutationKind, id: &RecordId, source: BackendError) -> CoreError {
    counter!("collection.rollbacks").increment(1);
    warn!(%op, %id, error = %source, phase = ?MutationPhase::RolledBack, "mutation rolled back");
    CoreError::Mutation {
        op,
        id: id.clone(),
        source,
    }
}

impl<P: Payload> std::fmt::Debug for CollectionViewModel<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionViewModel")
            .field("collection", &P::COLLECTION)
            .field("online", &self.is_online())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
