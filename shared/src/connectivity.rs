//! Process-wide online/offline state.
//!
//! The monitor mirrors platform connectivity events, persists the last known
//! value, and fans transitions out to subscribers. It never touches the
//! network itself.
//!
//! If the process dies between a transition and the persistence write, the
//! next launch starts from the stale persisted value until the platform
//! reports the next transition.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{ConnectivitySignal, KeyNamespace, KeyValueStore, KvError, KvKey};
use crate::error::CoreError;

pub const ONLINE_KEY: &str = "is_online";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

impl ConnectivityEvent {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl From<bool> for ConnectivityEvent {
    fn from(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct Registry {
    // Kept in registration order.
    subscribers: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl Registry {
    fn remove(&self, id: u64) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(sid, _)| *sid != id);
    }

    fn snapshot(&self) -> Vec<Callback> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect()
    }
}

/// Handle returned by [`ConnectivityMonitor::subscribe`]. The callback is
/// removed when the handle is dropped or [`Subscription::unsubscribe`] is
/// called.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

pub struct ConnectivityMonitor {
    kv: Arc<dyn KeyValueStore>,
    key: KvKey,
    online: AtomicBool,
    registry: Arc<Registry>,
    // Serializes swap, persist and notify so overlapping events apply in order.
    transitions: tokio::sync::Mutex<()>,
}

impl ConnectivityMonitor {
    /// Starts from the persisted last-known value, falling back to the live
    /// platform signal when nothing (or nothing readable) was persisted.
    #[instrument(skip_all)]
    pub async fn initialize(
        kv: Arc<dyn KeyValueStore>,
        platform: &dyn ConnectivitySignal,
    ) -> Result<Self, CoreError> {
        let key = KvKey::new(KeyNamespace::Settings, ONLINE_KEY)?;

        let persisted = match kv.get(&key).await {
            Ok(Some(raw)) => match raw.trim() {
                "true" => Some(true),
                "false" => Some(false),
                other => {
                    warn!(value = other, "ignoring unparsable persisted connectivity");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "could not read persisted connectivity");
                None
            }
        };

        let online = match persisted {
            Some(value) => value,
            None => platform.is_online(),
        };
        info!(online, from_persisted = persisted.is_some(), "connectivity initialized");

        Ok(Self {
            kv,
            key,
            online: AtomicBool::new(online),
            registry: Arc::new(Registry::default()),
            transitions: tokio::sync::Mutex::new(()),
        })
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Registers `callback` for every subsequent transition.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst);
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Applies a platform event. Repeating the current state is not a
    /// transition. Subscribers are notified even when persisting fails; the
    /// persistence error is returned afterwards. Overlapping calls are applied
    /// one at a time in arrival order.
    #[instrument(skip(self))]
    pub async fn handle_event(&self, event: ConnectivityEvent) -> Result<(), CoreError> {
        let online = event.is_online();
        let _transition = self.transitions.lock().await;
        if self.online.swap(online, Ordering::SeqCst) == online {
            debug!("no connectivity transition");
            return Ok(());
        }
        info!(online, "connectivity changed");

        let persisted = self.persist(online).await;
        if let Err(e) = &persisted {
            warn!(error = %e, "failed to persist connectivity");
        }

        for callback in self.registry.snapshot() {
            callback(online);
        }

        persisted.map_err(CoreError::from)
    }

    async fn persist(&self, online: bool) -> Result<(), KvError> {
        self.kv
            .set(&self.key, if online { "true" } else { "false" })
            .await
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
