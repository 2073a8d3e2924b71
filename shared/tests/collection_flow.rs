use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use shared::capabilities::{
    Backend, BackendCall, MemoryBackend, MemoryKvStore, StaticSession, StaticSignal,
};
use shared::config::CollectionConfig;
use shared::model::{Equipment, EquipmentStatus, LatLon, ListingKind, PriceBwp, UnixTimeMs};
use shared::{
    BackendError, Collection, CollectionViewModel, ConnectivityEvent, ConnectivityMonitor,
    CoreError, CurrentUser, DerivedState, MutationKind, MutationPhase, Record, RecordBase,
    RecordFilter, RecordId, UserId,
};

const OWNER: &str = "kabelo";
const NEIGHBOUR: &str = "lorato";

fn equipment(id: &str, owner: &str, name: &str) -> Record<Equipment> {
    Record::new(
        RecordId::new(id),
        UserId::new(owner),
        UnixTimeMs(1_700_000_000_000),
        EquipmentStatus::Available,
        Equipment {
            name: name.into(),
            description: format!("{name}, well maintained"),
            category: "machinery".into(),
            listing: ListingKind::Rent,
            price: PriceBwp::from_pula(350),
            location: "Mahalapye".into(),
            coordinates: LatLon::new(-23.10, 26.82),
            image_url: None,
        },
    )
}

fn user(id: &str) -> CurrentUser {
    CurrentUser {
        id: UserId::new(id),
        full_name: "Kabelo Dube".into(),
        phone: "+26771234567".into(),
    }
}

/// Three listings: two by OWNER around one by NEIGHBOUR.
fn seeded_backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    for (id, owner, name) in [
        ("eq-1", OWNER, "Planter"),
        ("eq-2", NEIGHBOUR, "Trailer"),
        ("eq-3", OWNER, "Boom sprayer"),
    ] {
        backend
            .insert(Collection::Equipment, &equipment(id, owner, name))
            .unwrap();
    }
    backend
}

fn view_as(
    backend: Arc<dyn Backend>,
    viewer: Option<&str>,
) -> CollectionViewModel<Equipment> {
    let session = match viewer {
        Some(id) => StaticSession::signed_in(user(id)),
        None => StaticSession::signed_out(),
    };
    CollectionViewModel::new(
        backend,
        Arc::new(session),
        &CollectionConfig {
            like_coalesce_window_ms: 0,
        },
    )
}

fn ids(items: &[shared::CollectionItem<Equipment>]) -> Vec<&str> {
    items.iter().map(|i| i.record.id().as_str()).collect()
}

#[tokio::test]
async fn load_merges_overlay_and_keeps_backend_order() {
    let backend = seeded_backend();
    let me = UserId::new(OWNER);
    backend.seed_likes(
        Collection::Equipment,
        &RecordId::new("eq-2"),
        &[me.clone(), UserId::new(NEIGHBOUR)],
    );
    backend.seed_comments(Collection::Equipment, &RecordId::new("eq-3"), 5);

    let vm = view_as(backend.clone(), Some(OWNER));
    let items = vm.load(&RecordFilter::new()).await.unwrap();

    assert_eq!(ids(&items), vec!["eq-1", "eq-2", "eq-3"]);
    assert_eq!(items[0].derived, DerivedState::default());
    assert_eq!(items[1].derived.likes_count, 2);
    assert!(items[1].derived.is_liked);
    assert_eq!(items[2].derived.comments_count, 5);
    assert_eq!(vm.items().await, items);
}

#[tokio::test]
async fn load_is_idempotent() {
    let backend = seeded_backend();
    let vm = view_as(backend.clone(), Some(OWNER));

    let first = vm.load(&RecordFilter::new()).await.unwrap();
    let second = vm.load(&RecordFilter::new()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(vm.items().await, second);
    assert_eq!(backend.row_count(Collection::Equipment), 3);
}

#[tokio::test]
async fn filter_reaches_backend_untouched() {
    let backend = seeded_backend();
    let vm = view_as(backend.clone(), Some(OWNER));

    let mine = vm
        .load(&RecordFilter::new().owner(&UserId::new(OWNER)))
        .await
        .unwrap();
    assert_eq!(ids(&mine), vec!["eq-1", "eq-3"]);
}

#[tokio::test]
async fn empty_collection_skips_overlay_request() {
    let backend = Arc::new(MemoryBackend::new());
    let vm = view_as(backend.clone(), Some(OWNER));

    let items = vm.load(&RecordFilter::new()).await.unwrap();

    assert!(items.is_empty());
    assert_eq!(backend.calls(), vec![BackendCall::List(Collection::Equipment)]);
}

#[tokio::test]
async fn failed_load_keeps_previous_list() {
    let backend = seeded_backend();
    let vm = view_as(backend.clone(), Some(OWNER));
    let before = vm.load(&RecordFilter::new()).await.unwrap();

    backend.fail_derived(true);
    let err = vm.load(&RecordFilter::new()).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Fetch {
            collection: Collection::Equipment,
            status: Some(500),
            ..
        }
    ));
    assert_eq!(vm.items().await, before);

    backend.fail_derived(false);
    backend.fail_list(true);
    assert!(vm.load(&RecordFilter::new()).await.is_err());
    assert_eq!(vm.items().await, before);
}

#[tokio::test]
async fn malformed_row_fails_whole_load() {
    let backend = seeded_backend();
    backend.insert_raw(Collection::Equipment, json!({"id": "eq-9", "name": 42}));
    let vm = view_as(backend.clone(), Some(OWNER));

    let err = vm.load(&RecordFilter::new()).await.unwrap_err();
    assert!(matches!(err, CoreError::Fetch { status: None, .. }));
    assert!(vm.items().await.is_empty());
}

#[tokio::test]
async fn toggle_like_round_trip_restores_original() {
    let backend = seeded_backend();
    backend.set_viewer(Some(UserId::new(OWNER)));
    backend.seed_likes(
        Collection::Equipment,
        &RecordId::new("eq-2"),
        &[UserId::new(NEIGHBOUR)],
    );
    let vm = view_as(backend.clone(), Some(OWNER));
    vm.load(&RecordFilter::new()).await.unwrap();
    let id = RecordId::new("eq-2");
    let original = vm.get(&id).await.unwrap().derived;

    vm.toggle_like(&id).await.unwrap();
    let liked = vm.get(&id).await.unwrap().derived;
    assert!(liked.is_liked);
    assert_eq!(liked.likes_count, original.likes_count + 1);

    vm.toggle_like(&id).await.unwrap();
    assert_eq!(vm.get(&id).await.unwrap().derived, original);
    assert_eq!(
        backend.like_calls(),
        vec![(id.clone(), true), (id.clone(), false)]
    );
}

#[tokio::test]
async fn failed_like_rolls_back_both_fields() {
    let backend = seeded_backend();
    backend.set_viewer(Some(UserId::new(OWNER)));
    backend.fail_like(true);
    let vm = view_as(backend.clone(), Some(OWNER));
    vm.load(&RecordFilter::new()).await.unwrap();
    let id = RecordId::new("eq-1");
    let before = vm.get(&id).await.unwrap();

    let err = vm.toggle_like(&id).await.unwrap_err();

    assert!(matches!(
        err,
        CoreError::Mutation {
            op: MutationKind::Like,
            ..
        }
    ));
    assert_eq!(vm.get(&id).await.unwrap(), before);
    assert_eq!(vm.phase(&id).await, MutationPhase::Idle);
}

#[tokio::test]
async fn signed_out_viewer_cannot_like() {
    let backend = seeded_backend();
    let vm = view_as(backend.clone(), None);
    vm.load(&RecordFilter::new()).await.unwrap();

    let err = vm.toggle_like(&RecordId::new("eq-1")).await.unwrap_err();

    assert!(matches!(err, CoreError::Forbidden { id: None }));
    assert!(backend.like_calls().is_empty());
}

#[tokio::test]
async fn concurrent_toggles_coalesce_to_one_call() {
    let backend = seeded_backend();
    backend.set_viewer(Some(UserId::new(OWNER)));
    let vm = view_as(backend.clone(), Some(OWNER));
    vm.load(&RecordFilter::new()).await.unwrap();
    let id = RecordId::new("eq-3");
    let original = vm.get(&id).await.unwrap().derived;

    let (a, b) = tokio::join!(vm.toggle_like(&id), vm.toggle_like(&id));
    assert!(a.is_ok() && b.is_ok());

    assert_eq!(backend.like_calls(), vec![(id.clone(), original.is_liked)]);
    assert_eq!(vm.get(&id).await.unwrap().derived, original);
}

#[tokio::test]
async fn failed_delete_restores_item_at_same_position() {
    let backend = seeded_backend();
    backend.fail_delete(true);
    let vm = view_as(backend.clone(), Some(OWNER));
    let before = vm.load(&RecordFilter::new()).await.unwrap();

    let err = vm.delete(&RecordId::new("eq-3")).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Mutation {
            op: MutationKind::Delete,
            ..
        }
    ));
    let first_rollback = vm.items().await;
    assert_eq!(first_rollback, before);

    let err = vm.delete(&RecordId::new("eq-1")).await.unwrap_err();
    assert!(err.user_facing_message().contains("try again"));
    assert_eq!(vm.items().await, before);

    // Interior entry, deleted by its own owner.
    let neighbour = view_as(backend.clone(), Some(NEIGHBOUR));
    neighbour.load(&RecordFilter::new()).await.unwrap();
    assert!(neighbour.delete(&RecordId::new("eq-2")).await.is_err());
    let restored = neighbour.items().await;
    assert_eq!(ids(&restored), vec!["eq-1", "eq-2", "eq-3"]);
    assert_eq!(restored, before);
    assert_eq!(backend.delete_calls(), 3);
}

#[tokio::test]
async fn successful_delete_removes_only_that_item() {
    let backend = seeded_backend();
    let vm = view_as(backend.clone(), Some(OWNER));
    vm.load(&RecordFilter::new()).await.unwrap();

    vm.delete(&RecordId::new("eq-1")).await.unwrap();

    assert_eq!(ids(&vm.items().await), vec!["eq-2", "eq-3"]);
    assert_eq!(backend.row_count(Collection::Equipment), 2);
}

#[tokio::test]
async fn non_owner_delete_never_reaches_backend() {
    let backend = seeded_backend();
    let vm = view_as(backend.clone(), Some(NEIGHBOUR));
    let before = vm.load(&RecordFilter::new()).await.unwrap();

    let err = vm.delete(&RecordId::new("eq-1")).await.unwrap_err();

    assert!(matches!(err, CoreError::Forbidden { id: Some(ref id) } if id.as_str() == "eq-1"));
    assert_eq!(backend.delete_calls(), 0);
    assert_eq!(vm.items().await, before);

    let anonymous = view_as(backend.clone(), None);
    anonymous.load(&RecordFilter::new()).await.unwrap();
    assert!(anonymous.delete(&RecordId::new("eq-1")).await.is_err());
    assert_eq!(backend.delete_calls(), 0);
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let backend = seeded_backend();
    let vm = view_as(backend.clone(), Some(OWNER));
    vm.load(&RecordFilter::new()).await.unwrap();

    let missing = RecordId::new("eq-404");
    assert!(matches!(
        vm.delete(&missing).await,
        Err(CoreError::NotFound { .. })
    ));
    assert!(matches!(
        vm.toggle_like(&missing).await,
        Err(CoreError::NotFound { .. })
    ));
    assert_eq!(backend.delete_calls(), 0);
}

#[tokio::test]
async fn offline_view_fails_fast_and_dispose_unsubscribes() {
    let backend = seeded_backend();
    let monitor = ConnectivityMonitor::initialize(
        Arc::new(MemoryKvStore::new()),
        &StaticSignal::new(true),
    )
    .await
    .unwrap();
    let vm = view_as(backend.clone(), Some(OWNER)).with_connectivity(&monitor);
    vm.load(&RecordFilter::new()).await.unwrap();
    let calls_online = backend.calls().len();

    monitor
        .handle_event(ConnectivityEvent::Offline)
        .await
        .unwrap();
    assert!(!vm.is_online());
    assert!(matches!(
        vm.load(&RecordFilter::new()).await,
        Err(CoreError::Offline)
    ));
    assert!(matches!(
        vm.delete(&RecordId::new("eq-1")).await,
        Err(CoreError::Offline)
    ));
    assert!(matches!(
        vm.toggle_like(&RecordId::new("eq-1")).await,
        Err(CoreError::Offline)
    ));
    assert_eq!(backend.calls().len(), calls_online);
    assert_eq!(ids(&vm.items().await), vec!["eq-1", "eq-2", "eq-3"]);

    monitor.handle_event(ConnectivityEvent::Online).await.unwrap();
    assert!(vm.is_online());

    assert_eq!(monitor.subscriber_count(), 1);
    vm.dispose();
    assert_eq!(monitor.subscriber_count(), 0);
    assert!(matches!(
        vm.delete(&RecordId::new("eq-1")).await,
        Err(CoreError::Disposed)
    ));
}

/// Holds deletes and `set_like` calls until the test releases a permit.
/// With `hold_only` set, likes carrying the other value pass straight through.
struct GatedBackend {
    inner: Arc<MemoryBackend>,
    gate: Semaphore,
    hold_only: Option<bool>,
    arrived: AtomicUsize,
    completed: AtomicUsize,
}

impl GatedBackend {
    fn new(inner: Arc<MemoryBackend>) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
            hold_only: None,
            arrived: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    fn holding_only(inner: Arc<MemoryBackend>, liked: bool) -> Self {
        Self {
            hold_only: Some(liked),
            ..Self::new(inner)
        }
    }

    async fn pass_gate(&self) -> Result<(), BackendError> {
        self.gate
            .acquire()
            .await
            .map_err(|_| BackendError::network("gate closed"))?
            .forget();
        Ok(())
    }

    async fn wait_until(counter: &AtomicUsize, n: usize) {
        while counter.load(Ordering::SeqCst) < n {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl Backend for GatedBackend {
    async fn list_records(
        &self,
        collection: Collection,
        filter: &RecordFilter,
    ) -> Result<Vec<Value>, BackendError> {
        self.inner.list_records(collection, filter).await
    }

    async fn delete_record(
        &self,
        collection: Collection,
        id: &RecordId,
    ) -> Result<(), BackendError> {
        self.arrived.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await?;
        let result = self.inner.delete_record(collection, id).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn set_like(
        &self,
        collection: Collection,
        id: &RecordId,
        liked: bool,
    ) -> Result<(), BackendError> {
        self.arrived.fetch_add(1, Ordering::SeqCst);
        if self.hold_only.map_or(true, |held| held == liked) {
            self.pass_gate().await?;
        }
        let result = self.inner.set_like(collection, id, liked).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn get_derived_state(
        &self,
        collection: Collection,
        ids: &[RecordId],
        viewer: Option<&UserId>,
    ) -> Result<HashMap<RecordId, DerivedState>, BackendError> {
        self.inner.get_derived_state(collection, ids, viewer).await
    }
}

#[tokio::test]
async fn toggle_superseded_in_flight_only_moves_rollback_baseline() {
    let inner = seeded_backend();
    inner.set_viewer(Some(UserId::new(OWNER)));
    let gated = Arc::new(GatedBackend::new(inner.clone()));
    let vm = view_as(gated.clone(), Some(OWNER));
    vm.load(&RecordFilter::new()).await.unwrap();
    let id = RecordId::new("eq-2");

    let (first, second, ()) = tokio::join!(
        // 1. Like is sent and held at the gate.
        vm.toggle_like(&id),
        // 2. Unlike is issued while the like is in flight.
        async {
            GatedBackend::wait_until(&gated.arrived, 1).await;
            vm.toggle_like(&id).await
        },
        // 3. The like succeeds, then the unlike fails.
        async {
            GatedBackend::wait_until(&gated.arrived, 2).await;
            gated.gate.add_permits(1);
            GatedBackend::wait_until(&gated.completed, 1).await;
            inner.fail_like(true);
            gated.gate.add_permits(1);
        }
    );

    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(CoreError::Mutation {
            op: MutationKind::Unlike,
            ..
        })
    ));
    // The server holds the like, so the rollback lands on it.
    let derived = vm.get(&id).await.unwrap().derived;
    assert!(derived.is_liked);
    assert_eq!(derived.likes_count, 1);
    assert_eq!(
        inner.like_calls(),
        vec![(id.clone(), true), (id.clone(), false)]
    );
    assert_eq!(vm.phase(&id).await, MutationPhase::Idle);
}

#[tokio::test]
async fn late_failure_of_superseded_like_is_not_reported() {
    let inner = seeded_backend();
    inner.set_viewer(Some(UserId::new(OWNER)));
    let gated = Arc::new(GatedBackend::holding_only(inner.clone(), true));
    let vm = view_as(gated.clone(), Some(OWNER));
    vm.load(&RecordFilter::new()).await.unwrap();
    let id = RecordId::new("eq-1");
    let original = vm.get(&id).await.unwrap().derived;

    let (first, second, ()) = tokio::join!(
        // 1. Like is sent and held.
        vm.toggle_like(&id),
        // 2. Unlike goes through at once and reconciles the entry.
        async {
            GatedBackend::wait_until(&gated.arrived, 1).await;
            vm.toggle_like(&id).await
        },
        // 3. Only then does the held like fail.
        async {
            GatedBackend::wait_until(&gated.completed, 1).await;
            inner.fail_like(true);
            gated.gate.add_permits(1);
        }
    );

    assert_eq!(first, Ok(()));
    assert_eq!(second, Ok(()));
    assert_eq!(vm.get(&id).await.unwrap().derived, original);
    assert_eq!(
        inner.like_calls(),
        vec![(id.clone(), false), (id.clone(), true)]
    );
    assert_eq!(vm.phase(&id).await, MutationPhase::Idle);
}

#[tokio::test]
async fn completion_after_dispose_is_discarded() {
    let inner = seeded_backend();
    let gated = Arc::new(GatedBackend::new(inner.clone()));
    let vm = view_as(gated.clone(), Some(OWNER));
    vm.load(&RecordFilter::new()).await.unwrap();
    let id = RecordId::new("eq-1");

    let (result, ()) = tokio::join!(
        // 1. Delete hides the entry and is held at the backend.
        vm.delete(&id),
        // 2. The view goes away, then the server rejects the delete.
        async {
            GatedBackend::wait_until(&gated.arrived, 1).await;
            vm.dispose();
            inner.fail_delete(true);
            gated.gate.add_permits(1);
        }
    );

    assert!(matches!(result, Err(CoreError::Disposed)));
    // The request itself still ran to completion.
    assert_eq!(gated.completed.load(Ordering::SeqCst), 1);
    assert_eq!(inner.delete_calls(), 1);
    // No rollback was applied: the entry stays hidden.
    assert_eq!(ids(&vm.items().await), vec!["eq-2", "eq-3"]);
    assert_eq!(vm.phase(&id).await, MutationPhase::OptimisticPending);
}
