use crate::config::RepositoryConfig;
use crate::error::AssetErrorCode;
use crate::index::{DocumentRegistry, IndexDocument, MemoryIndex, SearchIndex};
use crate::model::{
    COLLECTION_PREDICATE, GRANT_PREDICATE, Record, ResourceId, ResourceKind, Status,
};
use crate::principal::Principal;
use crate::repair::{RepairQueueSupervisor, RepairRequest};
use crate::store::{MemoryStore, StoreHandle};
use crate::transaction::{SecureTransactionRunner, Target, TransactionRunner, UnitOfWork};
use std::sync::Arc;
use std::time::Duration;

fn collection(name: &str) -> ResourceId {
    ResourceId::for_kind(ResourceKind::Collection, name)
}

fn item_in(n: u32, coll: &str) -> Record {
    Record::new(ResourceId::for_kind(ResourceKind::Item, n), ResourceKind::Item)
        .with_status(Status::Pending)
        .with_field(COLLECTION_PREDICATE, collection(coll).as_str())
}

fn editor_of(store: &MemoryStore, coll: &str) -> Principal {
    let id = ResourceId::for_kind(ResourceKind::User, "editor");
    store
        .load([Record::new(id.clone(), ResourceKind::User)
            .with_field(GRANT_PREDICATE, format!("edit:{}", collection(coll)))])
        .expect("load user");
    Principal::user(id, "editor@example.org")
}

fn supervisor(store: &MemoryStore, index: Arc<MemoryIndex>) -> RepairQueueSupervisor {
    RepairQueueSupervisor::new(
        RepositoryConfig::development(),
        index,
        Arc::new(store.clone()),
        Arc::new(DocumentRegistry::with_defaults()),
        tokio::runtime::Handle::current(),
    )
    .expect("supervisor")
}

#[test]
fn one_denied_write_target_blocks_every_mutation() {
    let store = MemoryStore::new("mem://lib", &RepositoryConfig::development());
    let principal = editor_of(&store, "open");
    let allowed = item_in(1, "open");
    let denied = item_in(2, "closed");

    let runner = SecureTransactionRunner::from_config(&RepositoryConfig::default());
    let mut handle = store.open_handle();
    let (a, b) = (allowed.clone(), denied.clone());
    let outcome = runner.run(
        &mut handle,
        UnitOfWork::write(move |tx| {
            tx.sub_store("items").put(a)?;
            tx.sub_store("items").put(b)?;
            Ok(Vec::new())
        }),
        vec![Target::create(allowed.clone()), Target::create(denied.clone())],
        &principal,
    );

    let err = outcome.into_result().expect_err("denied");
    assert_eq!(err.code(), AssetErrorCode::NotAllowed);
    assert!(err.to_string().contains(denied.id.as_str()));
    assert_eq!(store.len("items"), 0);
    assert_eq!(store.metrics().commits, 1, "only the user load committed");
}

#[test]
fn a_failing_body_ends_the_handle_exactly_once_per_run() {
    let store = MemoryStore::new("mem://lib", &RepositoryConfig::development());
    let mut handle = store.open_handle();
    for _ in 0..3 {
        let outcome = TransactionRunner.run::<Record>(
            &mut handle,
            UnitOfWork::write(|tx| {
                tx.sub_store("items").get(&ResourceId::new("asset://items/1"))?;
                Err(crate::error::AssetError::Internal("boom".into()))
            }),
        );
        assert!(!outcome.committed);
        assert!(handle.mode().is_none());
    }
    let m = store.metrics();
    assert_eq!((m.begins, m.aborts, m.ends, m.commits), (3, 3, 3, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reindex_then_delete_leaves_a_single_delete() {
    let store = MemoryStore::new("mem://lib", &RepositoryConfig::development());
    let index = Arc::new(MemoryIndex::new());
    index.set_available(false);
    let repairs = supervisor(&store, Arc::clone(&index));
    let id = ResourceId::for_kind(ResourceKind::Item, 1);

    repairs.enqueue(RepairRequest::reindex(id.clone(), ResourceKind::Item, 10));
    repairs.enqueue(RepairRequest::delete(id.clone(), ResourceKind::Item, 20));
    repairs.enqueue(RepairRequest::reindex(id.clone(), ResourceKind::Item, 30));

    assert_eq!(repairs.pending(), 1);
    assert!(matches!(repairs.queued(&id), Some(RepairRequest::Delete(t)) if t.as_of == 20));
    repairs.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fresher_index_version_drops_the_request_without_writing() {
    let store = MemoryStore::new("mem://lib", &RepositoryConfig::development());
    let mut stored = item_in(1, "c");
    stored.modified = 100;
    store.load([stored.clone()]).expect("load");

    let index = Arc::new(MemoryIndex::new());
    let newer = IndexDocument {
        id: stored.id.clone(),
        kind: ResourceKind::Item,
        version: 500,
        body: serde_json::json!({ "title": "newer" }),
    };
    index.write(&stored.id, &newer).await.expect("seed index");

    let repairs = supervisor(&store, Arc::clone(&index));
    repairs.enqueue(RepairRequest::reindex(stored.id.clone(), ResourceKind::Item, 100));
    assert!(repairs.wait_idle(Duration::from_secs(5)).await);

    assert_eq!(repairs.pending(), 0);
    assert_eq!(index.write_count(), 1, "only the seeding write");
    assert_eq!(index.document(&stored.id).map(|d| d.version), Some(500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drained_worker_detaches_and_next_enqueue_starts_exactly_one() {
    let store = MemoryStore::new("mem://lib", &RepositoryConfig::development());
    let index = Arc::new(MemoryIndex::new());
    let repairs = supervisor(&store, Arc::clone(&index));
    let gone = ResourceId::for_kind(ResourceKind::Item, 404);

    repairs.enqueue(RepairRequest::delete(gone.clone(), ResourceKind::Item, 1));
    assert!(repairs.wait_idle(Duration::from_secs(5)).await);
    assert!(!repairs.is_worker_alive());
    assert_eq!(repairs.workers_started(), 1);

    let producers: Vec<_> = (0..8)
        .map(|n| {
            let repairs = repairs.clone();
            std::thread::spawn(move || {
                repairs.enqueue(RepairRequest::delete(
                    ResourceId::for_kind(ResourceKind::Item, n),
                    ResourceKind::Item,
                    1,
                ));
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer");
    }
    assert!(repairs.wait_idle(Duration::from_secs(5)).await);
    assert!(repairs.workers_started() >= 2);
    assert_eq!(repairs.pending(), 0);
    assert!(!repairs.is_worker_alive());
}
