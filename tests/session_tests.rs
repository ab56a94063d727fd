use rollstock::models::{Car, Location, Railroad, with_inventory};
use rollstock::{
    Database, DocumentStore, Entity, MemoryDocumentStore, StoreConfig, StoreError, persist::to_doc,
};
use std::sync::Arc;

async fn open_db() -> (Database, Arc<MemoryDocumentStore>) {
    let memory = Arc::new(MemoryDocumentStore::new());
    let db = Database::open(memory.clone(), with_inventory(StoreConfig::default()))
        .await
        .unwrap();
    (db, memory)
}

#[tokio::test]
async fn test_railroad_lifecycle_scenario() {
    let (db, _) = open_db().await;
    let mut session = db.session();

    let first = session.add_new(Railroad::new().with_name("Test RR"));
    session.commit().await.unwrap();
    assert_eq!(first.id(), Some(1));
    assert_eq!(db.store().query::<Railroad>().total().await.unwrap(), 1);

    let second = session.add_new(Railroad::new().with_name("Second RR"));
    session.commit().await.unwrap();
    assert_eq!(second.id(), Some(2));
    assert_eq!(db.store().query::<Railroad>().total().await.unwrap(), 2);

    session.delete(&first).await.unwrap();
    assert_eq!(db.store().query::<Railroad>().total().await.unwrap(), 1);

    let fresh = db.store();
    let err = fresh.get_or_404::<Railroad>(1).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(fresh.get::<Railroad>(1).await.unwrap().is_none());

    let kept = fresh.get_or_404::<Railroad>(2).await.unwrap();
    assert_eq!(kept.read().name().as_deref(), Some("Second RR"));
}

#[tokio::test]
async fn test_identity_within_scope_only() {
    let (db, _) = open_db().await;
    let mut session = db.session();
    session.add_new(Railroad::new().with_name("Test RR"));
    session.commit().await.unwrap();

    let store = db.store();
    let a = store.get::<Railroad>(1).await.unwrap().unwrap();
    let b = store.get::<Railroad>(1).await.unwrap().unwrap();
    assert!(a.ptr_eq(&b));

    let listed = store.all::<Railroad>().await.unwrap();
    assert!(listed[0].ptr_eq(&a));

    let other_scope = db.store().get::<Railroad>(1).await.unwrap().unwrap();
    assert!(!other_scope.ptr_eq(&a));
}

#[tokio::test]
async fn test_relationships_resolve_through_cache() {
    let (db, _) = open_db().await;
    let mut session = db.session();
    let railroad = session.add_new(Railroad::new().with_name("Santa Fe").with_reporting_mark("atsf"));
    let yard = session.add_new(Location::new().with_name("Yard").with_location_type("yard"));
    session.commit().await.unwrap();

    let shelf = session.add_new(
        Location::new()
            .with_name("Shelf 1")
            .with_location_type("shelf")
            .with_parent_id(yard.id().unwrap()),
    );
    let car = session.add_new(
        Car::new()
            .with_car_type("Boxcar")
            .with_railroad_id(railroad.id().unwrap())
            .with_location_id(7_777i64),
    );
    session.commit().await.unwrap();

    assert_eq!(railroad.read().reporting_mark().as_deref(), Some("ATSF"));

    let store = session.store();
    let owner = Car::railroad(store, &car).await.unwrap().unwrap();
    assert!(owner.ptr_eq(&railroad));
    assert!(Car::location(store, &car).await.unwrap().is_none());
    assert!(Car::car_class(store, &car).await.unwrap().is_none());

    let parent = Location::parent(store, &shelf).await.unwrap().unwrap();
    assert!(parent.ptr_eq(&yard));
    let children = Location::children(store, &yard).await.unwrap();
    assert_eq!(children.len(), 1);
    assert!(children[0].ptr_eq(&shelf));

    let cars = Railroad::cars(store, &railroad).await.unwrap();
    assert_eq!(cars.len(), 1);
    assert!(cars[0].ptr_eq(&car));
}

#[tokio::test]
async fn test_commit_saves_mutated_cached_entities() {
    let (db, _) = open_db().await;
    let mut session = db.session();
    session.add_new(Railroad::new().with_name("Before"));
    session.commit().await.unwrap();

    let mut session = db.session();
    let loaded = session.store().get::<Railroad>(1).await.unwrap().unwrap();
    assert!(!loaded.is_dirty());
    assert_eq!(session.commit().await.unwrap(), 0);

    loaded.write().set_name("After");
    assert_eq!(session.store().dirty_entities().len(), 1);
    assert_eq!(session.commit().await.unwrap(), 1);
    assert!(!loaded.is_dirty());
    assert!(session.store().dirty_entities().is_empty());

    let reread = db.store().get::<Railroad>(1).await.unwrap().unwrap();
    assert_eq!(reread.read().name().as_deref(), Some("After"));
}

#[tokio::test]
async fn test_staged_and_dirty_entity_saved_once() {
    let (db, memory) = open_db().await;
    let mut session = db.session();
    let railroad = session.add_new(Railroad::new().with_name("Once"));
    session.commit().await.unwrap();

    railroad.write().set_name("Twice?");
    session.add(&railroad);
    session.add(&railroad);
    assert_eq!(session.pending_len(), 1);
    assert_eq!(session.flush().await.unwrap(), 1);

    let doc = memory.get("railroad:1").await.unwrap().unwrap();
    assert_eq!(doc.rev.unwrap().generation(), Some(2));
}

#[tokio::test]
async fn test_stale_revision_surfaces_conflict() {
    let (db, _) = open_db().await;
    let mut session = db.session();
    session.add_new(Railroad::new().with_name("Original"));
    session.commit().await.unwrap();

    let mut alice = db.session();
    let mut bob = db.session();
    let alice_copy = alice.store().get::<Railroad>(1).await.unwrap().unwrap();
    let bob_copy = bob.store().get::<Railroad>(1).await.unwrap().unwrap();

    alice_copy.write().set_name("Alice");
    alice.commit().await.unwrap();

    bob_copy.write().set_name("Bob");
    let err = bob.commit().await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(ref id) if id == "railroad:1"));
    assert!(bob_copy.is_dirty());

    // Re-read and reapply.
    bob.store().invalidate();
    let fresh = bob.store().get::<Railroad>(1).await.unwrap().unwrap();
    assert_eq!(fresh.read().name().as_deref(), Some("Alice"));
    fresh.write().set_name("Bob");
    bob.commit().await.unwrap();

    let final_copy = db.store().get::<Railroad>(1).await.unwrap().unwrap();
    assert_eq!(final_copy.read().name().as_deref(), Some("Bob"));
}

#[tokio::test]
async fn test_failed_commit_keeps_staged_entities() {
    let (db, memory) = open_db().await;
    let mut session = db.session();

    // Occupy the key the import wants, outside the session.
    let squatter = Railroad::new().with_id(5).with_name("Squatter");
    memory.save(to_doc(&squatter).unwrap()).await.unwrap();

    let saved = session.add_new(Railroad::new().with_name("Saved first"));
    session.add_new(Railroad::new().with_id(5).with_name("Import"));
    let err = session.commit().await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(session.pending_len(), 1);

    // The retry only writes what is still staged.
    let saved_rev = saved.read().revision().cloned();
    let stored = memory.get("railroad:5").await.unwrap().unwrap();
    memory.delete("railroad:5", stored.rev.as_ref().unwrap()).await.unwrap();
    assert_eq!(session.commit().await.unwrap(), 1);
    assert_eq!(session.pending_len(), 0);
    assert_eq!(saved.read().revision().cloned(), saved_rev);
    assert_eq!(saved_rev.and_then(|rev| rev.generation()), Some(1));
}

#[tokio::test]
async fn test_get_many_dedupes_and_skips_missing() {
    let (db, _) = open_db().await;
    let mut session = db.session();
    for name in ["A", "B", "C"] {
        session.add_new(Railroad::new().with_name(name));
    }
    session.commit().await.unwrap();

    let store = db.store();
    let found = store.get_many::<Railroad>([3, 1, 3, 42, 2]).await.unwrap();
    let ids: Vec<i64> = found.iter().filter_map(|r| r.id()).collect();
    assert_eq!(ids, vec![3, 1, 2]);

    assert!(store.resolve::<Railroad>(None).await.unwrap().is_none());
    let resolved = store.resolve::<Railroad>(Some(1)).await.unwrap().unwrap();
    assert!(resolved.ptr_eq(&found[1]));
}

#[tokio::test]
async fn test_unsaved_delete_is_noop() {
    let (db, _) = open_db().await;
    let mut session = db.session();
    let draft = session.add_new(Railroad::new().with_name("Draft"));

    assert!(!session.delete(&draft).await.unwrap());
    assert_eq!(session.pending_len(), 0);
    assert_eq!(session.commit().await.unwrap(), 0);
    assert!(draft.id().is_none());
    assert_eq!(Railroad::DOC_TYPE, "railroad");
}
