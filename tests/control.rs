//! Placement provider tests.

mod common;

use common::*;
use partkv::engine::MemEngineFactory;
use partkv::raft::{LocalNetwork, LocalReplicaFactory};
use partkv::{
    LifecycleHandler, MemPlacementProvider, MetaChange, MetaPlacementProvider, PartMeta,
    PlacementProvider, Store, StoreError, StoreOptions,
};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

fn recorder(provider: &dyn PlacementProvider) -> Arc<RecordingHandler> {
    let handler = Arc::new(RecordingHandler::default());
    let weak: Weak<dyn LifecycleHandler> = Arc::downgrade(&handler) as Weak<dyn LifecycleHandler>;
    provider.register_handler(weak).unwrap();
    handler
}

// ============================================================================
// In-memory provider
// ============================================================================

#[test]
fn space_removed_only_after_last_local_part() {
    let local = local_addr();
    let provider = MemPlacementProvider::new(local);
    let handler = recorder(&provider);

    provider.add_part(1, 1, vec![local]);
    provider.add_part(1, 2, vec![local]);
    let placed = provider.parts_of(local);
    assert_eq!(placed[&1].keys().copied().collect::<Vec<_>>(), vec![1, 2]);

    provider.remove_part(1, 1);
    assert_eq!(handler.count(Lifecycle::RemoveSpace(1)), 0);
    provider.remove_part(1, 2);

    assert_eq!(
        handler.events(),
        vec![
            Lifecycle::AddSpace(1),
            Lifecycle::AddPart(1, 1),
            Lifecycle::AddPart(1, 2),
            Lifecycle::RemovePart(1, 1),
            Lifecycle::RemovePart(1, 2),
            Lifecycle::RemoveSpace(1),
        ]
    );
    assert!(!provider.space_exists(local, 1));
}

#[test]
fn remote_parts_are_tracked_but_not_notified() {
    let local = local_addr();
    let remote = node_addr(2);
    let provider = MemPlacementProvider::new(local);
    let handler = recorder(&provider);

    provider.add_part(3, 1, vec![remote]);
    assert!(handler.events().is_empty());
    assert!(provider.part_exists(remote, 3, 1));
    assert!(!provider.part_exists(local, 3, 1));
    assert_eq!(provider.part_meta(3, 1), Some(PartMeta::new(3, 1, vec![remote])));

    // Moving the partition here notifies it as a new local part.
    provider.add_part(3, 1, vec![remote, local]);
    assert_eq!(
        handler.events(),
        vec![Lifecycle::AddSpace(3), Lifecycle::AddPart(3, 1)]
    );

    provider.remove_space(3);
    assert_eq!(handler.count(Lifecycle::RemoveSpace(3)), 1);
    assert!(provider.part_meta(3, 1).is_none());
}

#[test]
fn moving_a_part_away_removes_it_locally() {
    let local = local_addr();
    let remote = node_addr(5);
    let provider = MemPlacementProvider::new(local);
    let handler = recorder(&provider);

    provider.add_part(2, 1, vec![local]);
    provider.add_part(2, 2, vec![local, remote]);
    provider.add_part(2, 1, vec![remote]);
    assert_eq!(handler.count(Lifecycle::RemovePart(2, 1)), 1);
    assert_eq!(handler.count(Lifecycle::RemoveSpace(2)), 0);

    provider.add_part(2, 2, vec![remote]);
    assert_eq!(
        handler.events(),
        vec![
            Lifecycle::AddSpace(2),
            Lifecycle::AddPart(2, 1),
            Lifecycle::AddPart(2, 2),
            Lifecycle::RemovePart(2, 1),
            Lifecycle::RemovePart(2, 2),
            Lifecycle::RemoveSpace(2),
        ]
    );
    assert!(!provider.space_exists(local, 2));
    assert!(provider.part_exists(remote, 2, 1));

    // Moving them elsewhere again is not a local change.
    provider.add_part(2, 1, vec![node_addr(6)]);
    assert_eq!(handler.events().len(), 6);
}

#[tokio::test]
async fn store_drops_a_part_moved_elsewhere() {
    let node = single_node();
    node.add_local_part(1, 1);
    assert!(node.store.part(1, 1).is_ok());

    node.placement.add_part(1, 1, vec![node_addr(5)]);
    assert!(!node.placement.part_exists(node.addr, 1, 1));
    assert_eq!(node.store.get(1, 1, b"k"), Err(StoreError::SpaceNotFound { space: 1 }));
}

#[test]
fn second_handler_is_rejected() {
    let provider = MemPlacementProvider::new(local_addr());
    let _first = recorder(&provider);

    let second = Arc::new(RecordingHandler::default());
    let weak: Weak<dyn LifecycleHandler> = Arc::downgrade(&second) as Weak<dyn LifecycleHandler>;
    assert!(matches!(
        provider.register_handler(weak),
        Err(StoreError::InvalidRequest { .. })
    ));
}

#[test]
fn dropped_handler_is_skipped() {
    let provider = MemPlacementProvider::new(local_addr());
    drop(recorder(&provider));
    provider.add_part(1, 1, vec![]);
    assert!(provider.part_exists(local_addr(), 1, 1));
}

// ============================================================================
// Metadata-service provider
// ============================================================================

#[test]
fn meta_changes_filter_to_local_host() {
    let local = local_addr();
    let other = node_addr(5);
    let provider = MetaPlacementProvider::new(local);
    let handler = recorder(&provider);

    provider.apply_change(MetaChange::SpaceAdded(1));
    provider.apply_change(MetaChange::PartAdded(PartMeta::new(1, 1, vec![other])));
    assert!(handler.events().is_empty());

    provider.apply_change(MetaChange::PartUpdated(PartMeta::new(1, 1, vec![other, local])));
    provider.apply_change(MetaChange::PartAdded(PartMeta::new(1, 2, vec![local])));
    provider.apply_change(MetaChange::PartUpdated(PartMeta::new(1, 1, vec![other])));
    provider.apply_change(MetaChange::PartRemoved { space: 1, part: 2 });

    assert_eq!(
        handler.events(),
        vec![
            Lifecycle::AddSpace(1),
            Lifecycle::AddPart(1, 1),
            Lifecycle::AddPart(1, 2),
            Lifecycle::RemovePart(1, 1),
            Lifecycle::RemovePart(1, 2),
            Lifecycle::RemoveSpace(1),
        ]
    );
    assert!(provider.part_exists(other, 1, 1));
}

#[test]
fn meta_space_removal_notifies_once() {
    let local = local_addr();
    let mut snapshot = partkv::PartsMap::new();
    snapshot
        .entry(4)
        .or_default()
        .insert(1, PartMeta::new(4, 1, vec![local]));
    let provider = MetaPlacementProvider::with_snapshot(local, snapshot);
    assert!(provider.space_exists(local, 4));

    let handler = recorder(&provider);
    provider.apply_change(MetaChange::SpaceRemoved(4));
    provider.apply_change(MetaChange::SpaceRemoved(4));
    assert_eq!(handler.events(), vec![Lifecycle::RemoveSpace(4)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn change_stream_drives_a_store() {
    let local = local_addr();
    let provider = Arc::new(MetaPlacementProvider::new(local));
    let store = Store::new(
        StoreOptions::new(local),
        Arc::clone(&provider) as Arc<dyn PlacementProvider>,
        Arc::new(MemEngineFactory::new()),
        Arc::new(LocalReplicaFactory::new(LocalNetwork::new())),
    );
    store.init().unwrap();

    let (tx, rx) = mpsc::channel(16);
    let listener = provider.spawn_listener(rx);

    tx.send(MetaChange::PartAdded(PartMeta::new(2, 1, vec![local])))
        .await
        .unwrap();
    wait_until("partition added", || store.is_leader(2, 1)).await;
    store.put(2, 1, b"k".to_vec(), b"v".to_vec()).await.unwrap();

    tx.send(MetaChange::PartRemoved { space: 2, part: 1 })
        .await
        .unwrap();
    wait_until("space removed", || store.space_ids().is_empty()).await;
    assert_eq!(
        store.get(2, 1, b"k"),
        Err(StoreError::SpaceNotFound { space: 2 })
    );

    drop(tx);
    listener.await.unwrap();
}
