//! End-to-end store behavior, run against every local backend

use std::sync::Arc;

use keeplog_store::{
    EntryId, KvBackend, LogStore, MemoryBackend, Meta, MetaDiff, Order, PAGE_SIZE, RedbBackend,
    StoreConfig, SweepCriteria, SyncCursor, SyncUpdate,
};
use serde_json::json;
use tempfile::TempDir;

/// Backends under test; the TempDir must outlive the redb store
fn backends() -> Vec<(&'static str, Arc<dyn KvBackend>, Option<TempDir>)> {
    let dir = TempDir::new().unwrap();
    let redb = RedbBackend::open(dir.path().join("log.redb"), 1024 * 1024).unwrap();
    vec![
        ("memory", Arc::new(MemoryBackend::new()), None),
        ("redb", Arc::new(redb), Some(dir)),
    ]
}

fn meta(time: u64, node: &str, reasons: &[&str]) -> Meta {
    Meta::new(EntryId::new(time, node, 0), time).with_reasons(reasons.iter().copied())
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_positions_are_dense_and_increasing() {
    for (name, backend, _dir) in backends() {
        let store = LogStore::new(backend);
        for i in 1..=10u64 {
            let added = store
                .add(json!({"i": i}), meta(i, "a", &["r"]))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(added.added, Some(i), "{name}");
        }
        // A rejected duplicate does not consume a position
        assert!(store.add(json!({}), meta(3, "a", &["r"])).await.unwrap().is_none());
        let next = store.add(json!({}), meta(11, "a", &["r"])).await.unwrap().unwrap();
        assert_eq!(next.added, Some(11), "{name}");
        assert_eq!(store.count().await.unwrap(), 11, "{name}");
    }
}

#[tokio::test]
async fn test_removed_id_can_be_readmitted_at_new_position() {
    for (name, backend, _dir) in backends() {
        let store = LogStore::new(backend);
        let id = EntryId::new(1, "a", 0);
        store.add(json!({"v": 1}), meta(1, "a", &["r"])).await.unwrap();
        store.remove(&id).await.unwrap().unwrap();

        let again = store
            .add(json!({"v": 2}), meta(1, "a", &["r"]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.added, Some(2), "{name}");
        let (action, _) = store.by_id(&id).await.unwrap().unwrap();
        assert_eq!(action, json!({"v": 2}), "{name}");
    }
}

#[tokio::test]
async fn test_extra_meta_fields_survive() {
    for (name, backend, _dir) in backends() {
        let store = LogStore::new(backend);
        let meta = meta(1, "a", &["r"]).with_field("subprotocol", json!("1.0.0"));
        store.add(json!({}), meta).await.unwrap();
        let (_, found) = store.by_id(&EntryId::new(1, "a", 0)).await.unwrap().unwrap();
        assert_eq!(found.extra["subprotocol"], json!("1.0.0"), "{name}");
    }
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_pages_of_one_fifty() {
    for (name, backend, _dir) in backends() {
        let store = LogStore::new(backend);
        for i in 1..=150u64 {
            store.add(json!({"i": i}), meta(i, "a", &["r"])).await.unwrap();
        }

        let first = store.get(Order::Added).await.unwrap();
        assert_eq!(first.entries.len(), PAGE_SIZE, "{name}");
        assert_eq!(first.entries[0].1.added, Some(150), "{name}");
        assert_eq!(first.entries[99].1.added, Some(51), "{name}");

        let cursor = first.next.expect("second page");
        assert_eq!(cursor.offset(), PAGE_SIZE);
        let second = cursor.next().await.unwrap();
        assert_eq!(second.entries.len(), 50, "{name}");
        assert_eq!(second.entries[0].1.added, Some(50), "{name}");
        assert_eq!(second.entries[49].1.added, Some(1), "{name}");
        assert!(second.next.is_none(), "{name}");
    }
}

#[tokio::test]
async fn test_created_order_uses_tie_breaks() {
    for (name, backend, _dir) in backends() {
        let store = LogStore::new(backend);
        store.add(json!({"n": "b"}), meta(5, "b", &["r"])).await.unwrap();
        store.add(json!({"n": "a"}), meta(5, "a", &["r"])).await.unwrap();
        store.add(json!({"n": "c"}), meta(6, "a", &["r"])).await.unwrap();

        let entries = store.entries(Order::Created).await.unwrap();
        let nodes: Vec<_> = entries.iter().map(|(a, _)| a["n"].clone()).collect();
        assert_eq!(nodes, vec![json!("c"), json!("b"), json!("a")], "{name}");

        let by_added = store.entries(Order::Added).await.unwrap();
        let nodes: Vec<_> = by_added.iter().map(|(a, _)| a["n"].clone()).collect();
        assert_eq!(nodes, vec![json!("c"), json!("a"), json!("b")], "{name}");
    }
}

// ============================================================================
// Sweeps
// ============================================================================

#[tokio::test]
async fn test_sweep_lifecycle() {
    for (name, backend, _dir) in backends() {
        let store = LogStore::new(backend);
        store.add(json!({"k": 1}), meta(1, "a", &["x"])).await.unwrap();
        store.add(json!({"k": 2}), meta(2, "a", &["x", "y"])).await.unwrap();
        store.add(json!({"k": 3}), meta(3, "a", &["y"])).await.unwrap();

        let mut dropped = Vec::new();
        let report = store
            .remove_reason("x", &SweepCriteria::new(), |action, _| dropped.push(action))
            .await
            .unwrap();
        assert_eq!(dropped, vec![json!({"k": 1})], "{name}");
        assert_eq!((report.matched, report.deleted, report.shrunk), (2, 1, 1), "{name}");

        let remaining = store.entries(Order::Added).await.unwrap();
        assert_eq!(remaining.len(), 2, "{name}");
        assert!(remaining.iter().all(|(_, m)| m.reasons == vec!["y"]), "{name}");

        let report = store
            .remove_reason("y", &SweepCriteria::new(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(report.deleted, 2, "{name}");
        assert_eq!(store.count().await.unwrap(), 0, "{name}");
        assert!(store.backend().keys("reasons|").await.unwrap().is_empty(), "{name}");
        assert!(store.backend().keys("added|").await.unwrap().is_empty(), "{name}");
        assert!(store.backend().keys("logs|").await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn test_change_meta_then_sweep() {
    for (name, backend, _dir) in backends() {
        let store = LogStore::new(backend);
        let id = EntryId::new(1, "a", 0);
        store.add(json!({}), meta(1, "a", &["x"])).await.unwrap();
        assert!(store.change_meta(&id, MetaDiff::new().reasons(["x", "z"])).await.unwrap());

        store
            .remove_reason("x", &SweepCriteria::new(), |_, _| panic!("still held by z"))
            .await
            .unwrap();

        let mut calls = 0;
        store
            .remove_reason("z", &SweepCriteria::new(), |_, _| calls += 1)
            .await
            .unwrap();
        assert_eq!(calls, 1, "{name}");
        assert!(store.by_id(&id).await.unwrap().is_none(), "{name}");
    }
}

// ============================================================================
// Sync cursor and lifecycle
// ============================================================================

#[tokio::test]
async fn test_sync_cursor_and_destroy() {
    for (name, backend, _dir) in backends() {
        let store = LogStore::new(backend);
        store.add(json!({}), meta(1, "a", &["r"])).await.unwrap();
        store.set_last_synced(SyncUpdate::sent(4)).await.unwrap();
        let cursor = store.set_last_synced(SyncUpdate::received(9)).await.unwrap();
        assert_eq!(cursor, SyncCursor { sent: 4, received: 9 }, "{name}");

        store.destroy().await.unwrap();
        assert_eq!(store.last_synced().await.unwrap(), SyncCursor::default(), "{name}");
        assert_eq!(store.last_added().await.unwrap(), 0, "{name}");
        assert!(store.get(Order::Added).await.unwrap().entries.is_empty(), "{name}");
    }
}

#[tokio::test]
async fn test_redb_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log.redb");
    {
        let store = LogStore::open(&StoreConfig::redb(&path)).await.unwrap();
        store.add(json!({"v": 1}), meta(1, "a", &["r"])).await.unwrap();
        store.set_last_synced(SyncUpdate::sent(1)).await.unwrap();
    }

    let store = LogStore::open(&StoreConfig::redb(&path)).await.unwrap();
    let (action, found) = store.by_id(&EntryId::new(1, "a", 0)).await.unwrap().unwrap();
    assert_eq!(action, json!({"v": 1}));
    assert_eq!(found.added, Some(1));
    assert_eq!(store.last_synced().await.unwrap().sent, 1);

    let next = store.add(json!({}), meta(2, "a", &["r"])).await.unwrap().unwrap();
    assert_eq!(next.added, Some(2));
}

#[tokio::test]
async fn test_namespaces_share_a_backend() {
    for (name, backend, _dir) in backends() {
        let left = LogStore::with_namespace(backend.clone(), "left").unwrap();
        let right = LogStore::with_namespace(backend.clone(), "right").unwrap();

        left.add(json!({"side": "left"}), meta(1, "a", &["r"])).await.unwrap();
        let added = right
            .add(json!({"side": "right"}), meta(1, "a", &["r"]))
            .await
            .unwrap()
            .unwrap();
        // Same id admitted in both namespaces, each with its own sequencer
        assert_eq!(added.added, Some(1), "{name}");

        right.remove_reason("r", &SweepCriteria::new(), |_, _| {}).await.unwrap();
        assert_eq!(left.count().await.unwrap(), 1, "{name}");
        assert_eq!(right.count().await.unwrap(), 0, "{name}");
    }
}
