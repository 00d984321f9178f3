use std::{path::PathBuf, sync::Arc};

use summarion::{
    memory::{AuditEntry, AuditOutcome, MemoryConfig, MemoryManager, MemoryState, Tier},
    modes::ModeFamily,
    store::{FileStore, MemoryStore, StoreError},
    telemetry::NoopTelemetrySink,
};
use uuid::Uuid;

use crate::{point, result};

fn temp_root() -> PathBuf {
    std::env::temp_dir().join(format!("summarion-store-test-{}", Uuid::now_v7()))
}

#[tokio::test]
async fn given_stale_revision_when_swapping_then_conflict_is_reported() {
    let root = temp_root();
    let store = FileStore::new(&root);
    let mut state = MemoryState::empty("team", ModeFamily::Timeline);
    state.revision = 1;

    store
        .compare_and_swap("team", ModeFamily::Timeline, 0, &state)
        .await
        .expect("first write from empty");
    let err = store
        .compare_and_swap("team", ModeFamily::Timeline, 0, &state)
        .await
        .expect_err("stale writer must lose");

    assert!(matches!(
        err,
        StoreError::Conflict {
            expected: 0,
            actual: 1,
            ..
        }
    ));
    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn given_folded_state_when_reopening_store_then_state_and_audit_survive() {
    let root = temp_root();
    let window = result(&["m1"], vec![point("persisted", &["m1"], 1)]);
    {
        let store: Arc<dyn MemoryStore> = Arc::new(FileStore::new(&root));
        let memory = MemoryManager::new(store, MemoryConfig::default(), Arc::new(NoopTelemetrySink));
        memory
            .fold("team", ModeFamily::Pointwise, &window, &[Tier::Rolling, Tier::Session])
            .await
            .expect("fold");
    }

    let reopened = FileStore::new(&root);
    let state = reopened
        .load_state("team", ModeFamily::Pointwise)
        .await
        .expect("load")
        .expect("state should exist");
    assert_eq!(state.revision, 1);
    assert!(state.rolling.contains(&window.window_hash));
    assert_eq!(state.session.items[0].text, "persisted");

    let audit = reopened
        .audit_log("team", ModeFamily::Pointwise)
        .await
        .expect("audit");
    assert_eq!(audit.len(), 1);
    assert!(matches!(audit[0].outcome, AuditOutcome::Folded { items_added: 2, .. }));

    assert!(root.join("team").join("pointwise.state.json").exists());
    assert!(!root.join("team").join("pointwise.state.json.tmp").exists());
    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn given_audit_entries_when_reading_log_then_order_is_kept() {
    let root = temp_root();
    let store = FileStore::new(&root);
    let hash = summarion::hasher::window_hash("timeline", 1, ["a"]).expect("hash");
    for revision in 1..=3 {
        let entry = AuditEntry::new(
            "team",
            ModeFamily::Timeline,
            hash.clone(),
            revision,
            AuditOutcome::Folded {
                tiers: vec![Tier::Rolling],
                items_added: 1,
                items_evicted: 0,
            },
        );
        store.append_audit(&entry).await.expect("append");
    }

    let audit = store
        .audit_log("team", ModeFamily::Timeline)
        .await
        .expect("audit");
    let revisions: Vec<u64> = audit.iter().map(|entry| entry.revision).collect();
    assert_eq!(revisions, vec![1, 2, 3]);
    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn given_corrupt_state_file_when_loading_then_corrupt_error() {
    let root = temp_root();
    std::fs::create_dir_all(root.join("team")).expect("create dir");
    std::fs::write(root.join("team").join("pointwise.state.json"), "{ not json").expect("write");

    let store = FileStore::new(&root);
    let err = store
        .load_state("team", ModeFamily::Pointwise)
        .await
        .expect_err("corrupt file must fail");
    assert!(matches!(err, StoreError::Corrupt { .. }));
    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn given_path_like_namespace_when_loading_then_key_is_rejected() {
    let store = FileStore::new(temp_root());
    let err = store
        .load_state("../escape", ModeFamily::Pointwise)
        .await
        .expect_err("traversal must fail");
    assert!(matches!(err, StoreError::InvalidKey(_)));
}

#[tokio::test]
async fn given_missing_audit_log_when_reading_then_it_is_empty() {
    let store = FileStore::new(temp_root());
    let audit = store
        .audit_log("fresh", ModeFamily::ActionItems)
        .await
        .expect("missing log is not an error");
    assert!(audit.is_empty());
}
