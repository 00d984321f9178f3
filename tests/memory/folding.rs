use std::sync::Arc;

use summarion::{
    error::{SummarizeErrorKind, budget_exceeded},
    executor::FailureStage,
    hasher::window_hash,
    memory::{AuditOutcome, MemoryConfig, MemoryManager, RollingConfig, Tier},
    modes::ModeFamily,
    store::{InMemoryStore, MemoryStore},
    telemetry::NoopTelemetrySink,
};

use crate::{point, result};

fn manager(store: Arc<dyn MemoryStore>, config: MemoryConfig) -> MemoryManager {
    MemoryManager::new(store, config, Arc::new(NoopTelemetrySink))
}

#[tokio::test]
async fn given_folded_window_when_folding_again_then_state_is_unchanged() {
    let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
    let memory = manager(Arc::clone(&store), MemoryConfig::default());
    let window = result(&["m1", "m2"], vec![point("kickoff", &["m1"], 1)]);
    let tiers = [Tier::Rolling, Tier::Session];

    let first = memory
        .fold("team", ModeFamily::Pointwise, &window, &tiers)
        .await
        .expect("first fold");
    let second = memory
        .fold("team", ModeFamily::Pointwise, &window, &tiers)
        .await
        .expect("second fold");

    assert_eq!(first.applied, vec![Tier::Rolling, Tier::Session]);
    assert!(second.already_folded());
    assert_eq!(second.state, first.state);
    assert_eq!(first.state.revision, 1);
    assert_eq!(first.state.rolling.items.len(), 1);
    assert!(first.state.canonical.items.is_empty());

    let audit = memory
        .audit_log("team", ModeFamily::Pointwise)
        .await
        .expect("audit log");
    assert_eq!(audit.len(), 1);
    assert!(matches!(audit[0].outcome, AuditOutcome::Folded { .. }));
}

#[tokio::test]
async fn given_successive_windows_when_folding_then_revisions_only_grow() {
    let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
    let memory = manager(store, MemoryConfig::default());

    let mut last_revision = 0;
    for idx in 0..4_i64 {
        let id = format!("m{idx}");
        let window = result(&[id.as_str()], vec![point("note", &[id.as_str()], idx)]);
        let report = memory
            .fold("team", ModeFamily::Pointwise, &window, &[Tier::Rolling])
            .await
            .expect("fold");
        assert!(report.state.revision > last_revision);
        last_revision = report.state.revision;
    }

    let state = memory
        .load("team", ModeFamily::Pointwise)
        .await
        .expect("load");
    assert_eq!(state.revision, 4);
    assert_eq!(state.rolling.revision, 4);
    assert_eq!(state.session.revision, 0);
}

#[tokio::test]
async fn given_rolling_bound_when_folding_then_oldest_items_are_evicted() {
    let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
    let config = MemoryConfig {
        rolling: RollingConfig {
            max_items: 3,
            max_age_secs: None,
        },
        ..MemoryConfig::default()
    };
    let memory = manager(store, config);

    for idx in 0..5_i64 {
        let id = format!("m{idx}");
        let window = result(&[id.as_str()], vec![point(&format!("p{idx}"), &[id.as_str()], idx)]);
        memory
            .fold("team", ModeFamily::Pointwise, &window, &[Tier::Rolling])
            .await
            .expect("fold");
    }

    let state = memory
        .load("team", ModeFamily::Pointwise)
        .await
        .expect("load");
    let texts: Vec<&str> = state.rolling.items.iter().map(|item| item.text.as_str()).collect();
    assert_eq!(texts, vec!["p2", "p3", "p4"]);
    assert_eq!(state.rolling.folded.len(), 5);

    let audit = memory
        .audit_log("team", ModeFamily::Pointwise)
        .await
        .expect("audit log");
    let evicted: Vec<usize> = audit
        .iter()
        .map(|entry| match entry.outcome {
            AuditOutcome::Folded { items_added, items_evicted, .. } => {
                assert_eq!(items_added, 1);
                items_evicted
            }
            _ => panic!("unexpected audit outcome {:?}", entry.outcome),
        })
        .collect();
    assert_eq!(evicted, vec![0, 0, 0, 1, 1]);
}

#[tokio::test]
async fn given_repeated_source_sets_when_folding_session_then_duplicates_are_skipped() {
    let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
    let memory = manager(store, MemoryConfig::default());

    let first = result(&["m1", "m2"], vec![point("launch friday", &["m1", "m2"], 1)]);
    let overlapping = result(
        &["m1", "m2", "m3"],
        vec![
            point("launch is on friday", &["m2", "m1"], 1),
            point("deck by dana", &["m3"], 3),
        ],
    );
    memory
        .fold("team", ModeFamily::Pointwise, &first, &[Tier::Session])
        .await
        .expect("fold first");
    memory
        .fold("team", ModeFamily::Pointwise, &overlapping, &[Tier::Session])
        .await
        .expect("fold overlapping");

    let state = memory
        .load("team", ModeFamily::Pointwise)
        .await
        .expect("load");
    let texts: Vec<&str> = state.session.items.iter().map(|item| item.text.as_str()).collect();
    assert_eq!(texts, vec!["launch friday", "deck by dana"]);
}

#[tokio::test]
async fn given_canonical_only_tiers_when_folding_then_invalid_input() {
    let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
    let memory = manager(store, MemoryConfig::default());
    let window = result(&["m1"], vec![point("x", &["m1"], 1)]);

    let err = memory
        .fold("team", ModeFamily::Pointwise, &window, &[Tier::Canonical])
        .await
        .expect_err("canonical is not a fold target");
    assert_eq!(err.kind, SummarizeErrorKind::InvalidInput);
}

#[tokio::test]
async fn given_full_rerun_when_refreshing_canonical_then_tier_is_replaced() {
    let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
    let memory = manager(store, MemoryConfig::default());
    let results = vec![
        result(&["m1", "m2"], vec![point("a", &["m1"], 1), point("b", &["m2"], 2)]),
        result(&["m3"], vec![point("a again", &["m1"], 1), point("c", &["m3"], 3)]),
    ];
    let refresh_hash = window_hash("pointwise", 4, ["m1", "m2", "m3"])
        .expect("refresh hash");

    let report = memory
        .refresh_canonical("team", ModeFamily::Pointwise, &results, &refresh_hash)
        .await
        .expect("refresh");

    let texts: Vec<&str> = report
        .state
        .canonical
        .items
        .iter()
        .map(|item| item.text.as_str())
        .collect();
    assert_eq!(texts, vec!["a", "b", "c"]);
    assert_eq!(report.state.canonical.revision, 1);
    assert!(report.state.rolling.items.is_empty());

    let audit = memory
        .audit_log("team", ModeFamily::Pointwise)
        .await
        .expect("audit log");
    assert!(matches!(
        audit.last().map(|entry| &entry.outcome),
        Some(AuditOutcome::CanonicalRefreshed { window_count: 2, item_count: 3 })
    ));
}

#[tokio::test]
async fn given_failed_window_when_recording_then_only_audit_changes() {
    let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
    let memory = manager(store, MemoryConfig::default());
    let hash = window_hash("pointwise", 4, ["m1"]).expect("hash");

    memory
        .record_failure(
            "team",
            ModeFamily::Pointwise,
            &hash,
            FailureStage::Budget,
            &budget_exceeded("deadline passed"),
        )
        .await;

    let state = memory
        .load("team", ModeFamily::Pointwise)
        .await
        .expect("load");
    assert_eq!(state.revision, 0);
    let audit = memory
        .audit_log("team", ModeFamily::Pointwise)
        .await
        .expect("audit log");
    assert_eq!(audit.len(), 1);
    assert!(matches!(
        audit[0].outcome,
        AuditOutcome::WindowFailed {
            stage: FailureStage::Budget,
            kind: SummarizeErrorKind::BudgetExceeded,
            ..
        }
    ));
}
