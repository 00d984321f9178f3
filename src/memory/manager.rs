use std::sync::Arc;

use time::OffsetDateTime;

use crate::{
    error::{SummarizeError, conflict, invalid_input},
    executor::FailureStage,
    memory::{
        MemoryConfig, merge,
        state::{AuditEntry, AuditOutcome, MemoryState, Tier},
    },
    modes::ModeFamily,
    store::{MemoryStore, StoreError},
    telemetry::{SummarizeTelemetryEvent, TelemetrySink},
    types::{SummaryResult, WindowHash},
};

#[derive(Debug, Clone)]
pub struct FoldReport {
    pub state: MemoryState,
    /// Tiers that actually changed; empty when the window was already folded.
    pub applied: Vec<Tier>,
    pub conflict_retries: u32,
}

impl FoldReport {
    pub fn already_folded(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Folds parsed windows into the tiered memory of a key. Every write is an
/// optimistic compare-and-swap against the revision that was read.
#[derive(Clone)]
pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    config: MemoryConfig,
    telemetry: Arc<dyn TelemetrySink>,
}

impl MemoryManager {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        config: MemoryConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            store,
            config,
            telemetry,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn fold_tiers(&self) -> Vec<Tier> {
        fold_targets(&self.config.fold_tiers)
    }

    pub async fn load(&self, namespace: &str, mode: ModeFamily) -> Result<MemoryState, SummarizeError> {
        Ok(self
            .store
            .load_state(namespace, mode)
            .await?
            .unwrap_or_else(|| MemoryState::empty(namespace, mode)))
    }

    pub async fn audit_log(
        &self,
        namespace: &str,
        mode: ModeFamily,
    ) -> Result<Vec<AuditEntry>, SummarizeError> {
        Ok(self.store.audit_log(namespace, mode).await?)
    }

    pub async fn fold(
        &self,
        namespace: &str,
        mode: ModeFamily,
        result: &SummaryResult,
        tiers: &[Tier],
    ) -> Result<FoldReport, SummarizeError> {
        let targets = fold_targets(tiers);
        if targets.is_empty() {
            return Err(invalid_input(
                "fold needs at least one of the rolling or session tiers",
            ));
        }

        let mut conflict_retries = 0;
        loop {
            let current = self.load(namespace, mode).await?;
            let pending: Vec<Tier> = targets
                .iter()
                .copied()
                .filter(|tier| !current.tier(*tier).contains(&result.window_hash))
                .collect();
            if pending.is_empty() {
                return Ok(FoldReport {
                    state: current,
                    applied: Vec::new(),
                    conflict_retries,
                });
            }

            let mut next = current.clone();
            let now = OffsetDateTime::now_utc();
            let mut items_added = 0;
            let mut items_evicted = 0;
            for tier in &pending {
                let tier_state = next.tier_mut(*tier);
                match tier {
                    Tier::Rolling => {
                        items_evicted +=
                            merge::fold_rolling(tier_state, &result.items, &self.config.rolling);
                        items_added += result.items.len();
                    }
                    Tier::Session => items_added += merge::fold_session(tier_state, &result.items),
                    Tier::Canonical => {}
                }
                tier_state.folded.insert(result.window_hash.clone());
                tier_state.revision += 1;
                tier_state.updated_at = Some(now);
            }
            next.revision = current.revision + 1;

            match self
                .store
                .compare_and_swap(namespace, mode, current.revision, &next)
                .await
            {
                Ok(()) => {
                    tracing::debug!(
                        target: "memory",
                        namespace = %namespace,
                        mode = %mode,
                        window_hash = %result.window_hash.short(),
                        revision = next.revision,
                        tiers = ?pending,
                        items_added,
                        items_evicted,
                        "window_folded"
                    );
                    self.audit(AuditEntry::new(
                        namespace,
                        mode,
                        result.window_hash.clone(),
                        next.revision,
                        AuditOutcome::Folded {
                            tiers: pending.clone(),
                            items_added,
                            items_evicted,
                        },
                    ))
                    .await;
                    return Ok(FoldReport {
                        state: next,
                        applied: pending,
                        conflict_retries,
                    });
                }
                Err(err @ StoreError::Conflict { .. }) => {
                    if conflict_retries >= self.config.max_conflict_retries {
                        return Err(conflict(format!(
                            "gave up folding window {} after {} conflicting writes: {}",
                            result.window_hash.short(),
                            conflict_retries + 1,
                            err
                        )));
                    }
                    conflict_retries += 1;
                    self.telemetry.on_event(SummarizeTelemetryEvent::FoldConflict {
                        window_hash: result.window_hash.clone(),
                        attempt: conflict_retries,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Rebuilds the canonical tier from a complete re-run. `results` must be
    /// in window order; `refresh_hash` identifies the refresh in the audit log.
    pub async fn refresh_canonical(
        &self,
        namespace: &str,
        mode: ModeFamily,
        results: &[SummaryResult],
        refresh_hash: &WindowHash,
    ) -> Result<FoldReport, SummarizeError> {
        if results.is_empty() {
            return Err(invalid_input("canonical refresh needs at least one window"));
        }
        let items = merge::rebuild_canonical(results);

        let mut conflict_retries = 0;
        loop {
            let current = self.load(namespace, mode).await?;
            let mut next = current.clone();
            let canonical = next.tier_mut(Tier::Canonical);
            canonical.items = items.clone();
            canonical
                .folded
                .extend(results.iter().map(|result| result.window_hash.clone()));
            canonical.revision += 1;
            canonical.updated_at = Some(OffsetDateTime::now_utc());
            canonical.metadata.insert(
                "refreshed_windows".to_string(),
                serde_json::Value::from(results.len()),
            );
            next.revision = current.revision + 1;

            match self
                .store
                .compare_and_swap(namespace, mode, current.revision, &next)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        target: "memory",
                        namespace = %namespace,
                        mode = %mode,
                        revision = next.revision,
                        windows = results.len(),
                        items = items.len(),
                        "canonical_refreshed"
                    );
                    self.audit(AuditEntry::new(
                        namespace,
                        mode,
                        refresh_hash.clone(),
                        next.revision,
                        AuditOutcome::CanonicalRefreshed {
                            window_count: results.len(),
                            item_count: items.len(),
                        },
                    ))
                    .await;
                    return Ok(FoldReport {
                        state: next,
                        applied: vec![Tier::Canonical],
                        conflict_retries,
                    });
                }
                Err(err @ StoreError::Conflict { .. }) => {
                    if conflict_retries >= self.config.max_conflict_retries {
                        return Err(conflict(format!(
                            "gave up refreshing canonical tier after {} conflicting writes: {}",
                            conflict_retries + 1,
                            err
                        )));
                    }
                    conflict_retries += 1;
                    self.telemetry.on_event(SummarizeTelemetryEvent::FoldConflict {
                        window_hash: refresh_hash.clone(),
                        attempt: conflict_retries,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Leaves a trace of a failed window in the audit log. State is untouched.
    pub async fn record_failure(
        &self,
        namespace: &str,
        mode: ModeFamily,
        window_hash: &WindowHash,
        stage: FailureStage,
        error: &SummarizeError,
    ) {
        let revision = match self.store.load_state(namespace, mode).await {
            Ok(state) => state.map_or(0, |state| state.revision),
            Err(err) => {
                tracing::warn!(
                    target: "memory",
                    namespace = %namespace,
                    mode = %mode,
                    error = %err,
                    "failure_audit_state_unreadable"
                );
                0
            }
        };
        self.audit(AuditEntry::new(
            namespace,
            mode,
            window_hash.clone(),
            revision,
            AuditOutcome::WindowFailed {
                stage,
                kind: error.kind,
                message: error.message.clone(),
            },
        ))
        .await;
    }

    /// The state write is the commit point; a failed audit append is logged
    /// but does not undo it.
    async fn audit(&self, entry: AuditEntry) {
        if let Err(err) = self.store.append_audit(&entry).await {
            tracing::warn!(
                target: "memory",
                namespace = %entry.namespace,
                mode = %entry.mode,
                window_hash = %entry.window_hash.short(),
                error = %err,
                "audit_append_failed"
            );
        }
    }
}

fn fold_targets(tiers: &[Tier]) -> Vec<Tier> {
    let mut targets: Vec<Tier> = tiers
        .iter()
        .copied()
        .filter(|tier| *tier != Tier::Canonical)
        .collect();
    targets.sort();
    targets.dedup();
    targets
}
