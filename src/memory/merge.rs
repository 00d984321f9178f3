use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::Duration;

use crate::{
    memory::state::TierState,
    types::{AttributedItem, MessageId, SummaryResult},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingConfig {
    #[serde(default = "default_rolling_max_items")]
    pub max_items: usize,
    /// Items anchored further than this behind the newest item are evicted.
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            max_items: default_rolling_max_items(),
            max_age_secs: None,
        }
    }
}

fn default_rolling_max_items() -> usize {
    200
}

/// Appends to the rolling tier, keeps it ordered by anchor time and evicts
/// the oldest items beyond the configured bounds. Returns the number of
/// items evicted. Unanchored items sort first and go first.
pub fn fold_rolling(tier: &mut TierState, items: &[AttributedItem], config: &RollingConfig) -> usize {
    tier.items.extend(items.iter().cloned());
    tier.items.sort_by_key(|item| item.anchored_at);
    let before = tier.items.len();

    if let Some(max_age_secs) = config.max_age_secs
        && let Some(newest) = tier.items.iter().filter_map(|item| item.anchored_at).max()
    {
        let max_age = Duration::seconds(i64::try_from(max_age_secs).unwrap_or(i64::MAX));
        tier.items.retain(|item| {
            item.anchored_at
                .is_none_or(|anchored_at| newest - anchored_at <= max_age)
        });
    }

    let max_items = config.max_items.max(1);
    if tier.items.len() > max_items {
        let overflow = tier.items.len() - max_items;
        tier.items.drain(..overflow);
    }

    before - tier.items.len()
}

/// Appends to the session tier, skipping items that cite exactly the same
/// messages as one already kept. Returns the number of items added.
pub fn fold_session(tier: &mut TierState, items: &[AttributedItem]) -> usize {
    let mut seen: BTreeSet<BTreeSet<MessageId>> = tier
        .items
        .iter()
        .map(|item| item.source_msg_ids.clone())
        .collect();
    let before = tier.items.len();
    for item in items {
        if seen.insert(item.source_msg_ids.clone()) {
            tier.items.push(item.clone());
        }
    }
    tier.items.len() - before
}

/// Canonical items from a full re-run: window order, first occurrence of
/// each source set wins.
pub fn rebuild_canonical(results: &[SummaryResult]) -> Vec<AttributedItem> {
    let mut seen = BTreeSet::new();
    results
        .iter()
        .flat_map(|result| result.items.iter())
        .filter(|item| seen.insert(item.source_msg_ids.clone()))
        .cloned()
        .collect()
}
