use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    error::SummarizeErrorKind, executor::FailureStage, modes::ModeFamily, types::AttributedItem,
    types::WindowHash,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Rolling,
    Session,
    Canonical,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Rolling, Tier::Session, Tier::Canonical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Rolling => "rolling",
            Tier::Session => "session",
            Tier::Canonical => "canonical",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierState {
    pub revision: u64,
    pub items: Vec<AttributedItem>,
    pub folded: BTreeSet<WindowHash>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl TierState {
    pub fn contains(&self, window_hash: &WindowHash) -> bool {
        self.folded.contains(window_hash)
    }
}

/// Everything remembered for one (namespace, mode family) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryState {
    pub namespace: String,
    pub mode: ModeFamily,
    pub revision: u64,
    pub rolling: TierState,
    pub session: TierState,
    pub canonical: TierState,
}

impl MemoryState {
    pub fn empty(namespace: impl Into<String>, mode: ModeFamily) -> Self {
        Self {
            namespace: namespace.into(),
            mode,
            revision: 0,
            rolling: TierState::default(),
            session: TierState::default(),
            canonical: TierState::default(),
        }
    }

    pub fn tier(&self, tier: Tier) -> &TierState {
        match tier {
            Tier::Rolling => &self.rolling,
            Tier::Session => &self.session,
            Tier::Canonical => &self.canonical,
        }
    }

    pub fn tier_mut(&mut self, tier: Tier) -> &mut TierState {
        match tier {
            Tier::Rolling => &mut self.rolling,
            Tier::Session => &mut self.session,
            Tier::Canonical => &mut self.canonical,
        }
    }

    /// True when every listed tier already holds the window.
    pub fn is_folded(&self, window_hash: &WindowHash, tiers: &[Tier]) -> bool {
        !tiers.is_empty() && tiers.iter().all(|tier| self.tier(*tier).contains(window_hash))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditOutcome {
    Folded {
        tiers: Vec<Tier>,
        items_added: usize,
        /// Rolling items dropped by the count or age bound during this fold.
        #[serde(default)]
        items_evicted: usize,
    },
    CanonicalRefreshed {
        window_count: usize,
        item_count: usize,
    },
    WindowFailed {
        stage: FailureStage,
        kind: SummarizeErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub namespace: String,
    pub mode: ModeFamily,
    pub window_hash: WindowHash,
    /// State revision the entry was written against.
    pub revision: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub outcome: AuditOutcome,
}

impl AuditEntry {
    pub fn new(
        namespace: impl Into<String>,
        mode: ModeFamily,
        window_hash: WindowHash,
        revision: u64,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            entry_id: Uuid::now_v7(),
            namespace: namespace.into(),
            mode,
            window_hash,
            revision,
            timestamp: OffsetDateTime::now_utc(),
            outcome,
        }
    }
}
