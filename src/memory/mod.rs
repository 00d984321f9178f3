use serde::{Deserialize, Serialize};

pub mod manager;
pub mod merge;
pub mod state;

pub use manager::{FoldReport, MemoryManager};
pub use merge::RollingConfig;
pub use state::{AuditEntry, AuditOutcome, MemoryState, Tier, TierState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub rolling: RollingConfig,
    /// Tiers a parsed window is folded into. The canonical tier is only
    /// rebuilt by an explicit refresh.
    #[serde(default = "default_fold_tiers")]
    pub fold_tiers: Vec<Tier>,
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            rolling: RollingConfig::default(),
            fold_tiers: default_fold_tiers(),
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

fn default_fold_tiers() -> Vec<Tier> {
    vec![Tier::Rolling, Tier::Session]
}

fn default_max_conflict_retries() -> u32 {
    8
}
