use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::{
    memory::state::{AuditEntry, MemoryState},
    modes::ModeFamily,
};

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("revision conflict for {namespace}/{mode}: expected {expected}, found {actual}")]
    Conflict {
        namespace: String,
        mode: ModeFamily,
        expected: u64,
        actual: u64,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt record at {location}: {message}")]
    Corrupt { location: String, message: String },
    #[error("invalid store key '{0}'")]
    InvalidKey(String),
}

impl StoreError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Durable home of memory states and their audit trail. Writers coordinate
/// only through `compare_and_swap` on the state revision.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn load_state(
        &self,
        namespace: &str,
        mode: ModeFamily,
    ) -> Result<Option<MemoryState>, StoreError>;

    /// Replaces the stored state only if its revision still equals
    /// `expected_revision` (0 when nothing is stored yet).
    async fn compare_and_swap(
        &self,
        namespace: &str,
        mode: ModeFamily,
        expected_revision: u64,
        new_state: &MemoryState,
    ) -> Result<(), StoreError>;

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    async fn audit_log(
        &self,
        namespace: &str,
        mode: ModeFamily,
    ) -> Result<Vec<AuditEntry>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    InMemory,
    File {
        #[serde(default = "default_store_root")]
        root: PathBuf,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::File {
            root: default_store_root(),
        }
    }
}

fn default_store_root() -> PathBuf {
    PathBuf::from("./state/memory")
}
