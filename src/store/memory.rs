use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    memory::state::{AuditEntry, MemoryState},
    modes::ModeFamily,
    store::{MemoryStore, StoreError},
};

/// Process-local store; state is lost on drop.
#[derive(Default)]
pub struct InMemoryStore {
    states: Mutex<HashMap<(String, ModeFamily), MemoryState>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn load_state(
        &self,
        namespace: &str,
        mode: ModeFamily,
    ) -> Result<Option<MemoryState>, StoreError> {
        let guard = self.states.lock().await;
        Ok(guard.get(&(namespace.to_string(), mode)).cloned())
    }

    async fn compare_and_swap(
        &self,
        namespace: &str,
        mode: ModeFamily,
        expected_revision: u64,
        new_state: &MemoryState,
    ) -> Result<(), StoreError> {
        let mut guard = self.states.lock().await;
        let key = (namespace.to_string(), mode);
        let actual = guard.get(&key).map_or(0, |state| state.revision);
        if actual != expected_revision {
            return Err(StoreError::Conflict {
                namespace: namespace.to_string(),
                mode,
                expected: expected_revision,
                actual,
            });
        }
        guard.insert(key, new_state.clone());
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.audit.lock().await.push(entry.clone());
        Ok(())
    }

    async fn audit_log(
        &self,
        namespace: &str,
        mode: ModeFamily,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let guard = self.audit.lock().await;
        Ok(guard
            .iter()
            .filter(|entry| entry.namespace == namespace && entry.mode == mode)
            .cloned()
            .collect())
    }
}
