use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use crate::{
    memory::state::{AuditEntry, MemoryState},
    modes::ModeFamily,
    store::{MemoryStore, StoreError},
};

const PERSISTENCE_VERSION: u64 = 1;

/// One JSON state file and one JSON-lines audit log per key:
/// `<root>/<namespace>/<mode>.state.json` and `<mode>.audit.jsonl`.
///
/// Compare-and-swap is serialized by an in-process lock; several processes
/// sharing a root are not coordinated.
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
    audit_lock: Mutex<()>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedMemoryState {
    version: u64,
    state: MemoryState,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
            audit_lock: Mutex::new(()),
        }
    }

    fn key_dir(&self, namespace: &str) -> Result<PathBuf, StoreError> {
        let safe = !namespace.is_empty()
            && namespace != "."
            && namespace != ".."
            && namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !safe {
            return Err(StoreError::InvalidKey(namespace.to_string()));
        }
        Ok(self.root.join(namespace))
    }

    fn state_path(&self, namespace: &str, mode: ModeFamily) -> Result<PathBuf, StoreError> {
        Ok(self
            .key_dir(namespace)?
            .join(format!("{}.state.json", mode.as_str())))
    }

    fn audit_path(&self, namespace: &str, mode: ModeFamily) -> Result<PathBuf, StoreError> {
        Ok(self
            .key_dir(namespace)?
            .join(format!("{}.audit.jsonl", mode.as_str())))
    }

    async fn read_state(&self, path: &Path) -> Result<Option<MemoryState>, StoreError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(StoreError::io(
                    format!("failed to read memory state '{}'", path.display()),
                    err,
                ));
            }
        };

        let parsed: PersistedMemoryState =
            serde_json::from_str(&content).map_err(|err| StoreError::Corrupt {
                location: path.display().to_string(),
                message: err.to_string(),
            })?;
        if parsed.version != PERSISTENCE_VERSION {
            return Err(StoreError::Corrupt {
                location: path.display().to_string(),
                message: format!("unsupported state version {}", parsed.version),
            });
        }
        Ok(Some(parsed.state))
    }

    async fn write_state(&self, path: &Path, state: &MemoryState) -> Result<(), StoreError> {
        let parent = path.parent().ok_or_else(|| StoreError::Corrupt {
            location: path.display().to_string(),
            message: "state path has no parent".to_string(),
        })?;
        fs::create_dir_all(parent).await.map_err(|err| {
            StoreError::io(
                format!("failed to create state directory '{}'", parent.display()),
                err,
            )
        })?;

        let persisted = PersistedMemoryState {
            version: PERSISTENCE_VERSION,
            state: state.clone(),
        };
        let mut body = serde_json::to_vec_pretty(&persisted).map_err(|err| StoreError::Corrupt {
            location: path.display().to_string(),
            message: format!("failed to serialize state: {err}"),
        })?;
        body.push(b'\n');

        let tmp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path).await.map_err(|err| {
            StoreError::io(
                format!("failed to create temp file '{}'", tmp_path.display()),
                err,
            )
        })?;
        file.write_all(&body).await.map_err(|err| {
            StoreError::io(format!("failed to write '{}'", tmp_path.display()), err)
        })?;
        file.flush().await.map_err(|err| {
            StoreError::io(format!("failed to flush '{}'", tmp_path.display()), err)
        })?;
        file.sync_all().await.map_err(|err| {
            StoreError::io(format!("failed to sync '{}'", tmp_path.display()), err)
        })?;
        drop(file);

        fs::rename(&tmp_path, path).await.map_err(|err| {
            StoreError::io(
                format!(
                    "failed to replace '{}' from '{}'",
                    path.display(),
                    tmp_path.display()
                ),
                err,
            )
        })?;

        if let Ok(parent_dir) = fs::File::open(parent).await {
            let _ = parent_dir.sync_all().await;
        }
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for FileStore {
    async fn load_state(
        &self,
        namespace: &str,
        mode: ModeFamily,
    ) -> Result<Option<MemoryState>, StoreError> {
        let path = self.state_path(namespace, mode)?;
        self.read_state(&path).await
    }

    async fn compare_and_swap(
        &self,
        namespace: &str,
        mode: ModeFamily,
        expected_revision: u64,
        new_state: &MemoryState,
    ) -> Result<(), StoreError> {
        let path = self.state_path(namespace, mode)?;
        let _guard = self.write_lock.lock().await;

        let actual = self
            .read_state(&path)
            .await?
            .map_or(0, |state| state.revision);
        if actual != expected_revision {
            return Err(StoreError::Conflict {
                namespace: namespace.to_string(),
                mode,
                expected: expected_revision,
                actual,
            });
        }

        self.write_state(&path, new_state).await?;
        tracing::debug!(
            target: "store",
            namespace = %namespace,
            mode = %mode,
            revision = new_state.revision,
            path = %path.display(),
            "memory_state_written"
        );
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let path = self.audit_path(&entry.namespace, entry.mode)?;
        let mut line = serde_json::to_vec(entry).map_err(|err| StoreError::Corrupt {
            location: path.display().to_string(),
            message: format!("failed to serialize audit entry: {err}"),
        })?;
        line.push(b'\n');

        let _guard = self.audit_lock.lock().await;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|err| {
                StoreError::io(
                    format!("failed to create audit directory '{}'", parent.display()),
                    err,
                )
            })?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|err| {
                StoreError::io(format!("failed to open audit log '{}'", path.display()), err)
            })?;
        file.write_all(&line).await.map_err(|err| {
            StoreError::io(format!("failed to append audit log '{}'", path.display()), err)
        })?;
        file.flush().await.map_err(|err| {
            StoreError::io(format!("failed to flush audit log '{}'", path.display()), err)
        })?;
        file.sync_data().await.map_err(|err| {
            StoreError::io(format!("failed to sync audit log '{}'", path.display()), err)
        })?;
        Ok(())
    }

    async fn audit_log(
        &self,
        namespace: &str,
        mode: ModeFamily,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let path = self.audit_path(namespace, mode)?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(StoreError::io(
                    format!("failed to read audit log '{}'", path.display()),
                    err,
                ));
            }
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|err| StoreError::Corrupt {
                    location: format!("{}:{}", path.display(), idx + 1),
                    message: err.to_string(),
                })
            })
            .collect()
    }
}
