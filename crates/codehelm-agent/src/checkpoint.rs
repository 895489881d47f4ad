//! Checkpoints — pre-images of files captured before a mutating tool runs.
//!
//! The orchestrator only talks to the `CheckpointService` trait. The
//! bundled `InMemoryCheckpointStore` keeps the most recent snapshots for
//! the lifetime of the process, which is what the CLI's `/undo` needs.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Why a checkpoint was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// Automatic, before a mutating tool call.
    ToolCall,
}

/// Handle to a saved checkpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub kind: CheckpointKind,
    pub description: String,
    pub paths: Vec<PathBuf>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Result of rolling back to a checkpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub success: bool,
    pub restored_files: Vec<PathBuf>,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait CheckpointService: Send + Sync {
    /// Capture the current contents of `paths`.
    async fn create_checkpoint(
        &self,
        kind: CheckpointKind,
        description: &str,
        paths: &[PathBuf],
    ) -> anyhow::Result<Checkpoint>;

    /// Restore every file to its state when `checkpoint_id` was taken.
    async fn rollback_to(&self, checkpoint_id: &str) -> anyhow::Result<RollbackReport>;

    /// Most recent checkpoint, if any.
    fn latest(&self) -> Option<Checkpoint>;
}

// ─────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────

struct Snapshot {
    checkpoint: Checkpoint,
    /// `None` means the file did not exist.
    files: Vec<(PathBuf, Option<Vec<u8>>)>,
}

/// Snapshots kept when no limit is given.
pub const DEFAULT_MAX_CHECKPOINTS: usize = 50;

pub struct InMemoryCheckpointStore {
    snapshots: Mutex<VecDeque<Snapshot>>,
    max_checkpoints: usize,
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_CHECKPOINTS)
    }
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_checkpoints` snapshots (at least one).
    pub fn with_limit(max_checkpoints: usize) -> Self {
        Self {
            snapshots: Mutex::new(VecDeque::new()),
            max_checkpoints: max_checkpoints.max(1),
        }
    }

    fn snapshots(&self) -> MutexGuard<'_, VecDeque<Snapshot>> {
        self.snapshots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.snapshots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots().is_empty()
    }
}

#[async_trait]
impl CheckpointService for InMemoryCheckpointStore {
    async fn create_checkpoint(
        &self,
        kind: CheckpointKind,
        description: &str,
        paths: &[PathBuf],
    ) -> anyhow::Result<Checkpoint> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let content = match tokio::fs::read(path).await {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => anyhow::bail!("cannot snapshot {}: {e}", path.display()),
            };
            files.push((path.clone(), content));
        }

        let checkpoint = Checkpoint {
            id: format!("ckpt_{}", uuid::Uuid::new_v4().simple()),
            kind,
            description: description.to_string(),
            paths: paths.to_vec(),
            created_at: chrono::Utc::now(),
        };
        info!(
            checkpoint = %checkpoint.id,
            files = files.len(),
            description = description,
            "checkpoint created"
        );
        let mut snapshots = self.snapshots();
        snapshots.push_back(Snapshot {
            checkpoint: checkpoint.clone(),
            files,
        });
        while snapshots.len() > self.max_checkpoints {
            if let Some(evicted) = snapshots.pop_front() {
                debug!(checkpoint = %evicted.checkpoint.id, "oldest checkpoint evicted");
            }
        }
        Ok(checkpoint)
    }

    async fn rollback_to(&self, checkpoint_id: &str) -> anyhow::Result<RollbackReport> {
        // Undo newest-first so the target's pre-images win for shared files.
        let undone: Vec<Snapshot> = {
            let mut snapshots = self.snapshots();
            let Some(idx) = snapshots.iter().position(|s| s.checkpoint.id == checkpoint_id) else {
                anyhow::bail!("unknown checkpoint '{checkpoint_id}'");
            };
            snapshots.split_off(idx).into_iter().rev().collect()
        };

        let mut report = RollbackReport::default();
        for snapshot in &undone {
            for (path, content) in &snapshot.files {
                let outcome = match content {
                    Some(bytes) => restore_file(path, bytes).await,
                    None => match tokio::fs::remove_file(path).await {
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                        other => other,
                    },
                };
                match outcome {
                    Ok(()) => {
                        if !report.restored_files.contains(path) {
                            report.restored_files.push(path.clone());
                        }
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "rollback failed for file");
                        report.errors.push(format!("{}: {e}", path.display()));
                    }
                }
            }
        }
        report.success = report.errors.is_empty();
        info!(
            checkpoint = checkpoint_id,
            restored = report.restored_files.len(),
            errors = report.errors.len(),
            "rolled back"
        );
        Ok(report)
    }

    fn latest(&self) -> Option<Checkpoint> {
        self.snapshots().back().map(|s| s.checkpoint.clone())
    }
}

async fn restore_file(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}
