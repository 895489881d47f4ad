//! Tool executor — runs one validated call with checkpoint, timeout and retries.
//!
//! Failures come back as data (`ToolOutcome::Failed`), never as `Err`:
//! the orchestrator decides whether the run continues from the `fatal`
//! flag alone.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use codehelm_core::error::ToolError;

use crate::checkpoint::{CheckpointKind, CheckpointService};
use crate::tools::{ToolContext, ToolRegistry};

/// Arguments that name a file a mutating tool is about to touch.
const PATH_ARGS: &[&str] = &["path", "file"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolOutcome {
    Success(String),
    Failed {
        message: String,
        /// The run must stop; the tool declared this failure unrecoverable.
        fatal: bool,
    },
}

impl ToolOutcome {
    fn failed(message: impl Into<String>, fatal: bool) -> Self {
        ToolOutcome::Failed {
            message: message.into(),
            fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ToolOutcome::Failed { fatal: true, .. })
    }
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    checkpoints: Option<Arc<dyn CheckpointService>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            checkpoints: None,
        }
    }

    pub fn with_checkpoints(mut self, service: Arc<dyn CheckpointService>) -> Self {
        self.checkpoints = Some(service);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute `name` with already-validated `args`.
    pub async fn execute(&self, name: &str, args: HashMap<String, Value>, ctx: &ToolContext) -> ToolOutcome {
        let Some(tool) = self.registry.get(name).cloned() else {
            return ToolOutcome::failed(ToolError::NotFound(name.to_string()).to_string(), false);
        };

        if self.registry.is_mutating(name) {
            if let Err(e) = self.checkpoint(name, &args, ctx).await {
                warn!(tool = name, error = %e, "checkpoint failed; refusing to run mutating tool");
                return ToolOutcome::failed(e.to_string(), false);
            }
        }

        let timeout = self.registry.get_timeout(name);
        let retry = self.registry.get_retry_config(name);
        let mut attempt = 0u32;

        loop {
            info!(tool = name, attempt = attempt + 1, "executing tool");
            let error = match tokio::time::timeout(timeout, tool.execute(args.clone(), ctx)).await {
                Ok(Ok(output)) => return ToolOutcome::Success(output),
                Ok(Err(e)) => e,
                Err(_) => anyhow::Error::new(ToolError::Timeout {
                    tool: name.to_string(),
                    secs: timeout.as_secs(),
                }),
            };

            let classified = error.downcast_ref::<ToolError>();
            let transient = classified.is_some_and(ToolError::is_transient);
            if transient && attempt < retry.max_retries {
                attempt += 1;
                warn!(tool = name, attempt, error = %error, "transient tool failure; retrying");
                continue;
            }

            let fatal = !retry.retryable;
            warn!(tool = name, fatal, error = %error, "tool failed");
            return ToolOutcome::failed(error.to_string(), fatal);
        }
    }

    async fn checkpoint(&self, name: &str, args: &HashMap<String, Value>, ctx: &ToolContext) -> Result<(), ToolError> {
        let Some(service) = &self.checkpoints else {
            return Ok(());
        };
        let paths: Vec<PathBuf> = PATH_ARGS
            .iter()
            .filter_map(|key| args.get(*key)?.as_str())
            .filter_map(|raw| ctx.resolve_path(raw).ok())
            .collect();
        if paths.is_empty() {
            return Ok(());
        }

        let description = format!(
            "{name} {}",
            paths
                .iter()
                .map(|p| ctx.display_path(p))
                .collect::<Vec<_>>()
                .join(", ")
        );
        service
            .create_checkpoint(CheckpointKind::ToolCall, &description, &paths)
            .await
            .map(|_| ())
            .map_err(|e| ToolError::Checkpoint {
                tool: name.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::tools::filesystem::WriteFileTool;
    use crate::tools::{Tool, ToolCategory};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Sleeps past its timeout for the first `slow_attempts` calls.
    struct Flaky {
        calls: AtomicU32,
        slow_attempts: u32,
        retries: u32,
    }

    #[async_trait]
    impl Tool for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            "Sometimes slow"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Read
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(50))
        }
        fn max_retries(&self) -> Option<u32> {
            Some(self.retries)
        }
        async fn execute(&self, _p: HashMap<String, Value>, _c: &ToolContext) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.slow_attempts {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(format!("attempt {}", n + 1))
        }
    }

    struct Broken {
        retryable: bool,
    }

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Read
        }
        fn retryable(&self) -> bool {
            self.retryable
        }
        async fn execute(&self, _p: HashMap<String, Value>, _c: &ToolContext) -> anyhow::Result<String> {
            anyhow::bail!("disk on fire")
        }
    }

    fn executor(tool: Arc<dyn Tool>) -> ToolExecutor {
        let mut reg = ToolRegistry::new();
        reg.register(tool);
        ToolExecutor::new(Arc::new(reg))
    }

    fn ctx(dir: &tempfile::TempDir) -> ToolContext {
        ToolContext::new(dir.path(), "turn_1")
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(Arc::new(Flaky {
            calls: AtomicU32::new(0),
            slow_attempts: 1,
            retries: 1,
        }));
        let out = exec.execute("flaky", HashMap::new(), &ctx(&dir)).await;
        assert_eq!(out, ToolOutcome::Success("attempt 2".into()));
    }

    #[tokio::test]
    async fn test_timeout_exhausted_is_recoverable_error() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(Arc::new(Flaky {
            calls: AtomicU32::new(0),
            slow_attempts: 5,
            retries: 1,
        }));
        match exec.execute("flaky", HashMap::new(), &ctx(&dir)).await {
            ToolOutcome::Failed { message, fatal } => {
                assert!(message.contains("timed out"), "{message}");
                assert!(!fatal);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(Arc::new(Broken { retryable: false }));
        let out = exec.execute("broken", HashMap::new(), &ctx(&dir)).await;
        assert!(out.is_fatal());

        let exec = executor(Arc::new(Broken { retryable: true }));
        let out = exec.execute("broken", HashMap::new(), &ctx(&dir)).await;
        assert_eq!(out, ToolOutcome::failed("disk on fire", false));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(Arc::new(Broken { retryable: true }));
        let out = exec.execute("ghost", HashMap::new(), &ctx(&dir)).await;
        assert_eq!(out, ToolOutcome::failed("Tool 'ghost' not found", false));
    }

    #[tokio::test]
    async fn test_mutating_tool_checkpoints_pre_image() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "before").unwrap();
        let store = Arc::new(InMemoryCheckpointStore::new());
        let exec = executor(Arc::new(WriteFileTool)).with_checkpoints(store.clone());

        let args: HashMap<String, Value> = [
            ("path".to_string(), json!("notes.txt")),
            ("content".to_string(), json!("after")),
        ]
        .into_iter()
        .collect();
        let out = exec.execute("write_file", args, &ctx(&dir)).await;
        assert!(matches!(out, ToolOutcome::Success(_)));
        assert_eq!(std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "after");

        let ckpt = store.latest().unwrap();
        assert!(ckpt.description.contains("notes.txt"));
        store.rollback_to(&ckpt.id).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "before");
    }
}
