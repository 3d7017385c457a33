//! Persisted state of runs paused at a REVIEW_GOLDENS gate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use evalcore::{
    ExecutionContext, ExecutionId, FlowError, FlowRequest, FlowSettings, LogEntry,
    NodeExecutionResult,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Terminal state of a node, as seen by its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    SkippedBranch,
    SkippedUpstream,
}

impl Outcome {
    /// Dependents of this node cannot run.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed | Outcome::SkippedUpstream)
    }
}

/// Everything needed to continue a run: the flow, its context and the
/// per-node outcomes recorded so far. Nodes without an outcome are the
/// remaining cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: ExecutionId,
    pub request: FlowRequest,
    pub settings: FlowSettings,
    pub context: ExecutionContext,
    pub outcomes: HashMap<String, Outcome>,
    pub results: HashMap<String, NodeExecutionResult>,
    pub logs: Vec<LogEntry>,
    pub executed_nodes: Vec<String>,
    pub remaining: Vec<String>,
    pub suspended_at: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionSnapshot {
    pub fn new(execution_id: ExecutionId, request: FlowRequest, settings: FlowSettings) -> Self {
        let now = Utc::now();
        let context = ExecutionContext::new(request.params.clone());
        Self {
            execution_id,
            request,
            settings,
            context,
            outcomes: HashMap::new(),
            results: HashMap::new(),
            logs: Vec::new(),
            executed_nodes: Vec::new(),
            remaining: Vec::new(),
            suspended_at: None,
            started_at: now,
            updated_at: now,
        }
    }
}

/// Storage for suspended runs
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<(), FlowError>;

    async fn load(&self, execution_id: ExecutionId) -> Result<Option<ExecutionSnapshot>, FlowError>;

    async fn remove(&self, execution_id: ExecutionId) -> Result<(), FlowError>;

    /// Ids of every stored snapshot
    async fn list(&self) -> Result<Vec<ExecutionId>, FlowError>;
}

/// Process-local store; suspended runs are lost on restart.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<ExecutionId, ExecutionSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<(), FlowError> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.execution_id, snapshot.clone());
        Ok(())
    }

    async fn load(&self, execution_id: ExecutionId) -> Result<Option<ExecutionSnapshot>, FlowError> {
        Ok(self.snapshots.read().await.get(&execution_id).cloned())
    }

    async fn remove(&self, execution_id: ExecutionId) -> Result<(), FlowError> {
        self.snapshots.write().await.remove(&execution_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ExecutionId>, FlowError> {
        Ok(self.snapshots.read().await.keys().copied().collect())
    }
}

/// One JSON file per execution id under a directory.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, execution_id: ExecutionId) -> PathBuf {
        self.dir.join(format!("{execution_id}.json"))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &ExecutionSnapshot) -> Result<(), FlowError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(snapshot.execution_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(path = %path.display(), "Snapshot written");
        Ok(())
    }

    async fn load(&self, execution_id: ExecutionId) -> Result<Option<ExecutionSnapshot>, FlowError> {
        match tokio::fs::read(self.path_for(execution_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, execution_id: ExecutionId) -> Result<(), FlowError> {
        match tokio::fs::remove_file(self.path_for(execution_id)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn list(&self) -> Result<Vec<ExecutionId>, FlowError> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| ExecutionId::parse_str(s).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
