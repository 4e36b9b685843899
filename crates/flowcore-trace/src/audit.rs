//! `AuditStore`: durable record of completed releases, used by the
//! scheduler to dedup re-pokes of an already-fired instant.

use crate::error::TraceError;
use crate::record::AuditRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Has `workflow` already produced an audit record for `release_instant`?
    async fn is_pointed(&self, workflow: &str, release_instant: DateTime<Utc>) -> Result<bool, TraceError>;

    async fn save(&self, record: AuditRecord) -> Result<(), TraceError>;
}

/// One JSON file per release at
/// `<audit_path>/<workflow>/<release_instant:%Y%m%d%H%M%S>.json`. A workflow-scoped async mutex serializes the
/// check-then-write so concurrent pokes of the same instant cannot both
/// observe `is_pointed == false`.
pub struct FileAuditStore {
    audit_path: PathBuf,
    locks: Mutex<HashMap<String, std::sync::Arc<tokio::sync::Mutex<()>>>>,
}

impl FileAuditStore {
    pub fn new(audit_path: impl Into<PathBuf>) -> Self {
        Self {
            audit_path: audit_path.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, workflow: &str) -> std::sync::Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("audit lock table poisoned");
        locks
            .entry(workflow.to_string())
            .or_insert_with(|| std::sync::Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn path_for(&self, workflow: &str, release_instant: DateTime<Utc>) -> PathBuf {
        self.audit_path
            .join(workflow)
            .join(format!("{}.json", release_instant.format("%Y%m%d%H%M%S")))
    }
}

#[async_trait]
impl AuditStore for FileAuditStore {
    async fn is_pointed(&self, workflow: &str, release_instant: DateTime<Utc>) -> Result<bool, TraceError> {
        let guard = self.lock_for(workflow);
        let _held = guard.lock().await;
        Ok(tokio::fs::metadata(self.path_for(workflow, release_instant))
            .await
            .is_ok())
    }

    async fn save(&self, record: AuditRecord) -> Result<(), TraceError> {
        let guard = self.lock_for(&record.workflow);
        let _held = guard.lock().await;
        let path = self.path_for(&record.workflow, record.release_instant);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_vec_pretty(&record)?;
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(&body).await?;
        Ok(())
    }
}

/// Zero-config default: audit records live only for the process lifetime.
#[derive(Default)]
pub struct InMemoryAuditStore {
    records: std::sync::Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit store poisoned").clone()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn is_pointed(&self, workflow: &str, release_instant: DateTime<Utc>) -> Result<bool, TraceError> {
        Ok(self
            .records
            .lock()
            .expect("audit store poisoned")
            .iter()
            .any(|r| r.workflow == workflow && r.release_instant == release_instant))
    }

    async fn save(&self, record: AuditRecord) -> Result<(), TraceError> {
        self.records.lock().expect("audit store poisoned").push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore_core::{RunId, Status};

    fn sample(workflow: &str, instant: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            workflow: workflow.to_string(),
            release_instant: instant,
            run_id: RunId::new(),
            status: Status::Success,
            start: instant,
            end: instant,
            extras: None,
        }
    }

    #[tokio::test]
    async fn in_memory_store_dedups_by_workflow_and_instant() {
        let store = InMemoryAuditStore::new();
        let instant = Utc::now();
        assert!(!store.is_pointed("wf", instant).await.unwrap());
        store.save(sample("wf", instant)).await.unwrap();
        assert!(store.is_pointed("wf", instant).await.unwrap());
        assert!(!store.is_pointed("other", instant).await.unwrap());
    }

    #[tokio::test]
    async fn file_store_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("flowcore-audit-test-{}", uuid::Uuid::new_v4()));
        let store = FileAuditStore::new(&dir);
        let instant = Utc::now();
        assert!(!store.is_pointed("wf", instant).await.unwrap());
        store.save(sample("wf", instant)).await.unwrap();
        assert!(store.is_pointed("wf", instant).await.unwrap());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
