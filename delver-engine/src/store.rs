//! Report storage
//!
//! Persists finished reports so sessions survive the process. The file
//! backend writes the Markdown next to a JSON metadata sidecar.

use crate::types::SessionStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delver_core::{DelverError, DelverResult, ErrorContext};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Metadata persisted alongside each report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub session_id: String,
    pub query: String,
    pub language: String,
    pub status: SessionStatus,
    pub learnings_count: usize,
    pub references_count: usize,
    pub credits_used: u32,
    pub created_at: DateTime<Utc>,
}

/// Report persistence contract
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Save the report body and its metadata record
    async fn save_report(&self, record: &ReportRecord, markdown: &str) -> DelverResult<()>;

    /// List stored report records, newest first
    async fn list_reports(&self) -> DelverResult<Vec<ReportRecord>>;

    /// Load a report body by session ID
    async fn load_report(&self, session_id: &str) -> DelverResult<Option<String>>;
}

/// File-backed store: `{session_id}.md` plus `{session_id}.json`
#[derive(Debug, Clone)]
pub struct FileReportStore {
    storage_dir: PathBuf,
}

impl FileReportStore {
    pub fn new<P: AsRef<Path>>(storage_dir: P) -> DelverResult<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();

        if !storage_dir.exists() {
            std::fs::create_dir_all(&storage_dir)?;
            info!("Created report storage directory: {}", storage_dir.display());
        }

        Ok(Self { storage_dir })
    }

    fn report_path(&self, session_id: &str) -> PathBuf {
        self.storage_dir.join(format!("{}.md", session_id))
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        self.storage_dir.join(format!("{}.json", session_id))
    }
}

#[async_trait]
impl ReportStore for FileReportStore {
    async fn save_report(&self, record: &ReportRecord, markdown: &str) -> DelverResult<()> {
        if record.session_id.contains(['/', '\\']) {
            return Err(DelverError::Validation {
                message: format!("Invalid session id: {}", record.session_id),
                field: Some("session_id".to_string()),
                context: ErrorContext::new("report_store").with_operation("save_report"),
            });
        }

        tokio::fs::write(self.report_path(&record.session_id), markdown).await?;

        let metadata = serde_json::to_string_pretty(record)?;
        tokio::fs::write(self.record_path(&record.session_id), metadata).await?;

        debug!("Saved report: {}", record.session_id);
        Ok(())
    }

    async fn list_reports(&self) -> DelverResult<Vec<ReportRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.storage_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<ReportRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => debug!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn load_report(&self, session_id: &str) -> DelverResult<Option<String>> {
        let path = self.report_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Some(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_id: &str, created_at: DateTime<Utc>) -> ReportRecord {
        ReportRecord {
            session_id: session_id.to_string(),
            query: "test topic".to_string(),
            language: "English".to_string(),
            status: SessionStatus::Completed,
            learnings_count: 3,
            references_count: 2,
            credits_used: 6,
            created_at,
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips_the_body() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileReportStore::new(dir.path()).unwrap();

        store
            .save_report(&record("s1", Utc::now()), "# Report\n\nBody.")
            .await
            .unwrap();

        let loaded = store.load_report("s1").await.unwrap();
        assert_eq!(loaded.as_deref(), Some("# Report\n\nBody."));
        assert!(store.load_report("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_reports_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileReportStore::new(dir.path()).unwrap();

        let older = Utc::now() - chrono::Duration::hours(1);
        store.save_report(&record("old", older), "old").await.unwrap();
        store.save_report(&record("new", Utc::now()), "new").await.unwrap();

        let records = store.list_reports().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].session_id, "new");
        assert_eq!(records[1].session_id, "old");
    }

    #[tokio::test]
    async fn path_traversal_session_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileReportStore::new(dir.path()).unwrap();

        let result = store
            .save_report(&record("../escape", Utc::now()), "x")
            .await;
        assert!(result.is_err());
    }
}
