//! Engine-facing capability interfaces
//!
//! Narrow contracts the engine holds against external collaborators: an
//! LLM, a code host, a notifier, a vector store, a log parser, a file
//! scanner, and a change tracker. The engine owns these contracts;
//! concrete implementations (grounded on
//! `original_source/backend/integrations/{claude_client,github_client}.py`
//! and `backend/services/{embedding_service,notification_service,
//! sync_service}.py`) are injected rather than constructed inline, matching
//! the teacher's use of `#[async_trait]` traits at the `WorkflowEventStore`
//! seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;

/// Generates structured postmortems from incident context.
#[async_trait]
pub trait Llm: Send + Sync {
    async fn generate_postmortem(
        &self,
        context: serde_json::Value,
    ) -> Result<PostmortemSections, CapabilityError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostmortemSections {
    pub summary: String,
    pub timeline: Vec<String>,
    pub root_cause: String,
    pub impact: String,
    pub resolution: String,
    pub lessons_learned: Vec<String>,
}

/// A code hosting integration (issue tracker).
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
        assignees: &[String],
    ) -> Result<CreateIssueOutcome, CapabilityError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CreateIssueOutcome {
    Created {
        url: String,
        number: u64,
        state: String,
    },
    /// Dependency-disabled is a first-class success variant, not an error.
    Skipped { reason: String },
}

/// Outbound notification dispatch (e.g. Slack/PagerDuty).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        message: &str,
        channels: &[String],
        metadata: serde_json::Value,
    ) -> Result<SendOutcome, CapabilityError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub sent: Vec<String>,
    pub failed: Vec<String>,
    pub status: DeliveryStatus,
}

impl SendOutcome {
    /// An empty `sent` list is always `Failed`, even with an empty `failed`.
    pub fn from_parts(sent: Vec<String>, failed: Vec<String>) -> Self {
        let status = if sent.is_empty() {
            DeliveryStatus::Failed
        } else if failed.is_empty() {
            DeliveryStatus::Success
        } else {
            DeliveryStatus::Partial
        };
        Self { sent, failed, status }
    }
}

/// Embedding/semantic-search backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn embed(
        &self,
        doc_id: &str,
        text: &str,
        metadata: serde_json::Value,
    ) -> Result<EmbedOutcome, CapabilityError>;

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, CapabilityError>;

    async fn delete(&self, doc_id: &str) -> Result<(), CapabilityError>;

    async fn batch_apply(
        &self,
        upserts: Vec<(String, String, serde_json::Value)>,
        deletes: Vec<String>,
    ) -> Result<BatchApplyOutcome, CapabilityError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedOperation {
    Created,
    Updated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedOutcome {
    pub embedding_id: String,
    pub chunk_count: u32,
    pub operation: EmbedOperation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchApplyOutcome {
    pub updated: u32,
    pub deleted: u32,
    pub status: DeliveryStatus,
}

/// Parses a log file into a structured timeline of errors.
#[async_trait]
pub trait LogParser: Send + Sync {
    async fn parse(&self, path: &str) -> Result<LogParseResult, CapabilityError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogParseResult {
    pub errors_found: u32,
    pub timeline: Vec<String>,
    pub patterns: Vec<String>,
}

/// Scans a directory tree for files matching a pattern.
#[async_trait]
pub trait FileScanner: Send + Sync {
    async fn scan(
        &self,
        dir: &str,
        pattern: &str,
        recursive: bool,
    ) -> Result<Vec<ScannedFile>, CapabilityError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedFile {
    pub path: String,
    pub mtime: DateTime<Utc>,
    pub size: u64,
}

/// Detects additions/modifications/deletions against the previous scan,
/// stateful across calls: the tracker itself owns persistence of the prior
/// snapshot.
#[async_trait]
pub trait ChangeTracker: Send + Sync {
    async fn detect(
        &self,
        current_files: Vec<ScannedFile>,
    ) -> Result<ChangeSet, CapabilityError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    pub total_changes: u32,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.total_changes == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_outcome_empty_sent_is_failed() {
        let outcome = SendOutcome::from_parts(vec![], vec!["a".into()]);
        assert_eq!(outcome.status, DeliveryStatus::Failed);
    }

    #[test]
    fn send_outcome_all_sent_is_success() {
        let outcome = SendOutcome::from_parts(vec!["a".into()], vec![]);
        assert_eq!(outcome.status, DeliveryStatus::Success);
    }

    #[test]
    fn send_outcome_mixed_is_partial() {
        let outcome = SendOutcome::from_parts(vec!["a".into()], vec!["b".into()]);
        assert_eq!(outcome.status, DeliveryStatus::Partial);
    }

    #[test]
    fn empty_change_set_detected() {
        let changes = ChangeSet {
            added: vec![],
            modified: vec![],
            deleted: vec![],
            unchanged: vec!["a".into()],
            total_changes: 0,
        };
        assert!(changes.is_empty());
    }
}
