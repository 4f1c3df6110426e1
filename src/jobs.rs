//! Backup job records and restore requests

use crate::config::{BackupKind, BackupStrategy, CompressionAlgorithm, StorageKind};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// pending -> running -> completed | failed; pending may also fail directly
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One copy of an artifact written to a destination
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageLocation {
    /// Destination name within the strategy
    pub destination: String,
    pub kind: StorageKind,
    pub priority: u32,
    /// Driver-specific address of the stored artifact
    pub uri: String,
}

/// Facts about the final artifact, recorded on completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub size_bytes: u64,
    /// Digest of the stored (compressed/encrypted) artifact
    pub checksum: String,
    /// Digest of the raw dump
    pub content_checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupJob {
    pub id: String,
    pub strategy: String,
    pub kind: BackupKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub content_checksum: Option<String>,
    #[serde(default)]
    pub compression: Option<CompressionAlgorithm>,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub locations: Vec<StorageLocation>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BackupJob {
    /// New pending job for a strategy
    pub fn new(strategy: &BackupStrategy) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            strategy: strategy.name.clone(),
            kind: strategy.kind,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            size_bytes: None,
            checksum: None,
            content_checksum: None,
            compression: strategy.compression,
            encrypted: strategy.encryption.is_some(),
            locations: Vec::new(),
            error: None,
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            anyhow::bail!(
                "Job {} cannot move from {} to {}",
                self.id,
                self.status,
                next
            );
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<()> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_completed(&mut self, artifact: ArtifactInfo, locations: Vec<StorageLocation>) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.finished_at = Some(Utc::now());
        self.size_bytes = Some(artifact.size_bytes);
        self.checksum = Some(artifact.checksum);
        self.content_checksum = Some(artifact.content_checksum);
        self.locations = locations;
        Ok(())
    }

    pub fn mark_failed(&mut self, error: &str) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.to_string());
        Ok(())
    }

    /// Point in time the backup represents
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.started_at.unwrap_or(self.created_at)
    }

    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }
}

/// Parameters for a single restore call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOptions {
    pub job_id: String,
    /// Passed through to the load executor for point-in-time recovery
    pub point_in_time: Option<DateTime<Utc>>,
    /// Overrides the strategy's database connection as load target
    pub target_location: Option<String>,
    /// Subset of tables to load, where the database kind supports it
    pub tables: Vec<String>,
    pub verify_integrity: bool,
}

impl RestoreOptions {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            point_in_time: None,
            target_location: None,
            tables: Vec::new(),
            verify_integrity: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn job() -> BackupJob {
        BackupJob::new(&BackupStrategy::new("daily-full", DatabaseConfig::file("/tmp/db")))
    }

    #[test]
    fn test_job_lifecycle() {
        let mut job = job();
        assert_eq!(job.status, JobStatus::Pending);

        job.mark_running().unwrap();
        assert!(job.started_at.is_some());

        job.mark_completed(
            ArtifactInfo {
                size_bytes: 42,
                checksum: "abc".to_string(),
                content_checksum: "def".to_string(),
            },
            vec![],
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.size_bytes, Some(42));
    }

    #[test]
    fn test_terminal_jobs_are_immutable() {
        let mut job = job();
        job.mark_running().unwrap();
        job.mark_failed("dump exploded").unwrap();

        assert!(job.mark_running().is_err());
        assert!(job.mark_failed("again").is_err());
        assert_eq!(job.error.as_deref(), Some("dump exploded"));
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Failed));
    }
}
