//! Restore pipeline: fetch, verify, decrypt, decompress, load
//!
//! Every step gates the next one. Nothing is handed to the load executor until
//! both the stored artifact and the decoded dump have matched their recorded
//! digests (when verification is requested).

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::BackupStrategy;
use crate::error::DrError;
use crate::jobs::{BackupJob, JobStatus, RestoreOptions};
use crate::managers::notification::{AlertEvent, EventKind, Notifier};
use crate::utils::checksum::verify_file;
use crate::utils::codec::{compression_codec, encryption_codec, Codec};
use crate::utils::dump::{DumpExecutor, LoadOptions};
use crate::utils::ledger::JobRepository;
use crate::utils::storage::StorageAdapter;

pub struct RestorePipeline {
    ledger: Arc<dyn JobRepository>,
    storage: StorageAdapter,
    dumper: Arc<dyn DumpExecutor>,
    notifier: Notifier,
    work_dir: PathBuf,
}

impl RestorePipeline {
    pub fn new(
        ledger: Arc<dyn JobRepository>,
        storage: StorageAdapter,
        dumper: Arc<dyn DumpExecutor>,
        notifier: Notifier,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            ledger,
            storage,
            dumper,
            notifier,
            work_dir,
        }
    }

    /// Restore a completed job; `strategy` supplies codecs, destinations and database
    pub async fn restore(&self, strategy: &BackupStrategy, options: &RestoreOptions) -> Result<BackupJob, DrError> {
        let started = Instant::now();
        let result = self.run(strategy, options).await;

        match &result {
            Ok(job) => {
                info!(
                    "Restored job {} of '{}' in {:.2}s",
                    job.short_id(),
                    strategy.name,
                    started.elapsed().as_secs_f64()
                );
                self.notifier
                    .emit(
                        AlertEvent::new(EventKind::RestoreCompleted)
                            .with("strategy", &strategy.name)
                            .with("job_id", &job.id)
                            .with("duration_secs", started.elapsed().as_secs()),
                    )
                    .await;
            }
            Err(e) => {
                warn!("Restore of job {} failed: {}", options.job_id, e);
                self.notifier
                    .emit(
                        AlertEvent::new(EventKind::RestoreFailed)
                            .with("strategy", &strategy.name)
                            .with("job_id", &options.job_id)
                            .with("error_kind", e.kind())
                            .with("error", e),
                    )
                    .await;
            }
        }
        result
    }

    /// Resolve a job id to a completed job of any strategy
    pub fn resolve_job(&self, job_id: &str) -> Result<BackupJob, DrError> {
        match self.ledger.get(job_id).map_err(DrError::Ledger)? {
            Some(job) if job.status == JobStatus::Completed => Ok(job),
            _ => Err(DrError::BackupNotFound(job_id.to_string())),
        }
    }

    async fn run(&self, strategy: &BackupStrategy, options: &RestoreOptions) -> Result<BackupJob, DrError> {
        let job = self.resolve_job(&options.job_id)?;
        if job.strategy != strategy.name {
            return Err(DrError::BackupNotFound(options.job_id.clone()));
        }

        let restore_dir = self.work_dir.join(format!("restore-{}", job.id));
        tokio::fs::create_dir_all(&restore_dir)
            .await
            .with_context(|| format!("Failed to create {:?}", restore_dir))
            .map_err(DrError::LoadFailed)?;

        let result = self.run_in(&job, strategy, options, &restore_dir).await;

        if let Err(e) = tokio::fs::remove_dir_all(&restore_dir).await {
            warn!("Failed to clean restore directory {:?}: {}", restore_dir, e);
        }
        result.map(|()| job)
    }

    async fn run_in(
        &self,
        job: &BackupJob,
        strategy: &BackupStrategy,
        options: &RestoreOptions,
        restore_dir: &std::path::Path,
    ) -> Result<(), DrError> {
        let (mut artifact, location) = self
            .storage
            .fetch(&job.locations, &strategy.destinations, restore_dir)
            .await
            .map_err(|e| {
                warn!("{:#}", e);
                DrError::NoAccessibleBackupLocation(job.id.clone())
            })?;
        info!("Fetched job {} from '{}'", job.short_id(), location.destination);

        if options.verify_integrity {
            if let Some(expected) = &job.checksum {
                verify(&job.id, artifact.clone(), expected.clone()).await?;
            }
        }

        if job.encrypted {
            let encryption = strategy.encryption.as_ref().ok_or_else(|| {
                DrError::EncryptionFailed(anyhow::anyhow!(
                    "Job {} is encrypted but strategy '{}' has no encryption key",
                    job.id,
                    strategy.name
                ))
            })?;
            let codec = encryption_codec(encryption).map_err(DrError::EncryptionFailed)?;
            artifact = decode_stage(codec, artifact)
                .await
                .map_err(DrError::EncryptionFailed)?;
        }

        if let Some(algorithm) = job.compression {
            artifact = decode_stage(compression_codec(algorithm), artifact)
                .await
                .map_err(DrError::CompressionFailed)?;
        }

        if options.verify_integrity {
            if let Some(expected) = &job.content_checksum {
                verify(&job.id, artifact.clone(), expected.clone()).await?;
            }
        }

        let load = LoadOptions {
            target: options.target_location.clone(),
            tables: options.tables.clone(),
            point_in_time: options.point_in_time,
        };
        self.dumper
            .load(&strategy.database, &artifact, &load)
            .await
            .map_err(DrError::LoadFailed)
    }
}

async fn verify(job_id: &str, path: PathBuf, expected: String) -> Result<(), DrError> {
    let outcome = tokio::task::spawn_blocking(move || verify_file(&path, &expected).map(|r| (r, expected)))
        .await
        .context("Checksum task panicked")
        .and_then(|r| r)
        .map_err(DrError::LoadFailed)?;

    match outcome {
        (Ok(()), _) => Ok(()),
        (Err(actual), expected) => Err(DrError::IntegrityCheckFailed {
            job_id: job_id.to_string(),
            expected,
            actual,
        }),
    }
}

/// Decode into a sibling file and drop the encoded input
async fn decode_stage(codec: Box<dyn Codec>, input: PathBuf) -> anyhow::Result<PathBuf> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<PathBuf> {
        let output = codec.decode(&input)?;
        std::fs::remove_file(&input)
            .with_context(|| format!("Failed to remove intermediate {:?}", input))?;
        Ok(output)
    })
    .await
    .context("Codec task panicked")?
}
