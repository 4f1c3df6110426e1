//! Backup executor: dump, compress, encrypt, store
//!
//! Each stage replaces the previous intermediate file inside a per-job work
//! directory which is removed when the job ends, whatever the outcome.

use anyhow::Context;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{BackupStrategy, Hook};
use crate::error::DrError;
use crate::jobs::{ArtifactInfo, BackupJob, StorageLocation};
use crate::managers::notification::{AlertEvent, EventKind, Notifier};
use crate::managers::retention::RetentionManager;
use crate::utils::checksum::sha256_file;
use crate::utils::codec::{compression_codec, encryption_codec, Codec};
use crate::utils::dump::{DumpExecutor, DumpOptions};
use crate::utils::executor::CommandExecutor;
use crate::utils::ledger::JobRepository;
use crate::utils::slots::JobSlots;
use crate::utils::storage::StorageAdapter;

/// Pipeline stages a cancellation request is honored before
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Dump,
    Compress,
    Encrypt,
    Store,
}

pub struct BackupExecutor {
    ledger: Arc<dyn JobRepository>,
    storage: StorageAdapter,
    dumper: Arc<dyn DumpExecutor>,
    commands: Arc<dyn CommandExecutor>,
    notifier: Notifier,
    retention: Option<Arc<RetentionManager>>,
    slots: JobSlots,
    work_dir: PathBuf,
    cancellations: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl BackupExecutor {
    pub fn new(
        ledger: Arc<dyn JobRepository>,
        storage: StorageAdapter,
        dumper: Arc<dyn DumpExecutor>,
        commands: Arc<dyn CommandExecutor>,
        notifier: Notifier,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            ledger,
            storage,
            dumper,
            commands,
            notifier,
            retention: None,
            slots: JobSlots::new(),
            work_dir,
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Prune the strategy after every successful backup
    pub fn with_retention(mut self, retention: Arc<RetentionManager>) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn running_jobs(&self, strategy: &str) -> usize {
        self.slots.running(strategy)
    }

    /// Ask a running job to stop before its next stage
    ///
    /// Returns false if the job is not running in this process.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.cancellations.lock().get(job_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!("Cancellation requested for job {}", job_id);
                true
            }
            None => false,
        }
    }

    /// Run one backup of `strategy` to completion
    pub async fn execute(&self, strategy: &BackupStrategy) -> Result<BackupJob, DrError> {
        if !strategy.enabled {
            return Err(DrError::StrategyDisabled(strategy.name.clone()));
        }

        // No slot, no job
        let _slot = self
            .slots
            .try_acquire(&strategy.name, strategy.max_concurrent_jobs)?;

        let mut job = BackupJob::new(strategy);
        self.ledger.create(&job).map_err(DrError::Ledger)?;
        job.mark_running().map_err(DrError::Ledger)?;
        if let Err(e) = self.ledger.update(&job) {
            return Err(self.fail(job, DrError::Ledger(e)).await);
        }

        info!("Starting backup job {} for strategy '{}'", job.short_id(), strategy.name);
        let started = Instant::now();

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancellations.lock().insert(job.id.clone(), cancel.clone());
        let job_dir = self.work_dir.join(&job.id);
        let written: Arc<Mutex<Vec<StorageLocation>>> = Arc::default();

        let outcome = match tokio::time::timeout(
            strategy.timeout(),
            self.run_pipeline(strategy, &job.id, &job_dir, &cancel, written.clone()),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(DrError::Timeout {
                job_id: job.id.clone(),
                timeout: strategy.timeout(),
            }),
        };

        self.cancellations.lock().remove(&job.id);
        if let Err(e) = tokio::fs::remove_dir_all(&job_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to clean work directory {:?}: {}", job_dir, e);
            }
        }

        let (artifact, locations) = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.discard_copies(strategy, &written).await;
                return Err(self.fail(job, e).await);
            }
        };

        let mut completed = job.clone();
        let recorded = completed
            .mark_completed(artifact, locations)
            .and_then(|()| self.ledger.update(&completed));
        if let Err(e) = recorded {
            self.discard_copies(strategy, &written).await;
            return Err(self.fail(job, DrError::Ledger(e)).await);
        }

        let elapsed = started.elapsed();
        info!(
            "Backup job {} for '{}' completed in {:.2}s ({} bytes, {} location(s))",
            completed.short_id(),
            strategy.name,
            elapsed.as_secs_f64(),
            completed.size_bytes.unwrap_or(0),
            completed.locations.len()
        );
        self.notifier
            .emit(
                AlertEvent::new(EventKind::BackupCompleted)
                    .with("strategy", &strategy.name)
                    .with("job_id", &completed.id)
                    .with("size_bytes", completed.size_bytes.unwrap_or(0))
                    .with("locations", completed.locations.len())
                    .with("duration_secs", elapsed.as_secs()),
            )
            .await;

        if let Some(retention) = &self.retention {
            let retention = retention.clone();
            let strategy = strategy.clone();
            tokio::spawn(async move {
                if let Err(e) = retention.prune(&strategy).await {
                    warn!("{}", e);
                }
            });
        }

        Ok(completed)
    }

    /// Remove every copy a failed job managed to write
    ///
    /// Best-effort: a copy that cannot be removed is only logged.
    async fn discard_copies(&self, strategy: &BackupStrategy, written: &Mutex<Vec<StorageLocation>>) {
        let mut copies = std::mem::take(&mut *written.lock());
        copies.sort_by_key(|l| l.priority);
        for location in &copies {
            match self.storage.delete(location, &strategy.destinations).await {
                Ok(()) => debug!("Removed {} left by failed job", location.uri),
                Err(e) => warn!("Failed to remove {} left by failed job: {:#}", location.uri, e),
            }
        }
    }

    /// Record the failure verbatim and raise the alert
    async fn fail(&self, mut job: BackupJob, err: DrError) -> DrError {
        let message = err.to_string();
        error!("Backup job {} for '{}' failed: {}", job.short_id(), job.strategy, message);

        match job.mark_failed(&message) {
            Ok(()) => {
                if let Err(e) = self.ledger.update(&job) {
                    error!("Failed to record failure of job {}: {:#}", job.short_id(), e);
                }
            }
            Err(e) => error!("{:#}", e),
        }

        self.notifier
            .emit(
                AlertEvent::new(EventKind::BackupFailed)
                    .with("strategy", &job.strategy)
                    .with("job_id", &job.id)
                    .with("error_kind", err.kind())
                    .with("error", &message),
            )
            .await;
        err
    }

    async fn run_pipeline(
        &self,
        strategy: &BackupStrategy,
        job_id: &str,
        job_dir: &Path,
        cancel: &AtomicBool,
        written: Arc<Mutex<Vec<StorageLocation>>>,
    ) -> Result<(ArtifactInfo, Vec<StorageLocation>), DrError> {
        tokio::fs::create_dir_all(job_dir)
            .await
            .with_context(|| format!("Failed to create work directory {:?}", job_dir))
            .map_err(DrError::DumpFailed)?;

        self.run_hooks(&strategy.pre_backup_hooks, "pre-backup", strategy).await?;

        check_cancelled(cancel, job_id, Stage::Dump)?;
        let options = DumpOptions {
            output_dir: job_dir.to_path_buf(),
            kind: strategy.kind,
            excludes: strategy.excludes.clone(),
        };
        let raw = self
            .dumper
            .dump(&strategy.database, &options)
            .await
            .map_err(DrError::DumpFailed)?;
        let content_checksum = checksum(raw.clone()).await.map_err(DrError::DumpFailed)?;
        debug!("Raw dump {:?} sha256 {}", raw, content_checksum);

        let mut artifact = raw;

        if let Some(algorithm) = strategy.compression {
            check_cancelled(cancel, job_id, Stage::Compress)?;
            artifact = encode_stage(compression_codec(algorithm), artifact)
                .await
                .map_err(DrError::CompressionFailed)?;
        }

        if let Some(encryption) = &strategy.encryption {
            check_cancelled(cancel, job_id, Stage::Encrypt)?;
            let codec = encryption_codec(encryption).map_err(DrError::EncryptionFailed)?;
            artifact = encode_stage(codec, artifact)
                .await
                .map_err(DrError::EncryptionFailed)?;
        }

        let stored_checksum = checksum(artifact.clone()).await.map_err(DrError::DumpFailed)?;
        let size_bytes = tokio::fs::metadata(&artifact)
            .await
            .map(|m| m.len())
            .context("Failed to stat artifact")
            .map_err(DrError::DumpFailed)?;

        check_cancelled(cancel, job_id, Stage::Store)?;
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact".to_string());
        let key = format!("{}/{}/{}", strategy.name, job_id, file_name);
        let locations = self
            .storage
            .store_tracked(&artifact, &key, &strategy.destinations, written)
            .await?;

        // A failing post-hook fails the job; its copies are discarded by the caller
        self.run_hooks(&strategy.post_backup_hooks, "post-backup", strategy).await?;

        Ok((
            ArtifactInfo {
                size_bytes,
                checksum: stored_checksum,
                content_checksum,
            },
            locations,
        ))
    }

    async fn run_hooks(&self, hooks: &[Hook], hook_type: &str, strategy: &BackupStrategy) -> Result<(), DrError> {
        if hooks.is_empty() {
            return Ok(());
        }
        info!("Running {} {} hook(s)", hooks.len(), hook_type);

        for hook in hooks {
            let timeout = hook
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or_else(|| strategy.timeout());

            match self
                .commands
                .run_shell_command(&hook.command, hook.working_dir.as_deref(), Some(timeout))
                .await
            {
                Ok(_) => info!("Hook completed successfully: {}", hook.display_name()),
                Err(e) if hook.continue_on_error => {
                    warn!("Hook failed but continue_on_error=true: {} - {:#}", hook.display_name(), e);
                }
                Err(e) => {
                    return Err(DrError::HookFailed {
                        hook: hook.display_name().to_string(),
                        source: e,
                    })
                }
            }
        }
        Ok(())
    }
}

fn check_cancelled(cancel: &AtomicBool, job_id: &str, stage: Stage) -> Result<(), DrError> {
    if cancel.load(Ordering::SeqCst) {
        info!("Job {} cancelled before {:?} stage", job_id, stage);
        return Err(DrError::Cancelled(job_id.to_string()));
    }
    Ok(())
}

async fn checksum(path: PathBuf) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .context("Checksum task panicked")?
}

/// Encode `input` and remove it, leaving only the encoded file
async fn encode_stage(codec: Box<dyn Codec>, input: PathBuf) -> anyhow::Result<PathBuf> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<PathBuf> {
        let output = codec.encode(&input)?;
        std::fs::remove_file(&input)
            .with_context(|| format!("Failed to remove intermediate {:?}", input))?;
        debug!("{} stage produced {:?}", codec.name(), output);
        Ok(output)
    })
    .await
    .context("Codec task panicked")?
}
