//! Storage backend adapter
//!
//! `store` fans an artifact out to every enabled destination concurrently and
//! succeeds if at least one copy was written. `fetch` walks the recorded
//! locations in priority order and stops at the first readable copy. The
//! adapter itself does not know how any destination kind works; each kind is a
//! registered [`StorageDriver`].

use crate::config::{expand_tilde, StorageConfig, StorageKind};
use crate::error::DrError;
use crate::jobs::StorageLocation;
use crate::utils::command::render_template;
use crate::utils::executor::CommandExecutor;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(3600);

/// One destination kind
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Write `artifact` under `key`, returning the location URI
    async fn put(&self, artifact: &Path, key: &str, config: &StorageConfig) -> Result<String>;

    /// Copy the artifact at `uri` to `dest`
    async fn get(&self, uri: &str, dest: &Path, config: &StorageConfig) -> Result<()>;

    /// Remove the artifact at `uri`; removing a missing artifact succeeds
    async fn delete(&self, uri: &str, config: &StorageConfig) -> Result<()>;
}

/// Plain filesystem copies under the `path` option
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDriver;

impl LocalDriver {
    fn root(config: &StorageConfig) -> Result<PathBuf> {
        let path = config
            .option("path")
            .with_context(|| format!("Destination '{}' has no 'path' option", config.name))?;
        Ok(expand_tilde(Path::new(path)))
    }
}

#[async_trait]
impl StorageDriver for LocalDriver {
    async fn put(&self, artifact: &Path, key: &str, config: &StorageConfig) -> Result<String> {
        let dest = Self::root(config)?.join(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        tokio::fs::copy(artifact, &dest)
            .await
            .with_context(|| format!("Failed to copy artifact to {:?}", dest))?;
        Ok(dest.display().to_string())
    }

    async fn get(&self, uri: &str, dest: &Path, _config: &StorageConfig) -> Result<()> {
        tokio::fs::copy(uri, dest)
            .await
            .with_context(|| format!("Failed to copy {} to {:?}", uri, dest))?;
        Ok(())
    }

    async fn delete(&self, uri: &str, _config: &StorageConfig) -> Result<()> {
        match tokio::fs::remove_file(uri).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to delete {}", uri)),
        }
        // Drop the per-job directory once it is empty
        if let Some(parent) = Path::new(uri).parent() {
            let _ = tokio::fs::remove_dir(parent).await;
        }
        Ok(())
    }
}

/// Object stores and remote hosts driven by command templates
///
/// Options: `put` (`{src}`, `{key}`), `get` (`{uri}`, `{dst}`), `delete`
/// (`{uri}`), optional `uri` template (`{key}`) naming the stored object, and
/// `timeout_seconds`. Without a `uri` template the trimmed stdout of `put` is
/// used, falling back to the key.
pub struct CommandDriver {
    executor: Arc<dyn CommandExecutor>,
}

impl CommandDriver {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    fn template<'a>(config: &'a StorageConfig, op: &str) -> Result<&'a str> {
        config.option(op).with_context(|| {
            format!(
                "Destination '{}' ({}) has no '{}' command template",
                config.name, config.kind, op
            )
        })
    }

    fn timeout(config: &StorageConfig) -> Duration {
        config
            .option("timeout_seconds")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TRANSFER_TIMEOUT)
    }
}

#[async_trait]
impl StorageDriver for CommandDriver {
    async fn put(&self, artifact: &Path, key: &str, config: &StorageConfig) -> Result<String> {
        let src = artifact.display().to_string();
        let command = render_template(Self::template(config, "put")?, &[("src", &src), ("key", key)]);
        let stdout = self
            .executor
            .run_shell_stdout(&command, None, Some(Self::timeout(config)))
            .await?;

        let uri = match config.option("uri") {
            Some(template) => template.replace("{key}", key),
            None if !stdout.trim().is_empty() => stdout.trim().to_string(),
            None => key.to_string(),
        };
        Ok(uri)
    }

    async fn get(&self, uri: &str, dest: &Path, config: &StorageConfig) -> Result<()> {
        let dst = dest.display().to_string();
        let command = render_template(Self::template(config, "get")?, &[("uri", uri), ("dst", &dst)]);
        self.executor
            .run_shell_command(&command, None, Some(Self::timeout(config)))
            .await?;
        if !dest.exists() {
            anyhow::bail!("Fetch command for {} did not produce {:?}", uri, dest);
        }
        Ok(())
    }

    async fn delete(&self, uri: &str, config: &StorageConfig) -> Result<()> {
        let command = render_template(Self::template(config, "delete")?, &[("uri", uri)]);
        self.executor
            .run_shell_command(&command, None, Some(Self::timeout(config)))
            .await?;
        Ok(())
    }
}

/// Uniform put/get/delete over all registered destination kinds
#[derive(Clone, Default)]
pub struct StorageAdapter {
    drivers: HashMap<StorageKind, Arc<dyn StorageDriver>>,
}

impl StorageAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local copies plus command-template drivers for every remote kind
    pub fn standard(executor: Arc<dyn CommandExecutor>) -> Self {
        let command: Arc<dyn StorageDriver> = Arc::new(CommandDriver::new(executor));
        let mut adapter = Self::new().with_driver(StorageKind::Local, Arc::new(LocalDriver));
        for kind in [
            StorageKind::S3,
            StorageKind::Gcs,
            StorageKind::Azure,
            StorageKind::Ftp,
            StorageKind::Rsync,
        ] {
            adapter.register(kind, command.clone());
        }
        adapter
    }

    pub fn with_driver(mut self, kind: StorageKind, driver: Arc<dyn StorageDriver>) -> Self {
        self.register(kind, driver);
        self
    }

    pub fn register(&mut self, kind: StorageKind, driver: Arc<dyn StorageDriver>) {
        self.drivers.insert(kind, driver);
    }

    fn driver(&self, kind: StorageKind) -> Result<Arc<dyn StorageDriver>> {
        self.drivers
            .get(&kind)
            .cloned()
            .with_context(|| format!("No storage driver registered for kind '{}'", kind))
    }

    /// Write the artifact to every enabled destination
    ///
    /// Returns the locations that accepted it, in priority order. Fails only if
    /// none did.
    pub async fn store(
        &self,
        artifact: &Path,
        key: &str,
        destinations: &[StorageConfig],
    ) -> std::result::Result<Vec<StorageLocation>, DrError> {
        self.store_tracked(artifact, key, destinations, Arc::default()).await
    }

    /// [`StorageAdapter::store`] that also pushes every accepted copy into
    /// `written` the moment its put returns
    ///
    /// Copies stay listed in `written` even if this future is dropped before
    /// the fan-out is joined, so the caller can remove them.
    pub async fn store_tracked(
        &self,
        artifact: &Path,
        key: &str,
        destinations: &[StorageConfig],
        written: Arc<Mutex<Vec<StorageLocation>>>,
    ) -> std::result::Result<Vec<StorageLocation>, DrError> {
        let mut targets: Vec<&StorageConfig> = destinations.iter().filter(|d| d.enabled).collect();
        targets.sort_by_key(|d| d.priority);

        let mut tasks = JoinSet::new();
        let mut errors = Vec::new();

        for (index, destination) in targets.iter().enumerate() {
            let driver = match self.driver(destination.kind) {
                Ok(driver) => driver,
                Err(e) => {
                    warn!("Skipping destination '{}': {}", destination.name, e);
                    errors.push(format!("{}: {}", destination.name, e));
                    continue;
                }
            };
            let config = (*destination).clone();
            let artifact = artifact.to_path_buf();
            let key = key.to_string();
            let written = written.clone();
            tasks.spawn(async move {
                let result = driver.put(&artifact, &key, &config).await;
                if let Ok(uri) = &result {
                    written.lock().push(location_for(&config, uri));
                }
                (index, config, result)
            });
        }

        let mut stored: Vec<(usize, StorageLocation)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, config, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    errors.push(format!("storage task panicked: {}", e));
                    continue;
                }
            };
            match result {
                Ok(uri) => {
                    info!("Stored artifact at destination '{}': {}", config.name, uri);
                    stored.push((index, location_for(&config, &uri)));
                }
                Err(e) => {
                    warn!("Failed to store artifact at destination '{}': {:#}", config.name, e);
                    errors.push(format!("{}: {:#}", config.name, e));
                }
            }
        }

        if stored.is_empty() {
            return Err(DrError::AllDestinationsFailed {
                attempted: targets.len(),
                errors,
            });
        }

        stored.sort_by_key(|(index, _)| *index);
        Ok(stored.into_iter().map(|(_, location)| location).collect())
    }

    /// Copy the first readable location into `dest_dir`
    pub async fn fetch(
        &self,
        locations: &[StorageLocation],
        destinations: &[StorageConfig],
        dest_dir: &Path,
    ) -> Result<(PathBuf, StorageLocation)> {
        let mut ordered: Vec<&StorageLocation> = locations.iter().collect();
        ordered.sort_by_key(|l| l.priority);

        let mut errors = Vec::new();
        for location in ordered {
            let config = config_for(location, destinations);
            let file_name = Path::new(&location.uri)
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "artifact".into());
            let dest = dest_dir.join(file_name);

            let result = match self.driver(location.kind) {
                Ok(driver) => driver.get(&location.uri, &dest, &config).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    debug!("Fetched {} from '{}'", location.uri, location.destination);
                    return Ok((dest, location.clone()));
                }
                Err(e) => {
                    warn!(
                        "Failed to fetch {} from '{}': {:#}",
                        location.uri, location.destination, e
                    );
                    let _ = tokio::fs::remove_file(&dest).await;
                    errors.push(format!("{}: {:#}", location.destination, e));
                }
            }
        }

        anyhow::bail!("No readable copy: {}", errors.join("; "))
    }

    pub async fn delete(&self, location: &StorageLocation, destinations: &[StorageConfig]) -> Result<()> {
        let config = config_for(location, destinations);
        self.driver(location.kind)?
            .delete(&location.uri, &config)
            .await
            .with_context(|| format!("Failed to delete {} from '{}'", location.uri, location.destination))
    }
}

fn location_for(config: &StorageConfig, uri: &str) -> StorageLocation {
    StorageLocation {
        destination: config.name.clone(),
        kind: config.kind,
        priority: config.priority,
        uri: uri.to_string(),
    }
}

/// Destination config for a recorded location, or a bare one if it was removed
fn config_for(location: &StorageLocation, destinations: &[StorageConfig]) -> StorageConfig {
    destinations
        .iter()
        .find(|d| d.name == location.destination)
        .cloned()
        .unwrap_or_else(|| StorageConfig {
            name: location.destination.clone(),
            kind: location.kind,
            priority: location.priority,
            enabled: true,
            description: String::new(),
            options: Default::default(),
        })
}

/// Fault-injecting driver for tests
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Local driver that fails on demand for selected destination names
    #[derive(Clone, Default)]
    pub struct FaultyDriver {
        inner: LocalDriver,
        broken_put: Arc<Mutex<HashSet<String>>>,
        broken_get: Arc<Mutex<HashSet<String>>>,
        broken_delete: Arc<Mutex<HashSet<String>>>,
        hanging_put: Arc<Mutex<HashSet<String>>>,
        /// (operation, destination) in call order
        pub calls: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl FaultyDriver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn break_put(&self, destination: &str) {
            self.broken_put.lock().insert(destination.to_string());
        }

        pub fn break_get(&self, destination: &str) {
            self.broken_get.lock().insert(destination.to_string());
        }

        pub fn break_delete(&self, destination: &str) {
            self.broken_delete.lock().insert(destination.to_string());
        }

        /// Make puts to `destination` block far beyond any test timeout
        pub fn hang_put(&self, destination: &str) {
            self.hanging_put.lock().insert(destination.to_string());
        }

        pub fn heal(&self) {
            self.hanging_put.lock().clear();
            self.broken_put.lock().clear();
            self.broken_get.lock().clear();
            self.broken_delete.lock().clear();
        }

        pub fn calls_for(&self, op: &str) -> Vec<String> {
            self.calls
                .lock()
                .iter()
                .filter(|(o, _)| o == op)
                .map(|(_, d)| d.clone())
                .collect()
        }

        fn record(&self, op: &str, config: &StorageConfig) {
            self.calls.lock().push((op.to_string(), config.name.clone()));
        }
    }

    #[async_trait]
    impl StorageDriver for FaultyDriver {
        async fn put(&self, artifact: &Path, key: &str, config: &StorageConfig) -> Result<String> {
            self.record("put", config);
            let hang = self.hanging_put.lock().contains(&config.name);
            if hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.broken_put.lock().contains(&config.name) {
                anyhow::bail!("destination '{}' is unreachable", config.name);
            }
            self.inner.put(artifact, key, config).await
        }

        async fn get(&self, uri: &str, dest: &Path, config: &StorageConfig) -> Result<()> {
            self.record("get", config);
            if self.broken_get.lock().contains(&config.name) {
                anyhow::bail!("destination '{}' is unreachable", config.name);
            }
            self.inner.get(uri, dest, config).await
        }

        async fn delete(&self, uri: &str, config: &StorageConfig) -> Result<()> {
            self.record("delete", config);
            if self.broken_delete.lock().contains(&config.name) {
                anyhow::bail!("destination '{}' is unreachable", config.name);
            }
            self.inner.delete(uri, config).await
        }
    }
}
