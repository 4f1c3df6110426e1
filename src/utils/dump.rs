//! Database dump and load executors
//!
//! The backup pipeline only sees [`DumpExecutor`]; engine-specific tooling lives
//! behind it as command templates so the control flow never builds tool flags.

use crate::config::{BackupKind, DatabaseConfig, DatabaseKind};
use crate::utils::command::{render_template, shell_quote};
use crate::utils::executor::CommandExecutor;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inputs for one dump
#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Directory the raw artifact must be written into
    pub output_dir: PathBuf,
    pub kind: BackupKind,
    pub excludes: Vec<String>,
}

/// Inputs for one load
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Replaces the configured connection as load target
    pub target: Option<String>,
    pub tables: Vec<String>,
    pub point_in_time: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait DumpExecutor: Send + Sync {
    /// Produce a raw artifact inside `options.output_dir`
    async fn dump(&self, database: &DatabaseConfig, options: &DumpOptions) -> Result<PathBuf>;

    /// Load a raw artifact into the target database
    async fn load(&self, database: &DatabaseConfig, artifact: &Path, options: &LoadOptions) -> Result<()>;
}

struct Templates {
    dump: &'static str,
    load: &'static str,
    extension: &'static str,
}

fn default_templates(kind: DatabaseKind) -> Option<Templates> {
    let templates = match kind {
        DatabaseKind::Postgres => Templates {
            dump: "pg_dump --dbname={connection} --file={output}",
            load: "psql --dbname={target} --file={input}",
            extension: "sql",
        },
        DatabaseKind::Mysql => Templates {
            dump: "mysqldump --result-file={output} {connection}",
            load: "mysql {target} < {input}",
            extension: "sql",
        },
        DatabaseKind::Mongodb => Templates {
            dump: "mongodump --uri={connection} --archive={output}",
            load: "mongorestore --uri={target} --archive={input} {tables}",
            extension: "archive",
        },
        DatabaseKind::Sqlite => Templates {
            dump: "sqlite3 {connection} \".backup {output}\"",
            load: "sqlite3 {target} \".restore {input}\"",
            extension: "db",
        },
        DatabaseKind::File => return None,
    };
    Some(templates)
}

/// Render the `{tables}` placeholder for a database kind
fn tables_fragment(kind: DatabaseKind, tables: &[String]) -> String {
    match kind {
        DatabaseKind::Mongodb => tables
            .iter()
            .map(|t| format!("--nsInclude={}", shell_quote(t)))
            .collect::<Vec<_>>()
            .join(" "),
        _ => tables.iter().map(|t| shell_quote(t)).collect::<Vec<_>>().join(" "),
    }
}

fn ensure_tool(template: &str) -> Result<()> {
    let program = template.split_whitespace().next().unwrap_or_default();
    which::which(program).with_context(|| format!("'{}' was not found on PATH", program))?;
    Ok(())
}

/// Dumps via command templates, and copies plain files natively
pub struct CommandDumpExecutor {
    executor: Arc<dyn CommandExecutor>,
    /// Check default tools with `which` before running them
    check_tools: bool,
}

impl CommandDumpExecutor {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            check_tools: true,
        }
    }

    /// Skip PATH lookups (the command executor is a mock)
    pub fn without_tool_check(mut self) -> Self {
        self.check_tools = false;
        self
    }

    fn dump_template<'a>(&self, database: &'a DatabaseConfig) -> Result<(&'a str, &'static str)> {
        if let Some(custom) = database.dump_command.as_deref() {
            return Ok((custom, "dump"));
        }
        let templates = default_templates(database.kind)
            .with_context(|| format!("No dump template for {:?}", database.kind))?;
        if self.check_tools {
            ensure_tool(templates.dump)?;
        }
        Ok((templates.dump, templates.extension))
    }

    fn load_template<'a>(&self, database: &'a DatabaseConfig) -> Result<&'a str> {
        if let Some(custom) = database.load_command.as_deref() {
            return Ok(custom);
        }
        let templates = default_templates(database.kind)
            .with_context(|| format!("No load template for {:?}", database.kind))?;
        if self.check_tools {
            ensure_tool(templates.load)?;
        }
        Ok(templates.load)
    }
}

#[async_trait]
impl DumpExecutor for CommandDumpExecutor {
    async fn dump(&self, database: &DatabaseConfig, options: &DumpOptions) -> Result<PathBuf> {
        if database.kind == DatabaseKind::File && database.dump_command.is_none() {
            return copy_file_source(database, options).await;
        }

        let (template, extension) = self.dump_template(database)?;
        let output = options.output_dir.join(format!("dump.{}", extension));
        let output_str = output.display().to_string();
        let excludes = options
            .excludes
            .iter()
            .map(|e| shell_quote(e))
            .collect::<Vec<_>>()
            .join(" ");

        let mut command = render_template(
            template,
            &[("connection", &database.connection), ("output", &output_str)],
        );
        command = command.replace("{excludes}", &excludes);
        command = command.replace("{kind}", &format!("{:?}", options.kind).to_lowercase());

        info!("Dumping {:?} database", database.kind);
        self.executor
            .run_shell_command(&command, Some(&options.output_dir), None)
            .await?;

        if !output.exists() {
            anyhow::bail!("Dump command finished but did not produce {:?}", output);
        }
        Ok(output)
    }

    async fn load(&self, database: &DatabaseConfig, artifact: &Path, options: &LoadOptions) -> Result<()> {
        let target = options.target.as_deref().unwrap_or(&database.connection);

        if database.kind == DatabaseKind::File && database.load_command.is_none() {
            return restore_file_target(artifact, Path::new(target)).await;
        }

        let template = self.load_template(database)?;
        if !options.tables.is_empty() && !template.contains("{tables}") {
            warn!(
                "Table filter is not supported for {:?} loads; restoring everything",
                database.kind
            );
        }
        if let Some(pit) = options.point_in_time {
            if !template.contains("{point_in_time}") {
                warn!("Point-in-time {} ignored: load command has no {{point_in_time}}", pit);
            }
        }

        let input = artifact.display().to_string();
        let pit = options.point_in_time.map(|p| p.to_rfc3339()).unwrap_or_default();
        let mut command = render_template(
            template,
            &[("target", target), ("input", &input), ("point_in_time", &pit)],
        );
        command = command.replace("{tables}", &tables_fragment(database.kind, &options.tables));

        info!("Loading artifact into {:?} database", database.kind);
        self.executor.run_shell_command(&command, None, None).await?;
        Ok(())
    }
}

async fn copy_file_source(database: &DatabaseConfig, options: &DumpOptions) -> Result<PathBuf> {
    let source = crate::config::expand_tilde(Path::new(&database.connection));
    let metadata = tokio::fs::metadata(&source)
        .await
        .with_context(|| format!("Cannot read source file {:?}", source))?;
    if !metadata.is_file() {
        anyhow::bail!("{:?} is not a regular file", source);
    }

    let name = source
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "dump.bin".into());
    let output = options.output_dir.join(name);
    tokio::fs::copy(&source, &output)
        .await
        .with_context(|| format!("Failed to copy {:?}", source))?;
    debug!("Copied {:?} to {:?}", source, output);
    Ok(output)
}

/// Write next to the target and rename over it
async fn restore_file_target(artifact: &Path, target: &Path) -> Result<()> {
    let target = crate::config::expand_tilde(target);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let mut staging = target.as_os_str().to_os_string();
    staging.push(".restoring");
    let staging = PathBuf::from(staging);

    tokio::fs::copy(artifact, &staging)
        .await
        .with_context(|| format!("Failed to stage restore at {:?}", staging))?;
    tokio::fs::rename(&staging, &target)
        .await
        .with_context(|| format!("Failed to replace {:?}", target))?;
    Ok(())
}

/// In-memory dump executor for tests
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    pub struct LoadRecord {
        pub data: Vec<u8>,
        pub target: Option<String>,
        pub tables: Vec<String>,
        pub point_in_time: Option<DateTime<Utc>>,
    }

    /// Dumps a fixed byte payload and records loads
    #[derive(Clone, Default)]
    pub struct MemoryDumpExecutor {
        content: Arc<Mutex<Vec<u8>>>,
        dump_error: Arc<Mutex<Option<String>>>,
        load_error: Arc<Mutex<Option<String>>>,
        delay: Arc<Mutex<Option<Duration>>>,
        pub dumps: Arc<Mutex<usize>>,
        pub loads: Arc<Mutex<Vec<LoadRecord>>>,
    }

    impl MemoryDumpExecutor {
        pub fn new(content: &[u8]) -> Self {
            let executor = Self::default();
            executor.set_content(content);
            executor
        }

        pub fn set_content(&self, content: &[u8]) {
            *self.content.lock() = content.to_vec();
        }

        pub fn fail_dumps(&self, message: &str) {
            *self.dump_error.lock() = Some(message.to_string());
        }

        pub fn fail_loads(&self, message: &str) {
            *self.load_error.lock() = Some(message.to_string());
        }

        /// Make each dump take at least `delay`
        pub fn with_delay(self, delay: Duration) -> Self {
            *self.delay.lock() = Some(delay);
            self
        }

        pub fn dump_count(&self) -> usize {
            *self.dumps.lock()
        }

        pub fn last_load(&self) -> Option<LoadRecord> {
            self.loads.lock().last().cloned()
        }
    }

    #[async_trait]
    impl DumpExecutor for MemoryDumpExecutor {
        async fn dump(&self, _database: &DatabaseConfig, options: &DumpOptions) -> Result<PathBuf> {
            *self.dumps.lock() += 1;
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = self.dump_error.lock().clone() {
                anyhow::bail!(message);
            }
            let output = options.output_dir.join("dump.sql");
            let content = self.content.lock().clone();
            tokio::fs::write(&output, content).await?;
            Ok(output)
        }

        async fn load(&self, _database: &DatabaseConfig, artifact: &Path, options: &LoadOptions) -> Result<()> {
            if let Some(message) = self.load_error.lock().clone() {
                anyhow::bail!(message);
            }
            let data = tokio::fs::read(artifact).await?;
            self.loads.lock().push(LoadRecord {
                data,
                target: options.target.clone(),
                tables: options.tables.clone(),
                point_in_time: options.point_in_time,
            });
            Ok(())
        }
    }
}
