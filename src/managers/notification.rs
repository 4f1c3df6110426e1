//! Alert events and sinks
//!
//! The core raises typed [`AlertEvent`]s; where they go is up to the sinks
//! registered on the [`Notifier`]. A sink failing never fails the operation
//! that raised the event.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{expand_tilde, NotificationConfig, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BackupCompleted,
    BackupFailed,
    RestoreCompleted,
    RestoreFailed,
    RetentionSummary,
    HealthDegraded,
    HealthRecovered,
    FailoverStarted,
    FailoverStepCompleted,
    FailoverStepFailed,
    FailoverRolledBack,
    FailoverCompleted,
    /// Message from a `notification` failover step
    FailoverNotice,
    RpoViolated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BackupCompleted => "backup_completed",
            EventKind::BackupFailed => "backup_failed",
            EventKind::RestoreCompleted => "restore_completed",
            EventKind::RestoreFailed => "restore_failed",
            EventKind::RetentionSummary => "retention_summary",
            EventKind::HealthDegraded => "health_degraded",
            EventKind::HealthRecovered => "health_recovered",
            EventKind::FailoverStarted => "failover_started",
            EventKind::FailoverStepCompleted => "failover_step_completed",
            EventKind::FailoverStepFailed => "failover_step_failed",
            EventKind::FailoverRolledBack => "failover_rolled_back",
            EventKind::FailoverCompleted => "failover_completed",
            EventKind::FailoverNotice => "failover_notice",
            EventKind::RpoViolated => "rpo_violated",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            EventKind::BackupFailed
            | EventKind::RestoreFailed
            | EventKind::HealthDegraded
            | EventKind::FailoverStepFailed
            | EventKind::FailoverRolledBack => Severity::Critical,
            EventKind::FailoverStarted | EventKind::FailoverNotice | EventKind::RpoViolated => {
                Severity::Warning
            }
            _ => Severity::Info,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: EventKind,
    pub severity: Severity,
    pub context: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    /// Event with the kind's default severity
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            context: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// Strategy, service or plan the event is about
    pub fn subject(&self) -> &str {
        ["strategy", "service", "plan"]
            .iter()
            .find_map(|key| self.get(key))
            .unwrap_or("-")
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn emit(&self, event: &AlertEvent) -> Result<()>;
}

/// Writes every event to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn emit(&self, event: &AlertEvent) -> Result<()> {
        let context = event
            .context
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        match event.severity {
            Severity::Critical => error!("[{}] {}", event.kind, context),
            Severity::Warning => warn!("[{}] {}", event.kind, context),
            Severity::Info => info!("[{}] {}", event.kind, context),
        }
        Ok(())
    }
}

/// In-process broadcast of events to any number of subscribers
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: broadcast::Sender<AlertEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl AlertSink for ChannelSink {
    async fn emit(&self, event: &AlertEvent) -> Result<()> {
        // No subscribers is not an error
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Fans events out to every registered sink
#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    pub async fn emit(&self, event: AlertEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.emit(&event).await {
                warn!("Failed to deliver {} alert: {:#}", event.kind, e);
            }
        }
    }
}

/// Discord embed color codes (decimal)
#[derive(Debug, Clone, Copy)]
pub enum NotificationColor {
    /// Red - for failures
    Critical = 15158332, // #E74C3C
    /// Orange - for warnings
    Warning = 15105570, // #E67E22
    /// Green - for success
    Info = 3066993, // #2ECC71
}

impl NotificationColor {
    fn as_decimal(&self) -> u32 {
        *self as u32
    }
}

impl From<Severity> for NotificationColor {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Critical => NotificationColor::Critical,
            Severity::Warning => NotificationColor::Warning,
            Severity::Info => NotificationColor::Info,
        }
    }
}

/// Discord webhook payload
#[derive(Debug, Serialize)]
struct DiscordPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<DiscordField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<DiscordFooter>,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct DiscordField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct DiscordFooter {
    text: String,
}

/// Rate limit cache entry
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// Unix timestamp of last notification
    last_sent: i64,
    /// Count of notifications sent in current window
    count: u32,
}

/// Rate limit cache
#[derive(Debug, Serialize, Deserialize, Default)]
struct NotificationCache {
    /// Map of cache key to entry
    entries: HashMap<String, CacheEntry>,
}

/// Sends events to a Discord webhook, rate-limited per event kind and subject
pub struct DiscordWebhookSink {
    config: NotificationConfig,
    cache_path: PathBuf,
    client: reqwest::Client,
}

impl DiscordWebhookSink {
    pub fn new(config: NotificationConfig) -> Result<Self> {
        let cache_path = expand_tilde(&config.cache_file);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            config,
            cache_path,
            client,
        })
    }

    /// Check if notifications are enabled for a severity
    pub fn is_enabled(&self, severity: Severity) -> bool {
        !self.config.discord_webhook_url.is_empty() && self.config.notify_on.contains(&severity)
    }

    fn build_payload(&self, event: &AlertEvent) -> DiscordPayload {
        let emoji = match event.severity {
            Severity::Critical => "\u{274C}",         // Red X
            Severity::Warning => "\u{26A0}\u{FE0F}", // Warning
            Severity::Info => "\u{2705}",            // Green check
        };

        let fields = event
            .context
            .iter()
            .map(|(name, value)| {
                // Truncate long values (errors) to fit embed limits
                let value = if value.chars().count() > 500 {
                    format!("{}...", value.chars().take(497).collect::<String>())
                } else {
                    value.clone()
                };
                let inline = name != "error";
                DiscordField {
                    name: name.clone(),
                    value: if inline { value } else { format!("```\n{}\n```", value) },
                    inline,
                }
            })
            .collect();

        DiscordPayload {
            username: Some("Backup Orchestrator".to_string()),
            embeds: vec![DiscordEmbed {
                title: format!("{} {}: {}", emoji, event.kind, event.subject()),
                color: NotificationColor::from(event.severity).as_decimal(),
                fields,
                footer: Some(DiscordFooter {
                    text: "backup-orchestrator".to_string(),
                }),
                timestamp: event.timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            }],
        }
    }

    async fn send_webhook(&self, payload: &DiscordPayload) -> Result<()> {
        let response = self
            .client
            .post(&self.config.discord_webhook_url)
            .json(payload)
            .send()
            .await
            .context("Failed to send Discord webhook")?;

        let status = response.status();
        if status.is_success() {
            debug!("Discord webhook sent successfully");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Discord webhook failed with status {}: {}", status, body)
        }
    }

    fn is_rate_limited(&self, cache_key: &str, now: i64) -> Result<bool> {
        let cache = self.load_cache()?;
        let window = (self.config.rate_limit_minutes * 60) as i64;
        Ok(cache
            .entries
            .get(cache_key)
            .map(|entry| now - entry.last_sent < window)
            .unwrap_or(false))
    }

    fn update_cache(&self, cache_key: &str, now: i64) -> Result<()> {
        let mut cache = self.load_cache()?;
        let count = cache.entries.get(cache_key).map_or(1, |e| e.count + 1);
        cache.entries.insert(
            cache_key.to_string(),
            CacheEntry {
                last_sent: now,
                count,
            },
        );

        // Clean up old entries (older than 24 hours)
        let cutoff = now - 86400;
        cache.entries.retain(|_, v| v.last_sent > cutoff);

        self.save_cache(&cache)
    }

    fn load_cache(&self) -> Result<NotificationCache> {
        if !self.cache_path.exists() {
            return Ok(NotificationCache::default());
        }
        let content =
            fs::read_to_string(&self.cache_path).context("Failed to read notification cache")?;
        serde_json::from_str(&content).context("Failed to parse notification cache")
    }

    fn save_cache(&self, cache: &NotificationCache) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content =
            serde_json::to_string_pretty(cache).context("Failed to serialize notification cache")?;
        fs::write(&self.cache_path, content).context("Failed to write notification cache")
    }
}

#[async_trait]
impl AlertSink for DiscordWebhookSink {
    async fn emit(&self, event: &AlertEvent) -> Result<()> {
        if !self.is_enabled(event.severity) {
            debug!("Notification for {} not enabled, skipping", event.kind);
            return Ok(());
        }

        let cache_key = format!("{}:{}", event.kind, event.subject());
        let now = Utc::now().timestamp();
        if self.is_rate_limited(&cache_key, now)? {
            debug!("Notification rate-limited for key: {}", cache_key);
            return Ok(());
        }

        self.send_webhook(&self.build_payload(event)).await?;
        self.update_cache(&cache_key, now)?;
        info!("Sent {} notification for '{}'", event.kind, event.subject());
        Ok(())
    }
}

/// Recording sink for tests
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    pub struct RecordingSink {
        events: Arc<Mutex<Vec<AlertEvent>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every emit return an error (events are still recorded)
        pub fn failing(self) -> Self {
            *self.fail.lock() = true;
            self
        }

        pub fn events(&self) -> Vec<AlertEvent> {
            self.events.lock().clone()
        }

        pub fn kinds(&self) -> Vec<EventKind> {
            self.events.lock().iter().map(|e| e.kind).collect()
        }

        pub fn count(&self, kind: EventKind) -> usize {
            self.events.lock().iter().filter(|e| e.kind == kind).count()
        }

        pub fn clear(&self) {
            self.events.lock().clear();
        }
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn emit(&self, event: &AlertEvent) -> Result<()> {
            self.events.lock().push(event.clone());
            if *self.fail.lock() {
                anyhow::bail!("sink unavailable");
            }
            Ok(())
        }
    }
}
