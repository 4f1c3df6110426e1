//! Health monitor for dependent services
//!
//! Per service: `Healthy <-> Degraded`. A success resets the failure counter;
//! reaching `failure_threshold` consecutive failures flips to `Degraded` and
//! raises exactly one degradation event until the service recovers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{DisasterRecoveryConfig, HealthCheckKind, MonitoredServiceConfig};
use crate::error::DrError;
use crate::managers::notification::{AlertEvent, EventKind, Notifier};
use crate::utils::executor::CommandExecutor;

/// One probe of one service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<()>;
}

pub struct HttpCheck {
    url: String,
    client: reqwest::Client,
}

impl HttpCheck {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl HealthCheck for HttpCheck {
    async fn check(&self) -> Result<()> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?;
        if !response.status().is_success() {
            anyhow::bail!("GET {} returned {}", self.url, response.status());
        }
        Ok(())
    }
}

pub struct TcpCheck {
    address: String,
}

impl TcpCheck {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
        }
    }
}

#[async_trait]
impl HealthCheck for TcpCheck {
    async fn check(&self) -> Result<()> {
        tokio::net::TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("Cannot connect to {}", self.address))?;
        Ok(())
    }
}

/// Healthy when the command exits zero
pub struct CommandCheck {
    command: String,
    executor: Arc<dyn CommandExecutor>,
}

impl CommandCheck {
    pub fn new(command: &str, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            command: command.to_string(),
            executor,
        }
    }
}

#[async_trait]
impl HealthCheck for CommandCheck {
    async fn check(&self) -> Result<()> {
        self.executor.run_shell_command(&self.command, None, None).await?;
        Ok(())
    }
}

pub fn build_check(service: &MonitoredServiceConfig, commands: Arc<dyn CommandExecutor>) -> Result<Arc<dyn HealthCheck>> {
    let check: Arc<dyn HealthCheck> = match service.check {
        HealthCheckKind::Http => Arc::new(HttpCheck::new(&service.target)?),
        HealthCheckKind::Tcp => Arc::new(TcpCheck::new(&service.target)),
        HealthCheckKind::Command => Arc::new(CommandCheck::new(&service.target, commands)),
    };
    Ok(check)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckState {
    pub service: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl HealthCheckState {
    fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            last_checked: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Degraded,
    Recovered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthEvent {
    pub service: String,
    pub transition: HealthTransition,
    pub consecutive_failures: u32,
    pub error: Option<String>,
}

struct MonitoredService {
    name: String,
    timeout: Duration,
    check: Arc<dyn HealthCheck>,
}

pub struct HealthMonitor {
    services: Vec<MonitoredService>,
    threshold: u32,
    states: RwLock<HashMap<String, HealthCheckState>>,
    events: broadcast::Sender<HealthEvent>,
    notifier: Notifier,
}

impl HealthMonitor {
    pub fn new(failure_threshold: u32, notifier: Notifier) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            services: Vec::new(),
            threshold: failure_threshold.max(1),
            states: RwLock::new(HashMap::new()),
            events,
            notifier,
        }
    }

    pub fn from_config(
        config: &DisasterRecoveryConfig,
        commands: Arc<dyn CommandExecutor>,
        notifier: Notifier,
    ) -> Result<Self> {
        let mut monitor = Self::new(config.failure_threshold, notifier);
        for service in &config.services {
            let check = build_check(service, commands.clone())?;
            monitor.add_service(&service.name, Duration::from_secs(service.timeout_seconds), check);
        }
        Ok(monitor)
    }

    pub fn add_service(&mut self, name: &str, timeout: Duration, check: Arc<dyn HealthCheck>) {
        self.states.write().insert(name.to_string(), HealthCheckState::new(name));
        self.services.push(MonitoredService {
            name: name.to_string(),
            timeout,
            check,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    pub fn state(&self, service: &str) -> Option<HealthCheckState> {
        self.states.read().get(service).cloned()
    }

    pub fn snapshot(&self) -> Vec<HealthCheckState> {
        let mut states: Vec<_> = self.states.read().values().cloned().collect();
        states.sort_by(|a, b| a.service.cmp(&b.service));
        states
    }

    /// Check every service once, concurrently, and apply the results
    pub async fn poll_once(&self) -> Vec<HealthEvent> {
        let mut tasks = JoinSet::new();
        for (index, service) in self.services.iter().enumerate() {
            let check = service.check.clone();
            let timeout = service.timeout;
            let name = service.name.clone();
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, check.check()).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(format!("{:#}", e)),
                    Err(_) => Err(DrError::HealthCheckTimeout {
                        service: name,
                        timeout,
                    }
                    .to_string()),
                };
                (index, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(self.services.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("Health check task panicked: {}", e),
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);

        let mut events = Vec::new();
        for (index, outcome) in outcomes {
            let name = &self.services[index].name;
            if let Some(event) = self.record(name, outcome) {
                events.push(event);
            }
        }

        for event in &events {
            self.publish(event).await;
        }
        events
    }

    /// Apply one check result to the state machine
    fn record(&self, service: &str, outcome: std::result::Result<(), String>) -> Option<HealthEvent> {
        let mut states = self.states.write();
        let state = states
            .entry(service.to_string())
            .or_insert_with(|| HealthCheckState::new(service));
        state.last_checked = Some(Utc::now());

        match outcome {
            Ok(()) => {
                let was_degraded = state.status == HealthStatus::Degraded;
                state.consecutive_failures = 0;
                state.status = HealthStatus::Healthy;
                state.last_error = None;
                was_degraded.then(|| HealthEvent {
                    service: service.to_string(),
                    transition: HealthTransition::Recovered,
                    consecutive_failures: 0,
                    error: None,
                })
            }
            Err(error) => {
                state.consecutive_failures += 1;
                state.last_error = Some(error.clone());
                debug!(
                    "Health check for '{}' failed ({}/{}): {}",
                    service, state.consecutive_failures, self.threshold, error
                );
                if state.status == HealthStatus::Healthy && state.consecutive_failures >= self.threshold {
                    state.status = HealthStatus::Degraded;
                    Some(HealthEvent {
                        service: service.to_string(),
                        transition: HealthTransition::Degraded,
                        consecutive_failures: state.consecutive_failures,
                        error: Some(error),
                    })
                } else {
                    None
                }
            }
        }
    }

    async fn publish(&self, event: &HealthEvent) {
        let alert = match event.transition {
            HealthTransition::Degraded => {
                warn!(
                    "Service '{}' degraded after {} consecutive failures",
                    event.service, event.consecutive_failures
                );
                AlertEvent::new(EventKind::HealthDegraded)
                    .with("service", &event.service)
                    .with("consecutive_failures", event.consecutive_failures)
                    .with("error", event.error.as_deref().unwrap_or_default())
            }
            HealthTransition::Recovered => {
                info!("Service '{}' recovered", event.service);
                AlertEvent::new(EventKind::HealthRecovered).with("service", &event.service)
            }
        };
        self.notifier.emit(alert).await;
        let _ = self.events.send(event.clone());
    }
}

/// Switchable health check for tests
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Clone)]
    pub struct FlakyCheck {
        healthy: Arc<AtomicBool>,
        probes: Arc<AtomicUsize>,
    }

    impl Default for FlakyCheck {
        fn default() -> Self {
            Self {
                healthy: Arc::new(AtomicBool::new(true)),
                probes: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl FlakyCheck {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }

        pub fn probes(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HealthCheck for FlakyCheck {
        async fn check(&self) -> Result<()> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                anyhow::bail!("service unavailable")
            }
        }
    }
}
