//! Failover orchestrator
//!
//! Forward steps run one at a time, in order, each with its own timeout and
//! retry budget. The first step that exhausts its budget stops the plan and the
//! rollback steps run in order as compensation. Rollback failures are logged
//! and do not stop the remaining rollback steps.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{FailoverAction, FailoverPlan, FailoverStep, Severity};
use crate::error::DrError;
use crate::managers::notification::{AlertEvent, EventKind, Notifier};
use crate::utils::command::render_template;
use crate::utils::executor::CommandExecutor;

/// Carries out one kind of step action
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, step: &FailoverStep) -> Result<()>;
}

/// Runs the step's `command` option through the shell
///
/// Other options are available to the command as `{name}` placeholders.
pub struct CommandStepHandler {
    executor: Arc<dyn CommandExecutor>,
}

impl CommandStepHandler {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl StepHandler for CommandStepHandler {
    async fn execute(&self, step: &FailoverStep) -> Result<()> {
        let template = step
            .config
            .get("command")
            .ok_or_else(|| anyhow::anyhow!("Step '{}' has no 'command' option", step.id))?;
        let values: Vec<(&str, &str)> = step
            .config
            .iter()
            .filter(|(k, _)| k.as_str() != "command")
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let command = render_template(template, &values);
        self.executor.run_shell_command(&command, None, None).await?;
        Ok(())
    }
}

/// Raises the step's `message` as an alert
pub struct NotificationStepHandler {
    notifier: Notifier,
}

impl NotificationStepHandler {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl StepHandler for NotificationStepHandler {
    async fn execute(&self, step: &FailoverStep) -> Result<()> {
        let mut event = AlertEvent::new(EventKind::FailoverNotice).with("step", &step.id);
        if let Some(severity) = step.config.get("severity") {
            event.severity = match severity.as_str() {
                "info" => Severity::Info,
                "critical" => Severity::Critical,
                _ => Severity::Warning,
            };
        }
        for (key, value) in &step.config {
            if key != "severity" {
                event = event.with(key, value);
            }
        }
        self.notifier.emit(event).await;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverReport {
    pub plan: String,
    /// Forward steps that completed, in order
    pub executed_steps: Vec<String>,
    pub duration: Duration,
}

/// Removes the plan from the in-flight set when dropped
struct InFlight<'a> {
    plans: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.plans.lock().remove(&self.name);
    }
}

pub struct FailoverOrchestrator {
    handlers: HashMap<FailoverAction, Arc<dyn StepHandler>>,
    notifier: Notifier,
    in_flight: Mutex<HashSet<String>>,
    active_region: RwLock<String>,
}

impl FailoverOrchestrator {
    pub fn new(primary_region: &str, notifier: Notifier) -> Self {
        Self {
            handlers: HashMap::new(),
            notifier,
            in_flight: Mutex::new(HashSet::new()),
            active_region: RwLock::new(primary_region.to_string()),
        }
    }

    /// Command handlers for infrastructure actions, alerts for notifications
    pub fn standard(primary_region: &str, commands: Arc<dyn CommandExecutor>, notifier: Notifier) -> Self {
        let command: Arc<dyn StepHandler> = Arc::new(CommandStepHandler::new(commands));
        let notify: Arc<dyn StepHandler> = Arc::new(NotificationStepHandler::new(notifier.clone()));
        Self::new(primary_region, notifier)
            .with_handler(FailoverAction::DnsSwitch, command.clone())
            .with_handler(FailoverAction::DatabaseFailover, command.clone())
            .with_handler(FailoverAction::ServiceRestart, command.clone())
            .with_handler(FailoverAction::Custom, command)
            .with_handler(FailoverAction::Notification, notify)
    }

    pub fn with_handler(mut self, action: FailoverAction, handler: Arc<dyn StepHandler>) -> Self {
        self.handlers.insert(action, handler);
        self
    }

    pub fn active_region(&self) -> String {
        self.active_region.read().clone()
    }

    pub fn is_running(&self, plan: &str) -> bool {
        self.in_flight.lock().contains(plan)
    }

    pub async fn run_plan(&self, plan: &FailoverPlan) -> Result<FailoverReport, DrError> {
        let _in_flight = {
            let mut plans = self.in_flight.lock();
            if !plans.insert(plan.name.clone()) {
                return Err(DrError::FailoverInProgress(plan.name.clone()));
            }
            InFlight {
                plans: &self.in_flight,
                name: plan.name.clone(),
            }
        };

        let started = Instant::now();
        warn!("Starting failover plan '{}' ({} step(s))", plan.name, plan.steps.len());
        self.notifier
            .emit(
                AlertEvent::new(EventKind::FailoverStarted)
                    .with("plan", &plan.name)
                    .with("steps", plan.steps.len()),
            )
            .await;

        let mut executed = Vec::new();
        for step in &plan.steps {
            let step_started = Instant::now();
            match self.run_step(step).await {
                Ok(attempts) => {
                    info!(
                        "Failover step '{}' completed in {:?} ({} attempt(s))",
                        step.id,
                        step_started.elapsed(),
                        attempts
                    );
                    self.notifier
                        .emit(
                            AlertEvent::new(EventKind::FailoverStepCompleted)
                                .with("plan", &plan.name)
                                .with("step", &step.id)
                                .with("duration_ms", step_started.elapsed().as_millis()),
                        )
                        .await;
                    executed.push(step.id.clone());
                }
                Err((attempts, message)) => {
                    error!(
                        "Failover step '{}' failed after {} attempt(s) in {:?}: {}",
                        step.id,
                        attempts,
                        step_started.elapsed(),
                        message
                    );
                    self.notifier
                        .emit(
                            AlertEvent::new(EventKind::FailoverStepFailed)
                                .with("plan", &plan.name)
                                .with("step", &step.id)
                                .with("attempts", attempts)
                                .with("error", &message),
                        )
                        .await;

                    let rolled_back = self.rollback(plan).await;
                    self.notifier
                        .emit(
                            AlertEvent::new(EventKind::FailoverRolledBack)
                                .with("plan", &plan.name)
                                .with("failed_step", &step.id)
                                .with("rolled_back", rolled_back.join(",")),
                        )
                        .await;

                    return Err(DrError::FailoverStepFailed {
                        step: step.id.clone(),
                        attempts,
                        message,
                    });
                }
            }
        }

        if let Some(region) = &plan.target_region {
            let previous = std::mem::replace(&mut *self.active_region.write(), region.clone());
            info!("Active region switched from '{}' to '{}'", previous, region);
        }

        let duration = started.elapsed();
        info!("Failover plan '{}' completed in {:?}", plan.name, duration);
        self.notifier
            .emit(
                AlertEvent::new(EventKind::FailoverCompleted)
                    .with("plan", &plan.name)
                    .with("active_region", self.active_region())
                    .with("duration_ms", duration.as_millis()),
            )
            .await;

        Ok(FailoverReport {
            plan: plan.name.clone(),
            executed_steps: executed,
            duration,
        })
    }

    async fn rollback(&self, plan: &FailoverPlan) -> Vec<String> {
        let mut done = Vec::new();
        for step in &plan.rollback_steps {
            let started = Instant::now();
            match self.run_step(step).await {
                Ok(_) => {
                    info!("Rollback step '{}' completed in {:?}", step.id, started.elapsed());
                    done.push(step.id.clone());
                }
                Err((attempts, message)) => error!(
                    "Rollback step '{}' failed after {} attempt(s) in {:?}: {}",
                    step.id,
                    attempts,
                    started.elapsed(),
                    message
                ),
            }
        }
        done
    }

    /// Returns the attempts used, or the attempts and last error
    async fn run_step(&self, step: &FailoverStep) -> std::result::Result<u32, (u32, String)> {
        let handler = self
            .handlers
            .get(&step.action)
            .ok_or_else(|| (0, format!("no handler registered for {:?}", step.action)))?;

        let max_attempts = step.retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let started = Instant::now();
            match tokio::time::timeout(step.timeout(), handler.execute(step)).await {
                Ok(Ok(())) => return Ok(attempt),
                Ok(Err(e)) => last_error = format!("{:#}", e),
                Err(_) => last_error = format!("timed out after {:?}", step.timeout()),
            }
            warn!(
                "Step '{}' attempt {}/{} failed after {:?}: {}",
                step.id,
                attempt,
                max_attempts,
                started.elapsed(),
                last_error
            );
            if attempt < max_attempts {
                tokio::time::sleep(Duration::from_millis(step.retry_delay_ms)).await;
            }
        }
        Err((max_attempts, last_error))
    }
}

/// Scriptable step handler for tests
/// Available for use in external test crates
pub mod mock {
    use super::*;

    #[derive(Clone, Default)]
    pub struct RecordingHandler {
        /// Step ids in execution order, one entry per attempt
        pub calls: Arc<Mutex<Vec<String>>>,
        failing: Arc<Mutex<HashSet<String>>>,
        hanging: Arc<Mutex<HashSet<String>>>,
    }

    impl RecordingHandler {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_step(self, id: &str) -> Self {
            self.failing.lock().insert(id.to_string());
            self
        }

        /// Make a step block far beyond any test timeout
        pub fn hang_step(self, id: &str) -> Self {
            self.hanging.lock().insert(id.to_string());
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        pub fn attempts(&self, id: &str) -> usize {
            self.calls.lock().iter().filter(|c| c.as_str() == id).count()
        }
    }

    #[async_trait]
    impl StepHandler for RecordingHandler {
        async fn execute(&self, step: &FailoverStep) -> Result<()> {
            self.calls.lock().push(step.id.clone());
            let hang = self.hanging.lock().contains(&step.id);
            if hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.failing.lock().contains(&step.id) {
                anyhow::bail!("step '{}' failed", step.id);
            }
            Ok(())
        }
    }

    /// Orchestrator with one handler for every action
    pub fn orchestrator_with(handler: RecordingHandler, notifier: Notifier) -> FailoverOrchestrator {
        let handler: Arc<dyn StepHandler> = Arc::new(handler);
        [
            FailoverAction::DnsSwitch,
            FailoverAction::DatabaseFailover,
            FailoverAction::ServiceRestart,
            FailoverAction::Notification,
            FailoverAction::Custom,
        ]
        .into_iter()
        .fold(FailoverOrchestrator::new("primary", notifier), |o, action| {
            o.with_handler(action, handler.clone())
        })
    }
}
