//! Control surface for periodic refreshes run outside the foreground session.

use crate::core::refresh::{RefreshOrchestrator, RefreshResult};
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Everything a scheduler needs to run the refresh command periodically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDescriptor {
    pub label: String,
    /// Program and arguments to execute.
    pub program: Vec<String>,
    pub interval_seconds: u64,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub run_at_load: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScheduleStatus {
    pub installed: bool,
    pub running: bool,
}

/// Operating-system or in-process facility that runs a descriptor.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn install(&self, descriptor: &ScheduleDescriptor) -> Result<()>;
    async fn uninstall(&self, label: &str) -> Result<()>;
    async fn status(&self, label: &str) -> Result<ScheduleStatus>;
}

pub struct ScheduleController {
    scheduler: Arc<dyn Scheduler>,
    orchestrator: Arc<RefreshOrchestrator>,
    label: String,
    program: Vec<String>,
    output_dir: PathBuf,
    run_at_load: bool,
}

impl ScheduleController {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        orchestrator: Arc<RefreshOrchestrator>,
        label: &str,
        program: Vec<String>,
        output_dir: PathBuf,
        run_at_load: bool,
    ) -> Self {
        Self {
            scheduler,
            orchestrator,
            label: label.to_string(),
            program,
            output_dir,
            run_at_load,
        }
    }

    pub fn descriptor(&self, interval_seconds: u64) -> ScheduleDescriptor {
        ScheduleDescriptor {
            label: self.label.clone(),
            program: self.program.clone(),
            interval_seconds,
            stdout_path: self.output_dir.join(format!("{}.out.log", self.label)),
            stderr_path: self.output_dir.join(format!("{}.err.log", self.label)),
            run_at_load: self.run_at_load,
        }
    }

    pub async fn install(&self, interval_seconds: u64) -> Result<()> {
        if interval_seconds == 0 {
            bail!("Schedule interval must be at least one second");
        }
        let descriptor = self.descriptor(interval_seconds);
        let outcome = self.scheduler.install(&descriptor).await;
        self.report(
            &outcome,
            &format!(
                "Installed schedule {} every {} seconds",
                self.label, interval_seconds
            ),
            "install",
        );
        outcome
    }

    pub async fn uninstall(&self) -> Result<()> {
        let outcome = self.scheduler.uninstall(&self.label).await;
        self.report(
            &outcome,
            &format!("Removed schedule {}", self.label),
            "uninstall",
        );
        outcome
    }

    pub async fn status(&self) -> Result<ScheduleStatus> {
        self.scheduler.status(&self.label).await
    }

    pub async fn run_now(&self) -> Option<RefreshResult> {
        self.orchestrator.perform_refresh().await
    }

    /// `None` until a refresh has completed once.
    pub fn time_since_last_refresh(&self) -> Option<TimeDelta> {
        self.orchestrator
            .last_refresh()
            .map(|last| Utc::now().signed_duration_since(last))
    }

    fn report(&self, outcome: &Result<()>, success: &str, action: &str) {
        let (ok, message) = match outcome {
            Ok(()) => {
                info!("{}", success);
                (true, success.to_string())
            }
            Err(e) => {
                error!("Failed to {} schedule {}: {:#}", action, self.label, e);
                (false, format!("Failed to {action} schedule {}: {e:#}", self.label))
            }
        };
        if let Err(e) = self.orchestrator.log().append(ok, &message) {
            error!("Failed to write refresh log: {:#}", e);
        }
    }
}
