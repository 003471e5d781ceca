use crate::core::refresh::RefreshOrchestrator;
use crate::core::schedule::{ScheduleDescriptor, ScheduleStatus, Scheduler};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Runs refreshes on a timer inside the current process.
///
/// The countdown restarts whenever any refresh completes, including manual
/// ones, and overlapping runs are skipped by the orchestrator.
pub struct InProcessScheduler {
    orchestrator: Arc<RefreshOrchestrator>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl InProcessScheduler {
    pub fn new(orchestrator: Arc<RefreshOrchestrator>) -> Self {
        Self {
            orchestrator,
            timers: Mutex::new(HashMap::new()),
        }
    }

    fn spawn_timer(&self, interval: Duration, run_at_load: bool) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            if run_at_load {
                orchestrator.perform_refresh().await;
            }
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        debug!("Refresh timer fired");
                        orchestrator.perform_refresh().await;
                    }
                    _ = orchestrator.completed().notified() => {
                        debug!("Refresh completed elsewhere, restarting countdown");
                    }
                }
            }
        })
    }
}

impl Drop for InProcessScheduler {
    fn drop(&mut self) {
        let timers = self.timers.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }
}

#[async_trait]
impl Scheduler for InProcessScheduler {
    async fn install(&self, descriptor: &ScheduleDescriptor) -> Result<()> {
        let interval = Duration::from_secs(descriptor.interval_seconds.max(1));
        let handle = self.spawn_timer(interval, descriptor.run_at_load);
        let previous = self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(descriptor.label.clone(), handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!(
            "Refresh timer {} started, every {:?}",
            descriptor.label, interval
        );
        Ok(())
    }

    async fn uninstall(&self, label: &str) -> Result<()> {
        let removed = self
            .timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(label);
        if let Some(handle) = removed {
            handle.abort();
            info!("Refresh timer {} stopped", label);
        }
        Ok(())
    }

    async fn status(&self, label: &str) -> Result<ScheduleStatus> {
        let timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        Ok(match timers.get(label) {
            Some(handle) => ScheduleStatus {
                installed: true,
                running: !handle.is_finished(),
            },
            None => ScheduleStatus::default(),
        })
    }
}
