use super::ui;
use crate::core::events::{EventBus, PortfolioEvent};
use crate::core::schedule::ScheduleController;
use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Runs the in-process refresh timer until interrupted, printing each
/// completed refresh.
pub async fn run(controller: &ScheduleController, events: &EventBus, interval_seconds: u64) -> Result<()> {
    let mut receiver = events.subscribe();
    controller.install(interval_seconds).await?;
    println!("Refreshing every {interval_seconds} seconds. Press Ctrl-C to stop.");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            event = receiver.recv() => match event {
                Ok(PortfolioEvent::RefreshCompleted(result)) => {
                    ui::print_separator();
                    println!("{}", result.display(false));
                }
                Ok(PortfolioEvent::RefreshSkipped) => info!("Timer fired during a running refresh"),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!("Missed {} refresh events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    }

    controller.uninstall().await?;
    info!("Daemon stopped");
    Ok(())
}
