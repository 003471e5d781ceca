use super::ui;
use crate::core::schedule::{ScheduleController, ScheduleStatus};
use anyhow::Result;
use chrono::TimeDelta;

pub enum ScheduleAction {
    /// Falls back to the configured refresh interval.
    Install { interval_seconds: Option<u64> },
    Uninstall,
    Status,
}

fn yes_no(flag: bool) -> String {
    if flag {
        ui::style_text("yes", ui::StyleType::TotalValue)
    } else {
        ui::style_text("no", ui::StyleType::Subtle)
    }
}

pub fn format_elapsed(elapsed: Option<TimeDelta>) -> String {
    let Some(elapsed) = elapsed else {
        return "never".to_string();
    };
    match elapsed.num_seconds().max(0) {
        s if s < 60 => format!("{s}s ago"),
        s if s < 3600 => format!("{}m ago", s / 60),
        s if s < 86400 => format!("{}h {}m ago", s / 3600, (s % 3600) / 60),
        s => format!("{}d ago", s / 86400),
    }
}

pub fn display_status(label: &str, status: ScheduleStatus, elapsed: Option<TimeDelta>) -> String {
    format!(
        "Schedule {}\n  installed: {}\n  running: {}\n  last refresh: {}",
        ui::style_text(label, ui::StyleType::TotalLabel),
        yes_no(status.installed),
        yes_no(status.running),
        format_elapsed(elapsed)
    )
}

pub async fn run(
    controller: &ScheduleController,
    action: ScheduleAction,
    label: &str,
    default_interval: u64,
) -> Result<()> {
    match action {
        ScheduleAction::Install { interval_seconds } => {
            let interval = interval_seconds.unwrap_or(default_interval);
            controller.install(interval).await?;
            println!("Installed schedule {label}, refreshing every {interval} seconds.");
        }
        ScheduleAction::Uninstall => {
            controller.uninstall().await?;
            println!("Removed schedule {label}.");
        }
        ScheduleAction::Status => {
            let status = controller.status().await?;
            println!(
                "{}",
                display_status(label, status, controller.time_since_last_refresh())
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(None), "never");
        assert_eq!(format_elapsed(Some(TimeDelta::seconds(42))), "42s ago");
        assert_eq!(format_elapsed(Some(TimeDelta::seconds(125))), "2m ago");
        assert_eq!(format_elapsed(Some(TimeDelta::seconds(3 * 3600 + 300))), "3h 5m ago");
        assert_eq!(format_elapsed(Some(TimeDelta::days(2))), "2d ago");
    }
}
