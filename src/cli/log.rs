use super::ui;
use crate::core::refresh_log::RefreshLog;
use anyhow::Result;

fn style_line(line: &str) -> String {
    if line.contains("] [ERROR] ") {
        ui::style_text(line, ui::StyleType::Error)
    } else {
        line.to_string()
    }
}

pub fn run(log: &RefreshLog, lines: usize, clear: bool) -> Result<()> {
    if clear {
        log.clear()?;
        println!("Cleared {}", log.path().display());
        return Ok(());
    }

    let tail = log.tail(lines)?;
    if tail.is_empty() {
        println!("The refresh log is empty.");
        return Ok(());
    }
    for line in tail {
        println!("{}", style_line(&line));
    }
    Ok(())
}
