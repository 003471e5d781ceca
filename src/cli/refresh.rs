use super::ui;
use crate::core::refresh::{RefreshOrchestrator, RefreshResult, RefreshTier};
use comfy_table::Cell;

impl RefreshResult {
    pub fn display(&self, verbose: bool) -> String {
        let style = match self.tier {
            RefreshTier::Succeeded => ui::StyleType::TotalValue,
            RefreshTier::Partial => ui::StyleType::Warning,
            RefreshTier::Failed => ui::StyleType::Error,
        };
        let mut output = format!(
            "{} in {:.1}s",
            ui::style_text(&self.summary(), style),
            (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
        );

        if verbose && !self.debug_log_lines.is_empty() {
            let mut table = ui::new_styled_table();
            table.set_header(vec![ui::header_cell("Details")]);
            for line in &self.debug_log_lines {
                table.add_row(vec![Cell::new(line)]);
            }
            output.push_str(&format!("\n\n{table}"));
        }
        output
    }
}

pub async fn run(orchestrator: &RefreshOrchestrator, verbose: bool) {
    let pb = ui::new_spinner("Refreshing prices and exchange rates...");
    let result = orchestrator.perform_refresh().await;
    pb.finish_and_clear();

    match result {
        Some(result) => println!("{}", result.display(verbose)),
        None => report_in_progress(),
    }
}

pub fn report_in_progress() {
    println!(
        "{}",
        ui::style_text("A refresh is already in progress.", ui::StyleType::Subtle)
    );
}
