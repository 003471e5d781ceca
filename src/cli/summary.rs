use super::ui;
use crate::core::valuation::{GroupBy, GroupValue, Report, ValuationEngine};
use chrono::{DateTime, NaiveDate, Utc};
use comfy_table::Cell;

impl GroupValue {
    pub fn display_as_table(&self, base_currency: &str) -> String {
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Instrument"),
            ui::header_cell("Units"),
            ui::header_cell("Price"),
            ui::header_cell(&format!("Value ({base_currency})")),
            ui::header_cell("Weight (%)"),
            ui::header_cell("Gain"),
        ]);

        for holding in &self.holdings {
            let value = match (&holding.value, &holding.missing) {
                (Some(v), _) => ui::number_cell(format!("{v:.2}")),
                (None, Some(missing)) => ui::missing_cell(&format!("N/A ({missing})")),
                (None, None) => ui::na_cell(true),
            };
            table.add_row(vec![
                Cell::new(&holding.name),
                ui::number_cell(format!("{:.4}", holding.quantity)),
                ui::format_optional_cell(holding.price.as_ref(), |p| {
                    format!("{:.2} {} ({})", p.value, p.currency, p.date)
                }),
                value,
                ui::format_optional_cell(holding.weight, |w| format!("{w:.2}%")),
                ui::gain_cell(holding.gain),
            ]);
        }
        table.add_row(ui::total_row("Total", format!("{:.2}", self.value), 6, 3));

        let mut output = format!(
            "{}{}\n\n",
            ui::style_text(&self.name, ui::StyleType::Title),
            self.weight
                .map(|w| format!(" ({w:.2}%)"))
                .unwrap_or_default()
        );
        output.push_str(&table.to_string());
        output
    }
}

impl Report {
    pub fn display(&self) -> String {
        let mut output = String::new();
        for group in &self.groups {
            output.push_str(&group.display_as_table(&self.base_currency));
            output.push_str("\n\n");
        }

        output.push_str(&format!(
            "Total Value ({}) on {}: {}",
            ui::style_text(&self.base_currency, ui::StyleType::TotalLabel),
            self.as_of,
            ui::style_text(&format!("{:.2}", self.total), ui::StyleType::TotalValue)
        ));

        let unknown = self.unknown();
        if !unknown.is_empty() {
            output.push_str(&format!(
                "\n{}",
                ui::style_text(
                    &format!(
                        "Excluded for missing prices or rates: {}",
                        unknown.join(", ")
                    ),
                    ui::StyleType::Warning
                )
            ));
        }
        output
    }
}

pub fn run(
    engine: &ValuationEngine,
    group_by: GroupBy,
    as_of: Option<NaiveDate>,
    last_refresh: Option<DateTime<Utc>>,
) {
    let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
    let report = engine.report(as_of, group_by);

    if report.groups.is_empty() {
        println!("No holdings configured.");
        return;
    }

    println!("{}", report.display());
    let refreshed = last_refresh.map_or_else(
        || "never".to_string(),
        |t| t.format("%Y-%m-%d %H:%M UTC").to_string(),
    );
    println!(
        "{}",
        ui::style_text(&format!("Last refresh: {refreshed}"), ui::StyleType::Subtle)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::valuation::tests::{d, fixture};

    #[test]
    fn test_report_display_lists_groups_and_unknowns() {
        let engine = ValuationEngine::new(fixture(), "EUR", "BENCHMARK-GOLD");

        let output = engine.report(d("2026-01-29"), GroupBy::Quadrant).display();
        assert!(output.contains("Growth"));
        assert!(output.contains("Unassigned"));
        assert!(!output.contains("Excluded"));

        let output = engine.report(d("2026-01-28"), GroupBy::Account).display();
        assert!(output.contains("Excluded for missing prices or rates"));
    }
}
