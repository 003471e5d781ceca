use super::ui;
use crate::core::history::{HistorySelector, SeriesPoint};
use crate::core::series::DateRange;
use crate::core::valuation::ValuationEngine;
use chrono::NaiveDate;
use comfy_table::Cell;
use std::collections::HashMap;

fn selector_label(selector: &HistorySelector) -> String {
    match selector {
        HistorySelector::All => "Portfolio".to_string(),
        HistorySelector::Account(id) => format!("Account {id}"),
        HistorySelector::Quadrant(Some(id)) => format!("Quadrant {id}"),
        HistorySelector::Quadrant(None) => "Unassigned instruments".to_string(),
        HistorySelector::Instrument(id) => format!("Instrument {id}"),
    }
}

pub fn display_series(
    title: &str,
    base_currency: &str,
    points: &[SeriesPoint],
    gold: Option<&[SeriesPoint]>,
) -> String {
    let mut table = ui::new_styled_table();
    let mut header = vec![
        ui::header_cell("Date"),
        ui::header_cell(&format!("Value ({base_currency})")),
    ];
    if gold.is_some() {
        header.push(ui::header_cell("Gold (oz)"));
    }
    table.set_header(header);

    let ounces: HashMap<NaiveDate, f64> = gold
        .unwrap_or_default()
        .iter()
        .map(|p| (p.date, p.value))
        .collect();
    for point in points {
        let mut row = vec![
            Cell::new(point.date),
            ui::number_cell(format!("{:.2}", point.value)),
        ];
        if gold.is_some() {
            row.push(ui::format_optional_cell(ounces.get(&point.date), |oz| {
                format!("{oz:.3}")
            }));
        }
        table.add_row(row);
    }

    format!(
        "{}\n\n{}",
        ui::style_text(title, ui::StyleType::Title),
        table
    )
}

pub fn run(engine: &ValuationEngine, selector: &HistorySelector, range: DateRange, gold: bool) {
    let points = engine.history_series(selector, range);
    if points.is_empty() {
        println!("No price history for {}.", selector_label(selector));
        return;
    }

    let whole = selector == &HistorySelector::All;
    if gold && !whole {
        println!(
            "{}",
            ui::style_text(
                "Gold equivalents are shown for the whole portfolio only.",
                ui::StyleType::Subtle
            )
        );
    }
    let gold_points = (gold && whole).then(|| engine.gold_equivalent_series(range));

    println!(
        "{}",
        display_series(
            &selector_label(selector),
            engine.base_currency(),
            &points,
            gold_points.as_deref()
        )
    );
}
