use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Defines different styles for text elements.
pub enum StyleType {
    Title,
    TotalLabel,
    TotalValue,
    Error,
    Warning,
    Subtle,
}

/// Applies a consistent style to a string.
pub fn style_text(text: &str, style_type: StyleType) -> String {
    let styled = match style_type {
        StyleType::Title => style(text).bold().underlined(),
        StyleType::TotalLabel => style(text).bold(),
        StyleType::TotalValue => style(text).green().bold(),
        StyleType::Error => style(text).red(),
        StyleType::Warning => style(text).yellow(),
        StyleType::Subtle => style(text).dim(),
    };
    styled.to_string()
}

/// Creates a new `comfy_table::Table` with standard styling.
pub fn new_styled_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn header_cell(text: &str) -> Cell {
    Cell::new(text)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

pub fn number_cell(text: String) -> Cell {
    Cell::new(text).set_alignment(CellAlignment::Right)
}

/// Formats an `Option<T>` into a `Cell`. `None` is displayed as "N/A".
pub fn format_optional_cell<T>(value: Option<T>, format_fn: impl Fn(T) -> String) -> Cell {
    value.map_or(
        Cell::new("N/A")
            .fg(Color::DarkGrey)
            .set_alignment(CellAlignment::Right),
        |v| number_cell(format_fn(v)),
    )
}

/// Signed amount, green when non-negative and red otherwise.
pub fn gain_cell(gain: Option<f64>) -> Cell {
    match gain {
        Some(gain) => {
            let color = if gain >= 0.0 { Color::Green } else { Color::Red };
            number_cell(format!("{gain:+.2}")).fg(color)
        }
        None => na_cell(false),
    }
}

/// Creates a cell for "N/A" values, with error-specific styling.
pub fn na_cell(has_error: bool) -> Cell {
    let color = if has_error {
        Color::Red
    } else {
        Color::DarkGrey
    };
    Cell::new("N/A")
        .fg(color)
        .set_alignment(CellAlignment::Right)
}

/// Red placeholder explaining why a value is unknown.
pub fn missing_cell(text: &str) -> Cell {
    Cell::new(text)
        .fg(Color::Red)
        .set_alignment(CellAlignment::Right)
}

pub fn total_row(label: &str, value: String, columns: usize, value_column: usize) -> Vec<Cell> {
    (0..columns)
        .map(|i| match i {
            0 => Cell::new(label).add_attribute(Attribute::Bold),
            i if i == value_column => number_cell(value.clone())
                .add_attribute(Attribute::Bold)
                .fg(Color::Green),
            _ => Cell::new(""),
        })
        .collect()
}

/// Spinner shown while waiting on the network.
pub fn new_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Prints a separator line matching the terminal width.
pub fn print_separator() {
    let term_width = console::Term::stdout()
        .size_checked()
        .map(|(_, w)| w as usize)
        .unwrap_or(80);
    println!("\n{}", "─".repeat(term_width));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_row_places_value() {
        let row = total_row("Total", "12.00".to_string(), 4, 2);
        assert_eq!(row.len(), 4);
        assert_eq!(row[0].content(), "Total");
        assert_eq!(row[2].content(), "12.00");
        assert_eq!(row[3].content(), "");
    }

    #[test]
    fn test_optional_cell() {
        assert_eq!(format_optional_cell(Some(1.5), |v| format!("{v:.2}")).content(), "1.50");
        assert_eq!(format_optional_cell(None::<f64>, |v| format!("{v:.2}")).content(), "N/A");
        assert_eq!(gain_cell(Some(-3.0)).content(), "-3.00");
    }
}
