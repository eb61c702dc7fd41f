//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use playdeck_common::{RunStatus, TestStatus};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn render_list<T: TableDisplay>(items: &[T]) -> String {
    let mut table = table();
    table.set_header(T::headers());
    for item in items {
        table.add_row(item.row());
    }
    table.to_string()
}

/// Print a single item
pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table => println!("{}", render_list(std::slice::from_ref(item))),
        OutputFormat::Json => print_json(item),
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table if items.is_empty() => println!("No items found."),
        OutputFormat::Table => println!("{}", render_list(items)),
        OutputFormat::Json => print_json(items),
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow(), message);
}

pub fn run_status_label(status: RunStatus) -> String {
    let text = status.to_string();
    match status {
        RunStatus::Completed => text.green().to_string(),
        RunStatus::Failed => text.red().to_string(),
        RunStatus::Cancelled => text.yellow().to_string(),
        RunStatus::Running => text.cyan().to_string(),
        RunStatus::Pending => text,
    }
}

pub fn test_status_label(status: TestStatus) -> String {
    let text = status.to_string();
    match status {
        TestStatus::Passed => text.green().to_string(),
        TestStatus::Failed => text.red().to_string(),
        TestStatus::Running => text.cyan().to_string(),
        TestStatus::Pending => text,
    }
}

/// Millisecond epoch timestamp as UTC text.
pub fn format_millis(millis: Option<i64>) -> String {
    millis
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_duration(duration_ms: Option<i64>) -> String {
    match duration_ms {
        None => "-".to_string(),
        Some(ms) if ms < 1_000 => format!("{}ms", ms),
        Some(ms) => format!("{:.1}s", ms as f64 / 1000.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row(&'static str);

    impl TableDisplay for Row {
        fn headers() -> Vec<&'static str> {
            vec!["Name"]
        }

        fn row(&self) -> Vec<String> {
            vec![self.0.to_string()]
        }
    }

    #[test]
    fn test_render_list() {
        let rendered = render_list(&[Row("alpha"), Row("beta")]);
        assert!(rendered.contains("Name"));
        assert!(rendered.contains("alpha"));
        assert!(rendered.contains("beta"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(None), "-");
        assert_eq!(format_duration(Some(250)), "250ms");
        assert_eq!(format_duration(Some(1_500)), "1.5s");
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(None), "-");
        assert_eq!(format_millis(Some(0)), "1970-01-01 00:00:00");
    }
}
