//! Terminal rendering: tables for people, JSON or YAML for scripts.

use anyhow::Result;
use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

fn tagged(tag: ColoredString, msg: &str) -> String {
    format!("{} {}", tag, msg)
}

pub fn print_success(msg: &str) {
    println!("{}", tagged("[OK]".green().bold(), msg));
}

pub fn print_info(msg: &str) {
    println!("{}", tagged("[INFO]".blue().bold(), msg));
}

pub fn print_warning(msg: &str) {
    eprintln!("{}", tagged("[WARN]".yellow().bold(), msg));
}

pub fn print_error(msg: &str) {
    eprintln!("{}", tagged("[ERROR]".red().bold(), msg));
}

/// Serialize `value` for the machine-readable formats. Tables fall back to
/// pretty JSON.
fn serialize<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
        OutputFormat::Table | OutputFormat::Json => {
            let mut text = serde_json::to_string_pretty(value)?;
            text.push('\n');
            text
        }
    })
}

fn render_table<T: Tabled>(rows: &[T]) -> String {
    Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::left()))
        .to_string()
}

pub fn print_list<T: Tabled + Serialize>(rows: &[T], format: OutputFormat) -> Result<()> {
    if format != OutputFormat::Table {
        print!("{}", serialize(rows, format)?);
    } else if rows.is_empty() {
        println!("{}", "Nothing to show.".dimmed());
    } else {
        println!("{}", render_table(rows));
    }
    Ok(())
}

pub fn print_item<T: Serialize>(item: &T, format: OutputFormat) -> Result<()> {
    print!("{}", serialize(item, format)?);
    Ok(())
}

pub fn print_detail(key: &str, value: &str) {
    println!("  {:<14} {}", format!("{}:", key).cyan(), value);
}

pub fn print_header(title: &str) {
    println!("\n{}\n", title.bold().underline());
}

/// Job statuses and control states share one palette.
pub fn colored_status(status: &str) -> String {
    let painted = match status {
        "succeeded" | "running" => status.green(),
        "failed" => status.red(),
        "cancelled" | "paused" => status.yellow(),
        "retrying" => status.magenta(),
        _ => status.normal(),
    };
    painted.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Tabled, Serialize)]
    struct Row {
        file: &'static str,
        status: &'static str,
    }

    #[test]
    fn test_serialize_formats() {
        let row = Row {
            file: "a.cbl",
            status: "succeeded",
        };

        let json = serialize(&row, OutputFormat::Json).unwrap();
        assert!(json.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["file"], "a.cbl");

        let yaml = serialize(&row, OutputFormat::Yaml).unwrap();
        assert!(yaml.contains("status: succeeded"));
    }

    #[test]
    fn test_table_has_headers_and_rows() {
        let table = render_table(&[
            Row {
                file: "a.cbl",
                status: "failed",
            },
            Row {
                file: "b.cbl",
                status: "succeeded",
            },
        ]);
        assert!(table.contains("file"));
        assert!(table.contains("b.cbl"));
    }

    #[test]
    fn test_unknown_status_is_uncolored() {
        colored::control::set_override(false);
        assert_eq!(colored_status("mystery"), "mystery");
        assert_eq!(colored_status("failed"), "failed");
    }
}
