//! Result file summary command

use anyhow::{Context, Result};
use colored::Colorize;
use esc_core::ExperimentSummary;
use std::path::Path;
use tabled::Tabled;

use crate::output::{color_failures, format_seconds, print_info, OutputFormat};

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "Metric")]
    metric: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn summary_rows(summary: &ExperimentSummary) -> Vec<SummaryRow> {
    let row = |metric, value: String| SummaryRow { metric, value };
    vec![
        row("Analysis frequency", format!("{}s", summary.frequency)),
        row("Time window", summary.time_data.to_string()),
        row("Successful calculations", summary.successful_calculations.to_string()),
        row("Calculations over max", color_failures(summary.calculations_over_max)),
        row("Min time", format_seconds(summary.min_time)),
        row("Max time", format_seconds(summary.max_time)),
        row("Avg time", format_seconds(summary.avg_time)),
        row("Std time", format_seconds(summary.std_time)),
    ]
}

/// Summarize a calculations CSV
pub async fn show_results(file: &Path, format: OutputFormat) -> Result<()> {
    let contents = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let summary = ExperimentSummary::from_calculations_csv(&contents)
        .with_context(|| format!("Malformed calculations file {}", file.display()))?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&summary)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{}", "Experiment Summary".bold());
            println!("{}", "=".repeat(60));
            println!("File: {}", file.display().to_string().cyan());
            println!();

            if summary.successful_calculations == 0 {
                print_info("No completed analyses recorded");
                return Ok(());
            }

            let table = tabled::Table::new(summary_rows(&summary))
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }

    Ok(())
}
