//! Agent status command

use anyhow::Result;
use colored::Colorize;
use esc_core::InstanceSnapshot;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_failures, color_in_flight, format_seconds, format_uptime, print_warning, OutputFormat,
};

/// Row for the instances table
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "ESC")]
    key: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Harvest Freq")]
    harvest_frequency: String,
    #[tabled(rename = "Time Window")]
    data_time_limit: String,
    #[tabled(rename = "Slot")]
    in_flight: String,
    #[tabled(rename = "Updates")]
    updates: u64,
    #[tabled(rename = "Analyses")]
    analyses: u64,
    #[tabled(rename = "Avg Latency")]
    average_latency: String,
    #[tabled(rename = "Harvest Fails")]
    harvest_failures: String,
    #[tabled(rename = "Uptime")]
    uptime: String,
}

impl From<&InstanceSnapshot> for InstanceRow {
    fn from(s: &InstanceSnapshot) -> Self {
        let harvest_frequency = match s.pending_frequency {
            Some(pending) => format!("{} -> {}", s.harvest_frequency, pending),
            None => s.harvest_frequency.to_string(),
        };
        Self {
            key: s.key.clone(),
            mode: s.elasticity_mode.to_string(),
            harvest_frequency,
            data_time_limit: s.data_time_limit.to_string(),
            in_flight: color_in_flight(s.in_flight),
            updates: s.updates_issued,
            analyses: s.analyses_issued,
            average_latency: s
                .average_latency_secs
                .map(format_seconds)
                .unwrap_or_else(|| "-".to_string()),
            harvest_failures: color_failures(s.harvest_fail_count as usize),
            uptime: format_uptime(s.uptime_secs),
        }
    }
}

/// Show the instances running on an agent
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&status)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{} {}", "ESC Agent".bold(), status.version.cyan());
            println!();

            if status.instances.is_empty() {
                print_warning("No ESC instances running");
                return Ok(());
            }

            let rows: Vec<InstanceRow> = status.instances.iter().map(InstanceRow::from).collect();
            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} instances", status.instances.len());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use esc_core::ElasticityMode;

    #[test]
    fn test_row_shows_pending_frequency() {
        let snapshot = InstanceSnapshot {
            key: "traffic".to_string(),
            elasticity_mode: ElasticityMode::HarvestFrequency,
            harvest_frequency: 1.0,
            data_time_limit: 30.0,
            in_flight: false,
            pending_frequency: Some(10.0),
            updates_issued: 12,
            analyses_issued: 2,
            latencies_recorded: 0,
            average_latency_secs: None,
            harvest_fail_count: 0,
            uptime_secs: 12,
        };

        let row = InstanceRow::from(&snapshot);

        assert_eq!(row.mode, "harvestFrequency");
        assert_eq!(row.harvest_frequency, "1 -> 10");
        assert_eq!(row.average_latency, "-");
        assert_eq!(row.uptime, "12s");
    }
}
