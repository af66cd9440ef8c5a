//! Result file layout and row formatting

use crate::models::{AnalysisEvent, UpdateDataEvent};
use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

pub const CALCULATIONS_HEADER: &str = "NUMBER_DETECTIONS,TOTAL_TIME,FREQUENCY,TIME_DATA,FREQUENCY_DATA,DETECTIONS_STORED,FROM_DATE,TO_DATE,MINIMUM_TIME,MAXIMUM_TIME,CARS_PER_SECOND_BY_SENSOR,CARS_PER_SECOND_TOTAL";
pub const HARVEST_HEADER: &str =
    "INIT_TIME,FINAL_TIME,TOTAL_TIME,INIT_UPDATE_TIME,FINAL_UPDATE_TIME,TOTAL_UPDATE_TIME,COLLECTOR_TIME";
pub const EXPERIMENT_HEADER: &str = "FREQUENCY,TIME_DATA,MIN_TIME,MAX_TIME,AVG_TIME,STD_TIME,SUCCESFUL_CALCULATIONS,CALCULATIONS_OVER_MAX";

/// Result files of one run
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPaths {
    pub calculations: PathBuf,
    pub harvest: PathBuf,
    pub experiment: PathBuf,
}

impl ResultPaths {
    /// `{dir}/{experiment}_{M_D_YYYY}.csv` and its `_harvest` / `_experiment` siblings
    pub fn new(dir: &Path, experiment: &str, date_tag: &str) -> Self {
        let stem = format!("{}_{}", experiment, date_tag);
        Self {
            calculations: dir.join(format!("{}.csv", stem)),
            harvest: dir.join(format!("{}_harvest.csv", stem)),
            experiment: dir.join(format!("{}_experiment.csv", stem)),
        }
    }
}

/// Date component of result file names, e.g. `3_7_2024`
pub fn date_tag<Tz: TimeZone>(date: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    date.format("%-m_%-d_%Y").to_string()
}

/// Contents of an existing result file, or a fresh buffer holding `header`
///
/// Unreadable and empty files count as absent.
pub async fn load_or_header(path: &Path, header: &str) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(existing) if !existing.trim().is_empty() => {
            let mut buffer = existing;
            if !buffer.ends_with('\n') {
                buffer.push('\n');
            }
            buffer
        }
        _ => format!("{}\n", header),
    }
}

/// Write `contents` to `path`, creating the parent directory first
pub async fn write_file(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, contents).await
}

/// Instance-side values joined to each analysis row
#[derive(Debug, Clone, Copy)]
pub struct CalculationContext {
    /// Seconds from admission to completion event
    pub round_trip_secs: f64,
    pub analysis_frequency: f64,
    pub minimum_time: f64,
    pub maximum_time: f64,
    pub configured_instances: usize,
    pub analysis_fail_count: u32,
    pub harvest_fail_count: u32,
    pub analysis_started_ms: i64,
    pub written_ms: i64,
}

/// One calculations row per entry of the event's analysis list
pub fn calculation_rows(event: &AnalysisEvent, ctx: &CalculationContext) -> Vec<String> {
    (0..event.analysis_list.len())
        .map(|j| {
            let from_date = event.from_dates.get(j).copied().unwrap_or_default();
            let mut row = format!(
                "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
                event.analysis_list[j] + 1.0,
                ctx.round_trip_secs,
                event.exec_duration / 1000.0,
                ctx.analysis_frequency,
                event.time_data,
                event.frequency_data,
                event
                    .total_data_stored_list
                    .get(j)
                    .copied()
                    .unwrap_or_default(),
                from_date,
                from_date - 1000.0 * event.time_data,
                ctx.minimum_time,
                ctx.maximum_time,
                ctx.configured_instances,
                ctx.analysis_fail_count,
                ctx.harvest_fail_count,
                ctx.analysis_started_ms,
                ctx.written_ms,
            );
            for info in &event.info {
                let _ = write!(row, ",{}", info.get(j).map(cell).unwrap_or_default());
            }
            row
        })
        .collect()
}

/// Harvest row for a completed data update
pub fn harvest_row(started_ms: i64, completed_ms: i64, event: &UpdateDataEvent) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        started_ms,
        completed_ms,
        completed_ms - started_ms,
        event.init_time,
        event.end_time,
        event.total_time,
        event
            .collector_request_time
            .map(|t| t.to_string())
            .unwrap_or_default(),
    )
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Per-run statistics over analysis round-trip times
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub frequency: f64,
    pub time_data: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub avg_time: f64,
    pub std_time: f64,
    pub successful_calculations: usize,
    pub calculations_over_max: usize,
}

impl ExperimentSummary {
    /// Summarize positive round-trip times (seconds)
    pub fn from_times(
        frequency: f64,
        time_data: f64,
        times: &[f64],
        calculations_over_max: usize,
    ) -> Self {
        let times: Vec<f64> = times.iter().copied().filter(|t| *t > 0.0).collect();
        let count = times.len();
        let (min_time, max_time, avg_time, std_time) = if count == 0 {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            let min = times.iter().copied().fold(f64::INFINITY, f64::min);
            let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let avg = times.iter().sum::<f64>() / count as f64;
            let variance = times.iter().map(|t| (t - avg).powi(2)).sum::<f64>() / count as f64;
            (min, max, avg, variance.sqrt())
        };

        Self {
            frequency,
            time_data,
            min_time,
            max_time,
            avg_time,
            std_time,
            successful_calculations: count,
            calculations_over_max,
        }
    }

    /// Rebuild a summary from a calculations file
    ///
    /// Rows are deduplicated by analysis start timestamp since one analysis
    /// produces a row per analysed entry. Over-max uses the chaincode
    /// execution column against the row's maximum bound.
    pub fn from_calculations_csv(contents: &str) -> Result<Self, CsvError> {
        let mut times = Vec::new();
        let mut over_max = 0;
        let mut seen = std::collections::HashSet::new();
        let mut frequency = 0.0;
        let mut time_data = 0.0;

        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("NUMBER_DETECTIONS") {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 16 {
                return Err(CsvError::ShortRow { line: index + 1 });
            }
            let number = |column: usize| -> Result<f64, CsvError> {
                fields[column]
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| CsvError::BadNumber {
                        line: index + 1,
                        column,
                    })
            };

            if !seen.insert(fields[14].trim().to_string()) {
                continue;
            }
            times.push(number(1)?);
            frequency = number(3)?;
            time_data = number(4)?;
            if number(2)? * 1000.0 > number(10)? {
                over_max += 1;
            }
        }

        Ok(Self::from_times(frequency, time_data, &times, over_max))
    }

    pub fn to_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            self.frequency,
            self.time_data,
            self.min_time,
            self.max_time,
            self.avg_time,
            self.std_time,
            self.successful_calculations,
            self.calculations_over_max
        )
    }
}

/// Malformed calculations file
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CsvError {
    #[error("line {line}: expected at least 16 columns")]
    ShortRow { line: usize },

    #[error("line {line}: column {column} is not a number")]
    BadNumber { line: usize, column: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    fn context() -> CalculationContext {
        CalculationContext {
            round_trip_secs: 1.5,
            analysis_frequency: 5.0,
            minimum_time: 50.0,
            maximum_time: 100.0,
            configured_instances: 1,
            analysis_fail_count: 2,
            harvest_fail_count: 0,
            analysis_started_ms: 1_000,
            written_ms: 2_500,
        }
    }

    #[test]
    fn test_result_paths() {
        let paths = ResultPaths::new(Path::new("./results"), "traffic", "3_7_2024");
        assert_eq!(paths.calculations, PathBuf::from("./results/traffic_3_7_2024.csv"));
        assert_eq!(paths.harvest, PathBuf::from("./results/traffic_3_7_2024_harvest.csv"));
        assert_eq!(
            paths.experiment,
            PathBuf::from("./results/traffic_3_7_2024_experiment.csv")
        );
    }

    #[test]
    fn test_date_tag_has_no_padding() {
        let date = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(date_tag(&date), "3_7_2024");
    }

    #[test]
    fn test_calculation_row_layout() {
        let event = AnalysisEvent {
            exec_duration: 120.0,
            time_data: 30.0,
            frequency_data: 1.0,
            analysis_list: vec![0.0, 1.0],
            total_data_stored_list: vec![10.0, 11.0],
            from_dates: vec![100_000.0, 200_000.0],
            info: vec![vec![json!("4"), json!("4")], vec![json!(0.5), json!(0.75)]],
            ..Default::default()
        };

        let rows = calculation_rows(&event, &context());
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            "1,1.5,0.12,5,30,1,10,100000,70000,50,100,1,2,0,1000,2500,4,0.5"
        );
        assert!(rows[1].starts_with("2,1.5,0.12,5,30,1,11,200000,170000,"));
        assert!(rows[1].ends_with(",4,0.75"));
    }

    #[test]
    fn test_harvest_row_layout() {
        let event = UpdateDataEvent {
            update_data_id: 0,
            init_time: 10.0,
            end_time: 14.0,
            total_time: 4.0,
            collector_request_time: Some(2.5),
        };
        assert_eq!(harvest_row(1_000, 1_250, &event), "1000,1250,250,10,14,4,2.5");

        let event = UpdateDataEvent {
            collector_request_time: None,
            ..event
        };
        assert!(harvest_row(0, 1, &event).ends_with(",4,"));
    }

    #[tokio::test]
    async fn test_header_written_once_across_runs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/traffic.csv");

        let mut first = load_or_header(&path, HARVEST_HEADER).await;
        first.push_str("1,2,1,0,0,0,\n");
        write_file(&path, &first).await.unwrap();

        let mut second = load_or_header(&path, HARVEST_HEADER).await;
        second.push_str("3,4,1,0,0,0,\n");
        write_file(&path, &second).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("INIT_TIME").count(), 1);
        assert_eq!(contents.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_empty_file_gets_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.csv");
        std::fs::write(&path, "").unwrap();

        let buffer = load_or_header(&path, EXPERIMENT_HEADER).await;
        assert_eq!(buffer, format!("{}\n", EXPERIMENT_HEADER));
    }

    #[test]
    fn test_summary_statistics() {
        let summary = ExperimentSummary::from_times(5.0, 30.0, &[2.0, 4.0, 0.0, 6.0], 1);
        assert_eq!(summary.successful_calculations, 3);
        assert_eq!(summary.min_time, 2.0);
        assert_eq!(summary.max_time, 6.0);
        assert_eq!(summary.avg_time, 4.0);
        assert!((summary.std_time - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(summary.to_row(), format!("5,30,2,6,4,{},3,1", summary.std_time));
    }

    #[test]
    fn test_summary_from_calculations_file() {
        let contents = format!(
            "{}\n{}\n{}\n{}\n",
            CALCULATIONS_HEADER,
            "1,2,0.15,5,30,1,10,0,0,50,100,1,0,0,1000,2000,x",
            "2,2,0.15,5,30,1,10,0,0,50,100,1,0,0,1000,2000,y",
            "1,4,0.05,5,30,1,10,0,0,50,100,1,0,0,3000,7000,z",
        );

        let summary = ExperimentSummary::from_calculations_csv(&contents).unwrap();
        assert_eq!(summary.successful_calculations, 2);
        assert_eq!(summary.avg_time, 3.0);
        assert_eq!(summary.calculations_over_max, 1);
        assert_eq!(summary.frequency, 5.0);
    }

    #[test]
    fn test_summary_rejects_short_rows() {
        let contents = format!("{}\n1,2,3\n", CALCULATIONS_HEADER);
        assert_eq!(
            ExperimentSummary::from_calculations_csv(&contents),
            Err(CsvError::ShortRow { line: 2 })
        );
    }
}
