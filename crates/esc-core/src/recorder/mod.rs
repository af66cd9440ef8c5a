//! Result recorder
//!
//! Turns analysis and data-update completions into CSV rows and writes the
//! result files once the run is over. Buffers start from any same-day file
//! left by an earlier run, so a day's results accumulate in one file.

mod csv;

pub use csv::{
    calculation_rows, date_tag, harvest_row, load_or_header, write_file, CalculationContext,
    CsvError, ExperimentSummary, ResultPaths, CALCULATIONS_HEADER, EXPERIMENT_HEADER,
    HARVEST_HEADER,
};

use crate::health::components;
use crate::instance::{Instance, Listener};
use crate::ledger::EventSubscription;
use crate::models::{AnalysisEvent, LedgerEvent, UpdateDataEvent};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Result files are written this long after the execution time
pub const RESULTS_FLUSH_DELAY: Duration = Duration::from_secs(10);

pub struct ResultRecorder {
    instance: Arc<Instance>,
    paths: ResultPaths,
    calculations: String,
    harvest: String,
    experiment: String,
    calculations_over_max: usize,
    /// Positive analysis round-trip times, seconds
    exec_times: Vec<f64>,
    rows_written: usize,
}

impl ResultRecorder {
    /// Prepare the buffers for today's result files
    pub async fn open(instance: Arc<Instance>) -> Self {
        let config = instance.config();
        let paths = ResultPaths::new(
            &config.results_path,
            &config.experiment_name,
            &date_tag(&chrono::Local::now()),
        );

        let calculations = load_or_header(&paths.calculations, CALCULATIONS_HEADER).await;
        let harvest = load_or_header(&paths.harvest, HARVEST_HEADER).await;
        let experiment = load_or_header(&paths.experiment, EXPERIMENT_HEADER).await;

        Self {
            instance,
            paths,
            calculations,
            harvest,
            experiment,
            calculations_over_max: 0,
            exec_times: Vec::new(),
            rows_written: 0,
        }
    }

    pub fn paths(&self) -> &ResultPaths {
        &self.paths
    }

    /// Record events until the flush deadline or shutdown, then write the files
    pub async fn run(mut self, mut events: EventSubscription, mut shutdown: broadcast::Receiver<()>) {
        let flush_at =
            self.instance.started_at() + self.instance.config().execution_time() + RESULTS_FLUSH_DELAY;
        let flush = tokio::time::sleep_until(flush_at);
        tokio::pin!(flush);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(LedgerEvent::Analysis(analysis)) => {
                        self.on_analysis(&analysis).await;
                    }
                    Some(LedgerEvent::UpdateData(update)) => {
                        self.on_update(&update).await;
                    }
                    Some(LedgerEvent::Other) => {}
                    None => break,
                },
                _ = &mut flush => break,
                _ = shutdown.recv() => break,
            }
        }
        events.unsubscribe();

        let recorder = components::for_instance(self.instance.key(), components::RECORDER);
        match self.flush().await {
            Ok(()) => self.instance.health().set_healthy(&recorder).await,
            Err(e) => {
                error!(esc = %self.instance.key(), error = %e, "Failed to write result files");
                self.instance
                    .health()
                    .set_unhealthy(&recorder, e.to_string())
                    .await;
            }
        }
    }

    /// Append calculation rows for an analysis completion
    ///
    /// Returns the number of rows added; duplicates and unknown ids add none.
    pub async fn on_analysis(&mut self, event: &AnalysisEvent) -> usize {
        let Some(analysis_id) = event.analysis_id() else {
            return 0;
        };

        let instance = &self.instance;
        let config = instance.config();
        let ctx = {
            let mut state = instance.state().await;
            let Some(started) = state.analysis_started.get(&analysis_id).copied() else {
                debug!(esc = %instance.key(), analysis_id, "Completion for unknown analysis");
                return 0;
            };
            let ctx = CalculationContext {
                round_trip_secs: started.elapsed_secs(),
                analysis_frequency: config.analysis_frequency,
                minimum_time: config.minimum_time_analysis,
                maximum_time: config.maximum_time_analysis,
                configured_instances: instance.configured_instances(),
                analysis_fail_count: state
                    .analysis_retries
                    .get(&analysis_id)
                    .copied()
                    .unwrap_or(0),
                harvest_fail_count: state.harvest_fail_count,
                analysis_started_ms: started.wall_ms,
                written_ms: chrono::Utc::now().timestamp_millis(),
            };
            if !state.consume_analysis(analysis_id, Listener::Recorder) {
                return 0;
            }
            ctx
        };

        info!(
            esc = %instance.key(),
            analysis_id,
            exec_duration_ms = event.exec_duration,
            "An analysis has been executed"
        );
        if event.exec_duration > config.maximum_time_analysis {
            self.calculations_over_max += 1;
        }
        if ctx.round_trip_secs > 0.0 {
            self.exec_times.push(ctx.round_trip_secs);
        }

        let rows = calculation_rows(event, &ctx);
        for row in &rows {
            self.calculations.push_str(row);
            self.calculations.push('\n');
            instance.metrics().inc_result_row(instance.key(), "calculations");
        }
        self.rows_written += rows.len();
        rows.len()
    }

    /// Append a harvest row for a data-update completion
    pub async fn on_update(&mut self, event: &UpdateDataEvent) -> bool {
        let id = event.update_data_id;
        let started_ms = match self.instance.state().await.update_started.remove(&id) {
            Some(stamp) => stamp.wall_ms,
            None => return false,
        };

        let row = harvest_row(started_ms, chrono::Utc::now().timestamp_millis(), event);
        self.harvest.push_str(&row);
        self.harvest.push('\n');
        self.rows_written += 1;
        self.instance
            .metrics()
            .inc_result_row(self.instance.key(), "harvest");
        true
    }

    /// Summary row for the experiment file
    pub async fn summary(&self) -> ExperimentSummary {
        let time_data = self.instance.state().await.data_time_limit;
        ExperimentSummary::from_times(
            self.instance.config().analysis_frequency,
            time_data,
            &self.exec_times,
            self.calculations_over_max,
        )
    }

    /// Write all result files, replacing earlier contents
    pub async fn flush(&self) -> io::Result<()> {
        write_file(&self.paths.calculations, &self.calculations).await?;
        write_file(&self.paths.harvest, &self.harvest).await?;

        let mut experiment = self.experiment.clone();
        experiment.push_str(&self.summary().await.to_row());
        experiment.push('\n');
        write_file(&self.paths.experiment, &experiment).await?;

        self.instance
            .logger()
            .log_results_flushed(&self.paths.calculations, self.rows_written);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EscConfig;
    use crate::instance::{InstanceContext, Stamp};
    use crate::ledger::{Ledger, SimulatedLedger};
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (SimulatedLedger, Arc<Instance>) {
        let config = EscConfig {
            chaincode_name: "recorder-test".to_string(),
            results_path: dir.path().join("results"),
            experiment_name: "traffic".to_string(),
            execution_time: 5.0,
            maximum_time_analysis: 100.0,
            ..Default::default()
        };
        let ledger = SimulatedLedger::new();
        let instance = Arc::new(Instance::new(
            config,
            Arc::new(ledger.clone()),
            InstanceContext::default(),
        ));
        (ledger, instance)
    }

    fn analysis(id: u64, exec_duration: f64) -> AnalysisEvent {
        AnalysisEvent {
            exec_duration,
            time_data: 30.0,
            frequency_data: 1.0,
            analysis_list: vec![0.0, 1.0],
            total_data_stored_list: vec![5.0, 6.0],
            from_dates: vec![50_000.0, 60_000.0],
            info: vec![vec![json!(id.to_string()), json!(id.to_string())]],
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_analysis_rows_once_per_id() {
        let dir = TempDir::new().unwrap();
        let (_ledger, instance) = setup(&dir);
        instance
            .state()
            .await
            .analysis_started
            .insert(0, Stamp::now());
        let mut recorder = ResultRecorder::open(instance.clone()).await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(recorder.on_analysis(&analysis(0, 150.0)).await, 2);
        assert_eq!(recorder.on_analysis(&analysis(0, 150.0)).await, 0);
        assert_eq!(recorder.on_analysis(&analysis(8, 10.0)).await, 0);

        let summary = recorder.summary().await;
        assert_eq!(summary.successful_calculations, 1);
        assert_eq!(summary.calculations_over_max, 1);
        assert_eq!(summary.avg_time, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_rows_once_per_id() {
        let dir = TempDir::new().unwrap();
        let (_ledger, instance) = setup(&dir);
        instance.state().await.update_started.insert(3, Stamp::now());
        let mut recorder = ResultRecorder::open(instance.clone()).await;

        let event = UpdateDataEvent {
            update_data_id: 3,
            init_time: 1.0,
            end_time: 2.0,
            total_time: 1.0,
            collector_request_time: Some(0.5),
        };
        assert!(recorder.on_update(&event).await);
        assert!(!recorder.on_update(&event).await);
        assert!(!recorder
            .on_update(&UpdateDataEvent {
                update_data_id: 4,
                ..event
            })
            .await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_three_files() {
        let dir = TempDir::new().unwrap();
        let (_ledger, instance) = setup(&dir);
        instance
            .state()
            .await
            .analysis_started
            .insert(0, Stamp::now());
        let mut recorder = ResultRecorder::open(instance.clone()).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        recorder.on_analysis(&analysis(0, 20.0)).await;

        recorder.flush().await.unwrap();

        let paths = recorder.paths().clone();
        let calculations = std::fs::read_to_string(&paths.calculations).unwrap();
        assert!(calculations.starts_with(CALCULATIONS_HEADER));
        assert_eq!(calculations.lines().count(), 3);
        let harvest = std::fs::read_to_string(&paths.harvest).unwrap();
        assert_eq!(harvest.trim(), HARVEST_HEADER);
        let experiment = std::fs::read_to_string(&paths.experiment).unwrap();
        assert_eq!(experiment.lines().nth(1), Some("5,30,1,1,1,0,1,0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_same_day_appends() {
        let dir = TempDir::new().unwrap();
        for _ in 0..2 {
            let (_ledger, instance) = setup(&dir);
            instance
                .state()
                .await
                .analysis_started
                .insert(0, Stamp::now());
            let mut recorder = ResultRecorder::open(instance.clone()).await;
            recorder.on_analysis(&analysis(0, 20.0)).await;
            recorder.flush().await.unwrap();
        }

        let (_ledger, instance) = setup(&dir);
        let recorder = ResultRecorder::open(instance).await;
        let calculations = std::fs::read_to_string(&recorder.paths().calculations).unwrap();
        assert_eq!(calculations.matches("NUMBER_DETECTIONS").count(), 1);
        assert_eq!(calculations.lines().count(), 5);
        let experiment = std::fs::read_to_string(&recorder.paths().experiment).unwrap();
        assert_eq!(experiment.matches("FREQUENCY").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_flushes_after_delay() {
        let dir = TempDir::new().unwrap();
        let (ledger, instance) = setup(&dir);
        instance.state().await.update_started.insert(0, Stamp::now());
        let recorder = ResultRecorder::open(instance.clone()).await;
        let paths = recorder.paths().clone();
        let (_tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(recorder.run(ledger.subscribe(), rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        ledger.emit(&LedgerEvent::UpdateData(UpdateDataEvent {
            update_data_id: 0,
            ..Default::default()
        }));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!paths.harvest.exists());

        task.await.unwrap();
        let harvest = std::fs::read_to_string(&paths.harvest).unwrap();
        assert_eq!(harvest.lines().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_row_reports_attempts_before_admission() {
        let dir = TempDir::new().unwrap();
        let (_ledger, instance) = setup(&dir);
        {
            let mut state = instance.state().await;
            state.analysis_started.insert(0, Stamp::now());
            state.analysis_retries.insert(0, 3);
        }
        let mut recorder = ResultRecorder::open(instance.clone()).await;

        recorder.on_analysis(&analysis(0, 20.0)).await;

        let row = recorder.calculations.lines().nth(1).unwrap();
        assert_eq!(row.split(',').nth(12), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumed_entries_are_released() {
        let dir = TempDir::new().unwrap();
        let (_ledger, instance) = setup(&dir);
        {
            let mut state = instance.state().await;
            state.analysis_started.insert(1, Stamp::now());
            state.update_started.insert(1, Stamp::now());
            assert!(state.consume_analysis(1, Listener::Evaluator));
        }
        let mut recorder = ResultRecorder::open(instance.clone()).await;

        assert_eq!(recorder.on_analysis(&analysis(1, 20.0)).await, 2);
        assert!(recorder
            .on_update(&UpdateDataEvent {
                update_data_id: 1,
                ..Default::default()
            })
            .await);

        let state = instance.state().await;
        assert_eq!(state.pending_analyses(), 0);
        assert!(state.update_started.is_empty());
    }
}
