//! Analysis loop
//!
//! After the start delay, triggers one analysis transaction per tick
//! covering the window dates accumulated since the previous analysis.

use super::{Ticker, ANALYSIS_STOP_SLACK};
use crate::config::ElasticityMode;
use crate::guard::{AttemptOutcome, PendingSubmission, RetryKey, SubmissionGuard};
use crate::instance::{Instance, Stamp};
use crate::models::AnalysisRequest;
use serde_json::Map;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct AnalysisScheduler {
    instance: Arc<Instance>,
    guard: SubmissionGuard,
}

impl AnalysisScheduler {
    pub fn new(instance: Arc<Instance>) -> Self {
        let guard = SubmissionGuard::new(instance.clone());
        Self { instance, guard }
    }

    /// Run until the execution time has elapsed past the loop's own start
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let config = self.instance.config();

        tokio::select! {
            _ = tokio::time::sleep(config.analysis_start_delay()) => {}
            _ = shutdown.recv() => return,
        }

        let stop = tokio::time::sleep_until(
            Instant::now() + config.execution_time() + ANALYSIS_STOP_SLACK,
        );
        tokio::pin!(stop);

        info!(
            esc = %self.instance.key(),
            period_ms = config.analysis_period().as_millis() as u64,
            "Starting analysis loop"
        );

        let mut ticker = Ticker::new(config.analysis_period());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.analysis_tick().await;
                    if config.elasticity_mode == ElasticityMode::HarvestFrequency {
                        ticker.reschedule(config.analysis_period());
                    }
                }
                _ = &mut stop => {
                    debug!(esc = %self.instance.key(), "Analysis loop reached its deadline");
                    break;
                }
                _ = shutdown.recv() => {
                    info!(esc = %self.instance.key(), "Shutting down analysis loop");
                    break;
                }
            }
        }
    }

    /// Launch one analysis
    ///
    /// Returns the retry task of the handed-off submission, or `None` when
    /// the analysis-holder query failed and the tick was skipped.
    pub async fn analysis_tick(&self) -> Option<JoinHandle<AttemptOutcome>> {
        let config = self.instance.config();

        let (analysis_id, from_dates, time_data, frequency) = {
            let mut state = self.instance.state().await;
            state
                .calculation_window_dates
                .push(chrono::Utc::now().timestamp_millis());

            let analysis_id = state.next_analysis_id;
            state.next_analysis_id += 1;
            state.analysis_started.insert(analysis_id, Stamp::now());
            state.analysis_fail_count.insert(analysis_id, 0);

            let from_dates = std::mem::take(&mut state.calculation_window_dates);
            (
                analysis_id,
                from_dates,
                state.data_time_limit,
                state.harvest_frequency,
            )
        };

        info!(
            esc = %self.instance.key(),
            analysis_id,
            "Launching analysis transaction"
        );

        let holder = match self
            .instance
            .ledger()
            .evaluate_transaction(
                &config.contracts.query_analysis_holder,
                std::slice::from_ref(&config.analysis_holder_id),
            )
            .await
        {
            Ok(raw) => String::from_utf8_lossy(&raw).into_owned(),
            Err(e) => {
                warn!(
                    esc = %self.instance.key(),
                    analysis_id,
                    error = %e,
                    "Analysis holder query failed, skipping analysis"
                );
                return None;
            }
        };

        let request = AnalysisRequest {
            time_data,
            from_dates: serde_json::to_string(&from_dates).unwrap_or_else(|_| "[]".to_string()),
            frequency,
            analysis_holder: holder,
            analysis_id: analysis_id.to_string(),
            extra: Map::new(),
        };
        let payload = match serde_json::to_string(&request) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(esc = %self.instance.key(), error = %e, "Failed to encode analysis request");
                return None;
            }
        };

        let submission = PendingSubmission {
            contract: config.contracts.analysis.clone(),
            payload,
            key: RetryKey::Analysis(analysis_id),
        };
        let guard = self.guard.clone();
        Some(tokio::spawn(async move {
            guard.submit_with_retry(submission).await
        }))
    }
}
