//! Harvest loop
//!
//! Collects one record per tick and hands every ready batch to the
//! submission guard as a data-update transaction. In harvest-frequency
//! mode the loop checks the frequency mailbox before each harvest and
//! restarts its ticker when a new period is pending.

use super::{Ticker, HARVEST_STOP_SLACK};
use crate::config::{secs, ElasticityMode};
use crate::guard::{AttemptOutcome, PendingSubmission, RetryKey, SubmissionGuard};
use crate::instance::{Instance, Stamp};
use crate::models::UpdateDataRequest;
use crate::source::DataSource;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct HarvestScheduler {
    instance: Arc<Instance>,
    source: Arc<dyn DataSource>,
    guard: SubmissionGuard,
}

impl HarvestScheduler {
    pub fn new(instance: Arc<Instance>, source: Arc<dyn DataSource>) -> Self {
        let guard = SubmissionGuard::new(instance.clone());
        Self {
            instance,
            source,
            guard,
        }
    }

    /// Run until the execution deadline or shutdown
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let config = self.instance.config();
        let adaptive = config.elasticity_mode == ElasticityMode::HarvestFrequency;
        let deadline = self.instance.started_at() + config.execution_time() + HARVEST_STOP_SLACK;
        let stop = tokio::time::sleep_until(deadline);
        tokio::pin!(stop);

        tokio::select! {
            _ = tokio::time::sleep(config.harvest_start_delay()) => {}
            _ = &mut stop => return self.finish(),
            _ = shutdown.recv() => return,
        }

        let period = {
            let mut state = self.instance.state().await;
            if adaptive {
                state.mailbox.clear();
            }
            secs(state.harvest_frequency)
        };

        info!(
            esc = %self.instance.key(),
            period_ms = period.as_millis() as u64,
            adaptive,
            "Starting harvest loop"
        );

        let mut ticker = Ticker::new(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if adaptive {
                        let pending = self.instance.state().await.mailbox.take();
                        if let Some(frequency) = pending {
                            debug!(
                                esc = %self.instance.key(),
                                frequency,
                                "Restarting harvest loop at new frequency"
                            );
                            ticker.reschedule(secs(frequency));
                            continue;
                        }
                    }
                    self.harvest_tick().await;
                }
                _ = &mut stop => {
                    self.finish();
                    break;
                }
                _ = shutdown.recv() => {
                    info!(esc = %self.instance.key(), "Shutting down harvest loop");
                    break;
                }
            }
        }
    }

    fn finish(&self) {
        self.instance
            .logger()
            .log_completed("execution time elapsed");
    }

    /// Collect one record and hand the batch off once it is large enough
    ///
    /// Returns the retry task of the handed-off submission, if any.
    pub async fn harvest_tick(&self) -> Option<JoinHandle<AttemptOutcome>> {
        let record = match self.source.collect().await {
            Ok(record) => record,
            Err(e) => {
                warn!(esc = %self.instance.key(), error = %e, "Data source failed, skipping harvest");
                return None;
            }
        };

        let config = self.instance.config();
        let submission = {
            let mut state = self.instance.state().await;
            state.harvest_batch.push(record);
            if state.harvest_batch.len() < config.min_batch_size {
                return None;
            }

            let batch = std::mem::take(&mut state.harvest_batch);
            let collector_request_time = batch.last().and_then(|r| r.collector_request_time);
            let payloads: Vec<Value> = batch.into_iter().map(|r| r.payload).collect();

            let update_id = state.next_update_id;
            state.next_update_id += 1;
            state.update_started.insert(update_id, Stamp::now());

            let request = UpdateDataRequest {
                data: Value::Array(payloads).to_string(),
                time_data: state.data_time_limit,
                frequency: state.harvest_frequency,
                data_per_harvest: config.data_per_harvest,
                collector_request_time,
                update_data_id: update_id,
                extra: Map::new(),
            };

            match serde_json::to_string(&request) {
                Ok(payload) => PendingSubmission {
                    contract: config.contracts.update_data.clone(),
                    payload,
                    key: RetryKey::Harvest(update_id),
                },
                Err(e) => {
                    warn!(esc = %self.instance.key(), error = %e, "Failed to encode update request");
                    return None;
                }
            }
        };

        debug!(
            esc = %self.instance.key(),
            update_id = submission.key.id(),
            "Handing data batch to submission guard"
        );
        let guard = self.guard.clone();
        Some(tokio::spawn(async move {
            guard.submit_with_retry(submission).await
        }))
    }
}
