//! Elasticity evaluator
//!
//! Listens for analysis completions, records each analysis latency once,
//! and every `frequencyControlCalculate` completions asks the evaluation
//! contract for a new time-window or harvest frequency. The proposal is
//! clamped and applied only when it passes the mode guard.

use crate::config::ElasticityMode;
use crate::health::components;
use crate::instance::{Instance, Listener};
use crate::ledger::EventSubscription;
use crate::models::{AnalysisEvent, LedgerEvent};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Listener stops this long after the execution time
pub const EVALUATOR_STOP_SLACK: Duration = Duration::from_millis(100);

pub const TIME_WINDOW_BOUNDS: (f64, f64) = (1.0, 65536.0);
pub const HARVEST_FREQUENCY_BOUNDS: (f64, f64) = (5.0, 60.0);

pub fn clamp_time_window(proposed: f64) -> f64 {
    proposed.clamp(TIME_WINDOW_BOUNDS.0, TIME_WINDOW_BOUNDS.1)
}

pub fn clamp_harvest_frequency(proposed: f64) -> f64 {
    proposed.clamp(HARVEST_FREQUENCY_BOUNDS.0, HARVEST_FREQUENCY_BOUNDS.1)
}

/// A clamped window is applied when it changes the value and exceeds the
/// current harvest frequency.
///
/// The comparison mixes a window with a period; it is kept as is.
pub fn accept_time_window(clamped: f64, current: f64, harvest_frequency: f64) -> bool {
    clamped != current && clamped > harvest_frequency
}

/// A clamped frequency is applied when it changes the value and is not
/// below the analysis frequency.
pub fn accept_harvest_frequency(clamped: f64, current: f64, analysis_frequency: f64) -> bool {
    clamped > 0.0 && clamped != current && clamped >= analysis_frequency
}

/// Result of one evaluation cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvaluationOutcome {
    Applied { previous: f64, current: f64 },
    Unchanged { proposed: f64 },
    /// The evaluation contract failed; parameters kept
    Failed,
}

impl EvaluationOutcome {
    fn label(&self) -> &'static str {
        match self {
            EvaluationOutcome::Applied { .. } => "applied",
            EvaluationOutcome::Unchanged { .. } => "unchanged",
            EvaluationOutcome::Failed => "failed",
        }
    }
}

pub struct ElasticityEvaluator {
    instance: Arc<Instance>,
    /// Completions since the last evaluation
    control_count: u32,
    /// Sum of latency / frequencyControlCalculate since the last evaluation
    accumulated: f64,
}

impl ElasticityEvaluator {
    pub fn new(instance: Arc<Instance>) -> Self {
        Self {
            instance,
            control_count: 0,
            accumulated: 0.0,
        }
    }

    /// Consume completion events until the deadline or shutdown
    pub async fn run(mut self, mut events: EventSubscription, mut shutdown: broadcast::Receiver<()>) {
        let deadline = tokio::time::Instant::now()
            + self.instance.config().execution_time()
            + EVALUATOR_STOP_SLACK;
        let stop = tokio::time::sleep_until(deadline);
        tokio::pin!(stop);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(LedgerEvent::Analysis(analysis)) => {
                        self.on_analysis_completed(&analysis).await;
                    }
                    Some(_) => {}
                    None => {
                        warn!(esc = %self.instance.key(), "Ledger event stream closed");
                        break;
                    }
                },
                _ = &mut stop => break,
                _ = shutdown.recv() => break,
            }
        }

        events.unsubscribe();
        debug!(esc = %self.instance.key(), "Elasticity listener removed");
    }

    /// Handle one analysis completion
    ///
    /// Returns the evaluation outcome when this completion closed a cycle.
    /// Duplicate completions and unknown analysis ids are ignored.
    pub async fn on_analysis_completed(&mut self, event: &AnalysisEvent) -> Option<EvaluationOutcome> {
        let analysis_id = event.analysis_id()?;
        let instance = &self.instance;

        let latency = {
            let mut state = instance.state().await;
            let latency = state.analysis_started.get(&analysis_id)?.elapsed_secs();
            if !state.consume_analysis(analysis_id, Listener::Evaluator) {
                debug!(esc = %instance.key(), analysis_id, "Ignoring duplicate analysis completion");
                return None;
            }
            state.latency_history.record(analysis_id, latency);
            latency
        };
        instance
            .metrics()
            .observe_analysis_latency(instance.key(), latency);

        let per_cycle = instance.config().frequency_control_calculate;
        self.accumulated += latency / f64::from(per_cycle);
        self.control_count += 1;
        if self.control_count < per_cycle {
            return None;
        }

        debug!(
            esc = %instance.key(),
            cycle_average = self.accumulated,
            "Evaluating elasticity"
        );
        let outcome = self.evaluate().await;
        self.control_count = 0;
        self.accumulated = 0.0;

        instance
            .metrics()
            .inc_evaluation(instance.key(), outcome.label());
        Some(outcome)
    }

    /// Ask the evaluation contract for a new parameter and apply it
    pub async fn evaluate(&self) -> EvaluationOutcome {
        let instance = &self.instance;
        let config = instance.config();
        let mode = config.elasticity_mode;

        let (current, average) = {
            let state = instance.state().await;
            let Some(average) = state.latency_history.average() else {
                return EvaluationOutcome::Failed;
            };
            let current = match mode {
                ElasticityMode::TimeWindow => state.data_time_limit,
                ElasticityMode::HarvestFrequency => state.harvest_frequency,
            };
            (current, average)
        };

        let contract = match mode {
            ElasticityMode::TimeWindow => &config.contracts.evaluate_time_window,
            ElasticityMode::HarvestFrequency => &config.contracts.evaluate_harvest_frequency,
        };
        let args = [
            current.to_string(),
            average.to_string(),
            config.maximum_time_analysis.to_string(),
            config.minimum_time_analysis.to_string(),
        ];

        let proposed = match instance.ledger().evaluate_transaction(contract, &args).await {
            Ok(raw) => match parse_number(&raw) {
                Some(value) => value,
                None => {
                    warn!(esc = %instance.key(), contract = %contract, "Evaluation returned a non-numeric result");
                    return EvaluationOutcome::Failed;
                }
            },
            Err(e) => {
                warn!(esc = %instance.key(), error = %e, "Elasticity evaluation failed, keeping parameters");
                instance
                    .health()
                    .set_degraded(
                        &components::for_instance(instance.key(), components::ELASTICITY),
                        e.to_string(),
                    )
                    .await;
                return EvaluationOutcome::Failed;
            }
        };

        let mut state = instance.state().await;
        match mode {
            ElasticityMode::TimeWindow => {
                let clamped = clamp_time_window(proposed);
                let previous = state.data_time_limit;
                if !accept_time_window(clamped, previous, state.harvest_frequency) {
                    return EvaluationOutcome::Unchanged { proposed: clamped };
                }
                state.data_time_limit = clamped;
                drop(state);

                instance.metrics().set_data_time_limit(instance.key(), clamped);
                instance
                    .logger()
                    .log_time_window_changed(previous, clamped, average);
                EvaluationOutcome::Applied {
                    previous,
                    current: clamped,
                }
            }
            ElasticityMode::HarvestFrequency => {
                let clamped = clamp_harvest_frequency(proposed);
                let previous = state.harvest_frequency;
                if !accept_harvest_frequency(clamped, previous, config.analysis_frequency) {
                    return EvaluationOutcome::Unchanged { proposed: clamped };
                }
                state.mailbox.set(clamped);
                state.harvest_frequency = clamped;
                drop(state);

                instance
                    .metrics()
                    .set_harvest_frequency(instance.key(), clamped);
                instance
                    .logger()
                    .log_harvest_frequency_changed(previous, clamped, average);
                info!(esc = %instance.key(), frequency = clamped, "Harvest frequency change posted");
                EvaluationOutcome::Applied {
                    previous,
                    current: clamped,
                }
            }
        }
    }
}

/// Read a contract result as a number
///
/// Accepts a JSON number, a JSON string holding a number, or bare text.
pub fn parse_number(raw: &[u8]) -> Option<f64> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Number(n)) => n.as_f64(),
        Ok(Value::String(s)) => s.trim().parse().ok(),
        Ok(_) => None,
        Err(_) => std::str::from_utf8(raw).ok()?.trim().parse().ok(),
    }
}
