//! Per-instance state store
//!
//! An [`Instance`] owns everything one running ESC mutates: the in-flight
//! flag, the tunable parameters, counters, start timestamps and the latency
//! history. Every loop of the instance holds an `Arc<Instance>`; nothing is
//! shared between instances except the process-wide metrics and health
//! registries.

mod history;
mod mailbox;

pub use history::LatencyHistory;
pub use mailbox::FrequencyMailbox;

use crate::config::{ElasticityMode, EscConfig};
use crate::health::HealthRegistry;
use crate::ledger::Ledger;
use crate::models::HarvestRecord;
use crate::observability::{EscMetrics, StructuredLogger};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

/// Point in time a submission started, on both clocks
///
/// `at` measures latencies (follows tokio's clock, so paused-time tests
/// see simulated durations); `wall_ms` is the Unix timestamp written to
/// the result files.
#[derive(Debug, Clone, Copy)]
pub struct Stamp {
    pub at: Instant,
    pub wall_ms: i64,
}

impl Stamp {
    pub fn now() -> Self {
        Self {
            at: Instant::now(),
            wall_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.at.elapsed().as_secs_f64()
    }
}

/// Mutable control state of one instance
#[derive(Debug)]
pub struct ControlState {
    /// Analysis time-window
    pub data_time_limit: f64,
    /// Harvest period in seconds
    pub harvest_frequency: f64,
    pub mailbox: FrequencyMailbox,
    /// Harvested records not yet handed to the submission guard
    pub harvest_batch: Vec<HarvestRecord>,
    /// Window start timestamps (ms) accumulated since the last analysis
    pub calculation_window_dates: Vec<i64>,
    /// Busy/failed attempts summed over the data updates still pending
    pub harvest_fail_count: u32,
    /// Busy/failed attempts per update id; absent means zero
    pub update_fail_count: HashMap<u64, u32>,
    /// Busy/failed attempts per analysis id; absent means zero
    pub analysis_fail_count: HashMap<u64, u32>,
    /// Failed attempts an analysis went through before it was admitted
    pub analysis_retries: HashMap<u64, u32>,
    pub analysis_started: HashMap<u64, Stamp>,
    pub update_started: HashMap<u64, Stamp>,
    /// Listeners that have handled each analysis completion
    analysis_consumed: HashMap<u64, u8>,
    pub next_update_id: u64,
    pub next_analysis_id: u64,
    pub latency_history: LatencyHistory,
}

impl ControlState {
    pub fn new(config: &EscConfig) -> Self {
        Self {
            data_time_limit: config.data_time_limit,
            harvest_frequency: config.harvest_frequency,
            mailbox: FrequencyMailbox::new(),
            harvest_batch: Vec::new(),
            calculation_window_dates: Vec::new(),
            harvest_fail_count: 0,
            update_fail_count: HashMap::new(),
            analysis_fail_count: HashMap::new(),
            analysis_retries: HashMap::new(),
            analysis_started: HashMap::new(),
            update_started: HashMap::new(),
            analysis_consumed: HashMap::new(),
            next_update_id: 0,
            next_analysis_id: 0,
            latency_history: LatencyHistory::new(config.number_of_times_for_analysis_avg),
        }
    }

    pub fn analysis_failures(&self, analysis_id: u64) -> u32 {
        self.analysis_fail_count
            .get(&analysis_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn update_failures(&self, update_id: u64) -> u32 {
        self.update_fail_count.get(&update_id).copied().unwrap_or(0)
    }

    /// Count a busy/failed attempt of `update_id`; returns its own total
    pub fn count_update_failure(&mut self, update_id: u64) -> u32 {
        self.harvest_fail_count += 1;
        let failures = self.update_fail_count.entry(update_id).or_insert(0);
        *failures += 1;
        *failures
    }

    /// Drop the counter of `update_id` and take it out of the aggregate
    pub fn clear_update_failures(&mut self, update_id: u64) -> u32 {
        let failures = self.update_fail_count.remove(&update_id).unwrap_or(0);
        self.harvest_fail_count = self.harvest_fail_count.saturating_sub(failures);
        failures
    }

    /// Mark the completion of `analysis_id` as handled by `listener`
    ///
    /// Returns false for unknown ids and for a completion this listener
    /// already handled. Once every listener has handled it, the analysis is
    /// forgotten and later duplicates count as unknown.
    pub fn consume_analysis(&mut self, analysis_id: u64, listener: Listener) -> bool {
        if !self.analysis_started.contains_key(&analysis_id) {
            return false;
        }
        let consumed = self.analysis_consumed.entry(analysis_id).or_insert(0);
        if *consumed & listener.bit() != 0 {
            return false;
        }
        *consumed |= listener.bit();
        if *consumed == Listener::ALL {
            self.forget_analysis(analysis_id);
        }
        true
    }

    /// Remove every trace of `analysis_id`
    pub fn forget_analysis(&mut self, analysis_id: u64) {
        self.analysis_started.remove(&analysis_id);
        self.analysis_retries.remove(&analysis_id);
        self.analysis_fail_count.remove(&analysis_id);
        self.analysis_consumed.remove(&analysis_id);
    }

    pub fn pending_analyses(&self) -> usize {
        self.analysis_started.len()
    }
}

/// Subscribers that handle each analysis completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listener {
    Evaluator,
    Recorder,
}

impl Listener {
    const ALL: u8 = 0b11;

    fn bit(self) -> u8 {
        match self {
            Listener::Evaluator => 0b01,
            Listener::Recorder => 0b10,
        }
    }
}

/// Process-wide collaborators handed to every instance
#[derive(Clone)]
pub struct InstanceContext {
    pub metrics: EscMetrics,
    pub health: HealthRegistry,
    /// Number of ESCs configured in this process
    pub configured_instances: Arc<AtomicUsize>,
}

impl Default for InstanceContext {
    fn default() -> Self {
        Self {
            metrics: EscMetrics::new(),
            health: HealthRegistry::new(),
            configured_instances: Arc::new(AtomicUsize::new(1)),
        }
    }
}

/// One running ESC
pub struct Instance {
    config: EscConfig,
    ledger: Arc<dyn Ledger>,
    in_flight: AtomicBool,
    state: Mutex<ControlState>,
    started_at: Instant,
    context: InstanceContext,
    logger: StructuredLogger,
}

impl Instance {
    pub fn new(config: EscConfig, ledger: Arc<dyn Ledger>, context: InstanceContext) -> Self {
        let state = ControlState::new(&config);
        let logger = StructuredLogger::new(config.key());

        context
            .metrics
            .set_harvest_frequency(config.key(), state.harvest_frequency);
        context
            .metrics
            .set_data_time_limit(config.key(), state.data_time_limit);

        Self {
            config,
            ledger,
            in_flight: AtomicBool::new(false),
            state: Mutex::new(state),
            started_at: Instant::now(),
            context,
            logger,
        }
    }

    pub fn key(&self) -> &str {
        self.config.key()
    }

    pub fn config(&self) -> &EscConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn metrics(&self) -> &EscMetrics {
        &self.context.metrics
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.context.health
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn configured_instances(&self) -> usize {
        self.context.configured_instances.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().await
    }

    /// Claim the single submission slot; false if already taken
    pub fn try_begin_submission(&self) -> bool {
        let claimed = self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            self.metrics().set_in_flight(self.key(), true);
        }
        claimed
    }

    /// Release the submission slot
    pub fn end_submission(&self) {
        self.in_flight.store(false, Ordering::Release);
        self.metrics().set_in_flight(self.key(), false);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn snapshot(&self) -> InstanceSnapshot {
        let state = self.state().await;
        InstanceSnapshot {
            key: self.key().to_string(),
            elasticity_mode: self.config.elasticity_mode,
            harvest_frequency: state.harvest_frequency,
            data_time_limit: state.data_time_limit,
            in_flight: self.is_in_flight(),
            pending_frequency: state.mailbox.peek(),
            updates_issued: state.next_update_id,
            analyses_issued: state.next_analysis_id,
            latencies_recorded: state.latency_history.len(),
            average_latency_secs: state.latency_history.average(),
            harvest_fail_count: state.harvest_fail_count,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

/// Point-in-time view of an instance, served by the agent's status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub key: String,
    pub elasticity_mode: ElasticityMode,
    pub harvest_frequency: f64,
    pub data_time_limit: f64,
    pub in_flight: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_frequency: Option<f64>,
    pub updates_issued: u64,
    pub analyses_issued: u64,
    pub latencies_recorded: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_latency_secs: Option<f64>,
    pub harvest_fail_count: u32,
    pub uptime_secs: u64,
}
