//! In-process ledger for offline runs and tests
//!
//! Submissions take a configurable amount of (tokio) time, evaluate
//! responses are scripted per contract, and completion events can be
//! generated automatically from the submitted arguments so an ESC can run
//! end to end without a network.

use super::{ContractEvent, EventSubscription, Ledger, EVENT_CHANNEL_CAPACITY};
use crate::error::LedgerError;
use crate::models::{AnalysisEvent, LedgerEvent, UpdateDataEvent};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::debug;

/// A submission or evaluation the simulated ledger received
#[derive(Debug, Clone)]
pub struct Submission {
    pub contract: String,
    pub args: Vec<String>,
    pub started_at: Instant,
}

struct SimulatedInner {
    events: broadcast::Sender<ContractEvent>,
    submit_latency: Duration,
    analysis_exec_ms: f64,
    auto_events: AtomicBool,
    evaluate_responses: DashMap<String, Value>,
    pending_failures: AtomicU32,
    submissions: Mutex<Vec<Submission>>,
    evaluations: Mutex<Vec<Submission>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Simulated ledger adapter
#[derive(Clone)]
pub struct SimulatedLedger {
    inner: Arc<SimulatedInner>,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        SimulatedLedgerBuilder::new().build()
    }

    pub fn builder() -> SimulatedLedgerBuilder {
        SimulatedLedgerBuilder::new()
    }

    /// Script the response returned when `contract` is evaluated
    pub fn set_evaluate_response(&self, contract: &str, response: Value) {
        self.inner
            .evaluate_responses
            .insert(contract.to_string(), response);
    }

    /// Make evaluations of `contract` fail
    pub fn clear_evaluate_response(&self, contract: &str) {
        self.inner.evaluate_responses.remove(contract);
    }

    /// Fail the next `count` submissions with a transaction error
    pub fn fail_next_submits(&self, count: u32) {
        self.inner.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_auto_events(&self, enabled: bool) {
        self.inner.auto_events.store(enabled, Ordering::SeqCst);
    }

    /// Publish an event to every subscriber
    pub fn emit(&self, event: &LedgerEvent) {
        let name = match event {
            LedgerEvent::Analysis(_) => "analysis",
            LedgerEvent::UpdateData(_) => "updateData",
            LedgerEvent::Other => "other",
        };
        // No subscribers is not an error for a ledger
        let _ = self.inner.events.send(ContractEvent {
            name: name.to_string(),
            payload: event.encode(),
        });
    }

    /// All submissions received so far, in arrival order
    pub async fn submissions(&self) -> Vec<Submission> {
        self.inner.submissions.lock().await.clone()
    }

    /// Submissions received for one contract
    pub async fn submissions_for(&self, contract: &str) -> Vec<Submission> {
        self.inner
            .submissions
            .lock()
            .await
            .iter()
            .filter(|s| s.contract == contract)
            .cloned()
            .collect()
    }

    /// Evaluations received for one contract, in arrival order
    pub async fn evaluations_for(&self, contract: &str) -> Vec<Submission> {
        self.inner
            .evaluations
            .lock()
            .await
            .iter()
            .filter(|e| e.contract == contract)
            .cloned()
            .collect()
    }

    pub async fn evaluation_count(&self) -> usize {
        self.inner.evaluations.lock().await.len()
    }

    /// Highest number of submissions that were in progress simultaneously
    pub fn max_concurrent_submissions(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    fn completion_event(&self, args: &[String]) -> Option<LedgerEvent> {
        let params: Value = serde_json::from_str(args.first()?).ok()?;
        let now = chrono::Utc::now().timestamp_millis() as f64;

        if let Some(id) = params.get("updateDataID").and_then(Value::as_u64) {
            let latency_ms = self.inner.submit_latency.as_secs_f64() * 1000.0;
            return Some(LedgerEvent::UpdateData(UpdateDataEvent {
                update_data_id: id,
                init_time: now - latency_ms,
                end_time: now,
                total_time: latency_ms,
                collector_request_time: params
                    .get("collectorRequestTime")
                    .and_then(Value::as_f64),
            }));
        }

        let analysis_id = params.get("analysisID")?.clone();
        let from_dates: Vec<f64> = params
            .get("fromDates")
            .and_then(Value::as_str)
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        let time_data = params.get("timeData").and_then(Value::as_f64).unwrap_or(0.0);
        let frequency = params.get("frequency").and_then(Value::as_f64).unwrap_or(0.0);
        let analyses = from_dates.len().max(1);

        Some(LedgerEvent::Analysis(AnalysisEvent {
            analysis_id: Some(analysis_id.clone()),
            exec_duration: self.inner.analysis_exec_ms,
            time_data,
            frequency_data: frequency,
            analysis_list: (0..analyses).map(|i| i as f64).collect(),
            total_data_stored_list: vec![time_data / frequency.max(f64::EPSILON); analyses],
            from_dates: if from_dates.is_empty() { vec![now] } else { from_dates },
            info: vec![vec![analysis_id; analyses]],
        }))
    }
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for SimulatedLedger {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn submit_transaction(
        &self,
        contract: &str,
        args: &[String],
    ) -> Result<Vec<u8>, LedgerError> {
        let inner = &self.inner;
        let concurrent = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);

        inner.submissions.lock().await.push(Submission {
            contract: contract.to_string(),
            args: args.to_vec(),
            started_at: Instant::now(),
        });

        if !inner.submit_latency.is_zero() {
            tokio::time::sleep(inner.submit_latency).await;
        }
        inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failed = inner
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(LedgerError::transaction(contract, "simulated endorsement failure"));
        }

        debug!(contract = %contract, "Simulated transaction committed");
        if inner.auto_events.load(Ordering::SeqCst) {
            if let Some(event) = self.completion_event(args) {
                self.emit(&event);
            }
        }

        Ok(b"{}".to_vec())
    }

    async fn evaluate_transaction(
        &self,
        contract: &str,
        args: &[String],
    ) -> Result<Vec<u8>, LedgerError> {
        self.inner.evaluations.lock().await.push(Submission {
            contract: contract.to_string(),
            args: args.to_vec(),
            started_at: Instant::now(),
        });
        match self.inner.evaluate_responses.get(contract) {
            Some(response) => Ok(serde_json::to_vec(response.value())?),
            None => Err(LedgerError::transaction(contract, "no such contract function")),
        }
    }

    fn subscribe(&self) -> EventSubscription {
        EventSubscription::new(self.inner.events.subscribe())
    }
}

/// Builder for [`SimulatedLedger`]
pub struct SimulatedLedgerBuilder {
    submit_latency: Duration,
    analysis_exec_ms: f64,
    auto_events: bool,
    evaluate_responses: Vec<(String, Value)>,
}

impl SimulatedLedgerBuilder {
    pub fn new() -> Self {
        Self {
            submit_latency: Duration::ZERO,
            analysis_exec_ms: 25.0,
            auto_events: false,
            evaluate_responses: Vec::new(),
        }
    }

    /// Time every submission takes before it resolves
    pub fn submit_latency(mut self, latency: Duration) -> Self {
        self.submit_latency = latency;
        self
    }

    /// Chaincode execution time reported in generated analysis events
    pub fn analysis_exec_ms(mut self, millis: f64) -> Self {
        self.analysis_exec_ms = millis;
        self
    }

    /// Emit completion events for committed submissions
    pub fn auto_events(mut self, enabled: bool) -> Self {
        self.auto_events = enabled;
        self
    }

    pub fn evaluate_response(mut self, contract: &str, response: Value) -> Self {
        self.evaluate_responses.push((contract.to_string(), response));
        self
    }

    /// Script the read-only contracts an ESC evaluates so that the
    /// elasticity evaluator keeps the current parameters
    pub fn with_esc_contracts(self, config: &crate::config::EscConfig) -> Self {
        let contracts = &config.contracts;
        self.evaluate_response(
            &contracts.query_analysis_holder,
            json!({ "id": config.analysis_holder_id }),
        )
        .evaluate_response(&contracts.evaluate_time_window, json!(config.data_time_limit))
        .evaluate_response(
            &contracts.evaluate_harvest_frequency,
            json!(config.harvest_frequency),
        )
    }

    pub fn build(self) -> SimulatedLedger {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let evaluate_responses = DashMap::new();
        for (contract, response) in self.evaluate_responses {
            evaluate_responses.insert(contract, response);
        }

        SimulatedLedger {
            inner: Arc::new(SimulatedInner {
                events,
                submit_latency: self.submit_latency,
                analysis_exec_ms: self.analysis_exec_ms,
                auto_events: AtomicBool::new(self.auto_events),
                evaluate_responses,
                pending_failures: AtomicU32::new(0),
                submissions: Mutex::new(Vec::new()),
                evaluations: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }),
        }
    }
}

impl Default for SimulatedLedgerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_evaluate_scripted_response() {
        let ledger = SimulatedLedger::builder()
            .evaluate_response("evaluateHistory", json!(42))
            .build();

        let raw = ledger
            .evaluate_transaction("evaluateHistory", &[])
            .await
            .unwrap();
        assert_eq!(serde_json::from_slice::<f64>(&raw).unwrap(), 42.0);
        assert!(ledger.evaluate_transaction("missing", &[]).await.is_err());
        assert_eq!(ledger.evaluation_count().await, 2);
    }

    #[tokio::test]
    async fn test_failure_injection_consumes_budget() {
        let ledger = SimulatedLedger::new();
        ledger.fail_next_submits(1);

        assert!(ledger.submit_transaction("updateData", &[]).await.is_err());
        assert!(ledger.submit_transaction("updateData", &[]).await.is_ok());
        assert_eq!(ledger.submissions_for("updateData").await.len(), 2);
    }

    #[tokio::test]
    async fn test_auto_events_for_update() {
        let ledger = SimulatedLedger::builder().auto_events(true).build();
        let mut subscription = ledger.subscribe();

        let args = vec![json!({"updateDataID": 5, "collectorRequestTime": 12.0}).to_string()];
        ledger.submit_transaction("updateData", &args).await.unwrap();

        match subscription.recv().await {
            Some(LedgerEvent::UpdateData(event)) => {
                assert_eq!(event.update_data_id, 5);
                assert_eq!(event.collector_request_time, Some(12.0));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_auto_events_for_analysis() {
        let ledger = SimulatedLedger::builder()
            .auto_events(true)
            .analysis_exec_ms(80.0)
            .build();
        let mut subscription = ledger.subscribe();

        let args = vec![json!({
            "analysisID": "3",
            "fromDates": "[1000,2000]",
            "timeData": 30.0,
            "frequency": 1.0
        })
        .to_string()];
        ledger.submit_transaction("analysis", &args).await.unwrap();

        match subscription.recv().await {
            Some(LedgerEvent::Analysis(event)) => {
                assert_eq!(event.analysis_id(), Some(3));
                assert_eq!(event.exec_duration, 80.0);
                assert_eq!(event.from_dates, vec![1000.0, 2000.0]);
                assert_eq!(event.analysis_list.len(), 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracks_concurrent_submissions() {
        let ledger = SimulatedLedger::builder()
            .submit_latency(Duration::from_millis(100))
            .build();

        let a = ledger.clone();
        let b = ledger.clone();
        let (ra, rb) = tokio::join!(
            a.submit_transaction("updateData", &[]),
            b.submit_transaction("analysis", &[])
        );
        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(ledger.max_concurrent_submissions(), 2);
    }
}
