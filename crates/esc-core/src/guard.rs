//! Submission guard
//!
//! Serializes the single "transaction in flight" slot of an instance.
//! A submission is retried on a fixed cadence until it is admitted and
//! committed, or until its failure counter exceeds the retry cap, at which
//! point it is abandoned. There is no backoff: the budget is a count.

use crate::health::components;
use crate::instance::{Instance, Stamp};
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Failure-counter key of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryKey {
    /// Data update with its update id
    Harvest(u64),
    /// Analysis with its analysis id
    Analysis(u64),
}

impl RetryKey {
    pub fn kind(&self) -> &'static str {
        match self {
            RetryKey::Harvest(_) => "harvest",
            RetryKey::Analysis(_) => "analysis",
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            RetryKey::Harvest(id) | RetryKey::Analysis(id) => *id,
        }
    }

    fn component(&self) -> &'static str {
        match self {
            RetryKey::Harvest(_) => components::HARVESTER,
            RetryKey::Analysis(_) => components::ANALYSER,
        }
    }
}

/// A transaction waiting for the submission slot
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    pub contract: String,
    /// JSON-encoded transaction argument
    pub payload: String,
    pub key: RetryKey,
}

/// Result of one pass through the guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Admitted and committed
    Submitted,
    /// Admitted but the ledger call failed; retried on the next tick
    Failed { failures: u32 },
    /// Slot taken by another submission; retried on the next tick
    Busy { failures: u32 },
    /// Retry budget exhausted; the submission is dropped
    Abandoned { failures: u32 },
}

impl AttemptOutcome {
    /// Whether the retry cadence stops after this outcome
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::Submitted | AttemptOutcome::Abandoned { .. }
        )
    }
}

/// Admission control for one instance
#[derive(Clone)]
pub struct SubmissionGuard {
    instance: Arc<Instance>,
}

impl SubmissionGuard {
    pub fn new(instance: Arc<Instance>) -> Self {
        Self { instance }
    }

    /// Run one admission attempt
    ///
    /// Holds the in-flight slot for the whole ledger round trip and
    /// releases it whatever the result.
    pub async fn attempt_submit(&self, submission: &PendingSubmission) -> AttemptOutcome {
        let instance = &self.instance;
        let key = submission.key;

        if !instance.try_begin_submission() {
            let failures = self.count_failure(key).await;
            return self.over_budget(key, failures).await.unwrap_or_else(|| {
                debug!(
                    esc = %instance.key(),
                    kind = key.kind(),
                    id = key.id(),
                    failures,
                    "Another transaction is running, retrying"
                );
                instance
                    .metrics()
                    .inc_submission(instance.key(), key.kind(), "busy");
                AttemptOutcome::Busy { failures }
            });
        }

        {
            let mut state = instance.state().await;
            match key {
                RetryKey::Harvest(id) => {
                    state.update_started.insert(id, Stamp::now());
                }
                RetryKey::Analysis(id) => {
                    state.analysis_started.insert(id, Stamp::now());
                    let retries = state.analysis_failures(id);
                    state.analysis_retries.insert(id, retries);
                }
            }
        }

        let result = instance
            .ledger()
            .submit_transaction(&submission.contract, std::slice::from_ref(&submission.payload))
            .await;
        instance.end_submission();

        match result {
            Ok(_) => {
                self.reset_failures(key).await;
                debug!(
                    esc = %instance.key(),
                    kind = key.kind(),
                    id = key.id(),
                    "Transaction submitted to the ledger"
                );
                instance
                    .metrics()
                    .inc_submission(instance.key(), key.kind(), "submitted");
                AttemptOutcome::Submitted
            }
            Err(e) => {
                warn!(
                    esc = %instance.key(),
                    contract = %submission.contract,
                    id = key.id(),
                    error = %e,
                    "Transaction submission failed"
                );
                let failures = self.count_failure(key).await;
                self.over_budget(key, failures).await.unwrap_or_else(|| {
                    instance
                        .metrics()
                        .inc_submission(instance.key(), key.kind(), "failed");
                    AttemptOutcome::Failed { failures }
                })
            }
        }
    }

    /// Retry `submission` every retry interval until it resolves
    ///
    /// The first attempt happens one interval after the call.
    pub async fn submit_with_retry(&self, submission: PendingSubmission) -> AttemptOutcome {
        let period = self.instance.config().retry_interval();
        let mut cadence = interval_at(Instant::now() + period, period);
        cadence.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            cadence.tick().await;
            let outcome = self.attempt_submit(&submission).await;
            if outcome.is_final() {
                return outcome;
            }
        }
    }

    async fn count_failure(&self, key: RetryKey) -> u32 {
        let mut state = self.instance.state().await;
        match key {
            RetryKey::Harvest(id) => state.count_update_failure(id),
            RetryKey::Analysis(id) => {
                let failures = state.analysis_fail_count.entry(id).or_insert(0);
                *failures += 1;
                *failures
            }
        }
    }

    async fn reset_failures(&self, key: RetryKey) {
        let mut state = self.instance.state().await;
        match key {
            RetryKey::Harvest(id) => {
                state.clear_update_failures(id);
            }
            RetryKey::Analysis(id) => {
                state.analysis_fail_count.remove(&id);
            }
        }
    }

    /// Drop a submission that will never complete
    async fn forget(&self, key: RetryKey) {
        let mut state = self.instance.state().await;
        match key {
            RetryKey::Harvest(id) => {
                state.clear_update_failures(id);
                state.update_started.remove(&id);
            }
            RetryKey::Analysis(id) => state.forget_analysis(id),
        }
    }

    /// Abandon the submission once its counter exceeds the cap
    async fn over_budget(&self, key: RetryKey, failures: u32) -> Option<AttemptOutcome> {
        let instance = &self.instance;
        if failures <= instance.config().retry_cap {
            return None;
        }

        self.forget(key).await;
        instance
            .logger()
            .log_submission_abandoned(key.kind(), key.id(), failures);
        instance
            .metrics()
            .inc_submission(instance.key(), key.kind(), "abandoned");
        instance
            .health()
            .set_degraded(
                &components::for_instance(instance.key(), key.component()),
                format!("{} {} abandoned after {} attempts", key.kind(), key.id(), failures),
            )
            .await;

        Some(AttemptOutcome::Abandoned { failures })
    }
}
