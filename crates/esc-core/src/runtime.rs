//! ESC lifecycle
//!
//! [`start_esc`] wires one instance: it subscribes the evaluator and the
//! recorder to the ledger event stream and spawns the four loops.
//! [`EscRuntime`] keeps the handles of every instance running in the
//! process, keyed by instance key.

use crate::config::EscConfig;
use crate::elasticity::ElasticityEvaluator;
use crate::error::{EscError, EscResult};
use crate::health::{components, HealthRegistry};
use crate::instance::{Instance, InstanceContext, InstanceSnapshot};
use crate::ledger::Ledger;
use crate::observability::EscMetrics;
use crate::recorder::ResultRecorder;
use crate::scheduler::{AnalysisScheduler, HarvestScheduler};
use crate::source::DataSource;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running instance and its loop tasks
pub struct EscHandle {
    instance: Arc<Instance>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EscHandle {
    pub fn key(&self) -> &str {
        self.instance.key()
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Signal every loop to stop; the recorder still flushes
    pub fn stop(&self) {
        // Loops that already finished have dropped their receivers
        let _ = self.shutdown.send(());
    }

    pub fn is_finished(&self) -> bool {
        let Ok(tasks) = self.tasks.lock() else {
            return true;
        };
        tasks.iter().all(|task| task.is_finished())
    }

    /// Wait for every loop to end
    pub async fn wait(&self) {
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(esc = %self.instance.key(), error = %e, "ESC task ended abnormally");
            }
        }
        self.instance.health().remove_instance(self.instance.key()).await;
        info!(esc = %self.instance.key(), "ESC stopped");
    }
}

/// Validate `config` and start all loops of one instance
pub async fn start_esc(
    config: EscConfig,
    ledger: Arc<dyn Ledger>,
    source: Arc<dyn DataSource>,
    context: InstanceContext,
) -> EscResult<EscHandle> {
    config.validate()?;

    let instance = Arc::new(Instance::new(config, ledger, context));
    let key = instance.key().to_string();
    instance.health().register_instance(&key).await;

    let evaluator_events = instance.ledger().subscribe();
    let recorder_events = instance.ledger().subscribe();
    let recorder = ResultRecorder::open(instance.clone()).await;
    if let Some(parent) = recorder.paths().calculations.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            instance
                .health()
                .set_degraded(
                    &components::for_instance(&key, components::RECORDER),
                    format!("results directory not writable: {}", e),
                )
                .await;
        }
    }

    let (shutdown, _) = broadcast::channel(1);
    let tasks = vec![
        tokio::spawn(ElasticityEvaluator::new(instance.clone()).run(evaluator_events, shutdown.subscribe())),
        tokio::spawn(recorder.run(recorder_events, shutdown.subscribe())),
        tokio::spawn(AnalysisScheduler::new(instance.clone()).run(shutdown.subscribe())),
        tokio::spawn(HarvestScheduler::new(instance.clone(), source).run(shutdown.subscribe())),
    ];

    let config = instance.config();
    instance.logger().log_started(
        &config.elasticity_mode.to_string(),
        config.harvest_frequency,
        config.data_time_limit,
    );

    Ok(EscHandle {
        instance,
        shutdown,
        tasks: Mutex::new(tasks),
    })
}

/// Registry of the instances running in this process
pub struct EscRuntime {
    escs: DashMap<String, Arc<EscHandle>>,
    context: InstanceContext,
}

impl EscRuntime {
    pub fn new(metrics: EscMetrics, health: HealthRegistry) -> Self {
        Self {
            escs: DashMap::new(),
            context: InstanceContext {
                metrics,
                health,
                configured_instances: Arc::new(AtomicUsize::new(0)),
            },
        }
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.context.health
    }

    /// Start an instance under its key
    pub async fn spawn(
        &self,
        config: EscConfig,
        ledger: Arc<dyn Ledger>,
        source: Arc<dyn DataSource>,
    ) -> EscResult<()> {
        let key = config.key().to_string();
        if self.escs.contains_key(&key) {
            return Err(EscError::DuplicateInstance(key));
        }

        self.context
            .configured_instances
            .fetch_add(1, Ordering::SeqCst);
        let handle = match start_esc(config, ledger, source, self.context.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                self.context
                    .configured_instances
                    .fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        };

        self.escs.insert(key, Arc::new(handle));
        self.context.health.set_ready(true).await;
        Ok(())
    }

    /// Signal one instance to stop; false if the key is unknown
    pub fn stop(&self, key: &str) -> bool {
        match self.escs.get(key) {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        for handle in self.escs.iter() {
            handle.stop();
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.escs.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.escs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.escs.is_empty()
    }

    /// Status of every instance, ordered by key
    pub async fn snapshot(&self) -> Vec<InstanceSnapshot> {
        let instances: Vec<Arc<Instance>> = self
            .escs
            .iter()
            .map(|entry| entry.value().instance().clone())
            .collect();

        let mut snapshots = Vec::with_capacity(instances.len());
        for instance in instances {
            snapshots.push(instance.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    /// Wait for every instance to finish and drop it from the registry
    ///
    /// Instances stay registered, and stoppable, until they have finished.
    pub async fn wait_all(&self) {
        for key in self.keys() {
            let handle = self.escs.get(&key).map(|entry| entry.value().clone());
            if let Some(handle) = handle {
                handle.wait().await;
                self.escs.remove(&key);
            }
        }
    }
}

/// Body of the agent's status endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub instances: Vec<InstanceSnapshot>,
}

#[cfg(test)]
mod tests;
