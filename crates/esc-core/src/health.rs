//! Health tracking for ESC instances
//!
//! Each instance registers its loops under `{esc}/{component}` keys so a
//! process running several ESCs reports them separately. The ledger
//! connection is reported under [`components::LEDGER`]. The agent exposes
//! the aggregate through its liveness and readiness endpoints.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Dropped work (an abandoned submission, a failed evaluation) but keeps running
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

/// Last status reported by a component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds of the report
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const LEDGER: &str = "ledger";
    pub const HARVESTER: &str = "harvester";
    pub const ANALYSER: &str = "analyser";
    pub const ELASTICITY: &str = "elasticity";
    pub const RECORDER: &str = "recorder";

    /// Components every instance registers
    pub const INSTANCE: [&str; 4] = [HARVESTER, ANALYSER, ELASTICITY, RECORDER];

    /// Registry key of an instance-owned component
    pub fn for_instance(esc: &str, component: &str) -> String {
        format!("{}/{}", esc, component)
    }
}

#[derive(Debug, Default)]
struct Registry {
    components: HashMap<String, ComponentHealth>,
    /// Set once the first instance has started
    started: bool,
}

/// Shared health registry of the agent process
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    inner: Arc<RwLock<Registry>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the loops of one instance as healthy
    pub async fn register_instance(&self, esc: &str) {
        let mut registry = self.inner.write().await;
        for component in components::INSTANCE {
            registry.components.insert(
                components::for_instance(esc, component),
                ComponentHealth::new(ComponentStatus::Healthy, None),
            );
        }
    }

    /// Drop every component registered for `esc`
    pub async fn remove_instance(&self, esc: &str) {
        let prefix = format!("{}/", esc);
        self.inner
            .write()
            .await
            .components
            .retain(|name, _| !name.starts_with(&prefix));
    }

    async fn report(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        self.inner
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::new(status, message));
    }

    pub async fn set_healthy(&self, name: &str) {
        self.report(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.report(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.report(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    pub async fn set_ready(&self, ready: bool) {
        self.inner.write().await.started = ready;
    }

    /// Worst component status wins; no components reads as healthy
    pub async fn health(&self) -> HealthResponse {
        let components = self.inner.read().await.components.clone();
        let status = components
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse { status, components }
    }

    /// Ready once an instance has started and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let registry = self.inner.read().await;
        if !registry.started {
            return ReadinessResponse {
                ready: false,
                reason: Some("No ESC instance started yet".to_string()),
            };
        }

        let mut failing: Vec<&str> = registry
            .components
            .iter()
            .filter(|(_, health)| !health.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();
        if failing.is_empty() {
            return ReadinessResponse {
                ready: true,
                reason: None,
            };
        }

        failing.sort_unstable();
        ReadinessResponse {
            ready: false,
            reason: Some(format!("Unhealthy: {}", failing.join(", "))),
        }
    }
}
