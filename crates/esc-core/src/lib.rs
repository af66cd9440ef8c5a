//! Elasticity control core for elastic smart contracts
//!
//! This crate provides:
//! - Harvest and analysis loops that submit ledger transactions through a
//!   single-slot submission guard with bounded retries
//! - The elasticity evaluator that tunes the harvest frequency or the
//!   analysis time-window from observed analysis latency
//! - CSV result recording
//! - Ledger adapters (HTTP gateway and an in-process simulation)
//! - Health checks and observability

pub mod config;
pub mod elasticity;
pub mod error;
pub mod guard;
pub mod health;
pub mod instance;
pub mod ledger;
pub mod models;
pub mod observability;
pub mod recorder;
pub mod runtime;
pub mod scheduler;
pub mod source;
pub mod storage;

pub use config::{ContractNames, ElasticityMode, EscConfig};
pub use error::{ConfigError, EscError, EscResult, LedgerError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use instance::{Instance, InstanceContext, InstanceSnapshot};
pub use ledger::{GatewayConfig, GatewayLedger, Ledger, SimulatedLedger};
pub use models::*;
pub use observability::{EscMetrics, StructuredLogger};
pub use recorder::ExperimentSummary;
pub use runtime::{start_esc, EscHandle, EscRuntime, StatusResponse};
pub use source::{DataSource, EmptySource, HttpSource};
pub use storage::init_storage;
