//! Ledger adapter seam
//!
//! The core never talks to a distributed ledger directly. Everything goes
//! through the [`Ledger`] trait: ordered at-most-once submissions,
//! read-only evaluations, and a broadcast stream of contract events.
//! Connection and identity setup belong to the adapter.

mod gateway;
mod simulated;

pub use gateway::{GatewayConfig, GatewayLedger};
pub use simulated::{SimulatedLedger, SimulatedLedgerBuilder, Submission};

use crate::error::LedgerError;
use crate::models::LedgerEvent;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

/// Capacity of the per-adapter event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Raw event emitted by a chaincode
#[derive(Debug, Clone)]
pub struct ContractEvent {
    pub name: String,
    pub payload: Vec<u8>,
}

/// Capability set the ESC core consumes from the ledger
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Identifier for logging (e.g. "simulated", "gateway")
    fn name(&self) -> &'static str;

    /// Submit a state-changing transaction; exactly one attempt per call
    async fn submit_transaction(
        &self,
        contract: &str,
        args: &[String],
    ) -> Result<Vec<u8>, LedgerError>;

    /// Evaluate a read-only transaction
    async fn evaluate_transaction(
        &self,
        contract: &str,
        args: &[String],
    ) -> Result<Vec<u8>, LedgerError>;

    /// Start receiving contract events; dropping the subscription unsubscribes
    fn subscribe(&self) -> EventSubscription;
}

/// Live subscription to the contract event stream
pub struct EventSubscription {
    receiver: broadcast::Receiver<ContractEvent>,
}

impl EventSubscription {
    pub fn new(receiver: broadcast::Receiver<ContractEvent>) -> Self {
        Self { receiver }
    }

    /// Wait for the next decodable event
    ///
    /// Undecodable payloads and lag gaps are logged and skipped. Returns
    /// `None` once the adapter closes the stream.
    pub async fn recv(&mut self) -> Option<LedgerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => match LedgerEvent::decode(&event.payload) {
                    Ok(decoded) => return Some(decoded),
                    Err(e) => {
                        warn!(event = %event.name, error = %e, "Skipping undecodable contract event");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Stop receiving events
    pub fn unsubscribe(self) {}
}
