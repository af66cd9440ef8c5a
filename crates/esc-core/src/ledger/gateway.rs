//! HTTP/JSON ledger gateway client
//!
//! Talks to a REST gateway that holds the ledger identity and forwards
//! transactions to the network:
//! - `POST .../submit` and `POST .../evaluate` with `{"contract", "args"}`
//! - `GET .../events?after=<seq>` polled in the background for contract events

use super::{ContractEvent, EventSubscription, Ledger, EVENT_CHANNEL_CAPACITY};
use crate::error::LedgerError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Configuration for the gateway client
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway base URL (e.g., "http://ledger-gateway:3000")
    pub base_url: String,
    /// Channel the chaincode is deployed to
    pub channel: String,
    /// Chaincode to address
    pub chaincode: String,
    /// Timeout applied to every request
    pub request_timeout: Duration,
    /// Interval between event feed polls
    pub poll_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            channel: "escchannel".to_string(),
            chaincode: "analytics_chaincode".to_string(),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Serialize)]
struct TransactionBody<'a> {
    contract: &'a str,
    args: &'a [String],
}

/// One entry of the gateway event feed
#[derive(Debug, Deserialize)]
struct FeedEntry {
    seq: u64,
    #[serde(default)]
    name: String,
    payload: Value,
}

/// Ledger adapter backed by an HTTP gateway
pub struct GatewayLedger {
    client: Client,
    chaincode_url: Url,
    config: GatewayConfig,
    events: broadcast::Sender<ContractEvent>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl GatewayLedger {
    /// Build a client for the configured chaincode
    pub fn new(config: GatewayConfig) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let chaincode_url = chaincode_url(&config)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            chaincode_url,
            config,
            events,
            poller: Mutex::new(None),
        })
    }

    /// Start the background event feed poller (idempotent)
    pub fn start_event_poller(&self) {
        let Ok(mut slot) = self.poller.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }

        let client = self.client.clone();
        let url = self.chaincode_url.clone();
        let sender = self.events.clone();
        let interval = self.config.poll_interval;

        info!(url = %url, "Starting ledger event poller");
        *slot = Some(tokio::spawn(async move {
            let mut after = 0u64;
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match poll_events(&client, &url, after).await {
                    Ok(entries) => {
                        for entry in entries {
                            after = after.max(entry.seq);
                            let _ = sender.send(ContractEvent {
                                name: entry.name,
                                payload: serde_json::to_vec(&entry.payload).unwrap_or_default(),
                            });
                        }
                    }
                    Err(e) => warn!(error = %e, "Event feed poll failed"),
                }
            }
        }));
    }

    async fn post(
        &self,
        action: &str,
        contract: &str,
        args: &[String],
    ) -> Result<Vec<u8>, LedgerError> {
        let url = self
            .chaincode_url
            .join(action)
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let response = self
            .client
            .post(url)
            .json(&TransactionBody { contract, args })
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?.to_vec();
        if !status.is_success() {
            let message = String::from_utf8_lossy(&body).into_owned();
            return Err(LedgerError::transaction(
                contract,
                format!("{}: {}", status, message),
            ));
        }

        debug!(action = %action, contract = %contract, bytes = body.len(), "Gateway call succeeded");
        Ok(body)
    }
}

impl Drop for GatewayLedger {
    fn drop(&mut self) {
        if let Ok(slot) = self.poller.get_mut() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl Ledger for GatewayLedger {
    fn name(&self) -> &'static str {
        "gateway"
    }

    async fn submit_transaction(
        &self,
        contract: &str,
        args: &[String],
    ) -> Result<Vec<u8>, LedgerError> {
        self.post("submit", contract, args).await
    }

    async fn evaluate_transaction(
        &self,
        contract: &str,
        args: &[String],
    ) -> Result<Vec<u8>, LedgerError> {
        self.post("evaluate", contract, args).await
    }

    fn subscribe(&self) -> EventSubscription {
        EventSubscription::new(self.events.subscribe())
    }
}

fn chaincode_url(config: &GatewayConfig) -> Result<Url, LedgerError> {
    let mut base = config.base_url.clone();
    if !base.ends_with('/') {
        base.push('/');
    }
    let base = Url::parse(&base).map_err(|e| LedgerError::Transport(e.to_string()))?;
    base.join(&format!(
        "channels/{}/chaincodes/{}/",
        config.channel, config.chaincode
    ))
    .map_err(|e| LedgerError::Transport(e.to_string()))
}

async fn poll_events(
    client: &Client,
    chaincode_url: &Url,
    after: u64,
) -> Result<Vec<FeedEntry>, LedgerError> {
    let url = chaincode_url
        .join("events")
        .map_err(|e| LedgerError::Transport(e.to_string()))?;

    let response = client
        .get(url)
        .query(&[("after", after)])
        .send()
        .await?
        .error_for_status()?;

    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
