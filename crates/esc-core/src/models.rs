//! Core data models exchanged with the ledger

use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single record produced by a data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestRecord {
    pub payload: Value,
    /// Time the collector request took, in milliseconds
    pub collector_request_time: Option<f64>,
}

impl HarvestRecord {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            collector_request_time: None,
        }
    }

    pub fn with_collector_time(mut self, millis: f64) -> Self {
        self.collector_request_time = Some(millis);
        self
    }
}

/// Arguments of a data-update transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDataRequest {
    /// JSON array of the batched record payloads
    pub data: String,
    pub time_data: f64,
    pub frequency: f64,
    pub data_per_harvest: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collector_request_time: Option<f64>,
    #[serde(rename = "updateDataID")]
    pub update_data_id: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Arguments of an analysis transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub time_data: f64,
    /// JSON array of the window start timestamps (ms)
    pub from_dates: String,
    pub frequency: f64,
    pub analysis_holder: String,
    #[serde(rename = "analysisID")]
    pub analysis_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Completion event of an analysis transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisEvent {
    #[serde(rename = "analysisID", skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<Value>,
    /// Chaincode execution time in milliseconds
    pub exec_duration: f64,
    pub time_data: f64,
    pub frequency_data: f64,
    pub analysis_list: Vec<f64>,
    pub total_data_stored_list: Vec<f64>,
    pub from_dates: Vec<f64>,
    /// Extra result columns; `info[0][0]` carries the analysis id
    pub info: Vec<Vec<Value>>,
}

impl AnalysisEvent {
    /// The analysis id this event completes
    ///
    /// Chaincodes report it either as `analysisID` or as `info[0][0]`.
    pub fn analysis_id(&self) -> Option<u64> {
        self.analysis_id
            .as_ref()
            .and_then(value_as_u64)
            .or_else(|| self.info.first()?.first().and_then(value_as_u64))
    }
}

/// Completion event of a data-update transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateDataEvent {
    #[serde(rename = "updateDataID")]
    pub update_data_id: u64,
    pub init_time: f64,
    pub end_time: f64,
    pub total_time: f64,
    pub collector_request_time: Option<f64>,
}

/// Decoded ledger completion event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LedgerEvent {
    #[serde(rename = "analysis")]
    Analysis(AnalysisEvent),
    #[serde(rename = "updateData")]
    UpdateData(UpdateDataEvent),
    #[serde(other)]
    Other,
}

impl LedgerEvent {
    pub fn decode(payload: &[u8]) -> Result<Self, LedgerError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
