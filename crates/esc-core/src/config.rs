//! Per-instance ESC configuration
//!
//! The option set is flat and accepts the camelCase keys used by ESC
//! template files, so an existing template can be loaded unchanged.

use crate::error::ConfigError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Which tunable parameter the elasticity evaluator may change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElasticityMode {
    /// Tune the analysis time-window (`dataTimeLimit`)
    #[serde(rename = "timeWindow")]
    TimeWindow,
    /// Tune the harvest frequency
    #[serde(rename = "harvestFrequency")]
    HarvestFrequency,
}

impl fmt::Display for ElasticityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElasticityMode::TimeWindow => write!(f, "timeWindow"),
            ElasticityMode::HarvestFrequency => write!(f, "harvestFrequency"),
        }
    }
}

/// Names of the chaincode functions an ESC invokes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractNames {
    #[serde(rename = "updateDataContract", default = "default_update_data")]
    pub update_data: String,
    #[serde(rename = "evaluateHistoryContract", default = "default_evaluate_history")]
    pub evaluate_time_window: String,
    #[serde(rename = "evaluateFrequencyContract", default = "default_evaluate_frequency")]
    pub evaluate_harvest_frequency: String,
    #[serde(rename = "queryAnalysisHolderContract", default = "default_query_analysis")]
    pub query_analysis_holder: String,
    #[serde(rename = "analysisContract", default = "default_analysis")]
    pub analysis: String,
    #[serde(rename = "dataStorageContract", default = "default_data_storage")]
    pub data_storage: String,
    #[serde(rename = "calculationStorageContract", default = "default_calculation_storage")]
    pub calculation_storage: String,
}

impl Default for ContractNames {
    fn default() -> Self {
        Self {
            update_data: default_update_data(),
            evaluate_time_window: default_evaluate_history(),
            evaluate_harvest_frequency: default_evaluate_frequency(),
            query_analysis_holder: default_query_analysis(),
            analysis: default_analysis(),
            data_storage: default_data_storage(),
            calculation_storage: default_calculation_storage(),
        }
    }
}

fn default_update_data() -> String {
    "updateData".to_string()
}

fn default_evaluate_history() -> String {
    "evaluateHistory".to_string()
}

fn default_evaluate_frequency() -> String {
    "evaluateFrequency".to_string()
}

fn default_query_analysis() -> String {
    "queryAnalysis".to_string()
}

fn default_analysis() -> String {
    "analysis".to_string()
}

fn default_data_storage() -> String {
    "createSensor".to_string()
}

fn default_calculation_storage() -> String {
    "calculationStorage".to_string()
}

/// Immutable configuration of one ESC instance
///
/// Times are expressed in seconds unless the field name says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EscConfig {
    /// Chaincode the instance drives; doubles as the instance key
    pub chaincode_name: String,
    /// Directory the result files are written to
    pub results_path: PathBuf,
    /// Prefix of the result file names
    pub experiment_name: String,
    /// Total run duration
    pub execution_time: f64,
    /// Period between analysis transactions
    pub analysis_frequency: f64,
    /// Initial period between harvests
    pub harvest_frequency: f64,
    /// Delay before the first analysis period starts
    pub analysis_start_delay: f64,
    /// Delay before the first harvest period starts
    pub harvest_start_delay: f64,
    /// Initial analysis time-window
    pub data_time_limit: f64,
    /// Evaluate elasticity every this many completed analyses
    pub frequency_control_calculate: u32,
    /// Upper analysis-duration bound handed to the evaluation contract
    pub maximum_time_analysis: f64,
    /// Lower analysis-duration bound handed to the evaluation contract
    pub minimum_time_analysis: f64,
    pub elasticity_mode: ElasticityMode,
    /// Records produced per harvest, forwarded as batch metadata
    pub data_per_harvest: u32,
    /// Records accumulated before a batch is submitted
    pub min_batch_size: usize,
    /// Retry cadence of the submission guard, in milliseconds
    pub analysis_retry_time: u64,
    /// Busy retries tolerated before a submission is abandoned
    pub retry_cap: u32,
    /// Size of the latency window averaged by the evaluator (N)
    pub number_of_times_for_analysis_avg: usize,
    /// Key of the analysis holder queried before each analysis
    #[serde(deserialize_with = "string_or_number")]
    pub analysis_holder_id: String,
    #[serde(flatten)]
    pub contracts: ContractNames,
}

impl Default for EscConfig {
    fn default() -> Self {
        Self {
            chaincode_name: "analytics_chaincode".to_string(),
            results_path: PathBuf::from("./results"),
            experiment_name: "test".to_string(),
            execution_time: 60.0,
            analysis_frequency: 5.0,
            harvest_frequency: 1.0,
            analysis_start_delay: 15.0,
            harvest_start_delay: 0.0,
            data_time_limit: 30.0,
            frequency_control_calculate: 5,
            maximum_time_analysis: 100.0,
            minimum_time_analysis: 50.0,
            elasticity_mode: ElasticityMode::TimeWindow,
            data_per_harvest: 1,
            min_batch_size: 1,
            analysis_retry_time: 500,
            retry_cap: 10,
            number_of_times_for_analysis_avg: 5,
            analysis_holder_id: "1".to_string(),
            contracts: ContractNames::default(),
        }
    }
}

impl EscConfig {
    /// Instance key used in logs, metrics and the runtime registry
    pub fn key(&self) -> &str {
        &self.chaincode_name
    }

    pub fn execution_time(&self) -> Duration {
        secs(self.execution_time)
    }

    pub fn analysis_period(&self) -> Duration {
        secs(self.analysis_frequency)
    }

    pub fn harvest_period(&self) -> Duration {
        secs(self.harvest_frequency)
    }

    pub fn analysis_start_delay(&self) -> Duration {
        secs(self.analysis_start_delay)
    }

    pub fn harvest_start_delay(&self) -> Duration {
        secs(self.harvest_start_delay)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_retry_time)
    }

    /// Check the values a run cannot proceed without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chaincode_name.is_empty() {
            return Err(ConfigError::Empty {
                field: "chaincodeName",
            });
        }
        if self.experiment_name.is_empty() {
            return Err(ConfigError::Empty {
                field: "experimentName",
            });
        }

        let positive = [
            ("executionTime", self.execution_time),
            ("analysisFrequency", self.analysis_frequency),
            ("harvestFrequency", self.harvest_frequency),
            ("dataTimeLimit", self.data_time_limit),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::NotPositive { field });
            }
        }

        if self.frequency_control_calculate == 0 {
            return Err(ConfigError::NotPositive {
                field: "frequencyControlCalculate",
            });
        }
        if self.number_of_times_for_analysis_avg == 0 {
            return Err(ConfigError::NotPositive {
                field: "numberOfTimesForAnalysisAvg",
            });
        }
        if self.min_batch_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "minBatchSize",
            });
        }
        if self.analysis_retry_time == 0 {
            return Err(ConfigError::NotPositive {
                field: "analysisRetryTime",
            });
        }
        if self.minimum_time_analysis > self.maximum_time_analysis {
            return Err(ConfigError::InvertedAnalysisBounds {
                min: self.minimum_time_analysis,
                max: self.maximum_time_analysis,
            });
        }

        Ok(())
    }
}

/// Template files write the holder id as a number
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}

/// Seconds to `Duration`, treating negative or non-finite input as zero
pub(crate) fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}
