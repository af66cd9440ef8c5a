//! Error types for the ESC core

use thiserror::Error;

pub type EscResult<T> = Result<T, EscError>;

/// Failure reported by a ledger adapter
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The chaincode rejected or failed the transaction
    #[error("transaction `{contract}` failed: {message}")]
    Transaction { contract: String, message: String },

    /// The adapter could not reach the ledger
    #[error("ledger transport error: {0}")]
    Transport(String),

    /// A response or event payload could not be decoded
    #[error("undecodable ledger payload: {0}")]
    Decode(String),
}

impl LedgerError {
    pub fn transaction(contract: &str, message: impl Into<String>) -> Self {
        Self::Transaction {
            contract: contract.to_string(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Invalid instance configuration
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("`{field}` must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("minimumTimeAnalysis ({min}) is above maximumTimeAnalysis ({max})")]
    InvertedAnalysisBounds { min: f64, max: f64 },

    #[error("`{field}` must not be empty")]
    Empty { field: &'static str },
}

/// Startup failures surfaced to the process entry point
#[derive(Debug, Error)]
pub enum EscError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("instance `{0}` is already running")]
    DuplicateInstance(String),
}
