//! Ledger storage initialization
//!
//! Before the first run against a fresh network every ESC chaincode needs
//! its data storage and calculation storage created.

use crate::config::EscConfig;
use crate::error::LedgerError;
use crate::ledger::Ledger;
use std::sync::Arc;
use tracing::info;

/// Create the storages of every configured ESC, in order
///
/// `connect` returns the ledger handle addressing one ESC's chaincode.
/// Stops at the first failure.
pub async fn init_storage<F>(configs: &[EscConfig], connect: F) -> Result<(), LedgerError>
where
    F: Fn(&EscConfig) -> Result<Arc<dyn Ledger>, LedgerError>,
{
    let total = configs.len();
    for (index, config) in configs.iter().enumerate() {
        let ledger = connect(config)?;
        ledger
            .submit_transaction(&config.contracts.data_storage, &[])
            .await?;
        ledger
            .submit_transaction(&config.contracts.calculation_storage, &[])
            .await?;
        info!(
            esc = %config.key(),
            "Storage {} of {} added",
            index + 1,
            total
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SimulatedLedger;

    #[tokio::test]
    async fn test_creates_both_storages_per_esc() {
        let ledger = SimulatedLedger::new();
        let configs = vec![
            EscConfig {
                chaincode_name: "traffic".to_string(),
                ..Default::default()
            },
            EscConfig {
                chaincode_name: "air".to_string(),
                contracts: crate::config::ContractNames {
                    data_storage: "createStation".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        ];

        let shared = ledger.clone();
        init_storage(&configs, move |_| Ok(Arc::new(shared.clone()) as Arc<dyn Ledger>))
            .await
            .unwrap();

        let contracts: Vec<String> = ledger
            .submissions()
            .await
            .into_iter()
            .map(|s| s.contract)
            .collect();
        assert_eq!(
            contracts,
            vec![
                "createSensor",
                "calculationStorage",
                "createStation",
                "calculationStorage"
            ]
        );
    }

    #[tokio::test]
    async fn test_stops_on_first_failure() {
        let ledger = SimulatedLedger::new();
        ledger.fail_next_submits(1);
        let configs = vec![EscConfig::default(), EscConfig::default()];

        let shared = ledger.clone();
        let result =
            init_storage(&configs, move |_| Ok(Arc::new(shared.clone()) as Arc<dyn Ledger>)).await;

        assert!(matches!(result, Err(LedgerError::Transaction { .. })));
        assert_eq!(ledger.submissions().await.len(), 1);
    }
}
