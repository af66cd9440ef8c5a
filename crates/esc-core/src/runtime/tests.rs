//! End-to-end runs against the simulated ledger, in paused time

use super::*;
use crate::config::ElasticityMode;
use crate::ledger::SimulatedLedger;
use crate::recorder::{date_tag, ResultPaths, CALCULATIONS_HEADER};
use crate::source::EmptySource;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

fn config(dir: &TempDir, key: &str) -> EscConfig {
    EscConfig {
        chaincode_name: key.to_string(),
        results_path: dir.path().to_path_buf(),
        experiment_name: key.to_string(),
        execution_time: 60.0,
        harvest_frequency: 1.0,
        analysis_frequency: 5.0,
        analysis_start_delay: 0.25,
        frequency_control_calculate: 5,
        ..Default::default()
    }
}

fn ledger_for(config: &EscConfig, latency: Duration) -> SimulatedLedger {
    SimulatedLedger::builder()
        .submit_latency(latency)
        .auto_events(true)
        .with_esc_contracts(config)
        .build()
}

fn runtime() -> EscRuntime {
    EscRuntime::new(EscMetrics::new(), HealthRegistry::new())
}

fn paths(config: &EscConfig) -> ResultPaths {
    ResultPaths::new(
        &config.results_path,
        &config.experiment_name,
        &date_tag(&chrono::Local::now()),
    )
}

#[tokio::test(start_paused = true)]
async fn test_fixed_mode_run_submits_one_update_per_second() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, "fixed");
    let ledger = ledger_for(&config, Duration::ZERO);
    let runtime = runtime();

    runtime
        .spawn(config.clone(), Arc::new(ledger.clone()), Arc::new(EmptySource))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(60_200)).await;
    let snapshot = runtime.snapshot().await;
    assert_eq!(snapshot[0].updates_issued, 60);

    runtime.wait_all().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(ledger.submissions_for("updateData").await.len(), 60);
    // Twelve analyses; eleven complete before the evaluator stops at 60.1s
    assert_eq!(ledger.submissions_for("analysis").await.len(), 12);
    assert_eq!(ledger.evaluations_for("evaluateHistory").await.len(), 2);
    assert!(runtime.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_submissions_never_overlap_under_latency() {
    let dir = TempDir::new().unwrap();
    let config = EscConfig {
        execution_time: 20.0,
        ..config(&dir, "contended")
    };
    let ledger = ledger_for(&config, Duration::from_millis(400));
    let runtime = runtime();

    runtime
        .spawn(config, Arc::new(ledger.clone()), Arc::new(EmptySource))
        .await
        .unwrap();
    runtime.wait_all().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(ledger.max_concurrent_submissions(), 1);
    assert!(ledger.submissions_for("analysis").await.len() >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_harvest_frequency_change_slows_harvesting() {
    let dir = TempDir::new().unwrap();
    let config = EscConfig {
        elasticity_mode: ElasticityMode::HarvestFrequency,
        frequency_control_calculate: 2,
        ..config(&dir, "adaptive")
    };
    let ledger = ledger_for(&config, Duration::ZERO);
    ledger.set_evaluate_response("evaluateFrequency", json!(10));
    let runtime = runtime();

    runtime
        .spawn(config, Arc::new(ledger.clone()), Arc::new(EmptySource))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(12)).await;

    let snapshot = runtime.snapshot().await;
    assert_eq!(snapshot[0].harvest_frequency, 10.0);
    assert_eq!(snapshot[0].pending_frequency, None);

    runtime.wait_all().await;
    // Harvests at 1..=10s, the 11s tick restarts the loop, then 21, 31, 41 and 51s
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(ledger.submissions_for("updateData").await.len(), 14);
}

#[tokio::test(start_paused = true)]
async fn test_time_window_change_reaches_next_analysis() {
    let dir = TempDir::new().unwrap();
    let config = EscConfig {
        execution_time: 40.0,
        frequency_control_calculate: 1,
        ..config(&dir, "window")
    };
    let ledger = ledger_for(&config, Duration::ZERO);
    ledger.set_evaluate_response("evaluateHistory", json!(45));
    let runtime = runtime();

    runtime
        .spawn(config, Arc::new(ledger.clone()), Arc::new(EmptySource))
        .await
        .unwrap();
    runtime.wait_all().await;

    let windows: Vec<f64> = ledger
        .submissions_for("analysis")
        .await
        .iter()
        .map(|s| serde_json::from_str::<serde_json::Value>(&s.args[0]).unwrap()["timeData"].as_f64().unwrap())
        .collect();
    assert_eq!(windows[0], 30.0);
    assert!(windows[1..].iter().all(|w| *w == 45.0));
}

#[tokio::test(start_paused = true)]
async fn test_result_files_written_after_run() {
    let dir = TempDir::new().unwrap();
    let config = EscConfig {
        execution_time: 20.0,
        ..config(&dir, "results")
    };
    let ledger = ledger_for(&config, Duration::ZERO);
    let runtime = runtime();

    runtime
        .spawn(config.clone(), Arc::new(ledger.clone()), Arc::new(EmptySource))
        .await
        .unwrap();
    runtime.wait_all().await;

    let paths = paths(&config);
    let calculations = std::fs::read_to_string(&paths.calculations).unwrap();
    assert_eq!(calculations.lines().next(), Some(CALCULATIONS_HEADER));
    // Analyses at 5.25, 10.25, 15.25 and 20.25s, all completed before the flush
    assert_eq!(calculations.lines().count(), 1 + 4);

    let harvest = std::fs::read_to_string(&paths.harvest).unwrap();
    assert_eq!(harvest.lines().count(), 1 + 20);
    assert!(paths.experiment.exists());
}

#[tokio::test(start_paused = true)]
async fn test_stop_flushes_early() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, "stopped");
    let ledger = ledger_for(&config, Duration::ZERO);
    let runtime = runtime();

    runtime
        .spawn(config.clone(), Arc::new(ledger.clone()), Arc::new(EmptySource))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(3_200)).await;
    assert!(runtime.stop("stopped"));
    assert!(!runtime.stop("unknown"));

    let started = tokio::time::Instant::now();
    runtime.wait_all().await;
    assert!(started.elapsed() < Duration::from_secs(1));

    let harvest = std::fs::read_to_string(&paths(&config).harvest).unwrap();
    assert_eq!(harvest.lines().count(), 1 + 2);
}

#[tokio::test(start_paused = true)]
async fn test_instances_are_independent() {
    let dir = TempDir::new().unwrap();
    let fast = EscConfig {
        execution_time: 10.0,
        ..config(&dir, "fast")
    };
    let slow = EscConfig {
        execution_time: 10.0,
        harvest_frequency: 2.0,
        ..config(&dir, "slow")
    };
    let fast_ledger = ledger_for(&fast, Duration::ZERO);
    let slow_ledger = ledger_for(&slow, Duration::ZERO);
    let runtime = runtime();

    runtime
        .spawn(fast.clone(), Arc::new(fast_ledger.clone()), Arc::new(EmptySource))
        .await
        .unwrap();
    runtime
        .spawn(slow, Arc::new(slow_ledger.clone()), Arc::new(EmptySource))
        .await
        .unwrap();

    let duplicate = runtime
        .spawn(fast, Arc::new(fast_ledger.clone()), Arc::new(EmptySource))
        .await;
    assert!(matches!(duplicate, Err(EscError::DuplicateInstance(key)) if key == "fast"));

    let keys: Vec<String> = runtime.snapshot().await.into_iter().map(|s| s.key).collect();
    assert_eq!(keys, vec!["fast", "slow"]);

    runtime.wait_all().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(fast_ledger.submissions_for("updateData").await.len(), 10);
    assert_eq!(slow_ledger.submissions_for("updateData").await.len(), 5);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = EscConfig {
        analysis_frequency: 0.0,
        ..config(&dir, "broken")
    };
    let ledger = SimulatedLedger::new();
    let runtime = runtime();

    let result = runtime
        .spawn(config, Arc::new(ledger), Arc::new(EmptySource))
        .await;

    assert!(matches!(result, Err(EscError::Config(_))));
    assert!(runtime.is_empty());
}
