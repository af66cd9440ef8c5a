//! ESC agent - Elastic smart contract runner
//!
//! Runs the configured ESC instances against a ledger gateway, or the
//! in-process simulated ledger, and serves health, metrics and status
//! over HTTP until every instance has completed its run.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use esc_core::{
    health::components, DataSource, EmptySource, EscConfig, EscMetrics, EscRuntime,
    GatewayLedger, HealthRegistry, HttpSource, Ledger, LedgerError, SimulatedLedger,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

use config::{AgentConfig, GatewaySettings};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "esc-agent")]
#[command(about = "Runs elastic smart contract instances", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true, env = "ESC_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every configured ESC and serve the HTTP API
    Start {
        /// Run against the in-process simulated ledger
        #[arg(long)]
        simulate: bool,
    },
    /// Create the data and calculation storage of every configured ESC
    InitStorage,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = AgentConfig::load(cli.config.as_deref())?;
    info!(
        version = AGENT_VERSION,
        instances = config.escs.len(),
        "Agent configured"
    );

    match cli.command {
        Commands::Start { simulate } => start(config, simulate).await,
        Commands::InitStorage => {
            let gateway = config.gateway.clone();
            esc_core::init_storage(&config.escs, |esc| {
                let ledger = GatewayLedger::new(gateway.for_chaincode(&esc.chaincode_name))?;
                Ok(Arc::new(ledger) as Arc<dyn Ledger>)
            })
            .await
            .context("storage initialization failed")
        }
    }
}

/// Ledger handle for one instance; gateway ledgers start polling events
fn connect(
    gateway: &GatewaySettings,
    esc: &EscConfig,
    simulate: bool,
) -> Result<Arc<dyn Ledger>, LedgerError> {
    if simulate {
        let ledger = SimulatedLedger::builder()
            .auto_events(true)
            .with_esc_contracts(esc)
            .build();
        return Ok(Arc::new(ledger));
    }

    let ledger = GatewayLedger::new(gateway.for_chaincode(&esc.chaincode_name))?;
    ledger.start_event_poller();
    Ok(Arc::new(ledger))
}

async fn start(config: AgentConfig, simulate: bool) -> Result<()> {
    let health_registry = HealthRegistry::new();

    let metrics = EscMetrics::new();
    let runtime = Arc::new(EscRuntime::new(metrics, health_registry.clone()));

    let source: Arc<dyn DataSource> = match &config.sensor_url {
        Some(url) => Arc::new(HttpSource::new(url, config.sensor_timeout())?),
        None => Arc::new(EmptySource),
    };

    for esc in &config.escs {
        let ledger = match connect(&config.gateway, esc, simulate) {
            Ok(ledger) => ledger,
            Err(e) => {
                health_registry
                    .set_unhealthy(components::LEDGER, e.to_string())
                    .await;
                return Err(e).with_context(|| format!("failed to connect ESC {}", esc.key()));
            }
        };
        runtime
            .spawn(esc.clone(), ledger, source.clone())
            .await
            .with_context(|| format!("failed to start ESC {}", esc.key()))?;
    }
    health_registry.set_healthy(components::LEDGER).await;
    info!(simulate, instances = runtime.len(), "ESCs started");

    let app_state = Arc::new(api::AppState::new(runtime.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let signals = {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("SIGINT received, stopping ESCs");
                    runtime.stop_all();
                }
                Err(e) => warn!(error = %e, "Failed to listen for SIGINT"),
            }
        })
    };

    runtime.wait_all().await;
    signals.abort();
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
