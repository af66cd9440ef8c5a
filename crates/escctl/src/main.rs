//! Elastic Smart Contract CLI
//!
//! A command-line tool for inspecting running ESC agents and
//! summarizing the result files of finished experiments.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{results, status};
use std::path::PathBuf;

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Elastic Smart Contract CLI
#[derive(Parser)]
#[command(name = "escctl")]
#[command(author, version, about = "CLI for Elastic Smart Contract agents", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via ESCCTL_API_URL env var)
    #[arg(long, env = "ESCCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the ESC instances running on an agent
    Status,

    /// Summarize a calculations result file
    Results {
        /// Calculations CSV written by an agent
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::Config::load()?;
    let format = cli.format.unwrap_or_else(|| settings.output_format());

    match cli.command {
        Commands::Status => {
            let api_url = cli
                .api_url
                .or(settings.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string());
            let client = client::ApiClient::new(&api_url)?;
            status::show_status(&client, format).await?;
        }
        Commands::Results { file } => {
            results::show_results(&file, format).await?;
        }
    }

    Ok(())
}
