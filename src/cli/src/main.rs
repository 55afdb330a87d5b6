//! `transmute`: command-line client for the conversion batch server.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{batch, config, health};
use output::OutputFormat;

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Submit conversion batches, follow their progress and steer them
#[derive(Parser)]
#[command(name = "transmute", version, propagate_version = true)]
struct Cli {
    /// How results are printed
    #[arg(short, long, global = true, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Server base URL; falls back to `api-url` from the CLI config
    #[arg(long, global = true, env = "TRANSMUTE_API_URL")]
    api_url: Option<String>,

    /// Plain output without ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Batch operations
    #[command(subcommand)]
    Batch(batch::BatchCommands),

    /// Check server health
    Health(health::HealthArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

fn connect(api_url: Option<String>) -> Result<client::ApiClient> {
    let api_url = api_url
        .or_else(config::load_api_url)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    client::ApiClient::new(&api_url)
}

async fn run(cli: Cli) -> Result<()> {
    let format = cli.output;
    match cli.command {
        Commands::Batch(cmd) => batch::execute(cmd, &connect(cli.api_url)?, format).await,
        Commands::Health(args) => health::execute(args, &connect(cli.api_url)?, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
