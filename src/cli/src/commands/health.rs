//! Health check command.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Also show persistence backend and batch count
    #[arg(short, long)]
    detailed: bool,
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: serde_json::Value = client.get_raw("/health").await?;

    if !matches!(format, OutputFormat::Table) {
        return output::print_item(&health, format);
    }

    let field = |name: &str| health.get(name).and_then(|v| v.as_str());
    let status = field("status").unwrap_or("unknown");

    output::print_header("Server Health");
    output::print_detail("Status", status);
    output::print_detail("API URL", client.base_url());
    if let Some(version) = field("version") {
        output::print_detail("Version", version);
    }
    if let Some(ts) = field("timestamp") {
        output::print_detail("Timestamp", ts);
    }

    if args.detailed {
        if let Some(persistence) = field("persistence") {
            output::print_detail("Persistence", persistence);
        }
        if let Some(batches) = health.get("batches").and_then(|v| v.as_u64()) {
            output::print_detail("Batches", &batches.to_string());
        }
    }

    if status == "healthy" {
        output::print_success("Server is ready");
    } else {
        output::print_warning(&format!("Server status: {}", status));
    }

    Ok(())
}
