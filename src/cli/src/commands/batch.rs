//! Batch commands.
//!
//! Submit files for conversion, follow and steer running batches.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tabled::Tabled;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum BatchCommands {
    /// Submit files (or directories of files) as one batch
    Submit {
        /// Files or directories to convert
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Batch name; records are keyed by batch name and file name
        #[arg(short, long)]
        name: Option<String>,

        /// Most conversions running at once
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Attempts per file, including the first
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Delay between attempts in milliseconds
        #[arg(long)]
        backoff_ms: Option<u64>,

        /// Conversion option passed to the service (repeatable)
        #[arg(long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        /// Wait for the batch to finish and print its summary
        #[arg(short, long)]
        wait: bool,
    },

    /// List batches
    List,

    /// Show a batch and its jobs
    Status {
        /// Batch ID
        batch_id: Uuid,
    },

    /// Stop starting new jobs
    Pause {
        /// Batch ID
        batch_id: Uuid,
    },

    /// Start jobs again after a pause
    Resume {
        /// Batch ID
        batch_id: Uuid,
    },

    /// Withdraw every job that has not started
    Cancel {
        /// Batch ID
        batch_id: Uuid,
    },

    /// Wait for a batch to finish and print its summary
    Wait {
        /// Batch ID
        batch_id: Uuid,
    },

    /// Forget a finished batch
    Remove {
        /// Batch ID
        batch_id: Uuid,
    },
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct FileRequest {
    file_name: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct SubmitRequest {
    name: Option<String>,
    files: Vec<FileRequest>,
    concurrency_limit: Option<usize>,
    max_attempts: Option<u32>,
    backoff_ms: Option<u64>,
    options: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct Counts {
    #[serde(default)]
    pending: usize,
    #[serde(default)]
    queued: usize,
    #[serde(default)]
    running: usize,
    #[serde(default)]
    succeeded: usize,
    #[serde(default)]
    failed: usize,
    #[serde(default)]
    cancelled: usize,
}

impl Counts {
    fn total(&self) -> usize {
        self.pending + self.queued + self.running + self.succeeded + self.failed + self.cancelled
    }

    fn finished(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct JobFailure {
    class: String,
    code: String,
    message: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct JobInfo {
    id: Uuid,
    file_name: String,
    status: String,
    attempt: u32,
    #[serde(default)]
    error: Option<JobFailure>,
}

#[derive(Debug, Deserialize, Serialize)]
struct BatchInfo {
    id: Uuid,
    name: String,
    control_state: String,
    finished: bool,
    counts: Counts,
    #[serde(default)]
    concurrency_limit: usize,
    #[serde(default)]
    max_attempts: u32,
    #[serde(default)]
    backoff_ms: u64,
    submitted_at: String,
    #[serde(default)]
    jobs: Vec<JobInfo>,
}

#[derive(Debug, Deserialize, Serialize, Tabled)]
struct BatchRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Done")]
    progress: String,
    #[tabled(rename = "Failed")]
    failed: usize,
    #[tabled(rename = "Submitted")]
    submitted_at: String,
}

#[derive(Debug, Deserialize, Serialize, Tabled)]
struct JobRow {
    #[tabled(rename = "File")]
    file_name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempt: u32,
    #[tabled(rename = "Error")]
    error: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct JobErrorDetail {
    file_name: String,
    class: String,
    code: String,
    message: String,
    attempts: u32,
}

#[derive(Debug, Deserialize, Serialize)]
struct PersistenceWarning {
    file_name: String,
    message: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct Summary {
    batch_id: Uuid,
    batch_name: String,
    total: usize,
    succeeded: usize,
    failed: usize,
    cancelled: usize,
    #[serde(default)]
    per_job_errors: Vec<JobErrorDetail>,
    #[serde(default)]
    persistence_warnings: Vec<PersistenceWarning>,
    was_cancelled: bool,
    elapsed_ms: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct ControlResponse {
    id: Uuid,
    changed: bool,
    control_state: String,
}

// ── Input ───────────────────────────────────────────────────────────────────

/// Expand paths into `(file name, path)` pairs. Files inside a directory are
/// named by their path relative to it.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry =
                    entry.with_context(|| format!("Failed to walk {}", path.display()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
                files.push((display_name(relative), entry.path().to_path_buf()));
            }
        } else if path.is_file() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| display_name(path));
            files.push((name, path.clone()));
        } else {
            anyhow::bail!("No such file or directory: {}", path.display());
        }
    }

    let mut seen = BTreeSet::new();
    for (name, _) in &files {
        if !seen.insert(name.as_str()) {
            anyhow::bail!("File name {} appears more than once", name);
        }
    }

    Ok(files)
}

fn display_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Parse `key=value` pairs into a JSON object. Values that parse as JSON keep
/// their type; anything else is a string.
fn parse_options(options: &[String]) -> Result<Option<serde_json::Value>> {
    if options.is_empty() {
        return Ok(None);
    }

    let mut map = serde_json::Map::new();
    for option in options {
        let (key, value) = option
            .split_once('=')
            .with_context(|| format!("Option must look like key=value: {}", option))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("Option key cannot be empty: {}", option);
        }
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(Some(serde_json::Value::Object(map)))
}

// ── Rendering ───────────────────────────────────────────────────────────────

fn short_id(id: &Uuid) -> String {
    id.to_string()[..8].to_string()
}

fn print_batch(batch: &BatchInfo) -> Result<()> {
    output::print_header(&format!("Batch: {} ({})", batch.name, batch.id));
    output::print_detail("State", &output::colored_status(&batch.control_state));
    output::print_detail("Finished", &batch.finished.to_string());
    output::print_detail(
        "Progress",
        &format!(
            "{}/{} done, {} running, {} queued",
            batch.counts.finished(),
            batch.counts.total(),
            batch.counts.running,
            batch.counts.queued
        ),
    );
    output::print_detail(
        "Outcomes",
        &format!(
            "{} succeeded, {} failed, {} cancelled",
            batch.counts.succeeded, batch.counts.failed, batch.counts.cancelled
        ),
    );
    output::print_detail(
        "Limits",
        &format!(
            "concurrency {}, {} attempts, {}ms backoff",
            batch.concurrency_limit, batch.max_attempts, batch.backoff_ms
        ),
    );

    let rows: Vec<JobRow> = batch
        .jobs
        .iter()
        .map(|job| JobRow {
            file_name: job.file_name.clone(),
            status: output::colored_status(&job.status),
            attempt: job.attempt,
            error: job
                .error
                .as_ref()
                .map(|e| format!("{} ({}): {}", e.code, e.class, e.message))
                .unwrap_or_default(),
        })
        .collect();

    println!();
    output::print_list(&rows, OutputFormat::Table)
}

fn print_summary(summary: &Summary, format: OutputFormat) -> Result<()> {
    if !matches!(format, OutputFormat::Table) {
        return output::print_item(summary, format);
    }

    output::print_header(&format!("Summary: {}", summary.batch_name));
    output::print_detail("Batch ID", &summary.batch_id.to_string());
    output::print_detail("Total", &summary.total.to_string());
    output::print_detail("Succeeded", &summary.succeeded.to_string());
    output::print_detail("Failed", &summary.failed.to_string());
    output::print_detail("Cancelled", &summary.cancelled.to_string());
    output::print_detail("Elapsed", &format!("{:.1}s", summary.elapsed_ms as f64 / 1000.0));

    for error in &summary.per_job_errors {
        output::print_error(&format!(
            "{}: {} ({}) after {} attempt(s): {}",
            error.file_name, error.code, error.class, error.attempts, error.message
        ));
    }
    for warning in &summary.persistence_warnings {
        output::print_warning(&format!(
            "{}: record not saved: {}",
            warning.file_name, warning.message
        ));
    }

    if summary.was_cancelled {
        output::print_info("Batch was cancelled");
    } else if summary.failed == 0 {
        output::print_success("All files converted");
    }
    Ok(())
}

async fn control(
    client: &ApiClient,
    batch_id: Uuid,
    action: &str,
    format: OutputFormat,
) -> Result<()> {
    let resp: ControlResponse = client
        .post(
            &format!("/api/v1/batches/{}/{}", batch_id, action),
            &serde_json::json!({}),
        )
        .await?;

    match format {
        OutputFormat::Table if resp.changed => output::print_success(&format!(
            "Batch {} is now {}",
            short_id(&resp.id),
            resp.control_state
        )),
        OutputFormat::Table => output::print_info(&format!(
            "Nothing to {}: batch {} is {}",
            action,
            short_id(&resp.id),
            resp.control_state
        )),
        _ => output::print_item(&resp, format)?,
    }
    Ok(())
}

async fn wait(client: &ApiClient, batch_id: Uuid, format: OutputFormat) -> Result<()> {
    if matches!(format, OutputFormat::Table) {
        output::print_info(&format!("Waiting for batch {}...", short_id(&batch_id)));
    }
    let summary: Summary = client
        .get(&format!("/api/v1/batches/{}/summary", batch_id))
        .await?;
    print_summary(&summary, format)
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: BatchCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        BatchCommands::Submit {
            paths,
            name,
            concurrency,
            max_attempts,
            backoff_ms,
            options,
            wait: wait_for_completion,
        } => {
            let options = parse_options(&options)?;
            let mut files = Vec::new();
            for (file_name, path) in collect_files(&paths)? {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                files.push(FileRequest { file_name, content });
            }
            if files.is_empty() {
                anyhow::bail!("No files to submit");
            }

            let body = SubmitRequest {
                name,
                files,
                concurrency_limit: concurrency,
                max_attempts,
                backoff_ms,
                options,
            };
            let batch: BatchInfo = client.post("/api/v1/batches", &body).await?;

            match format {
                OutputFormat::Table => {
                    output::print_success("Batch submitted");
                    output::print_detail("Batch ID", &batch.id.to_string());
                    output::print_detail("Name", &batch.name);
                    output::print_detail("Files", &batch.counts.total().to_string());
                }
                _ if !wait_for_completion => output::print_item(&batch, format)?,
                _ => {}
            }

            if wait_for_completion {
                wait(client, batch.id, format).await?;
            }
        }

        BatchCommands::List => {
            let batches: Vec<BatchInfo> = client.get("/api/v1/batches").await?;

            let rows: Vec<BatchRow> = batches
                .iter()
                .map(|b| BatchRow {
                    id: short_id(&b.id),
                    name: b.name.clone(),
                    state: if b.finished {
                        "finished".to_string()
                    } else {
                        b.control_state.clone()
                    },
                    progress: format!("{}/{}", b.counts.finished(), b.counts.total()),
                    failed: b.counts.failed,
                    submitted_at: b.submitted_at.clone(),
                })
                .collect();

            output::print_list(&rows, format)?;
        }

        BatchCommands::Status { batch_id } => {
            let batch: BatchInfo = client
                .get(&format!("/api/v1/batches/{}", batch_id))
                .await?;

            match format {
                OutputFormat::Table => print_batch(&batch)?,
                _ => output::print_item(&batch, format)?,
            }
        }

        BatchCommands::Pause { batch_id } => control(client, batch_id, "pause", format).await?,
        BatchCommands::Resume { batch_id } => control(client, batch_id, "resume", format).await?,
        BatchCommands::Cancel { batch_id } => control(client, batch_id, "cancel", format).await?,

        BatchCommands::Wait { batch_id } => wait(client, batch_id, format).await?,

        BatchCommands::Remove { batch_id } => {
            let resp: serde_json::Value = client
                .delete(&format!("/api/v1/batches/{}", batch_id))
                .await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Batch {} removed", short_id(&batch_id)))
                }
                _ => output::print_item(&resp, format)?,
            }
        }
    }

    Ok(())
}
