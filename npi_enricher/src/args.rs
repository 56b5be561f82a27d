use clap::{Parser, Subcommand};
use std::{path::PathBuf, time::Duration};

use crate::{
    config::{BatchConfig, PipelineConfig, RegistryConfig, RetryPolicy},
    constants::{
        DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY, DEFAULT_COOLDOWN_SECS, DEFAULT_MAX_RETRIES,
        DEFAULT_NPI_API_BASE_URL, DEFAULT_NPI_API_VERSION, DEFAULT_REQUEST_TIMEOUT_SECS,
        DEFAULT_RETRY_BASE_DELAY_MS,
    },
};

const DEFAULT_DATA_DIR: &str = "storage";

#[derive(Debug, Parser)]
#[command(name = "npi_enricher")]
#[command(about = "Enrich practitioner name/state spreadsheets with NPPES NPI Registry data")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the upload/status HTTP API; uploads are enriched in the background.
    Serve(ServeArgs),
    /// Enrich one local spreadsheet and exit.
    Enrich(EnrichArgs),
}

#[derive(Debug, Clone, clap::Args)]
pub struct ServeArgs {
    /// Directory holding uploads, outputs and the task database.
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Debug, Clone, clap::Args)]
pub struct EnrichArgs {
    /// Spreadsheet (.xlsx or .csv) with First_Name, Last_Name and State columns.
    #[arg(long)]
    pub input: PathBuf,

    /// Results path; the extension (.xlsx or .csv) picks the format.
    #[arg(long)]
    pub output: PathBuf,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(Debug, Clone, clap::Args)]
pub struct PipelineArgs {
    /// NPI Registry API base URL.
    ///
    /// NPPES reference:
    /// https://npiregistry.cms.hhs.gov/api-page
    #[arg(long, default_value = DEFAULT_NPI_API_BASE_URL)]
    pub api_base_url: String,

    /// NPI API version query parameter.
    #[arg(long, default_value = DEFAULT_NPI_API_VERSION)]
    pub api_version: String,

    /// Rows per batch; a cooldown separates consecutive batches.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Max concurrent in-flight lookups within a batch.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Pause between batches, in seconds.
    #[arg(long, default_value_t = DEFAULT_COOLDOWN_SECS)]
    pub cooldown_secs: u64,

    /// Timeout for a single registry request, in seconds.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    /// Retries after the first failed attempt of a lookup.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Retry n waits n times this delay, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_RETRY_BASE_DELAY_MS)]
    pub retry_base_delay_ms: u64,
}

impl PipelineArgs {
    pub fn to_config(&self) -> PipelineConfig {
        PipelineConfig {
            registry: RegistryConfig {
                api_base_url: self.api_base_url.clone(),
                api_version: self.api_version.clone(),
                request_timeout: Duration::from_secs(self.request_timeout_secs),
                retry: RetryPolicy {
                    max_retries: self.max_retries,
                    base_delay: Duration::from_millis(self.retry_base_delay_ms),
                },
            },
            batch: BatchConfig {
                batch_size: self.batch_size,
                concurrency: self.concurrency,
                cooldown: Duration::from_secs(self.cooldown_secs),
            },
        }
    }
}
