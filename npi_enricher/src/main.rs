use anyhow::{Context, Result};
use clap::Parser;

use npi_enricher::{
    args::{Args, Command, EnrichArgs, ServeArgs},
    batch::BatchOrchestrator,
    constants::{NPPES_API_DOC_URL, NPPES_RATE_LIMIT_NOTICE_URL},
    npi::RegistryClient,
    server,
    service::{EnrichmentService, enrich_file},
};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    tracing::info!(
        rate_limit_notice = NPPES_RATE_LIMIT_NOTICE_URL,
        api_doc = NPPES_API_DOC_URL,
        "NPI API references"
    );

    match args.cmd {
        Command::Serve(cmd) => serve(cmd).await.context("serve failed"),
        Command::Enrich(cmd) => enrich(cmd).await.context("enrich failed"),
    }
}

async fn serve(cmd: ServeArgs) -> Result<()> {
    let http = RegistryClient::build_http_client().context("Failed creating HTTP client")?;
    let service = EnrichmentService::open(&cmd.data_dir, http, cmd.pipeline.to_config())
        .with_context(|| format!("Failed opening data directory {}", cmd.data_dir.display()))?;
    server::run(service, &cmd.host, cmd.port).await
}

async fn enrich(cmd: EnrichArgs) -> Result<()> {
    let config = cmd.pipeline.to_config();
    let http = RegistryClient::build_http_client().context("Failed creating HTTP client")?;
    let registry = RegistryClient::new(http, config.registry);
    let orchestrator = BatchOrchestrator::new(config.batch).with_progress();

    let counts = enrich_file(&registry, orchestrator, &cmd.input, &cmd.output)
        .await
        .with_context(|| format!("Failed enriching {}", cmd.input.display()))?;

    println!(
        "Wrote {} ({} rows, {} failed)",
        cmd.output.display(),
        counts.total_processed,
        counts.total_failed
    );
    Ok(())
}
