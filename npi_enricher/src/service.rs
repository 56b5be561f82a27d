use reqwest::Client;
use std::{path::Path, sync::Arc};
use uuid::Uuid;

use crate::{
    batch::{BatchOrchestrator, RowLookup},
    config::{BatchConfig, PipelineConfig},
    error::Result,
    models::RowCounts,
    npi::RegistryClient,
    spreadsheet::{SheetFormat, read_input_bytes, read_input_rows, write_output_rows},
    storage::{StoragePaths, TaskFiles},
    store::RecordStore,
    tasks::TaskManager,
};

/// Accepts uploads and runs each one's enrichment in the background.
#[derive(Clone)]
pub struct EnrichmentService {
    paths: StoragePaths,
    tasks: TaskManager,
    registry: Arc<RegistryClient>,
    batch: BatchConfig,
}

impl EnrichmentService {
    pub fn new(
        paths: StoragePaths,
        tasks: TaskManager,
        registry: RegistryClient,
        batch: BatchConfig,
    ) -> Self {
        Self {
            paths,
            tasks,
            registry: Arc::new(registry),
            batch,
        }
    }

    /// Creates the storage directories and record store under `data_dir`.
    pub fn open(data_dir: &Path, http: Client, config: PipelineConfig) -> Result<Self> {
        let paths = StoragePaths::new(data_dir);
        paths.ensure_dirs()?;
        let store = RecordStore::open(&paths.db_path)?;
        Ok(Self::new(
            paths,
            TaskManager::new(store),
            RegistryClient::new(http, config.registry),
            config.batch,
        ))
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    /// Validates and stores an upload, creates its task, and starts processing.
    ///
    /// Returns as soon as the task exists; enrichment continues on a spawned task.
    /// Validation failures return before anything is stored.
    pub async fn submit(&self, original_name: &str, content: Vec<u8>) -> Result<Uuid> {
        let format = SheetFormat::from_file_name(original_name)?;
        let (parsed, content) = tokio::task::spawn_blocking(move || {
            let parsed = read_input_bytes(format, &content).map(|rows| rows.len());
            (parsed, content)
        })
        .await?;
        let row_count = parsed?;

        let files = self.paths.task_files(original_name, format);
        tokio::fs::write(&files.input, &content).await?;
        let input_reference = files.input.display().to_string();

        let upload = self
            .tasks
            .record_upload(original_name, &input_reference, row_count)
            .await?;
        let task = self.tasks.create(upload.id, &input_reference).await?;

        let service = self.clone();
        let task_id = task.id;
        tokio::spawn(async move {
            service.process_task(task_id, files).await;
        });

        Ok(task.id)
    }

    /// Runs the pipeline for one task and records its terminal state.
    pub async fn process_task(&self, task_id: Uuid, files: TaskFiles) {
        let output_reference = files.output.display().to_string();
        let outcome = match enrich_file(
            self.registry.as_ref(),
            BatchOrchestrator::new(self.batch),
            &files.input,
            &files.output,
        )
        .await
        {
            Ok(counts) => self.tasks.complete(task_id, &output_reference, counts).await,
            Err(err) => Err(err),
        };

        if let Err(err) = outcome {
            if let Err(store_err) = self.tasks.fail(task_id, &err.to_string()).await {
                tracing::error!(
                    task_id = %task_id,
                    error = %err,
                    store_error = %store_err,
                    "Could not record task failure"
                );
            }
        }
    }
}

/// Reads `input`, enriches every row, and writes `output` in the format its extension names.
///
/// File reads and writes run on the blocking pool.
pub async fn enrich_file<L: RowLookup>(
    lookup: &L,
    orchestrator: BatchOrchestrator,
    input: &Path,
    output: &Path,
) -> Result<RowCounts> {
    SheetFormat::from_path(output)?;

    let input_path = input.to_path_buf();
    let rows = tokio::task::spawn_blocking(move || read_input_rows(&input_path)).await??;
    tracing::info!(input = %input.display(), rows = rows.len(), "Enriching rows");

    let results = orchestrator.run(lookup, &rows).await;
    let counts = RowCounts::tally(&results);

    let output_path = output.to_path_buf();
    tokio::task::spawn_blocking(move || write_output_rows(&results, &output_path)).await??;

    tracing::info!(
        output = %output.display(),
        total_processed = counts.total_processed,
        total_failed = counts.total_failed,
        "Wrote enriched rows"
    );
    Ok(counts)
}
