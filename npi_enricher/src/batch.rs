use futures::{StreamExt, stream::FuturesUnordered};
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;

use crate::{
    config::BatchConfig,
    models::{InputRow, OutputRow, RowStatus},
};

/// One lookup per input row. Implementations must absorb their own failures and
/// always return at least one row.
pub trait RowLookup: Send + Sync {
    fn lookup(&self, row: &InputRow) -> impl Future<Output = Vec<OutputRow>> + Send;
}

/// Runs lookups in fixed-size batches with bounded concurrency and a cooldown
/// between batches to stay under the registry's rate limit.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    config: BatchConfig,
    progress: ProgressBar,
}

impl BatchOrchestrator {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            progress: ProgressBar::hidden(),
        }
    }

    /// Reports row progress on a terminal progress bar.
    pub fn with_progress(mut self) -> Self {
        let progress = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [NPI {elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        ) {
            progress.set_style(style.progress_chars("=> "));
        }
        progress.set_message("starting lookups");
        self.progress = progress;
        self
    }

    pub async fn run<L: RowLookup>(&self, lookup: &L, rows: &[InputRow]) -> Vec<OutputRow> {
        let batch_size = self.config.batch_size.max(1);
        let batch_count = rows.len().div_ceil(batch_size);
        let mut results = Vec::with_capacity(rows.len());
        let mut failed = 0usize;
        self.progress.set_length(rows.len() as u64);

        for (index, batch) in rows.chunks(batch_size).enumerate() {
            let batch_number = index + 1;
            tracing::info!(
                batch = batch_number,
                batches = batch_count,
                rows = batch.len(),
                "Starting NPI lookup batch"
            );

            let batch_rows = self.run_batch(lookup, batch).await;
            failed += batch_rows
                .iter()
                .filter(|row| row.status == RowStatus::Failed)
                .count();
            results.extend(batch_rows);

            tracing::info!(
                batch = batch_number,
                batches = batch_count,
                output_rows = results.len(),
                failed,
                "Finished NPI lookup batch"
            );

            if batch_number < batch_count && !self.config.cooldown.is_zero() {
                tracing::info!(
                    cooldown_secs = self.config.cooldown.as_secs(),
                    "Cooling down before next batch"
                );
                self.progress.set_message(format!(
                    "cooling down {}s before batch {}",
                    self.config.cooldown.as_secs(),
                    batch_number + 1
                ));
                tokio::time::sleep(self.config.cooldown).await;
            }
        }

        self.progress.finish_with_message(format!(
            "done: output_rows={} failed={failed}",
            results.len()
        ));
        results
    }

    async fn run_batch<L: RowLookup>(&self, lookup: &L, batch: &[InputRow]) -> Vec<OutputRow> {
        let concurrency = self.config.concurrency.max(1);
        let mut queue = batch.iter();
        let mut in_flight = FuturesUnordered::new();

        for _ in 0..concurrency {
            if let Some(row) = queue.next() {
                in_flight.push(lookup.lookup(row));
            }
        }

        let mut out = Vec::with_capacity(batch.len());
        while let Some(rows) = in_flight.next().await {
            out.extend(rows);
            self.progress.inc(1);

            if let Some(row) = queue.next() {
                in_flight.push(lookup.lookup(row));
            }
        }
        out
    }
}
