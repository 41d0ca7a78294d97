//! One classification request, from loaded table to assembled output.
//!
//! The request moves through `Loaded -> Batched -> Classified -> Assembled`,
//! or ends in `Failed` from any of them. A single failing batch fails the
//! whole request and no output is produced.

use futures::StreamExt;
use metrics::{counter, histogram};
use std::fmt;
use tokio::time::Instant;

use crate::assembler::assemble;
use crate::batcher::split;
use crate::config::BatchConfig;
use crate::engine::Classifier;
use crate::error::PipelineError;
use crate::types::{Batch, ClassificationResult, InputTable, OutputTable, TableContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Loaded,
    Batched,
    Classified,
    Assembled,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Loaded => "loaded",
            PipelineState::Batched => "batched",
            PipelineState::Classified => "classified",
            PipelineState::Assembled => "assembled",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub struct Pipeline<'a> {
    config: BatchConfig,
    classifier: &'a dyn Classifier,
    state: PipelineState,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: BatchConfig, classifier: &'a dyn Classifier) -> Self {
        Self {
            config,
            classifier,
            state: PipelineState::Loaded,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn advance(&mut self, next: PipelineState) {
        tracing::debug!(from = %self.state, to = %next, "Pipeline state change");
        self.state = next;
    }

    /// Runs the request once. The pipeline is spent afterwards: its state is
    /// either `Assembled` or `Failed`.
    #[tracing::instrument(skip_all, fields(rows = table.rows.len(), batch_size = self.config.batch_size))]
    pub async fn run(
        &mut self,
        table: &InputTable,
        context: &TableContext,
    ) -> Result<OutputTable, PipelineError> {
        if self.state != PipelineState::Loaded {
            return Err(PipelineError::Configuration(format!(
                "pipeline already ran and is {}",
                self.state
            )));
        }

        match self.drive(table, context).await {
            Ok(output) => Ok(output),
            Err(err) => {
                counter!("classification_failures_total", "kind" => err.kind()).increment(1);
                tracing::error!(state = %self.state, error = %err, "Classification request failed");
                self.advance(PipelineState::Failed);
                Err(err)
            }
        }
    }

    async fn drive(
        &mut self,
        table: &InputTable,
        context: &TableContext,
    ) -> Result<OutputTable, PipelineError> {
        self.config.validate()?;
        let batches = split(&table.rows, self.config.batch_size)?;
        self.advance(PipelineState::Batched);

        let results = self.classify_batches(context, &batches).await?;
        self.advance(PipelineState::Classified);

        let output = assemble(&table.header, table.rows.len(), &batches, results)?;
        self.advance(PipelineState::Assembled);

        counter!("classification_rows_total").increment(output.len() as u64);
        tracing::info!(rows = output.len(), batches = batches.len(), "Classification completed");
        Ok(output)
    }

    /// Classifies every batch, at most `max_in_flight` at a time. Results are
    /// consumed in batch order, so the first failure in that order wins.
    async fn classify_batches(
        &self,
        context: &TableContext,
        batches: &[Batch<'_>],
    ) -> Result<Vec<Vec<ClassificationResult>>, PipelineError> {
        let total = batches.len();
        let calls: Vec<_> = batches
            .iter()
            .map(|batch| self.classify_batch(context, batch, total))
            .collect();
        let mut pending = futures::stream::iter(calls).buffered(self.config.max_in_flight);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = pending.next().await {
            results.push(result?);
        }
        Ok(results)
    }

    async fn classify_batch(
        &self,
        context: &TableContext,
        batch: &Batch<'_>,
        total: usize,
    ) -> Result<Vec<ClassificationResult>, PipelineError> {
        tracing::info!(
            "Processing batch {}/{} ({} keywords)",
            batch.number + 1,
            total,
            batch.len()
        );
        let started = Instant::now();

        let outcome = self.classifier.classify(context, batch).await;

        counter!("classification_batches_total").increment(1);
        histogram!("classification_batch_duration_seconds").record(started.elapsed().as_secs_f64());

        let results = outcome.map_err(|source| PipelineError::Classification {
            batch: batch.number,
            rows: batch.row_range(),
            source,
        })?;

        if results.len() != batch.len() {
            return Err(PipelineError::MalformedResponse {
                batch: batch.number,
                rows: batch.row_range(),
                expected: batch.len(),
                actual: results.len(),
            });
        }
        Ok(results)
    }
}
