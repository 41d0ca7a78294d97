use crate::error::PipelineError;
use crate::types::{Batch, Row};

/// Splits `rows` into contiguous batches of at most `batch_size` rows. The
/// last batch may be shorter; an empty input yields no batches.
pub fn split(rows: &[Row], batch_size: usize) -> Result<Vec<Batch<'_>>, PipelineError> {
    if batch_size == 0 {
        return Err(PipelineError::Configuration(
            "batch_size must be at least 1".to_string(),
        ));
    }

    Ok(rows
        .chunks(batch_size)
        .enumerate()
        .map(|(number, rows)| Batch {
            number,
            start: number * batch_size,
            rows,
        })
        .collect())
}
