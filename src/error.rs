//! Error taxonomy for a classification request.
//!
//! Every failure aborts the whole request; the error itself is the only
//! diagnostic handed back, so each variant carries the batch number and row
//! range it concerns where one exists.

use std::ops::Range;
use thiserror::Error;

use crate::engine::ClassifierError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A tunable is out of range; nothing was processed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The classifier failed for a batch.
    #[error("classification failed for batch {batch} (rows {}..{}): {source}", .rows.start, .rows.end)]
    Classification {
        batch: usize,
        rows: Range<usize>,
        #[source]
        source: ClassifierError,
    },

    /// The classifier answered with the wrong number of results.
    #[error(
        "malformed response for batch {batch} (rows {}..{}): expected {expected} results, got {actual}",
        .rows.start,
        .rows.end
    )]
    MalformedResponse {
        batch: usize,
        rows: Range<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("assembly error: {0}")]
    Assembly(String),

    #[error("incomplete assembly: {} of {row_count} rows have no classification", .missing.len())]
    IncompleteAssembly { missing: Vec<usize>, row_count: usize },
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Classification { .. } => "classification",
            PipelineError::MalformedResponse { .. } => "malformed_response",
            PipelineError::Assembly(_) => "assembly",
            PipelineError::IncompleteAssembly { .. } => "incomplete_assembly",
        }
    }

    /// Row range of the batch the error concerns, if any.
    pub fn rows(&self) -> Option<Range<usize>> {
        match self {
            PipelineError::Classification { rows, .. }
            | PipelineError::MalformedResponse { rows, .. } => Some(rows.clone()),
            _ => None,
        }
    }
}
