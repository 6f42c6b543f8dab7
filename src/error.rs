use polars::prelude::PolarsError;
use thiserror::Error;

/// Errors surfaced by the cleaning and hypothesis-testing pipeline.
///
/// `Schema` and `EmptyResult` abort the whole run; `InsufficientData` fails
/// only the test that raised it.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("schema violation: {detail}")]
    Schema { detail: String },
    #[error("cleaning removed every row from the dataset")]
    EmptyResult,
    #[error("group {group:?} has {observed} observations, at least {required} required")]
    InsufficientData {
        group: String,
        observed: usize,
        required: usize,
    },
    #[error(transparent)]
    Polars(#[from] PolarsError),
    #[error("invalid distribution parameters: {0}")]
    Distribution(#[from] statrs::StatsError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Report(#[from] serde_json::Error),
}

impl AnalysisError {
    pub fn schema(detail: impl Into<String>) -> Self {
        AnalysisError::Schema {
            detail: detail.into(),
        }
    }
}
