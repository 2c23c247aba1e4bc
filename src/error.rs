//! Error types for the analysis pipelines

use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("column '{column}' not found in input")]
    MissingColumn { column: String },

    #[error("empty dataset: {context}")]
    EmptyDataset { context: String },

    #[error("amount column '{column}' is not numeric (found {dtype})")]
    InvalidAmount { column: String, dtype: String },

    #[error("row {row}: '{value}' in column '{column}' is not a calendar date")]
    InvalidDate {
        column: String,
        row: usize,
        value: String,
    },

    #[error("customer '{customer_id}' has no dated transactions")]
    UndatedCustomer { customer_id: String },

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

impl AnalysisError {
    pub(crate) fn empty(context: impl Into<String>) -> Self {
        AnalysisError::EmptyDataset {
            context: context.into(),
        }
    }
}

pub type AnalysisResult<T> = std::result::Result<T, AnalysisError>;
