//! SegmentForge: customer segmentation from transaction records
//!
//! Two independent batch pipelines:
//! * RFM scoring: clean transactions, aggregate recency/frequency/monetary
//!   value per customer, classify each metric into quartiles and map the
//!   resulting code to a named segment.
//! * Cohort retention: group customers by the period of their first
//!   transaction and compute the share of each cohort still active N
//!   periods later.

pub mod cli;
pub mod cohort;
pub mod data;
pub mod error;
pub mod model;
pub mod quartile;
pub mod segment;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use cohort::{CohortAnalysis, CohortTable, Granularity, Period, RetentionMatrix};
pub use data::{from_dataframe, load_csv, CleanTable, ColumnNames, Transaction, TransactionTable};
pub use error::{AnalysisError, AnalysisResult};
pub use model::{RfmAggregate, RfmAnalysis, ScoredCustomer, SegmentCount};
pub use quartile::{classify, QuartileThresholds};
pub use segment::segment_for_code;

/// Result type for the application layer (CLI, rendering)
pub type Result<T> = anyhow::Result<T>;
