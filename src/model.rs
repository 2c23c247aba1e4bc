//! RFM scoring model
//!
//! Scoring runs in two phases. [`RfmAggregate::from_transactions`] groups the
//! whole cleaned frame by customer and computes the quartile thresholds of
//! each metric over that population; [`RfmAggregate::score`] then classifies
//! every customer against those thresholds and assigns a segment.

use chrono::NaiveDate;
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::{epoch_days_to_date, string_values, CleanTable, TransactionTable, AMOUNT, CUSTOMER_ID, DATE};
use crate::error::{AnalysisError, AnalysisResult};
use crate::quartile::{quartile_exprs, QuartileThresholds};
use crate::segment::segment_for_code;

/// Column order of [`RfmAggregate::metrics_matrix`]
pub const METRIC_COLUMNS: [&str; 3] = ["recency", "frequency", "monetary_value"];

const LAST_DAY: &str = "last_day";
const SEGMENT: &str = "segment";
const CUSTOMER_COUNT: &str = "customer_count";

/// Unscored per-customer metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerMetrics {
    pub customer_id: String,
    /// Days between the dataset's latest transaction and this customer's last one
    pub recency: i64,
    pub frequency: usize,
    pub monetary_value: f64,
}

/// One threshold triple per metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RfmThresholds {
    pub recency: QuartileThresholds,
    pub frequency: QuartileThresholds,
    pub monetary: QuartileThresholds,
}

/// Output of the population-wide aggregation phase
#[derive(Debug, Clone)]
pub struct RfmAggregate {
    /// Sorted by customer id
    pub customers: Vec<CustomerMetrics>,
    /// Latest transaction date across the whole dataset
    pub latest_date: NaiveDate,
    pub thresholds: RfmThresholds,
}

impl RfmAggregate {
    /// Aggregate cleaned transactions into per-customer metrics and thresholds
    ///
    /// # Errors
    /// * `EmptyDataset` if no rows survived cleaning or none of them is dated
    /// * `UndatedCustomer` if some customer has no dated transaction
    pub fn from_transactions(table: &CleanTable) -> AnalysisResult<Self> {
        if table.is_empty() {
            return Err(AnalysisError::empty("no transactions left after cleaning"));
        }

        let frame = table.frame();
        let latest_day = frame
            .column(DATE)?
            .cast(&DataType::Int32)?
            .i32()?
            .max()
            .ok_or_else(|| AnalysisError::empty("no cleaned transaction carries a date"))?;
        let latest_date = epoch_days_to_date(latest_day)
            .ok_or_else(|| AnalysisError::empty("latest transaction date is out of range"))?;

        // max() skips nulls, so undated rows never become a customer's last day
        let metrics = frame
            .clone()
            .lazy()
            .group_by([col(CUSTOMER_ID)])
            .agg([
                col(DATE).cast(DataType::Int32).max().alias(LAST_DAY),
                col(AMOUNT).len().alias("frequency"),
                col(AMOUNT).sum().alias("monetary_value"),
            ])
            .with_columns([(lit(latest_day) - col(LAST_DAY))
                .cast(DataType::Int64)
                .alias("recency")])
            .sort([CUSTOMER_ID], SortMultipleOptions::default())
            .collect()?;

        let customers = customer_metrics(&metrics)?;

        let quartiles = metrics
            .lazy()
            .select(METRIC_COLUMNS.iter().flat_map(|c| quartile_exprs(c)).collect::<Vec<_>>())
            .collect()?;
        let thresholds = RfmThresholds {
            recency: QuartileThresholds::from_quartile_row(&quartiles, "recency")?,
            frequency: QuartileThresholds::from_quartile_row(&quartiles, "frequency")?,
            monetary: QuartileThresholds::from_quartile_row(&quartiles, "monetary_value")?,
        };

        log::info!(
            "aggregated {} customers, latest transaction {}",
            customers.len(),
            latest_date
        );
        log::debug!("quartile thresholds: {:?}", thresholds);

        Ok(Self {
            customers,
            latest_date,
            thresholds,
        })
    }

    /// Raw metrics as an (n_customers, 3) matrix in [`METRIC_COLUMNS`] order
    pub fn metrics_matrix(&self) -> Array2<f64> {
        let mut matrix = Array2::zeros((self.customers.len(), METRIC_COLUMNS.len()));
        for (mut row, c) in matrix.outer_iter_mut().zip(&self.customers) {
            row[0] = c.recency as f64;
            row[1] = c.frequency as f64;
            row[2] = c.monetary_value;
        }
        matrix
    }

    /// Classify every customer against the population thresholds
    pub fn score(self) -> AnalysisResult<RfmAnalysis> {
        let t = self.thresholds;
        let customers: Vec<ScoredCustomer> = self
            .customers
            .into_iter()
            .map(|m| {
                let r_quartile = t.recency.classify(m.recency as f64);
                let f_quartile = t.frequency.classify(m.frequency as f64);
                let m_quartile = t.monetary.classify(m.monetary_value);
                let rfm_code = format!("{r_quartile}{f_quartile}{m_quartile}");
                let segment = segment_for_code(&rfm_code).to_string();

                ScoredCustomer {
                    customer_id: m.customer_id,
                    recency: m.recency,
                    frequency: m.frequency,
                    monetary_value: m.monetary_value,
                    r_quartile,
                    f_quartile,
                    m_quartile,
                    rfm_code,
                    segment,
                }
            })
            .collect();

        let segments = segment_counts(&customers)?;
        Ok(RfmAnalysis {
            customers,
            latest_date: self.latest_date,
            thresholds: t,
            segments,
        })
    }
}

/// Pull the per-customer rows out of the grouped metrics frame
fn customer_metrics(metrics: &DataFrame) -> AnalysisResult<Vec<CustomerMetrics>> {
    let ids = string_values(metrics.column(CUSTOMER_ID)?)?;
    let recency = metrics.column("recency")?.i64()?.clone();
    let frequency = metrics.column("frequency")?.cast(&DataType::UInt64)?;
    let monetary = metrics.column("monetary_value")?.f64()?.clone();

    ids.into_iter()
        .zip(recency.into_iter())
        .zip(frequency.u64()?.into_iter())
        .zip(monetary.into_iter())
        .map(|(((customer_id, recency), frequency), monetary_value)| {
            let customer_id = customer_id.unwrap_or_default();
            let recency = recency.ok_or_else(|| AnalysisError::UndatedCustomer {
                customer_id: customer_id.clone(),
            })?;
            Ok(CustomerMetrics {
                customer_id,
                recency,
                frequency: frequency.unwrap_or_default() as usize,
                monetary_value: monetary_value.unwrap_or_default(),
            })
        })
        .collect()
}

/// A customer with quartile classes and segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCustomer {
    pub customer_id: String,
    pub recency: i64,
    pub frequency: usize,
    pub monetary_value: f64,
    #[serde(rename = "R_quartile")]
    pub r_quartile: u8,
    #[serde(rename = "F_quartile")]
    pub f_quartile: u8,
    #[serde(rename = "M_quartile")]
    pub m_quartile: u8,
    #[serde(rename = "RFM_code")]
    pub rfm_code: String,
    pub segment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentCount {
    pub segment: String,
    pub customer_count: usize,
}

/// Compact projection of a scored customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RfmSummaryRow<'a> {
    pub customer_id: &'a str,
    #[serde(rename = "RFM_code")]
    pub rfm_code: &'a str,
    pub segment: &'a str,
}

/// Scored customer table plus its segment roll-up
#[derive(Debug, Clone, Serialize)]
pub struct RfmAnalysis {
    pub customers: Vec<ScoredCustomer>,
    pub latest_date: NaiveDate,
    pub thresholds: RfmThresholds,
    /// Sorted by segment name
    pub segments: Vec<SegmentCount>,
}

impl RfmAnalysis {
    /// Clean, aggregate and score in one call
    pub fn run(table: &TransactionTable) -> AnalysisResult<Self> {
        let cleaned = table.clean()?;
        RfmAggregate::from_transactions(&cleaned)?.score()
    }

    pub fn customer_count(&self) -> usize {
        self.customers.len()
    }

    /// Ids of the customers in `segment`; empty for an unknown segment
    pub fn find_customers(&self, segment: &str) -> Vec<&str> {
        self.customers
            .iter()
            .filter(|c| c.segment == segment)
            .map(|c| c.customer_id.as_str())
            .collect()
    }

    pub fn summary_view(&self) -> Vec<RfmSummaryRow<'_>> {
        self.customers
            .iter()
            .map(|c| RfmSummaryRow {
                customer_id: &c.customer_id,
                rfm_code: &c.rfm_code,
                segment: &c.segment,
            })
            .collect()
    }
}

/// Count customers per segment, sorted by segment name
pub fn segment_counts(customers: &[ScoredCustomer]) -> AnalysisResult<Vec<SegmentCount>> {
    let segments: Vec<&str> = customers.iter().map(|c| c.segment.as_str()).collect();
    let counts = DataFrame::new(vec![Series::new(SEGMENT, segments)])?
        .lazy()
        .group_by([col(SEGMENT)])
        .agg([len().alias(CUSTOMER_COUNT)])
        .sort([SEGMENT], SortMultipleOptions::default())
        .collect()?;

    let names = string_values(counts.column(SEGMENT)?)?;
    let sizes = counts.column(CUSTOMER_COUNT)?.cast(&DataType::UInt64)?;

    Ok(names
        .into_iter()
        .zip(sizes.u64()?.into_iter())
        .filter_map(|(segment, n)| {
            Some(SegmentCount {
                segment: segment?,
                customer_count: n? as usize,
            })
        })
        .collect())
}
