//! Cohort assignment and retention rates
//!
//! Each customer belongs to the cohort of the period holding their first
//! transaction. Every transaction then gets a 1-based cohort index, the
//! number of periods from the cohort period to the transaction period
//! counting both ends. Distinct customers per (cohort, index) are pivoted
//! into a matrix and each row is divided by its index-1 cell.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize, Serializer};

use crate::data::{date_values, string_values, TransactionTable, CUSTOMER_ID, DATE};
use crate::error::{AnalysisError, AnalysisResult};

const TRANSACTION_PERIOD: &str = "transaction_period";
const COHORT_PERIOD: &str = "cohort_period";
const COHORT_INDEX: &str = "cohort_index";
const CUSTOMERS: &str = "customers";

/// Period length used to bucket transactions
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    /// Monday to Sunday
    Week,
    #[default]
    Month,
    Quarter,
    Year,
}

impl Granularity {
    /// Sequential number of the period containing `date`; consecutive
    /// periods have consecutive ordinals.
    pub fn ordinal(self, date: NaiveDate) -> i64 {
        let year = i64::from(date.year());
        let month0 = i64::from(date.month0());
        match self {
            Granularity::Day => i64::from(date.num_days_from_ce()),
            // 0001-01-01 is a Monday
            Granularity::Week => (i64::from(date.num_days_from_ce()) - 1).div_euclid(7),
            Granularity::Month => year * 12 + month0,
            Granularity::Quarter => year * 4 + month0 / 3,
            Granularity::Year => year,
        }
    }
}

/// A calendar period at some granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub granularity: Granularity,
    pub ordinal: i64,
}

impl Period {
    pub fn containing(date: NaiveDate, granularity: Granularity) -> Self {
        Self {
            granularity,
            ordinal: granularity.ordinal(date),
        }
    }

    /// Number of periods from `self` to `later`, counting both ends
    pub fn index_of(&self, later: &Period) -> i64 {
        later.ordinal - self.ordinal + 1
    }

    /// First day of the period
    pub fn start_date(&self) -> Option<NaiveDate> {
        let ymd = |year: i64, month0: i64| {
            NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, u32::try_from(month0 + 1).ok()?, 1)
        };
        match self.granularity {
            Granularity::Day => NaiveDate::from_num_days_from_ce_opt(i32::try_from(self.ordinal).ok()?),
            Granularity::Week => {
                NaiveDate::from_num_days_from_ce_opt(i32::try_from(self.ordinal * 7 + 1).ok()?)
            }
            Granularity::Month => ymd(self.ordinal.div_euclid(12), self.ordinal.rem_euclid(12)),
            Granularity::Quarter => ymd(self.ordinal.div_euclid(4), self.ordinal.rem_euclid(4) * 3),
            Granularity::Year => ymd(self.ordinal, 0),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.granularity {
            Granularity::Month => write!(
                f,
                "{:04}-{:02}",
                self.ordinal.div_euclid(12),
                self.ordinal.rem_euclid(12) + 1
            ),
            Granularity::Quarter => write!(
                f,
                "{}Q{}",
                self.ordinal.div_euclid(4),
                self.ordinal.rem_euclid(4) + 1
            ),
            Granularity::Year => write!(f, "{}", self.ordinal),
            Granularity::Day | Granularity::Week => match self.start_date() {
                Some(start) if self.granularity == Granularity::Day => write!(f, "{start}"),
                Some(start) => write!(f, "{}/{}", start, start + chrono::Duration::days(6)),
                None => write!(f, "{:?}#{}", self.granularity, self.ordinal),
            },
        }
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A transaction tagged with its cohort
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CohortRecord {
    pub customer_id: String,
    pub cohort_period: Period,
    pub transaction_period: Period,
    /// 1 for the acquisition period
    pub cohort_index: u32,
}

/// Transactions with cohort assignment and index
///
/// Backed by a frame with one row per placed transaction: `customer_id`,
/// `transaction_period`, `cohort_period` (period ordinals) and `cohort_index`.
#[derive(Debug, Clone)]
pub struct CohortTable {
    pub granularity: Granularity,
    frame: DataFrame,
}

impl CohortTable {
    /// Assign cohorts over the full table
    ///
    /// Rows without a customer id or a date cannot be placed in a period and
    /// are skipped. Amounts are never read, so the table may lack them.
    ///
    /// # Arguments
    /// * `table` - Raw transactions; duplicates and refunds still count as activity
    /// * `granularity` - Period length used for both cohort and transaction periods
    ///
    /// # Returns
    /// * `CohortTable` with one row per placed transaction, in input order
    ///
    /// # Errors
    /// * `EmptyDataset` if no row has both a customer id and a date
    pub fn assign(table: &TransactionTable, granularity: Granularity) -> AnalysisResult<Self> {
        let source = table.frame();
        let periods: Vec<Option<i64>> = date_values(source.column(DATE)?)?
            .into_iter()
            .map(|d| d.map(|d| granularity.ordinal(d)))
            .collect();

        let frame = DataFrame::new(vec![
            source.column(CUSTOMER_ID)?.clone(),
            Series::new(TRANSACTION_PERIOD, periods),
        ])?
        .lazy()
        .filter(
            col(CUSTOMER_ID)
                .is_not_null()
                .and(col(TRANSACTION_PERIOD).is_not_null()),
        )
        .with_columns([col(TRANSACTION_PERIOD)
            .min()
            .over([col(CUSTOMER_ID)])
            .alias(COHORT_PERIOD)])
        // cohort period is the customer's minimum, so the index is >= 1
        .with_columns([(col(TRANSACTION_PERIOD) - col(COHORT_PERIOD) + lit(1i64)).alias(COHORT_INDEX)])
        .collect()?;

        if frame.height() == 0 {
            return Err(AnalysisError::empty("no transaction has both a customer id and a date"));
        }
        let skipped = table.len() - frame.height();
        if skipped > 0 {
            log::warn!("{skipped} rows without customer id or date left out of cohorts");
        }

        log::info!(
            "assigned {} transactions from {} customers to cohorts",
            frame.height(),
            frame.column(CUSTOMER_ID)?.n_unique()?
        );
        Ok(Self { granularity, frame })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Read the assignment back as records
    pub fn records(&self) -> AnalysisResult<Vec<CohortRecord>> {
        let period = |ordinal: i64| Period {
            granularity: self.granularity,
            ordinal,
        };
        let ids = string_values(self.frame.column(CUSTOMER_ID)?)?;
        let transaction = self.frame.column(TRANSACTION_PERIOD)?.i64()?;
        let cohort = self.frame.column(COHORT_PERIOD)?.i64()?;
        let index = self.frame.column(COHORT_INDEX)?.i64()?;

        Ok(ids
            .into_iter()
            .zip(transaction.into_iter())
            .zip(cohort.into_iter())
            .zip(index.into_iter())
            .filter_map(|(((customer_id, transaction), cohort), index)| {
                Some(CohortRecord {
                    customer_id: customer_id?,
                    cohort_period: period(cohort?),
                    transaction_period: period(transaction?),
                    cohort_index: u32::try_from(index?).ok()?,
                })
            })
            .collect())
    }

    /// Distinct customers per (cohort, index), pivoted
    ///
    /// # Returns
    /// * `CohortCounts` with cohorts in chronological order and one column
    ///   per cohort index up to the largest one observed
    pub fn retention_counts(&self) -> AnalysisResult<CohortCounts> {
        let grouped = self
            .frame
            .clone()
            .lazy()
            .group_by([col(COHORT_PERIOD), col(COHORT_INDEX)])
            .agg([col(CUSTOMER_ID).n_unique().alias(CUSTOMERS)])
            .sort([COHORT_PERIOD, COHORT_INDEX], SortMultipleOptions::default())
            .collect()?;

        let cohort_col = grouped.column(COHORT_PERIOD)?.i64()?;
        let index_col = grouped.column(COHORT_INDEX)?.i64()?;
        let customers = grouped.column(CUSTOMERS)?.cast(&DataType::UInt64)?;

        let mut ordinals: Vec<i64> = cohort_col.into_no_null_iter().collect();
        ordinals.dedup();
        let max_index = index_col.max().unwrap_or(0).max(0) as usize;

        let mut counts = Array2::from_elem((ordinals.len(), max_index), None);
        for ((cohort, index), n) in cohort_col
            .into_iter()
            .zip(index_col.into_iter())
            .zip(customers.u64()?.into_iter())
        {
            let (Some(cohort), Some(index), Some(n)) = (cohort, index, n) else {
                continue;
            };
            let column = (index as usize).checked_sub(1);
            if let (Ok(row), Some(column)) = (ordinals.binary_search(&cohort), column) {
                counts[[row, column]] = Some(n as usize);
            }
        }

        Ok(CohortCounts {
            cohorts: ordinals
                .into_iter()
                .map(|ordinal| Period {
                    granularity: self.granularity,
                    ordinal,
                })
                .collect(),
            counts,
        })
    }
}

/// Distinct customer counts, rows = cohorts, column j = cohort index j + 1
#[derive(Debug, Clone, PartialEq)]
pub struct CohortCounts {
    pub cohorts: Vec<Period>,
    pub counts: Array2<Option<usize>>,
}

impl CohortCounts {
    /// Initial size of each cohort
    pub fn cohort_sizes(&self) -> Vec<Option<usize>> {
        self.counts.column(0).to_vec()
    }
}

/// Retention rates, rows = cohorts, column j = cohort index j + 1
///
/// Cells a cohort has not reached are `None`, never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionMatrix {
    pub cohorts: Vec<Period>,
    pub rates: Array2<Option<f64>>,
}

/// One matrix row in display/serialization form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionRow {
    pub cohort: Period,
    pub rates: Vec<Option<f64>>,
}

impl RetentionMatrix {
    /// Divide each row by its cohort size
    ///
    /// # Arguments
    /// * `counts` - Distinct customer counts from [`CohortTable::retention_counts`]
    ///
    /// # Returns
    /// * `RetentionMatrix` of the same shape; absent counts stay absent
    ///
    /// # Errors
    /// * `EmptyDataset` if there are no cohorts or a cohort has no index-1 count
    pub fn from_counts(counts: &CohortCounts) -> AnalysisResult<Self> {
        if counts.cohorts.is_empty() {
            return Err(AnalysisError::empty("no cohorts to compute retention for"));
        }

        let mut rates = Array2::from_elem(counts.counts.dim(), None);
        for (row, cohort) in counts.cohorts.iter().enumerate() {
            let size = counts.counts[[row, 0]].filter(|&n| n > 0).ok_or_else(|| {
                AnalysisError::empty(format!("cohort {cohort} has no customers at index 1"))
            })?;
            for (col, cell) in counts.counts.row(row).iter().enumerate() {
                rates[[row, col]] = cell.map(|n| n as f64 / size as f64);
            }
        }

        Ok(Self {
            cohorts: counts.cohorts.clone(),
            rates,
        })
    }

    /// Highest cohort index present
    pub fn max_index(&self) -> u32 {
        self.rates.ncols() as u32
    }

    pub fn rate(&self, cohort: &Period, cohort_index: u32) -> Option<f64> {
        let row = self.cohorts.iter().position(|c| c == cohort)?;
        let col = (cohort_index as usize).checked_sub(1)?;
        self.rates.get([row, col]).copied().flatten()
    }

    /// Rates as percentages rounded to `decimals` places
    ///
    /// # Arguments
    /// * `decimals` - Number of decimal places kept after scaling to 0..=100
    pub fn as_percentages(&self, decimals: u32) -> Array2<Option<f64>> {
        let scale = 10f64.powi(decimals as i32);
        self.rates
            .mapv(|cell| cell.map(|r| (r * 100.0 * scale).round() / scale))
    }

    pub fn to_rows(&self) -> Vec<RetentionRow> {
        self.cohorts
            .iter()
            .zip(self.rates.outer_iter())
            .map(|(cohort, row)| RetentionRow {
                cohort: *cohort,
                rates: row.to_vec(),
            })
            .collect()
    }
}

/// Every table the cohort pipeline produces
#[derive(Debug, Clone)]
pub struct CohortAnalysis {
    pub table: CohortTable,
    pub counts: CohortCounts,
    pub retention: RetentionMatrix,
}

impl CohortAnalysis {
    /// Assign cohorts, count distinct customers and divide into retention rates
    ///
    /// # Arguments
    /// * `table` - Raw transactions; only customer id and date are read
    /// * `granularity` - Period length for cohorts and indices
    ///
    /// # Returns
    /// * `CohortAnalysis` holding every intermediate table
    pub fn run(table: &TransactionTable, granularity: Granularity) -> AnalysisResult<Self> {
        let cohort_table = CohortTable::assign(table, granularity)?;
        let counts = cohort_table.retention_counts()?;
        let retention = RetentionMatrix::from_counts(&counts)?;
        log::debug!(
            "retention matrix: {} cohorts x {} periods",
            retention.cohorts.len(),
            retention.max_index()
        );

        Ok(Self {
            table: cohort_table,
            counts,
            retention,
        })
    }
}
