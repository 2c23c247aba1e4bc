//! Transaction loading and cleaning using Polars
//!
//! Input is normalised into a [`TransactionTable`]: a frame with the
//! canonical columns [`CUSTOMER_ID`] (String), [`DATE`] (Date) and, when the
//! caller configured one, [`AMOUNT`] (Float64). Every other input column is
//! carried along under an `attr:` prefix so duplicate detection sees the
//! whole row. Cleaning produces a [`CleanTable`], the only input the RFM
//! aggregation accepts.

use std::path::Path;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};

pub const CUSTOMER_ID: &str = "customer_id";
pub const DATE: &str = "date";
pub const AMOUNT: &str = "amount";
const ATTRIBUTE_PREFIX: &str = "attr:";

/// `NaiveDate::num_days_from_ce` of 1970-01-01, the origin of Polars dates
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Names of the input columns the pipelines read
///
/// The cohort pipeline never looks at amounts, so `amount` may be `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnNames {
    pub customer_id: String,
    pub date: String,
    pub amount: Option<String>,
}

impl ColumnNames {
    pub fn without_amount(customer_id: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            date: date.into(),
            amount: None,
        }
    }
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            customer_id: "CustomerId".to_string(),
            date: "InvoiceDate".to_string(),
            amount: Some("Amount".to_string()),
        }
    }
}

/// A raw input row. Any field may be missing before cleaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub customer_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub amount: Option<f64>,
    /// Remaining input columns, stringified, in input order
    #[serde(default)]
    pub attributes: Vec<Option<String>>,
}

impl Transaction {
    pub fn new(customer_id: &str, date: NaiveDate, amount: f64) -> Self {
        Self {
            customer_id: Some(customer_id.to_string()),
            date: Some(date),
            amount: Some(amount),
            attributes: Vec::new(),
        }
    }
}

/// Raw transaction table as supplied by the loader
#[derive(Debug, Clone)]
pub struct TransactionTable {
    frame: DataFrame,
}

impl TransactionTable {
    /// Build a table from in-memory records
    ///
    /// Attribute lists of different lengths are padded with nulls.
    pub fn from_records(rows: Vec<Transaction>) -> AnalysisResult<Self> {
        let n_attributes = rows.iter().map(|r| r.attributes.len()).max().unwrap_or(0);

        let customer_ids: Vec<Option<&str>> = rows.iter().map(|r| r.customer_id.as_deref()).collect();
        let dates: Vec<Option<NaiveDate>> = rows.iter().map(|r| r.date).collect();
        let amounts: Vec<Option<f64>> = rows.iter().map(|r| r.amount).collect();

        let mut columns = vec![
            Series::new(CUSTOMER_ID, customer_ids),
            date_series(&dates),
            Series::new(AMOUNT, amounts),
        ];
        for i in 0..n_attributes {
            let values: Vec<Option<&str>> = rows
                .iter()
                .map(|r| r.attributes.get(i).and_then(|v| v.as_deref()))
                .collect();
            columns.push(Series::new(&format!("{ATTRIBUTE_PREFIX}{i}"), values));
        }

        Ok(Self {
            frame: DataFrame::new(columns)?,
        })
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

    pub fn has_amount(&self) -> bool {
        self.frame.get_column_names().contains(&AMOUNT)
    }

    /// Read the table back as records
    pub fn records(&self) -> AnalysisResult<Vec<Transaction>> {
        let customer_ids = string_values(self.frame.column(CUSTOMER_ID)?)?;
        let dates = date_values(self.frame.column(DATE)?)?;
        let amounts: Vec<Option<f64>> = if self.has_amount() {
            self.frame.column(AMOUNT)?.f64()?.into_iter().collect()
        } else {
            vec![None; self.len()]
        };
        let attributes = self
            .frame
            .get_columns()
            .iter()
            .filter(|s| s.name().starts_with(ATTRIBUTE_PREFIX))
            .map(string_values)
            .collect::<AnalysisResult<Vec<_>>>()?;

        Ok(customer_ids
            .into_iter()
            .zip(dates)
            .zip(amounts)
            .enumerate()
            .map(|(i, ((customer_id, date), amount))| Transaction {
                customer_id,
                date,
                amount,
                attributes: attributes.iter().map(|col| col[i].clone()).collect(),
            })
            .collect())
    }

    /// Drop rows with a missing or non-finite amount or a missing customer
    /// id, exact duplicate rows, and rows whose amount is not strictly
    /// positive.
    ///
    /// First occurrences are kept and input order is preserved. An empty
    /// result is not an error here; aggregation rejects it.
    ///
    /// # Errors
    /// * `MissingColumn` if the table was loaded without an amount column
    pub fn clean(&self) -> AnalysisResult<CleanTable> {
        if !self.has_amount() {
            return Err(AnalysisError::MissingColumn {
                column: AMOUNT.to_string(),
            });
        }

        let frame = self
            .frame
            .clone()
            .lazy()
            .filter(
                col(CUSTOMER_ID)
                    .is_not_null()
                    .and(col(AMOUNT).is_not_null())
                    .and(col(AMOUNT).is_finite()),
            )
            .unique_stable(None, UniqueKeepStrategy::First)
            .filter(col(AMOUNT).gt(lit(0.0)))
            .collect()?;

        log::info!("cleaning kept {} of {} rows", frame.height(), self.len());
        let undated = frame.column(DATE)?.null_count();
        if undated > 0 {
            log::warn!("{undated} cleaned rows carry no transaction date");
        }

        Ok(CleanTable { frame })
    }
}

/// Transactions that passed cleaning: id present, amount finite and > 0
#[derive(Debug, Clone)]
pub struct CleanTable {
    frame: DataFrame,
}

impl CleanTable {
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }
}

/// Load a transaction CSV
///
/// # Arguments
/// * `path` - Path to the CSV file (header row required)
/// * `columns` - Names of the customer-id, date and (optional) amount columns
///
/// # Returns
/// * `TransactionTable` with canonical column names
pub fn load_csv(path: impl AsRef<Path>, columns: &ColumnNames) -> AnalysisResult<TransactionTable> {
    let path = path.as_ref();
    log::debug!("reading {}", path.display());

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    from_dataframe(&df, columns)
}

/// Convert a Polars frame into a [`TransactionTable`]
///
/// Customer ids are treated as opaque strings. A configured amount column
/// must have a numeric dtype. Null cells become missing fields; a non-empty
/// date cell that cannot be resolved is an error.
///
/// # Arguments
/// * `df` - Input frame with arbitrary column names
/// * `columns` - Which input columns hold the customer id, date and amount
pub fn from_dataframe(df: &DataFrame, columns: &ColumnNames) -> AnalysisResult<TransactionTable> {
    let present = df.get_column_names();
    let required = [Some(&columns.customer_id), Some(&columns.date), columns.amount.as_ref()];
    for name in required.into_iter().flatten() {
        if !present.contains(&name.as_str()) {
            return Err(AnalysisError::MissingColumn {
                column: name.clone(),
            });
        }
    }

    let customer_ids = df
        .column(&columns.customer_id)?
        .cast(&DataType::String)?
        .with_name(CUSTOMER_ID);

    let dates = string_values(df.column(&columns.date)?)?
        .into_iter()
        .enumerate()
        .map(|(row, raw)| match raw {
            None => Ok(None),
            Some(value) if value.trim().is_empty() => Ok(None),
            Some(value) => parse_date(&value)
                .map(Some)
                .ok_or_else(|| AnalysisError::InvalidDate {
                    column: columns.date.clone(),
                    row,
                    value,
                }),
        })
        .collect::<AnalysisResult<Vec<_>>>()?;

    let mut frame_columns = vec![customer_ids, date_series(&dates)];

    if let Some(amount) = &columns.amount {
        let amount_series = df.column(amount)?;
        if !amount_series.dtype().is_numeric() {
            return Err(AnalysisError::InvalidAmount {
                column: amount.clone(),
                dtype: amount_series.dtype().to_string(),
            });
        }
        frame_columns.push(amount_series.cast(&DataType::Float64)?.with_name(AMOUNT));
    }

    let configured = [Some(&columns.customer_id), Some(&columns.date), columns.amount.as_ref()];
    for s in df.get_columns() {
        if !configured.iter().flatten().any(|name| name.as_str() == s.name()) {
            let name = format!("{ATTRIBUTE_PREFIX}{}", s.name());
            frame_columns.push(s.clone().with_name(&name));
        }
    }

    let frame = DataFrame::new(frame_columns)?;
    log::info!("loaded {} transactions", frame.height());
    Ok(TransactionTable { frame })
}

pub(crate) fn date_to_epoch_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

pub(crate) fn epoch_days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

fn date_series(dates: &[Option<NaiveDate>]) -> Series {
    Int32Chunked::from_iter_options(DATE, dates.iter().map(|d| d.map(date_to_epoch_days)))
        .into_date()
        .into_series()
}

/// Values of a Date column
pub(crate) fn date_values(series: &Series) -> AnalysisResult<Vec<Option<NaiveDate>>> {
    let days = series.cast(&DataType::Int32)?;
    Ok(days
        .i32()?
        .into_iter()
        .map(|d| d.and_then(epoch_days_to_date))
        .collect())
}

pub(crate) fn string_values(series: &Series) -> AnalysisResult<Vec<Option<String>>> {
    let cast = series.cast(&DataType::String)?;
    Ok(cast
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_owned))
        .collect())
}

/// Resolve a date or timestamp string to its calendar date
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.date())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::df;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "InvoiceNo,CustomerId,InvoiceDate,Amount,Country").unwrap();
        writeln!(file, "536365,17850,2010-12-01 08:26:00,15.30,United Kingdom").unwrap();
        writeln!(file, "536365,17850,2010-12-01 08:26:00,15.30,United Kingdom").unwrap();
        writeln!(file, "536366,17850,2010-12-01 08:28:00,11.10,United Kingdom").unwrap();
        writeln!(file, "536367,13047,2010-12-01 08:34:00,-22.00,United Kingdom").unwrap();
        writeln!(file, "536368,,2010-12-01 08:34:00,22.00,United Kingdom").unwrap();
        writeln!(file, "536369,12583,2010-12-02 10:00:00,,France").unwrap();
        file
    }

    fn records(table: &TransactionTable) -> Vec<Transaction> {
        table.records().unwrap()
    }

    #[test]
    fn test_load_csv() {
        let file = create_test_csv();
        let table = load_csv(file.path(), &ColumnNames::default()).unwrap();

        assert_eq!(table.len(), 6);
        assert!(table.has_amount());
        let rows = records(&table);
        let first = &rows[0];
        assert_eq!(first.customer_id.as_deref(), Some("17850"));
        assert_eq!(first.date, Some(date(2010, 12, 1)));
        assert_eq!(first.amount, Some(15.30));
        assert_eq!(first.attributes.len(), 2);
        assert_eq!(rows[4].customer_id, None);
        assert_eq!(rows[5].amount, None);
    }

    #[test]
    fn test_clean_applies_all_filters() {
        let file = create_test_csv();
        let cleaned = load_csv(file.path(), &ColumnNames::default())
            .unwrap()
            .clean()
            .unwrap();

        // duplicate, non-positive, missing id and missing amount rows are gone
        assert_eq!(cleaned.len(), 2);
        let amounts: Vec<f64> = cleaned
            .frame()
            .column(AMOUNT)
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(amounts, vec![15.30, 11.10]);
        let ids = string_values(cleaned.frame().column(CUSTOMER_ID).unwrap()).unwrap();
        assert!(ids.iter().all(|id| id.as_deref() == Some("17850")));
    }

    #[test]
    fn test_duplicates_compare_full_row() {
        let mut a = Transaction::new("C1", date(2024, 1, 5), 10.0);
        let mut b = a.clone();
        a.attributes = vec![Some("INV-1".to_string())];
        b.attributes = vec![Some("INV-2".to_string())];
        let table = TransactionTable::from_records(vec![a.clone(), b, a]).unwrap();

        assert_eq!(table.clean().unwrap().len(), 2);
    }

    #[test]
    fn test_clean_keeps_undated_rows() {
        let mut row = Transaction::new("C1", date(2024, 1, 5), 10.0);
        row.date = None;
        let table = TransactionTable::from_records(vec![row]).unwrap();

        let cleaned = table.clean().unwrap();
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned.frame().column(DATE).unwrap().null_count(), 1);
    }

    #[test]
    fn test_clean_drops_non_finite_amounts() {
        let table = TransactionTable::from_records(vec![
            Transaction::new("C1", date(2024, 1, 5), f64::NAN),
            Transaction::new("C2", date(2024, 1, 6), f64::INFINITY),
            Transaction::new("C3", date(2024, 1, 7), f64::INFINITY),
            Transaction::new("C4", date(2024, 1, 8), 12.5),
        ])
        .unwrap();

        let cleaned = table.clean().unwrap();
        assert_eq!(cleaned.len(), 1);
        assert_eq!(
            string_values(cleaned.frame().column(CUSTOMER_ID).unwrap()).unwrap(),
            vec![Some("C4".to_string())]
        );
    }

    #[test]
    fn test_clean_needs_amount_column() {
        let df = df!(
            "CustomerId" => &["C1"],
            "InvoiceDate" => &["2024-01-05"]
        )
        .unwrap();
        let table = from_dataframe(&df, &ColumnNames::without_amount("CustomerId", "InvoiceDate")).unwrap();

        assert!(matches!(table.clean(), Err(AnalysisError::MissingColumn { .. })));
    }

    #[test]
    fn test_missing_column() {
        let df = df!(
            "CustomerId" => &["C1"],
            "InvoiceDate" => &["2024-01-05"]
        )
        .unwrap();

        let err = from_dataframe(&df, &ColumnNames::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingColumn { ref column } if column == "Amount"));
    }

    #[test]
    fn test_amount_column_is_optional() {
        let df = df!(
            "CustomerId" => &["C1", "C2"],
            "InvoiceDate" => &["2024-01-05", "2024-02-01"],
            "Amount" => &["ten", "eleven"]
        )
        .unwrap();

        let table = from_dataframe(&df, &ColumnNames::without_amount("CustomerId", "InvoiceDate")).unwrap();
        assert_eq!(table.len(), 2);
        assert!(!table.has_amount());
        // the text amount column is carried along as an attribute
        assert_eq!(records(&table)[0].attributes, vec![Some("ten".to_string())]);
    }

    #[test]
    fn test_non_numeric_amount() {
        let df = df!(
            "CustomerId" => &["C1"],
            "InvoiceDate" => &["2024-01-05"],
            "Amount" => &["ten"]
        )
        .unwrap();

        let err = from_dataframe(&df, &ColumnNames::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidAmount { .. }));
    }

    #[test]
    fn test_unparseable_date() {
        let df = df!(
            "CustomerId" => &["C1", "C2"],
            "InvoiceDate" => &["2024-01-05", "yesterday"],
            "Amount" => &[1.0, 2.0]
        )
        .unwrap();

        let err = from_dataframe(&df, &ColumnNames::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidDate { row: 1, .. }));
    }

    #[test]
    fn test_custom_column_names() {
        let df = df!(
            "cust" => &[Some(7i64), None],
            "when" => &[Some("2024-03-01"), None],
            "value" => &[Some(3i64), Some(4)]
        )
        .unwrap();
        let columns = ColumnNames {
            customer_id: "cust".into(),
            date: "when".into(),
            amount: Some("value".into()),
        };

        let rows = records(&from_dataframe(&df, &columns).unwrap());
        assert_eq!(rows[0].customer_id.as_deref(), Some("7"));
        assert_eq!(rows[0].date, Some(date(2024, 3, 1)));
        assert_eq!(rows[0].amount, Some(3.0));
        assert_eq!(rows[1].customer_id, None);
        assert_eq!(rows[1].date, None);
        assert!(rows[0].attributes.is_empty());
    }

    #[test]
    fn test_records_round_trip_dates() {
        let rows = vec![
            Transaction::new("C1", date(1969, 12, 31), 1.0),
            Transaction::new("C2", date(2024, 2, 29), 2.0),
        ];
        let table = TransactionTable::from_records(rows.clone()).unwrap();

        assert_eq!(records(&table), rows);
    }

    #[test]
    fn test_epoch_days() {
        assert_eq!(date_to_epoch_days(date(1970, 1, 1)), 0);
        assert_eq!(date_to_epoch_days(date(1970, 1, 2)), 1);
        assert_eq!(epoch_days_to_date(-1), Some(date(1969, 12, 31)));
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2011-12-09"), Some(date(2011, 12, 9)));
        assert_eq!(parse_date("2011-12-09T08:26:00Z"), Some(date(2011, 12, 9)));
        assert_eq!(parse_date("2011-12-09 08:26:00"), Some(date(2011, 12, 9)));
        assert_eq!(parse_date("2011-12-09T08:26:00"), Some(date(2011, 12, 9)));
        assert_eq!(parse_date("12/1/2010 8:26"), Some(date(2010, 12, 1)));
        assert_eq!(parse_date("not a date"), None);
    }
}
