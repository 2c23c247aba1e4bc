//! Command-line interface definitions and argument parsing

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::cohort::Granularity;
use crate::data::ColumnNames;

/// Customer segmentation CLI: RFM scoring and cohort retention
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Score customers by recency, frequency and monetary value
    Rfm(RfmArgs),
    /// Compute cohort retention rates
    Cohort(CohortArgs),
}

/// Input file and column names shared by both pipelines
#[derive(ClapArgs, Debug, Clone)]
pub struct InputArgs {
    /// Path to the input CSV file
    #[arg(short, long, default_value = "data.csv")]
    pub input: String,

    /// Column identifying the customer
    #[arg(long, default_value = "CustomerId")]
    pub customer_col: String,

    /// Column holding the transaction date
    #[arg(long, default_value = "InvoiceDate")]
    pub date_col: String,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RfmArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Column holding the transaction amount
    #[arg(long, default_value = "Amount")]
    pub amount_col: String,

    /// List the customers of this segment
    #[arg(short, long)]
    pub segment: Option<String>,

    /// Print the scored customer table as JSON
    #[arg(long)]
    pub json: bool,

    /// Write segment charts to <PREFIX>_segments_bar.svg and <PREFIX>_segments_pie.svg
    #[arg(short, long, value_name = "PREFIX")]
    pub plot: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CohortArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Cohort period length
    #[arg(short, long, value_enum, default_value_t = Granularity::Month)]
    pub granularity: Granularity,

    /// Print the retention matrix as JSON
    #[arg(long)]
    pub json: bool,

    /// Write a retention heatmap SVG to this path
    #[arg(short, long)]
    pub plot: Option<String>,
}

impl InputArgs {
    /// Column configuration for the loader
    ///
    /// `amount_col` is `None` for pipelines that never read amounts.
    pub fn column_names(&self, amount_col: Option<&str>) -> crate::Result<ColumnNames> {
        let columns = ColumnNames {
            customer_id: self.customer_col.trim().to_string(),
            date: self.date_col.trim().to_string(),
            amount: amount_col.map(|a| a.trim().to_string()),
        };

        let mut names = vec![&columns.customer_id, &columns.date];
        names.extend(columns.amount.as_ref());

        if names.iter().any(|name| name.is_empty()) {
            anyhow::bail!("Column names must not be empty");
        }
        for (i, name) in names.iter().enumerate() {
            if names[i + 1..].contains(name) {
                anyhow::bail!("Column '{}' is configured for more than one role", name);
            }
        }

        Ok(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_args() -> InputArgs {
        InputArgs {
            input: "test.csv".to_string(),
            customer_col: "CustomerID".to_string(),
            date_col: "InvoiceDate".to_string(),
        }
    }

    #[test]
    fn test_column_names() {
        let mut args = input_args();

        let columns = args.column_names(Some(" Total ")).unwrap();
        assert_eq!(columns.customer_id, "CustomerID");
        assert_eq!(columns.amount.as_deref(), Some("Total"));

        assert!(args.column_names(Some("")).is_err());
        assert!(args.column_names(Some("InvoiceDate")).is_err());

        args.date_col = "CustomerID".to_string();
        assert!(args.column_names(Some("Total")).is_err());
        assert!(args.column_names(None).is_err());
    }

    #[test]
    fn test_column_names_without_amount() {
        let columns = input_args().column_names(None).unwrap();
        assert_eq!(columns.amount, None);
        assert_eq!(columns.date, "InvoiceDate");
    }

    #[test]
    fn test_parse_rfm_command() {
        let args = Args::try_parse_from([
            "segmentforge",
            "rfm",
            "--input",
            "tx.csv",
            "--segment",
            "Best",
            "--json",
        ])
        .unwrap();

        match args.command {
            Command::Rfm(rfm) => {
                assert_eq!(rfm.input.input, "tx.csv");
                assert_eq!(rfm.input.customer_col, "CustomerId");
                assert_eq!(rfm.amount_col, "Amount");
                assert_eq!(rfm.segment.as_deref(), Some("Best"));
                assert!(rfm.json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_cohort_command() {
        let args = Args::try_parse_from([
            "segmentforge",
            "-v",
            "cohort",
            "-i",
            "tx.csv",
            "--granularity",
            "quarter",
        ])
        .unwrap();

        assert!(args.verbose);
        match args.command {
            Command::Cohort(cohort) => assert_eq!(cohort.granularity, Granularity::Quarter),
            other => panic!("unexpected command {other:?}"),
        }

        assert!(Args::try_parse_from(["segmentforge", "cohort", "--granularity", "fortnight"]).is_err());
        // cohorts never read amounts, so there is no flag to name the column
        assert!(Args::try_parse_from(["segmentforge", "cohort", "--amount-col", "Total"]).is_err());
    }
}
