//! SegmentForge: RFM segmentation and cohort retention CLI
//!
//! Entrypoint that loads transactions, runs the selected pipeline and
//! prints or renders its tables.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use segmentforge::cli::{CohortArgs, Command, RfmArgs};
use segmentforge::{load_csv, viz, Args, CohortAnalysis, RfmAnalysis};

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match &args.command {
        Command::Rfm(rfm_args) => run_rfm(rfm_args),
        Command::Cohort(cohort_args) => run_cohort(cohort_args),
    }
}

/// Run the RFM scoring pipeline
fn run_rfm(args: &RfmArgs) -> Result<()> {
    let start_time = Instant::now();
    let columns = args.input.column_names(Some(args.amount_col.as_str()))?;

    let table = load_csv(&args.input.input, &columns)
        .with_context(|| format!("failed to load {}", args.input.input))?;
    let analysis = RfmAnalysis::run(&table)?;
    log::info!(
        "scored {} customers in {:.2}s",
        analysis.customer_count(),
        start_time.elapsed().as_secs_f64()
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&analysis.customers)?);
    } else {
        print_rfm_report(&analysis);
    }

    if let Some(segment) = &args.segment {
        let customers = analysis.find_customers(segment);
        println!("\n=== Customers in {} ({}) ===", segment, customers.len());
        for customer_id in customers {
            println!("{customer_id}");
        }
    }

    if let Some(prefix) = &args.plot {
        for path in viz::generate_segment_report(&analysis, prefix)? {
            println!("Chart saved to: {path}");
        }
    }

    Ok(())
}

fn print_rfm_report(analysis: &RfmAnalysis) {
    let t = &analysis.thresholds;
    println!("=== RFM Analysis ===");
    println!("Customers: {}", analysis.customer_count());
    println!("Latest transaction: {}", analysis.latest_date);

    println!("\nQuartile thresholds:");
    println!("  Metric    |       Q1 |       Q2 |       Q3");
    println!("  ----------|----------|----------|---------");
    for (name, q) in [
        ("Recency", t.recency),
        ("Frequency", t.frequency),
        ("Monetary", t.monetary),
    ] {
        println!("  {:9} | {:8.2} | {:8.2} | {:8.2}", name, q.q1, q.q2, q.q3);
    }

    println!("\n=== Segment Statistics ===");
    let total = analysis.customer_count() as f64;
    for s in &analysis.segments {
        let percentage = s.customer_count as f64 / total * 100.0;
        println!(
            "{:16} {:6} customers ({:.1}%)",
            s.segment, s.customer_count, percentage
        );
    }
}

/// Run the cohort retention pipeline
fn run_cohort(args: &CohortArgs) -> Result<()> {
    let start_time = Instant::now();
    let columns = args.input.column_names(None)?;

    let table = load_csv(&args.input.input, &columns)
        .with_context(|| format!("failed to load {}", args.input.input))?;
    let analysis = CohortAnalysis::run(&table, args.granularity)?;
    log::info!(
        "built {} cohorts in {:.2}s",
        analysis.retention.cohorts.len(),
        start_time.elapsed().as_secs_f64()
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&analysis.retention.to_rows())?);
    } else {
        print_retention_matrix(&analysis);
    }

    if let Some(path) = &args.plot {
        viz::create_retention_heatmap(&analysis.retention, Path::new(path))?;
        println!("Heatmap saved to: {path}");
    }

    Ok(())
}

fn print_retention_matrix(analysis: &CohortAnalysis) {
    let retention = &analysis.retention;
    let percentages = retention.as_percentages(1);
    let sizes = analysis.counts.cohort_sizes();

    println!("=== Retention Rates (%) ===");
    let header: String = (1..=retention.max_index())
        .map(|i| format!("{i:>7}"))
        .collect();
    println!("{:>23} {:>6}{}", "Cohort", "Size", header);

    for ((cohort, size), row) in retention
        .cohorts
        .iter()
        .zip(&sizes)
        .zip(percentages.outer_iter())
    {
        let cells: String = row
            .iter()
            .map(|cell| match cell {
                Some(pct) => format!("{pct:>7.1}"),
                None => format!("{:>7}", ""),
            })
            .collect();
        println!(
            "{:>23} {:>6}{}",
            cohort.to_string(),
            size.unwrap_or_default(),
            cells
        );
    }
}
