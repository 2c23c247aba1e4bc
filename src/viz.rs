//! Chart rendering for the output tables using Plotters (SVG)

use std::path::Path;

use plotters::coord::types::RangedCoordi32;
use plotters::element::Pie;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};

use crate::cohort::RetentionMatrix;
use crate::model::{RfmAnalysis, SegmentCount};

/// Color palette for segments, in roll-up order
const SEGMENT_COLORS: [RGBColor; 7] = [
    RED,
    BLUE,
    GREEN,
    YELLOW,
    MAGENTA,
    CYAN,
    RGBColor(255, 165, 0),
];

/// Retention rate rendered with the darkest heatmap color
const HEATMAP_SATURATION: f64 = 0.5;

fn segment_color(i: usize) -> RGBColor {
    SEGMENT_COLORS[i % SEGMENT_COLORS.len()]
}

/// Horizontal bar chart of customers per segment
///
/// # Arguments
/// * `segments` - Segment roll-up, drawn top to bottom in the given order
/// * `output_path` - Destination SVG file
///
/// # Returns
/// * `Ok(())` once the file is written; an error for an empty roll-up
pub fn create_segment_bar_chart(segments: &[SegmentCount], output_path: &Path) -> crate::Result<()> {
    if segments.is_empty() {
        anyhow::bail!("no segments to plot");
    }

    let names: Vec<&str> = segments.iter().map(|s| s.segment.as_str()).collect();
    let max_count = segments.iter().map(|s| s.customer_count).max().unwrap_or(1) as u32;

    let root = SVGBackend::new(output_path, (800, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Segment Distribution", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(140)
        .build_cartesian_2d(
            0u32..(max_count + max_count / 10 + 1),
            (0u32..names.len() as u32).into_segmented(),
        )?;

    chart
        .configure_mesh()
        .disable_y_mesh()
        .x_desc("No of Customers")
        .y_desc("Segment")
        .y_labels(names.len())
        .y_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) => names.get(*i as usize).map(|s| s.to_string()).unwrap_or_default(),
            _ => String::new(),
        })
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(
        Histogram::horizontal(&chart)
            .style(RGBColor(189, 183, 107).filled())
            .margin(8)
            .data(
                segments
                    .iter()
                    .enumerate()
                    .map(|(i, s)| (i as u32, s.customer_count as u32)),
            ),
    )?;

    root.present()?;
    log::info!("segment bar chart saved to {}", output_path.display());

    Ok(())
}

/// Pie chart of segment shares
///
/// # Arguments
/// * `segments` - Segment roll-up; slice colors follow its order
/// * `output_path` - Destination SVG file
pub fn create_segment_pie_chart(segments: &[SegmentCount], output_path: &Path) -> crate::Result<()> {
    if segments.is_empty() {
        anyhow::bail!("no segments to plot");
    }

    let sizes: Vec<f64> = segments.iter().map(|s| s.customer_count as f64).collect();
    let labels: Vec<&str> = segments.iter().map(|s| s.segment.as_str()).collect();
    let colors: Vec<RGBColor> = (0..segments.len()).map(segment_color).collect();

    let root = SVGBackend::new(output_path, (600, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled("Customer Segments Distribution", ("sans-serif", 24))?;

    let (width, height) = root.dim_in_pixel();
    let center = (width as i32 / 2, height as i32 / 2);
    let radius = f64::from(width.min(height)) * 0.35;

    let mut pie = Pie::new(&center, &radius, &sizes, &colors, &labels);
    pie.label_style(("sans-serif", 14).into_font());
    pie.percentages(("sans-serif", 12).into_font().color(&BLACK));
    root.draw(&pie)?;

    root.present()?;
    log::info!("segment pie chart saved to {}", output_path.display());

    Ok(())
}

fn heat_color(rate: f64) -> RGBColor {
    let t = (rate / HEATMAP_SATURATION).clamp(0.0, 1.0);
    let lerp = |from: u8, to: u8| (from as f64 + (to as f64 - from as f64) * t).round() as u8;
    RGBColor(lerp(247, 0), lerp(252, 88), lerp(253, 36))
}

/// Pixel midpoint between two opposite cell corners
fn cell_center(corner: (i32, i32), opposite: (i32, i32)) -> (i32, i32) {
    ((corner.0 + opposite.0) / 2, (corner.1 + opposite.1) / 2)
}

/// Heatmap of retention rates; cells a cohort has not reached stay blank
///
/// # Arguments
/// * `matrix` - Retention rates, one row per cohort
/// * `output_path` - Destination SVG file
///
/// # Returns
/// * `Ok(())` once the file is written; an error for an empty matrix
pub fn create_retention_heatmap(matrix: &RetentionMatrix, output_path: &Path) -> crate::Result<()> {
    let (n_cohorts, n_periods) = matrix.rates.dim();
    if n_cohorts == 0 || n_periods == 0 {
        anyhow::bail!("retention matrix is empty");
    }
    let labels: Vec<String> = matrix.cohorts.iter().map(|c| c.to_string()).collect();

    let root = SVGBackend::new(output_path, (900, 700)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Retention rates", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(180)
        .build_cartesian_2d(0i32..n_periods as i32, n_cohorts as i32..0i32)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("Cohort index")
        .y_desc("Cohort")
        .x_labels(n_periods)
        .y_labels(n_cohorts)
        .x_label_formatter(&|x| format!("{}", x + 1))
        .y_label_formatter(&|y| labels.get(*y as usize).cloned().unwrap_or_default())
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    let cells = matrix
        .rates
        .indexed_iter()
        .filter_map(|((row, col), rate)| rate.map(|r| (row as i32, col as i32, r)))
        .collect::<Vec<_>>();

    chart.draw_series(cells.iter().map(|&(row, col, rate)| {
        Rectangle::new([(col, row), (col + 1, row + 1)], heat_color(rate).filled())
    }))?;

    let text_style = ("sans-serif", 12)
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Center));
    for &(row, col, rate) in &cells {
        let center = heatmap_cell_center(&chart, row, col);
        root.draw(&Text::new(format!("{:.0}", rate * 100.0), center, text_style.clone()))?;
    }

    root.present()?;
    log::info!("retention heatmap saved to {}", output_path.display());

    Ok(())
}

fn heatmap_cell_center<DB: DrawingBackend>(
    chart: &ChartContext<'_, DB, Cartesian2d<RangedCoordi32, RangedCoordi32>>,
    row: i32,
    col: i32,
) -> (i32, i32) {
    cell_center(
        chart.backend_coord(&(col, row)),
        chart.backend_coord(&(col + 1, row + 1)),
    )
}

/// Write the bar and pie charts for an RFM run next to `prefix`
///
/// # Arguments
/// * `analysis` - Scored RFM run whose segment roll-up is drawn
/// * `prefix` - Path prefix for the output files
///
/// # Returns
/// * Paths of `<prefix>_segments_bar.svg` and `<prefix>_segments_pie.svg`
pub fn generate_segment_report(analysis: &RfmAnalysis, prefix: &str) -> crate::Result<Vec<String>> {
    let bar_path = format!("{prefix}_segments_bar.svg");
    let pie_path = format!("{prefix}_segments_pie.svg");

    create_segment_bar_chart(&analysis.segments, Path::new(&bar_path))?;
    create_segment_pie_chart(&analysis.segments, Path::new(&pie_path))?;

    Ok(vec![bar_path, pie_path])
}
