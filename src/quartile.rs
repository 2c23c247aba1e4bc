//! Quartile thresholds and classification

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};

const QUARTILES: [(f64, &str); 3] = [(0.25, "q1"), (0.50, "q2"), (0.75, "q3")];

/// 25th, 50th and 75th percentile of one metric over the customer population
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuartileThresholds {
    pub q1: f64,
    pub q2: f64,
    pub q3: f64,
}

/// Quartile expressions for `column`, aliased `<column>_q1` .. `<column>_q3`
///
/// Linear interpolation between order statistics.
pub fn quartile_exprs(column: &str) -> Vec<Expr> {
    QUARTILES
        .iter()
        .map(|&(p, suffix)| {
            col(column)
                .cast(DataType::Float64)
                .quantile(lit(p), QuantileInterpolOptions::Linear)
                .alias(&format!("{column}_{suffix}"))
        })
        .collect()
}

impl QuartileThresholds {
    /// Compute thresholds over every value of `values`
    pub fn from_series(values: &Series) -> AnalysisResult<Self> {
        let name = values.name().to_string();
        let frame = DataFrame::new(vec![values.clone()])?;
        Self::from_frame(&frame, &name)
    }

    /// Compute thresholds over one column of `frame`
    ///
    /// # Errors
    /// * `EmptyDataset` if the column has no non-null values
    pub fn from_frame(frame: &DataFrame, column: &str) -> AnalysisResult<Self> {
        if frame.column(column)?.len() == frame.column(column)?.null_count() {
            return Err(AnalysisError::empty(format!(
                "no values to compute {column} quartiles from"
            )));
        }

        let quartiles = frame.clone().lazy().select(quartile_exprs(column)).collect()?;
        Self::from_quartile_row(&quartiles, column)
    }

    /// Read thresholds back from a frame holding [`quartile_exprs`] output
    pub fn from_quartile_row(quartiles: &DataFrame, column: &str) -> AnalysisResult<Self> {
        let value = |suffix: &str| -> AnalysisResult<f64> {
            quartiles
                .column(&format!("{column}_{suffix}"))?
                .f64()?
                .get(0)
                .ok_or_else(|| AnalysisError::empty(format!("no {column} quartile computed")))
        };

        Ok(Self {
            q1: value("q1")?,
            q2: value("q2")?,
            q3: value("q3")?,
        })
    }

    pub fn classify(&self, value: f64) -> u8 {
        classify(value, self.q1, self.q2, self.q3)
    }
}

/// Map a value to its quartile class in 1..=4
///
/// Upper bounds are inclusive: `value <= q1` is class 1 and only values
/// strictly above `q3` reach class 4.
pub fn classify(value: f64, q1: f64, q2: f64, q3: f64) -> u8 {
    if value <= q1 {
        1
    } else if value <= q2 {
        2
    } else if value <= q3 {
        3
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds(values: &[f64]) -> AnalysisResult<QuartileThresholds> {
        QuartileThresholds::from_series(&Series::new("v", values))
    }

    #[test]
    fn test_quartiles_interpolate() {
        let t = thresholds(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t, QuartileThresholds { q1: 1.75, q2: 2.5, q3: 3.25 });

        let single = thresholds(&[7.0]).unwrap();
        assert_eq!(single, QuartileThresholds { q1: 7.0, q2: 7.0, q3: 7.0 });
    }

    #[test]
    fn test_thresholds_ignore_input_order() {
        let t = thresholds(&[40.0, 10.0, 30.0, 20.0, 50.0]).unwrap();
        assert_eq!(t, QuartileThresholds { q1: 20.0, q2: 30.0, q3: 40.0 });
    }

    #[test]
    fn test_thresholds_reject_empty() {
        let result = thresholds(&[]);
        assert!(matches!(result, Err(AnalysisError::EmptyDataset { .. })));
    }

    #[test]
    fn test_integer_column() {
        let frame = DataFrame::new(vec![Series::new("frequency", &[1u64, 2, 5, 9])]).unwrap();
        let t = QuartileThresholds::from_frame(&frame, "frequency").unwrap();
        assert_eq!(t, QuartileThresholds { q1: 1.75, q2: 3.5, q3: 6.0 });
    }

    #[test]
    fn test_classify_boundaries() {
        let (q1, q2, q3) = (10.0, 20.0, 30.0);
        assert_eq!(classify(q1, q1, q2, q3), 1);
        assert_eq!(classify(q1 + 0.001, q1, q2, q3), 2);
        assert_eq!(classify(q2, q1, q2, q3), 2);
        assert_eq!(classify(q3, q1, q2, q3), 3);
        assert_eq!(classify(q3 + 1e-9, q1, q2, q3), 4);
        assert_eq!(classify(-5.0, q1, q2, q3), 1);
    }

    #[test]
    fn test_classify_is_monotonic() {
        let (q1, q2, q3) = (2.5, 2.5, 7.0);
        let values: Vec<f64> = (-20..=120).map(|i| i as f64 * 0.1).collect();

        for pair in values.windows(2) {
            assert!(classify(pair[0], q1, q2, q3) <= classify(pair[1], q1, q2, q3));
        }
    }

    #[test]
    fn test_collapsed_thresholds() {
        // every customer identical: nobody can exceed q3
        let t = thresholds(&[3.0, 3.0, 3.0]).unwrap();
        assert_eq!(t.classify(3.0), 1);
    }
}
