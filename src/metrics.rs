use serde::Serialize;
use statrs::statistics::Statistics;

use crate::error::{PipelineError, PipelineResult};

/// Held-out accuracy of a fitted model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvaluationMetrics {
    pub mse: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Scores `predicted` against `actual`. When the actuals are constant the
    /// coefficient of determination is 1.0 for an exact fit and 0.0 otherwise.
    pub fn evaluate(actual: &[f64], predicted: &[f64]) -> PipelineResult<EvaluationMetrics> {
        if actual.is_empty() {
            return Err(PipelineError::DegenerateSplit { rows: 0 });
        }
        if actual.len() != predicted.len() {
            return Err(PipelineError::InvalidConfig(format!(
                "{} actual values but {} predictions",
                actual.len(),
                predicted.len()
            )));
        }

        let n = actual.len() as f64;
        let (sse, sae) = actual
            .iter()
            .zip(predicted.iter())
            .fold((0.0, 0.0), |(sq, abs), (a, p)| {
                let err = a - p;
                (sq + err * err, abs + err.abs())
            });
        let mse = sse / n;

        Ok(EvaluationMetrics {
            mse,
            rmse: mse.sqrt(),
            mae: sae / n,
            r2: Self::r_squared(actual, sse),
        })
    }

    fn r_squared(actual: &[f64], sse: f64) -> f64 {
        let mean = actual.iter().mean();
        let sst: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
        if sst > 0.0 {
            1.0 - sse / sst
        } else if sse == 0.0 {
            1.0
        } else {
            0.0
        }
    }
}
