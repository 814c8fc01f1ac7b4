use statrs::statistics::Statistics;

use crate::error::{PipelineError, PipelineResult};

/// Per-feature standardization fitted once on the training block.
///
/// A fitted scaler is immutable. Test rows and the forecast row only pass
/// through [`StandardScaler::transform_row`].
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    /// Computes column means and population standard deviations of `train`.
    /// Zero-variance columns get a scale of 1.0.
    pub fn fit(train: &[Vec<f64>]) -> PipelineResult<Self> {
        let Some(first) = train.first() else {
            return Err(PipelineError::DegenerateSplit { rows: 0 });
        };
        let width = first.len();

        let mut means = Vec::with_capacity(width);
        let mut scales = Vec::with_capacity(width);
        for col in 0..width {
            let column: Vec<f64> = train.iter().map(|row| row[col]).collect();
            let mean = column.iter().mean();
            let std_dev = column.iter().population_std_dev();
            means.push(mean);
            scales.push(if std_dev.is_finite() && std_dev > 0.0 {
                std_dev
            } else {
                1.0
            });
        }

        Ok(Self { means, scales })
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(self.scales.iter()))
            .map(|(value, (mean, scale))| (value - mean) / scale)
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|row| self.transform_row(row)).collect()
    }
}
