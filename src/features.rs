use chrono::NaiveDate;
use log::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::indicators;
use crate::models::PriceSeries;

pub const BASE_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];
pub const LAG_COLUMNS: [&str; 5] = [
    "open_lag1",
    "high_lag1",
    "low_lag1",
    "close_lag1",
    "volume_lag1",
];

/// Whether indicator columns can be produced in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorSupport {
    Available,
    Unavailable,
}

impl IndicatorSupport {
    /// Resolves the capability once for the whole run and logs when it is missing.
    pub fn detect(disabled_by_user: bool) -> Self {
        if !cfg!(feature = "indicators") {
            warn!("Built without technical indicator support; continuing with price and lag features only");
            return Self::Unavailable;
        }
        if disabled_by_user {
            warn!("Technical indicators disabled; continuing with price and lag features only");
            return Self::Unavailable;
        }
        Self::Available
    }

    pub fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Raw feature matrix, one row per bar, before incomplete rows are removed.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub closes: Vec<f64>,
    pub rows: Vec<Vec<f64>>,
    /// `close[t + horizon]`, NaN for the final `horizon` rows.
    pub targets: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub date: NaiveDate,
    pub features: Vec<f64>,
    pub target: f64,
}

/// The most recent bar's features, kept aside for the forward forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRow {
    pub date: NaiveDate,
    pub close: f64,
    pub features: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DropStats {
    pub raw_rows: usize,
    pub incomplete_feature_rows: usize,
    pub missing_target_rows: usize,
    pub usable_rows: usize,
}

impl DropStats {
    pub fn dropped(&self) -> usize {
        self.incomplete_feature_rows + self.missing_target_rows
    }
}

#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub feature_names: Vec<String>,
    pub samples: Vec<Sample>,
    pub forecast_row: ForecastRow,
    pub stats: DropStats,
}

pub fn feature_columns(support: IndicatorSupport) -> Vec<String> {
    let mut columns: Vec<String> = BASE_COLUMNS
        .iter()
        .chain(LAG_COLUMNS.iter())
        .map(|name| name.to_string())
        .collect();
    if support.is_available() {
        columns.extend(indicators::INDICATOR_COLUMNS.iter().map(|n| n.to_string()));
    }
    columns
}

/// Builds lag, indicator and target columns for every bar of the series.
pub fn build_feature_table(
    series: &PriceSeries,
    horizon: usize,
    support: IndicatorSupport,
) -> FeatureTable {
    let n = series.len();
    let base = [
        series.opens(),
        series.highs(),
        series.lows(),
        series.closes(),
        series.volumes(),
    ];
    let lagged: Vec<Vec<f64>> = base.iter().map(|column| lag(column, 1)).collect();

    let mut columns: Vec<Vec<f64>> = base.iter().cloned().chain(lagged).collect();
    if support.is_available() {
        columns.extend(
            indicators::indicator_columns(series)
                .into_iter()
                .map(|(_, values)| values),
        );
    }

    let rows: Vec<Vec<f64>> = (0..n)
        .map(|i| columns.iter().map(|column| column[i]).collect())
        .collect();

    let closes = series.closes();
    let targets = (0..n)
        .map(|i| {
            i.checked_add(horizon)
                .and_then(|j| closes.get(j))
                .copied()
                .unwrap_or(f64::NAN)
        })
        .collect();

    FeatureTable {
        columns: feature_columns(support),
        dates: series.dates(),
        closes,
        rows,
        targets,
    }
}

impl FeatureTable {
    /// Drops rows with any missing feature or target and sets the last bar aside
    /// as the forecast row.
    pub fn into_dataset(self) -> PipelineResult<PreparedDataset> {
        let raw_rows = self.rows.len();
        let mut stats = DropStats {
            raw_rows,
            ..DropStats::default()
        };

        let forecast_row = self.rows.last().and_then(|features| {
            let complete = features.iter().all(|v| v.is_finite());
            complete.then(|| ForecastRow {
                date: self.dates[raw_rows - 1],
                close: self.closes[raw_rows - 1],
                features: features.clone(),
            })
        });

        let mut samples = Vec::with_capacity(raw_rows);
        for ((date, features), target) in self
            .dates
            .into_iter()
            .zip(self.rows.into_iter())
            .zip(self.targets.into_iter())
        {
            if !features.iter().all(|v| v.is_finite()) {
                stats.incomplete_feature_rows += 1;
                continue;
            }
            if !target.is_finite() {
                stats.missing_target_rows += 1;
                continue;
            }
            samples.push(Sample {
                date,
                features,
                target,
            });
        }
        stats.usable_rows = samples.len();
        debug!(
            "Feature rows: raw={} incomplete={} missing_target={} usable={}",
            stats.raw_rows, stats.incomplete_feature_rows, stats.missing_target_rows, stats.usable_rows
        );

        if samples.len() < 2 {
            return Err(PipelineError::InsufficientRows {
                usable: samples.len(),
            });
        }
        let Some(forecast_row) = forecast_row else {
            return Err(PipelineError::InsufficientRows {
                usable: samples.len(),
            });
        };

        Ok(PreparedDataset {
            feature_names: self.columns,
            samples,
            forecast_row,
            stats,
        })
    }
}

pub fn prepare_dataset(
    series: &PriceSeries,
    horizon: usize,
    support: IndicatorSupport,
) -> PipelineResult<PreparedDataset> {
    build_feature_table(series, horizon, support).into_dataset()
}

fn lag(values: &[f64], periods: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            if i >= periods {
                values[i - periods]
            } else {
                f64::NAN
            }
        })
        .collect()
}
