//! Per-ticker forecasting run.
//!
//! A ticker moves through fetch, feature construction, chronological split,
//! scaler fit, model fit, test evaluation, chart, and forward forecast. Any
//! [`PipelineError`] ends that ticker's run; the remaining tickers still run.

use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::PathBuf;

use crate::chart::{write_forecast_chart, ChartInput};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::features::{prepare_dataset, DropStats, IndicatorSupport, Sample};
use crate::forecast::{forecast_next, NextForecast};
use crate::forest::RandomForestRegressor;
use crate::market_data::PriceSource;
use crate::metrics::{EvaluationMetrics, MetricsCalculator};
use crate::models::ForecastRecord;
use crate::report;
use crate::scaler::StandardScaler;
use crate::split::chronological_split;

const TOP_FEATURE_COUNT: usize = 5;

/// Everything produced by one successful ticker run.
#[derive(Debug, Clone)]
pub struct TickerOutcome {
    pub ticker: String,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub stats: DropStats,
    pub train_rows: usize,
    pub test_rows: usize,
    pub feature_count: usize,
    /// Per-feature means of the fitted scaler, taken from the training rows.
    pub scaler_means: Vec<f64>,
    pub metrics: EvaluationMetrics,
    pub top_features: Vec<(String, f64)>,
    pub test_dates: Vec<NaiveDate>,
    pub test_actual: Vec<f64>,
    pub test_predicted: Vec<f64>,
    pub forecast: NextForecast,
    pub chart_path: Option<PathBuf>,
}

impl TickerOutcome {
    pub fn record(&self) -> ForecastRecord {
        ForecastRecord {
            ticker: self.ticker.clone(),
            rmse: self.metrics.rmse,
            r2: self.metrics.r2,
            next_price: self.forecast.price,
            forecast_date: self.forecast.date,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TickerFailure {
    pub ticker: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<TickerOutcome>,
    pub failures: Vec<TickerFailure>,
}

impl RunSummary {
    pub fn records(&self) -> Vec<ForecastRecord> {
        self.outcomes.iter().map(TickerOutcome::record).collect()
    }
}

pub struct Pipeline<S> {
    source: S,
    config: PipelineConfig,
    support: IndicatorSupport,
}

impl<S: PriceSource> Pipeline<S> {
    pub fn new(source: S, config: PipelineConfig, support: IndicatorSupport) -> Self {
        Self {
            source,
            config,
            support,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs every ticker in order, printing each ticker's report as it completes.
    pub async fn run_all(&self, tickers: &[String]) -> RunSummary {
        let mut summary = RunSummary::default();
        for ticker in tickers {
            match self.run_ticker(ticker).await {
                Ok(outcome) => {
                    report::print_ticker_report(&outcome);
                    summary.outcomes.push(outcome);
                }
                Err(err) => {
                    warn!("Skipping {}: {}", ticker, err);
                    summary.failures.push(TickerFailure {
                        ticker: ticker.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        info!(
            "Finished {} ticker(s): {} forecast, {} skipped",
            tickers.len(),
            summary.outcomes.len(),
            summary.failures.len()
        );
        summary
    }

    pub async fn run_ticker(&self, ticker: &str) -> PipelineResult<TickerOutcome> {
        let config = &self.config;
        let series = self
            .source
            .fetch_series(ticker, config.start, config.end)
            .await?;
        let (Some(first_date), Some(last_date)) = (series.first_date(), series.last_date()) else {
            return Err(PipelineError::EmptySeries {
                ticker: ticker.to_string(),
            });
        };
        info!(
            "Fetched {} rows for {} ({} to {})",
            series.len(),
            ticker,
            first_date,
            last_date
        );

        let dataset = prepare_dataset(&series, config.horizon, self.support)?;
        let (train, test) = chronological_split(&dataset.samples, config.test_ratio)?;
        info!(
            "{}: {} usable rows, {} train / {} test, {} features",
            ticker,
            dataset.stats.usable_rows,
            train.len(),
            test.len(),
            dataset.feature_names.len()
        );

        let train_features = feature_rows(train);
        let train_targets = target_values(train);
        let scaler = StandardScaler::fit(&train_features)?;
        let train_scaled = scaler.transform(&train_features);

        let progress = tree_progress_bar(config.forest.n_trees);
        let model = RandomForestRegressor::fit_with_progress(
            config.forest,
            &train_scaled,
            &train_targets,
            Some(&progress),
        );
        progress.finish_and_clear();
        let model = model?;

        let test_scaled = scaler.transform(&feature_rows(test));
        let test_predicted = model.predict(&test_scaled);
        let test_actual = target_values(test);
        let metrics = MetricsCalculator::evaluate(&test_actual, &test_predicted)?;
        let test_dates: Vec<NaiveDate> = test.iter().map(|sample| sample.date).collect();

        let chart_path = match write_forecast_chart(
            &config.chart_dir,
            &ChartInput {
                ticker,
                dates: &test_dates,
                actual: &test_actual,
                predicted: &test_predicted,
                metrics: &metrics,
            },
        ) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!("Chart for {} was not written: {:#}", ticker, err);
                None
            }
        };

        let forecast = forecast_next(&scaler, &model, &dataset.forecast_row, config.horizon)?;
        let top_features = model
            .top_features(TOP_FEATURE_COUNT)
            .into_iter()
            .filter_map(|(idx, importance)| {
                dataset
                    .feature_names
                    .get(idx)
                    .map(|name| (name.clone(), importance))
            })
            .collect();

        Ok(TickerOutcome {
            ticker: ticker.to_string(),
            first_date,
            last_date,
            stats: dataset.stats,
            train_rows: train.len(),
            test_rows: test.len(),
            feature_count: dataset.feature_names.len(),
            scaler_means: scaler.means().to_vec(),
            metrics,
            top_features,
            test_dates,
            test_actual,
            test_predicted,
            forecast,
            chart_path,
        })
    }
}

fn feature_rows(samples: &[Sample]) -> Vec<Vec<f64>> {
    samples.iter().map(|sample| sample.features.clone()).collect()
}

fn target_values(samples: &[Sample]) -> Vec<f64> {
    samples.iter().map(|sample| sample.target).collect()
}

fn tree_progress_bar(n_trees: usize) -> ProgressBar {
    let pb = ProgressBar::new(n_trees as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}
