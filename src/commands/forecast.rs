use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use log::info;
use std::path::PathBuf;

use crate::config::{
    normalize_tickers, resolve_date_range, EnvSettings, PipelineConfig, DEFAULT_HORIZON,
    DEFAULT_LOOKBACK_YEARS, DEFAULT_MIN_SAMPLES_LEAF, DEFAULT_MIN_SAMPLES_SPLIT, DEFAULT_SEED,
    DEFAULT_TEST_RATIO, DEFAULT_TREES,
};
use crate::features::IndicatorSupport;
use crate::forest::ForestConfig;
use crate::market_data::{PriceSource, SnapshotSource, YahooChartSource};
use crate::pipeline::{Pipeline, RunSummary};
use crate::report;

/// Command-line values for a forecast run. `None` falls back to the
/// `PRICECAST_*` setting, then to the built-in default.
#[derive(Debug, Clone, Default)]
pub struct ForecastOptions {
    pub tickers: Vec<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub horizon: Option<usize>,
    pub test_ratio: Option<f64>,
    pub trees: Option<usize>,
    pub seed: Option<u64>,
    pub max_depth: Option<usize>,
    pub min_samples_split: Option<usize>,
    pub min_samples_leaf: Option<usize>,
    pub chart_dir: Option<PathBuf>,
    pub data_file: Option<PathBuf>,
    pub without_indicators: bool,
}

pub fn build_pipeline_config(
    options: &ForecastOptions,
    settings: &EnvSettings,
) -> Result<PipelineConfig> {
    let (start, end) = resolve_date_range(
        options.start,
        options.end,
        settings.lookback_years.unwrap_or(DEFAULT_LOOKBACK_YEARS),
    )?;

    let config = PipelineConfig {
        start,
        end,
        horizon: options
            .horizon
            .or(settings.horizon)
            .unwrap_or(DEFAULT_HORIZON),
        test_ratio: options
            .test_ratio
            .or(settings.test_ratio)
            .unwrap_or(DEFAULT_TEST_RATIO),
        forest: ForestConfig {
            n_trees: options.trees.or(settings.trees).unwrap_or(DEFAULT_TREES),
            max_depth: options.max_depth.or(settings.max_depth),
            min_samples_split: options
                .min_samples_split
                .or(settings.min_samples_split)
                .unwrap_or(DEFAULT_MIN_SAMPLES_SPLIT),
            min_samples_leaf: options
                .min_samples_leaf
                .or(settings.min_samples_leaf)
                .unwrap_or(DEFAULT_MIN_SAMPLES_LEAF),
            seed: options.seed.or(settings.seed).unwrap_or(DEFAULT_SEED),
        },
        chart_dir: options
            .chart_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir),
    };
    config.validate()?;
    Ok(config)
}

pub async fn run(options: ForecastOptions, settings: &EnvSettings) -> Result<RunSummary> {
    let tickers = normalize_tickers(&options.tickers);
    if tickers.is_empty() {
        return Err(anyhow!("At least one ticker symbol is required"));
    }
    let config = build_pipeline_config(&options, settings)?;
    let support = IndicatorSupport::detect(options.without_indicators);

    info!(
        "Forecasting {} ticker(s) from {} to {} (horizon {}, test ratio {}, {} trees, seed {})",
        tickers.len(),
        config.start,
        config.end,
        config.horizon,
        config.test_ratio,
        config.forest.n_trees,
        config.forest.seed
    );

    match &options.data_file {
        Some(path) => {
            let source = SnapshotSource::load(path)
                .with_context(|| format!("Failed to load price data from {}", path.display()))?;
            Ok(run_with_source(source, config, support, &tickers).await)
        }
        None => {
            let source = YahooChartSource::new(settings.yahoo_url(), settings.http_timeout())?;
            Ok(run_with_source(source, config, support, &tickers).await)
        }
    }
}

async fn run_with_source<S: PriceSource>(
    source: S,
    config: PipelineConfig,
    support: IndicatorSupport,
    tickers: &[String],
) -> RunSummary {
    let pipeline = Pipeline::new(source, config, support);
    let summary = pipeline.run_all(tickers).await;
    report::print_run_summary(&summary, pipeline.config(), support);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ForecastOptions {
        ForecastOptions {
            tickers: vec!["AAPL".to_string()],
            start: NaiveDate::from_ymd_opt(2020, 1, 1),
            end: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..ForecastOptions::default()
        }
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = build_pipeline_config(&options(), &EnvSettings::default()).unwrap();
        assert_eq!(config.horizon, DEFAULT_HORIZON);
        assert_eq!(config.test_ratio, DEFAULT_TEST_RATIO);
        assert_eq!(config.forest, ForestConfig::default());
        assert_eq!(config.chart_dir, std::env::temp_dir());
    }

    #[test]
    fn cli_values_override_settings() {
        let settings = EnvSettings {
            horizon: Some(3),
            trees: Some(10),
            seed: Some(1),
            ..EnvSettings::default()
        };
        let mut opts = options();
        opts.trees = Some(25);
        let config = build_pipeline_config(&opts, &settings).unwrap();
        assert_eq!(config.horizon, 3);
        assert_eq!(config.forest.n_trees, 25);
        assert_eq!(config.forest.seed, 1);
    }

    #[test]
    fn invalid_values_are_fatal() {
        let mut opts = options();
        opts.test_ratio = Some(0.0);
        assert!(build_pipeline_config(&opts, &EnvSettings::default()).is_err());

        let mut opts = options();
        opts.min_samples_split = Some(1);
        assert!(build_pipeline_config(&opts, &EnvSettings::default()).is_err());

        let mut opts = options();
        opts.start = NaiveDate::from_ymd_opt(2025, 1, 1);
        assert!(build_pipeline_config(&opts, &EnvSettings::default()).is_err());
    }

    #[tokio::test]
    async fn blank_ticker_list_is_rejected() {
        let mut opts = options();
        opts.tickers = vec![" , ".to_string()];
        assert!(run(opts, &EnvSettings::default()).await.is_err());
    }
}
