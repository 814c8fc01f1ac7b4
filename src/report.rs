use chrono::NaiveDate;
use log::warn;
use serde::Serialize;
use std::fmt::Write;

use crate::config::PipelineConfig;
use crate::features::IndicatorSupport;
use crate::models::ForecastRecord;
use crate::pipeline::{RunSummary, TickerOutcome};

pub const NO_FORECASTS_MESSAGE: &str = "No forecasts were produced.";

pub fn print_ticker_report(outcome: &TickerOutcome) {
    println!();
    println!("=== {} ===", outcome.ticker);
    println!(
        "Fetched {} rows ({} to {})",
        outcome.stats.raw_rows, outcome.first_date, outcome.last_date
    );
    println!(
        "Rows dropped: {} incomplete features, {} missing target; {} usable",
        outcome.stats.incomplete_feature_rows,
        outcome.stats.missing_target_rows,
        outcome.stats.usable_rows
    );
    println!(
        "Training rows={} Test rows={} Features={}",
        outcome.train_rows, outcome.test_rows, outcome.feature_count
    );
    println!(
        "Test MSE: {:.4}  RMSE: {:.4}  MAE: {:.4}  R\u{b2}: {:.4}",
        outcome.metrics.mse, outcome.metrics.rmse, outcome.metrics.mae, outcome.metrics.r2
    );
    if !outcome.top_features.is_empty() {
        let ranked: Vec<String> = outcome
            .top_features
            .iter()
            .map(|(name, importance)| format!("{} {:.1}%", name, importance * 100.0))
            .collect();
        println!("Top features: {}", ranked.join(", "));
    }
    println!(
        "Forecast for {}: {:.2} (last close {:.2} on {}, {:+.2}%)",
        outcome.forecast.date,
        outcome.forecast.price,
        outcome.forecast.last_close,
        outcome.forecast.last_date,
        outcome.forecast.change_pct()
    );
    match &outcome.chart_path {
        Some(path) => println!("Chart: {}", path.display()),
        None => println!("Chart: n/a"),
    }
}

/// Fixed-width table of per-ticker results, or the empty-run message.
pub fn render_summary_table(records: &[ForecastRecord]) -> String {
    if records.is_empty() {
        return NO_FORECASTS_MESSAGE.to_string();
    }

    let ticker_width = records
        .iter()
        .map(|record| record.ticker.len())
        .max()
        .unwrap_or(0)
        .max("Ticker".len());

    let mut table = String::new();
    let _ = writeln!(
        &mut table,
        "{:<tw$}  {:>12}  {:>10}  {:>12}  {:<13}",
        "Ticker",
        "RMSE",
        "R\u{b2}",
        "Next price",
        "Forecast date",
        tw = ticker_width
    );
    let _ = writeln!(&mut table, "{}", "-".repeat(ticker_width + 55));
    for record in records {
        let _ = writeln!(
            &mut table,
            "{:<tw$}  {:>12.4}  {:>10.4}  {:>12.2}  {:<13}",
            record.ticker,
            record.rmse,
            record.r2,
            record.next_price,
            record.forecast_date,
            tw = ticker_width
        );
    }
    table.trim_end().to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SkippedTicker<'a> {
    ticker: &'a str,
    reason: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummaryPayload<'a> {
    start: NaiveDate,
    end: NaiveDate,
    horizon: usize,
    test_ratio: f64,
    trees: usize,
    seed: u64,
    indicators: bool,
    forecasts: Vec<ForecastRecord>,
    skipped: Vec<SkippedTicker<'a>>,
}

pub fn summary_json(
    summary: &RunSummary,
    config: &PipelineConfig,
    support: IndicatorSupport,
) -> serde_json::Result<String> {
    let payload = RunSummaryPayload {
        start: config.start,
        end: config.end,
        horizon: config.horizon,
        test_ratio: config.test_ratio,
        trees: config.forest.n_trees,
        seed: config.forest.seed,
        indicators: support.is_available(),
        forecasts: summary.records(),
        skipped: summary
            .failures
            .iter()
            .map(|failure| SkippedTicker {
                ticker: &failure.ticker,
                reason: &failure.reason,
            })
            .collect(),
    };
    serde_json::to_string(&payload)
}

pub fn print_run_summary(summary: &RunSummary, config: &PipelineConfig, support: IndicatorSupport) {
    println!();
    println!("{}", render_summary_table(&summary.records()));
    match summary_json(summary, config, support) {
        Ok(payload) => println!("PRICECAST_SUMMARY={payload}"),
        Err(err) => warn!("Failed to serialize run summary: {err}"),
    }
}
