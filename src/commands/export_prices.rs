use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use log::{info, warn};
use std::path::Path;

use crate::config::{normalize_tickers, resolve_date_range, EnvSettings, DEFAULT_LOOKBACK_YEARS};
use crate::market_data::{PriceSnapshot, PriceSource, YahooChartSource};
use crate::models::PriceSeries;

pub async fn run(
    tickers: &[String],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    output_path: &Path,
    settings: &EnvSettings,
) -> Result<()> {
    let source = YahooChartSource::new(settings.yahoo_url(), settings.http_timeout())?;
    export(&source, tickers, start, end, output_path, settings).await
}

pub async fn export<S: PriceSource>(
    source: &S,
    tickers: &[String],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    output_path: &Path,
    settings: &EnvSettings,
) -> Result<()> {
    let tickers = normalize_tickers(tickers);
    if tickers.is_empty() {
        return Err(anyhow!("At least one ticker symbol is required"));
    }
    let (start, end) = resolve_date_range(
        start,
        end,
        settings.lookback_years.unwrap_or(DEFAULT_LOOKBACK_YEARS),
    )?;
    if start >= end {
        return Err(anyhow!(
            "start date {} must be before end date {}",
            start,
            end
        ));
    }

    info!(
        "Generating price snapshot for {} ticker(s) at {}",
        tickers.len(),
        output_path.display()
    );

    let mut series: Vec<PriceSeries> = Vec::with_capacity(tickers.len());
    for ticker in &tickers {
        match source.fetch_series(ticker, start, end).await {
            Ok(fetched) => {
                info!("Fetched {} rows for {}", fetched.len(), ticker);
                series.push(fetched);
            }
            Err(err) => warn!("Skipping {}: {}", ticker, err),
        }
    }
    if series.is_empty() {
        return Err(anyhow!("No price series could be fetched; snapshot not written"));
    }

    let count = series.len();
    PriceSnapshot::new(series).save_to_file(output_path)?;
    info!(
        "Price snapshot with {} series successfully written to {}",
        count,
        output_path.display()
    );
    Ok(())
}
