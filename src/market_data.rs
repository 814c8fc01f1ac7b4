use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::future::Future;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};
use crate::http_client::build_async_client;
use crate::models::{Candle, PriceSeries};

pub const PRICE_SNAPSHOT_VERSION: u32 = 1;

/// Anything that can supply a ticker's daily bars for an inclusive date range.
pub trait PriceSource {
    fn fetch_series(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Future<Output = PipelineResult<PriceSeries>> + Send;
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: Option<String>,
}

/// Daily bars from the Yahoo Finance v8 chart endpoint.
pub struct YahooChartSource {
    client: reqwest::Client,
    base_url: String,
}

impl YahooChartSource {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let client = build_async_client(Some(timeout))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `period2` is the midnight after `end`, which makes the range end-inclusive.
    /// The ticker is appended as a single percent-encoded path segment.
    pub fn chart_url(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> PipelineResult<reqwest::Url> {
        let invalid_base = |reason: String| PipelineError::Fetch {
            ticker: ticker.to_string(),
            message: format!("invalid chart URL {}: {}", self.base_url, reason),
        };
        let mut url =
            reqwest::Url::parse(&self.base_url).map_err(|err| invalid_base(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid_base("cannot hold a path".to_string()))?
            .pop_if_empty()
            .push(ticker);

        let period1 = midnight_timestamp(start);
        let period2 = midnight_timestamp(end + Duration::days(1));
        url.query_pairs_mut()
            .append_pair("period1", &period1.to_string())
            .append_pair("period2", &period2.to_string())
            .append_pair("interval", "1d")
            .append_pair("events", "history");
        Ok(url)
    }
}

impl PriceSource for YahooChartSource {
    async fn fetch_series(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> PipelineResult<PriceSeries> {
        let url = self.chart_url(ticker, start, end)?;
        debug!("Requesting {}", url);

        let fetch_error = |message: String| PipelineError::Fetch {
            ticker: ticker.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| fetch_error(format!("request failed: {}", err)))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| fetch_error(format!("failed to read response body: {}", err)))?;

        match parse_chart_body(ticker, &body) {
            Ok(series) => Ok(series.within(start, end)),
            Err(PipelineError::Fetch { message, .. }) if !status.is_success() => {
                Err(fetch_error(format!("HTTP {}: {}", status, message)))
            }
            Err(err) => Err(err),
        }
    }
}

fn midnight_timestamp(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// Decodes a chart payload. Bars with any missing OHLCV field are skipped.
fn parse_chart_body(ticker: &str, body: &str) -> PipelineResult<PriceSeries> {
    let envelope: ChartEnvelope =
        serde_json::from_str(body).map_err(|err| PipelineError::Fetch {
            ticker: ticker.to_string(),
            message: format!("unexpected chart payload: {}", err),
        })?;

    if let Some(error) = envelope.chart.error {
        return Err(PipelineError::Fetch {
            ticker: ticker.to_string(),
            message: match error.description {
                Some(description) => format!("{} - {}", error.code, description),
                None => error.code,
            },
        });
    }

    let Some(data) = envelope
        .chart
        .result
        .and_then(|results| results.into_iter().next())
    else {
        return Err(PipelineError::EmptySeries {
            ticker: ticker.to_string(),
        });
    };
    let timestamps = data.timestamp.unwrap_or_default();
    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();

    let mut candles = Vec::with_capacity(timestamps.len());
    let mut skipped = 0usize;
    for (i, ts) in timestamps.iter().enumerate() {
        let field = |values: &[Option<f64>]| values.get(i).copied().flatten();
        let (Some(open), Some(high), Some(low), Some(close), Some(volume)) = (
            field(&quote.open),
            field(&quote.high),
            field(&quote.low),
            field(&quote.close),
            field(&quote.volume),
        ) else {
            skipped += 1;
            continue;
        };
        let Some(moment) = DateTime::<Utc>::from_timestamp(*ts, 0) else {
            skipped += 1;
            continue;
        };
        candles.push(Candle {
            date: moment.date_naive(),
            open,
            high,
            low,
            close,
            volume,
        });
    }
    if skipped > 0 {
        debug!("Skipped {} incomplete bar(s) for {}", skipped, ticker);
    }

    let series = PriceSeries::new(ticker, candles);
    if series.is_empty() {
        return Err(PipelineError::EmptySeries {
            ticker: ticker.to_string(),
        });
    }
    Ok(series)
}

/// Versioned offline copy of fetched series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub series: Vec<PriceSeries>,
}

impl PriceSnapshot {
    pub fn new(series: Vec<PriceSeries>) -> Self {
        Self {
            version: PRICE_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            series,
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!("Unable to create price snapshot at {}", path.display())
        })?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self).context("Snapshot encode failed")?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open price snapshot at {}", path.display()))?;
        let reader = BufReader::new(file);
        let snapshot: PriceSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != PRICE_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Price snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                PRICE_SNAPSHOT_VERSION
            ));
        }
        Ok(snapshot)
    }
}

/// Serves series from a loaded snapshot instead of the network.
pub struct SnapshotSource {
    series: HashMap<String, PriceSeries>,
}

impl SnapshotSource {
    pub fn from_snapshot(snapshot: PriceSnapshot) -> Self {
        let series = snapshot
            .series
            .into_iter()
            .map(|series| (series.ticker.to_uppercase(), series))
            .collect();
        Self { series }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let snapshot = PriceSnapshot::load_from_file(path)?;
        info!(
            "Loaded price snapshot from {} ({} series, generated {})",
            path.display(),
            snapshot.series.len(),
            snapshot.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn tickers(&self) -> Vec<String> {
        let mut tickers: Vec<String> = self.series.keys().cloned().collect();
        tickers.sort();
        tickers
    }
}

impl PriceSource for SnapshotSource {
    async fn fetch_series(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> PipelineResult<PriceSeries> {
        let series = self
            .series
            .get(&ticker.to_uppercase())
            .map(|series| series.within(start, end))
            .filter(|series| !series.is_empty());
        series.ok_or_else(|| PipelineError::EmptySeries {
            ticker: ticker.to_string(),
        })
    }
}
