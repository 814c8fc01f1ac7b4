use anyhow::{anyhow, Result};
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Weekday};
use pricecast::commands::{export_prices, forecast};
use pricecast::config::{EnvSettings, PipelineConfig};
use pricecast::error::{PipelineError, PipelineResult};
use pricecast::features::{prepare_dataset, IndicatorSupport};
use pricecast::forecast::forecast_date;
use pricecast::forest::ForestConfig;
use pricecast::market_data::{PriceSource, YahooChartSource};
use pricecast::models::{Candle, PriceSeries};
use pricecast::pipeline::Pipeline;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fs;
use std::io::{BufRead, BufReader, Write as IoWrite};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Once};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

// MACD signal needs 33 warm-up bars and the last bar has no target.
const INDICATOR_WARM_UP: usize = 33;
const HUNDRED_USABLE_RAW_ROWS: usize = INDICATOR_WARM_UP + 100 + 1;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn baseline_start_date() -> NaiveDate {
    // Monday
    NaiveDate::from_ymd_opt(2023, 1, 2).expect("valid date")
}

fn unique_temp_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("pricecast_{}_{}", label, Uuid::new_v4()))
}

/// Deterministic weekday-only OHLCV series built from overlapping waves.
fn synthetic_series(ticker: &str, days: usize, base_price: f64) -> PriceSeries {
    let mut candles = Vec::with_capacity(days);
    let mut date = baseline_start_date();
    for day in 0..days {
        while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            date += ChronoDuration::days(1);
        }
        let day_f = day as f64;
        let fast_wave = (day_f / 6.0).sin();
        let slow_wave = (day_f / 35.0).cos();
        let seasonal_wave = ((day_f / 90.0) * PI).sin();
        let close = base_price + day_f * 0.15 + 6.5 * seasonal_wave + 3.0 * slow_wave + 1.5 * fast_wave;
        let intraday_range = 1.0 + fast_wave.abs() * 1.5 + slow_wave.abs();
        let open = close - fast_wave * intraday_range * 0.4;
        candles.push(Candle {
            date,
            open,
            high: open.max(close) + intraday_range * 0.5,
            low: open.min(close) - intraday_range * 0.5,
            close,
            volume: 1_000_000.0 + 250_000.0 * (day_f / 4.0).sin().abs(),
        });
        date += ChronoDuration::days(1);
    }
    PriceSeries::new(ticker, candles)
}

fn test_config(series_end: NaiveDate) -> PipelineConfig {
    PipelineConfig {
        start: baseline_start_date(),
        end: series_end,
        horizon: 1,
        test_ratio: 0.2,
        forest: ForestConfig {
            n_trees: 20,
            ..ForestConfig::default()
        },
        chart_dir: unique_temp_dir("charts"),
    }
}

/// Serves prepared series; unknown tickers behave like a failed lookup.
struct InMemorySource {
    series: HashMap<String, PriceSeries>,
}

impl InMemorySource {
    fn new(series: Vec<PriceSeries>) -> Self {
        Self {
            series: series
                .into_iter()
                .map(|series| (series.ticker.clone(), series))
                .collect(),
        }
    }
}

impl PriceSource for InMemorySource {
    async fn fetch_series(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> PipelineResult<PriceSeries> {
        let Some(series) = self.series.get(ticker) else {
            return Err(PipelineError::Fetch {
                ticker: ticker.to_string(),
                message: "unknown symbol".to_string(),
            });
        };
        let series = series.within(start, end);
        if series.is_empty() {
            return Err(PipelineError::EmptySeries {
                ticker: ticker.to_string(),
            });
        }
        Ok(series)
    }
}

#[tokio::test]
async fn hundred_usable_rows_split_eighty_twenty() -> Result<()> {
    ensure_test_env();
    let series = synthetic_series("SYN", HUNDRED_USABLE_RAW_ROWS, 100.0);
    let last_date = series.last_date().ok_or_else(|| anyhow!("empty series"))?;
    let config = test_config(last_date);
    let chart_dir = config.chart_dir.clone();
    let pipeline = Pipeline::new(
        InMemorySource::new(vec![series]),
        config,
        IndicatorSupport::Available,
    );

    let outcome = pipeline.run_ticker("SYN").await?;
    assert_eq!(outcome.stats.raw_rows, HUNDRED_USABLE_RAW_ROWS);
    assert_eq!(outcome.stats.incomplete_feature_rows, INDICATOR_WARM_UP);
    assert_eq!(outcome.stats.missing_target_rows, 1);
    assert_eq!(outcome.stats.usable_rows, 100);
    assert_eq!(outcome.train_rows, 80);
    assert_eq!(outcome.test_rows, 20);
    assert_eq!(outcome.test_dates.len(), 20);
    assert_eq!(outcome.feature_count, 22);

    assert_eq!(outcome.forecast.last_date, last_date);
    assert_eq!(Some(outcome.forecast.date), forecast_date(last_date, 1));
    assert!(!matches!(
        outcome.forecast.date.weekday(),
        Weekday::Sat | Weekday::Sun
    ));
    assert!(outcome.forecast.price.is_finite());
    assert!(outcome.metrics.rmse >= 0.0);
    assert!((outcome.metrics.rmse.powi(2) - outcome.metrics.mse).abs() < 1e-9);
    assert!(outcome.top_features.len() <= 5);

    let chart = outcome
        .chart_path
        .clone()
        .ok_or_else(|| anyhow!("chart was not written"))?;
    assert!(chart.starts_with(&chart_dir));
    assert!(fs::read_to_string(&chart)?.contains("<polyline"));

    let record = outcome.record();
    assert_eq!(record.ticker, "SYN");
    assert_eq!(record.next_price, outcome.forecast.price);

    let _ = fs::remove_dir_all(&chart_dir);
    Ok(())
}

fn column_means(rows: &[Vec<f64>]) -> Vec<f64> {
    let width = rows.first().map(|row| row.len()).unwrap_or(0);
    (0..width)
        .map(|col| rows.iter().map(|row| row[col]).sum::<f64>() / rows.len() as f64)
        .collect()
}

#[tokio::test]
async fn scaler_is_fit_on_training_rows_only() -> Result<()> {
    ensure_test_env();
    let series = synthetic_series("FIT", 160, 60.0);
    let last_date = series.last_date().ok_or_else(|| anyhow!("empty series"))?;
    let dataset = prepare_dataset(&series, 1, IndicatorSupport::Available)?;
    let config = test_config(last_date);
    let chart_dir = config.chart_dir.clone();
    let pipeline = Pipeline::new(
        InMemorySource::new(vec![series]),
        config,
        IndicatorSupport::Available,
    );

    let outcome = pipeline.run_ticker("FIT").await?;
    let all_rows: Vec<Vec<f64>> = dataset
        .samples
        .iter()
        .map(|sample| sample.features.clone())
        .collect();
    let train_means = column_means(&all_rows[..outcome.train_rows]);
    let full_means = column_means(&all_rows);

    assert_eq!(outcome.scaler_means.len(), train_means.len());
    for (fitted, expected) in outcome.scaler_means.iter().zip(train_means.iter()) {
        assert!(
            (fitted - expected).abs() <= 1e-9 * expected.abs().max(1.0),
            "scaler mean {} differs from training mean {}",
            fitted,
            expected
        );
    }
    // Test rows continue the trend, so including them would move the close mean.
    let close_idx = dataset
        .feature_names
        .iter()
        .position(|name| name == "close")
        .ok_or_else(|| anyhow!("close column missing"))?;
    assert!((outcome.scaler_means[close_idx] - full_means[close_idx]).abs() > 1e-6);

    let _ = fs::remove_dir_all(&chart_dir);
    Ok(())
}

#[tokio::test]
async fn reduced_feature_set_still_forecasts() -> Result<()> {
    ensure_test_env();
    let series = synthetic_series("LAGS", 60, 50.0);
    let last_date = series.last_date().ok_or_else(|| anyhow!("empty series"))?;
    let config = test_config(last_date);
    let chart_dir = config.chart_dir.clone();
    let pipeline = Pipeline::new(
        InMemorySource::new(vec![series]),
        config,
        IndicatorSupport::Unavailable,
    );

    let outcome = pipeline.run_ticker("LAGS").await?;
    assert_eq!(outcome.feature_count, 10);
    assert_eq!(outcome.stats.incomplete_feature_rows, 1);
    assert_eq!(outcome.stats.usable_rows, 58);
    assert!(outcome.forecast.price.is_finite());

    let _ = fs::remove_dir_all(&chart_dir);
    Ok(())
}

#[tokio::test]
async fn failing_tickers_are_skipped_and_run_continues() -> Result<()> {
    ensure_test_env();
    let good = synthetic_series("GOOD", 120, 80.0);
    let last_date = good.last_date().ok_or_else(|| anyhow!("empty series"))?;
    let short = synthetic_series("SHORT", 10, 20.0);
    let late = PriceSeries::new(
        "LATE",
        vec![Candle {
            date: last_date + ChronoDuration::days(30),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        }],
    );
    let config = test_config(last_date);
    let chart_dir = config.chart_dir.clone();
    let pipeline = Pipeline::new(
        InMemorySource::new(vec![good, short, late]),
        config,
        IndicatorSupport::Available,
    );

    let tickers: Vec<String> = ["LATE", "GOOD", "MISSING", "SHORT"]
        .iter()
        .map(|t| t.to_string())
        .collect();
    let summary = pipeline.run_all(&tickers).await;

    let records = summary.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].ticker, "GOOD");

    let failed: Vec<&str> = summary
        .failures
        .iter()
        .map(|failure| failure.ticker.as_str())
        .collect();
    assert_eq!(failed, vec!["LATE", "MISSING", "SHORT"]);
    assert!(summary.failures[0].reason.contains("no price rows"));
    assert!(summary.failures[2].reason.contains("usable"));

    let _ = fs::remove_dir_all(&chart_dir);
    Ok(())
}

#[tokio::test]
async fn same_seed_reproduces_the_forecast() -> Result<()> {
    ensure_test_env();
    let series = synthetic_series("REP", 150, 120.0);
    let last_date = series.last_date().ok_or_else(|| anyhow!("empty series"))?;
    let config = test_config(last_date);
    let chart_dir = config.chart_dir.clone();
    let pipeline = Pipeline::new(
        InMemorySource::new(vec![series]),
        config,
        IndicatorSupport::Available,
    );

    let first = pipeline.run_ticker("REP").await?;
    let second = pipeline.run_ticker("REP").await?;
    assert_eq!(first.forecast.price, second.forecast.price);
    assert_eq!(first.test_predicted, second.test_predicted);
    assert_eq!(first.metrics, second.metrics);

    let _ = fs::remove_dir_all(&chart_dir);
    Ok(())
}

#[tokio::test]
async fn snapshot_export_feeds_offline_forecast() -> Result<()> {
    ensure_test_env();
    let series = synthetic_series("SNAP", 140, 40.0);
    let last_date = series.last_date().ok_or_else(|| anyhow!("empty series"))?;
    let dir = unique_temp_dir("snapshot");
    let snapshot_path = dir.join("prices.bin");

    let source = InMemorySource::new(vec![series]);
    export_prices::export(
        &source,
        &["snap".to_string(), "NOPE".to_string()],
        Some(baseline_start_date()),
        Some(last_date),
        &snapshot_path,
        &EnvSettings::default(),
    )
    .await?;
    assert!(snapshot_path.exists());

    let options = forecast::ForecastOptions {
        tickers: vec!["snap, absent".to_string()],
        start: Some(baseline_start_date()),
        end: Some(last_date),
        trees: Some(10),
        chart_dir: Some(dir.join("charts")),
        data_file: Some(snapshot_path.clone()),
        ..forecast::ForecastOptions::default()
    };
    let summary = forecast::run(options, &EnvSettings::default()).await?;
    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(summary.outcomes[0].ticker, "SNAP");
    assert_eq!(summary.outcomes[0].stats.raw_rows, 140);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].ticker, "ABSENT");

    let _ = fs::remove_dir_all(&dir);
    Ok(())
}

#[tokio::test]
async fn export_without_any_series_fails() -> Result<()> {
    ensure_test_env();
    let dir = unique_temp_dir("empty_snapshot");
    let snapshot_path = dir.join("prices.bin");
    let result = export_prices::export(
        &InMemorySource::new(Vec::new()),
        &["NONE".to_string()],
        Some(baseline_start_date()),
        Some(baseline_start_date() + ChronoDuration::days(30)),
        &snapshot_path,
        &EnvSettings::default(),
    )
    .await;
    assert!(result.is_err());
    assert!(!snapshot_path.exists());
    Ok(())
}

#[tokio::test]
async fn yahoo_chart_source_reads_stub_payload() -> Result<()> {
    ensure_test_env();
    let series = synthetic_series("AAPL", 90, 150.0);
    let last_date = series.last_date().ok_or_else(|| anyhow!("empty series"))?;
    let mut payloads = HashMap::new();
    payloads.insert("AAPL".to_string(), chart_payload_with_gap(&series, 5));
    let stub = YahooStub::start(payloads)?;

    let source = YahooChartSource::new(format!("{}/chart", stub.base_url), Duration::from_secs(5))?;
    let fetched = source
        .fetch_series("AAPL", baseline_start_date(), last_date)
        .await?;
    assert_eq!(fetched.len(), 89);
    assert_eq!(fetched.last_date(), Some(last_date));
    assert!(!fetched.dates().contains(&series.dates()[5]));

    let window_end = series.dates()[39];
    let windowed = source
        .fetch_series("AAPL", baseline_start_date(), window_end)
        .await?;
    assert_eq!(windowed.last_date(), Some(window_end));

    let missing = source
        .fetch_series("ZZZZ", baseline_start_date(), last_date)
        .await;
    match missing {
        Err(PipelineError::Fetch { ticker, message }) => {
            assert_eq!(ticker, "ZZZZ");
            assert!(message.contains("404"));
            assert!(message.contains("delisted"));
        }
        other => return Err(anyhow!("expected fetch failure, got {:?}", other.map(|s| s.len()))),
    }
    Ok(())
}

#[tokio::test]
async fn pipeline_runs_against_yahoo_stub() -> Result<()> {
    ensure_test_env();
    let series = synthetic_series("MSFT", 130, 300.0);
    let last_date = series.last_date().ok_or_else(|| anyhow!("empty series"))?;
    let mut payloads = HashMap::new();
    payloads.insert("MSFT".to_string(), chart_payload_with_gap(&series, usize::MAX));
    let stub = YahooStub::start(payloads)?;

    let source = YahooChartSource::new(format!("{}/chart", stub.base_url), Duration::from_secs(5))?;
    let config = test_config(last_date);
    let chart_dir = config.chart_dir.clone();
    let pipeline = Pipeline::new(source, config, IndicatorSupport::Available);

    let tickers = vec!["MSFT".to_string(), "ZZZZ".to_string()];
    let summary = pipeline.run_all(&tickers).await;
    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(summary.outcomes[0].stats.raw_rows, 130);
    assert_eq!(summary.failures.len(), 1);

    let _ = fs::remove_dir_all(&chart_dir);
    Ok(())
}

/// Chart JSON for `series`, with the close at `null_close_idx` nulled out.
fn chart_payload_with_gap(series: &PriceSeries, null_close_idx: usize) -> String {
    let candles = series.candles();
    let timestamps: Vec<i64> = candles
        .iter()
        .map(|c| {
            c.date
                .and_hms_opt(14, 30, 0)
                .expect("valid time")
                .and_utc()
                .timestamp()
        })
        .collect();
    let closes: Vec<Option<f64>> = candles
        .iter()
        .enumerate()
        .map(|(idx, c)| (idx != null_close_idx).then_some(c.close))
        .collect();
    serde_json::json!({
        "chart": {
            "result": [{
                "meta": { "symbol": series.ticker, "currency": "USD" },
                "timestamp": timestamps,
                "indicators": {
                    "quote": [{
                        "open": candles.iter().map(|c| c.open).collect::<Vec<_>>(),
                        "high": candles.iter().map(|c| c.high).collect::<Vec<_>>(),
                        "low": candles.iter().map(|c| c.low).collect::<Vec<_>>(),
                        "close": closes,
                        "volume": candles.iter().map(|c| c.volume.round() as u64).collect::<Vec<_>>(),
                    }],
                    "adjclose": [{ "adjclose": candles.iter().map(|c| c.close).collect::<Vec<_>>() }]
                }
            }],
            "error": null
        }
    })
    .to_string()
}

struct YahooStub {
    base_url: String,
    shutdown: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl YahooStub {
    fn start(payloads: HashMap<String, String>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let base_url = format!("http://{}", addr);
        let (shutdown, shutdown_rx) = mpsc::channel();
        let shared = Arc::new(payloads);

        let handle = thread::spawn(move || loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    let payloads = Arc::clone(&shared);
                    let _ = stream.set_nonblocking(false);
                    let _ = handle_chart_request(stream, &payloads);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    thread::sleep(Duration::from_millis(10));
                }
            }
        });

        Ok(Self {
            base_url,
            shutdown,
            handle: Some(handle),
        })
    }
}

impl Drop for YahooStub {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_chart_request(
    mut stream: std::net::TcpStream,
    payloads: &HashMap<String, String>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line)? == 0 {
        return Ok(());
    }

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Ok(());
    }
    let raw_path = parts[1];
    let path_only = raw_path.split('?').next().unwrap_or(raw_path);

    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 {
            break;
        }
        if header == "\r\n" {
            break;
        }
    }

    let payload = path_only
        .strip_prefix("/chart/")
        .and_then(|ticker| payloads.get(ticker));
    match (parts[0], payload) {
        ("GET", Some(body)) => write_json_response(&mut stream, "200 OK", body),
        _ => write_json_response(
            &mut stream,
            "404 Not Found",
            r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#,
        ),
    }
}

fn write_json_response(
    stream: &mut std::net::TcpStream,
    status: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes())
}
