use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One daily OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Daily bars for a single ticker, ordered by date with no duplicate dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub ticker: String,
    candles: Vec<Candle>,
}

impl PriceSeries {
    /// Builds a series, sorting by date and keeping the last bar seen for any repeated date.
    pub fn new(ticker: impl Into<String>, mut candles: Vec<Candle>) -> Self {
        candles.sort_by(|a, b| a.date.cmp(&b.date));
        let mut deduped: Vec<Candle> = Vec::with_capacity(candles.len());
        for candle in candles {
            match deduped.last_mut() {
                Some(last) if last.date == candle.date => *last = candle,
                _ => deduped.push(candle),
            }
        }
        Self {
            ticker: ticker.into(),
            candles: deduped,
        }
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.candles.first().map(|c| c.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.candles.last().map(|c| c.date)
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.candles.iter().map(|c| c.date).collect()
    }

    pub fn opens(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.open).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low).collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }

    /// Returns the bars dated within `start..=end`.
    pub fn within(&self, start: NaiveDate, end: NaiveDate) -> PriceSeries {
        let candles = self
            .candles
            .iter()
            .filter(|c| c.date >= start && c.date <= end)
            .cloned()
            .collect();
        PriceSeries {
            ticker: self.ticker.clone(),
            candles,
        }
    }
}

/// Per-ticker outcome collected into the run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastRecord {
    pub ticker: String,
    pub rmse: f64,
    pub r2: f64,
    pub next_price: f64,
    pub forecast_date: NaiveDate,
}
