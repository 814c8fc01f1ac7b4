use anyhow::{anyhow, Result};
use chrono::{Months, NaiveDate, Utc};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::PipelineError;
use crate::forest::ForestConfig;

pub const SETTINGS_ENV_PREFIX: &str = "PRICECAST_";
pub const DEFAULT_HORIZON: usize = 1;
pub const DEFAULT_TEST_RATIO: f64 = 0.2;
pub const DEFAULT_TREES: usize = 100;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_MIN_SAMPLES_SPLIT: usize = 2;
pub const DEFAULT_MIN_SAMPLES_LEAF: usize = 1;
pub const MAX_HORIZON: usize = 3_650;
pub const DEFAULT_LOOKBACK_YEARS: u32 = 5;
pub const DEFAULT_YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Everything one ticker's run needs besides its price series.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub horizon: usize,
    pub test_ratio: f64,
    pub forest: ForestConfig,
    pub chart_dir: PathBuf,
}

impl PipelineConfig {
    pub fn validate(&self) -> std::result::Result<(), PipelineError> {
        if self.horizon == 0 {
            return Err(PipelineError::InvalidConfig(
                "horizon must be a positive number of trading days".to_string(),
            ));
        }
        if self.horizon > MAX_HORIZON {
            return Err(PipelineError::InvalidConfig(format!(
                "horizon must be at most {} trading days (value: {})",
                MAX_HORIZON, self.horizon
            )));
        }
        if !(self.test_ratio > 0.0 && self.test_ratio < 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "test ratio must be strictly between 0 and 1 (value: {})",
                self.test_ratio
            )));
        }
        if self.start >= self.end {
            return Err(PipelineError::InvalidConfig(format!(
                "start date {} must be before end date {}",
                self.start, self.end
            )));
        }
        if self.forest.n_trees == 0 {
            return Err(PipelineError::InvalidConfig(
                "ensemble size must be at least 1".to_string(),
            ));
        }
        if self.forest.min_samples_split < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "min samples per split must be >= 2 (value: {})",
                self.forest.min_samples_split
            )));
        }
        if self.forest.min_samples_leaf == 0 {
            return Err(PipelineError::InvalidConfig(
                "min samples per leaf must be >= 1".to_string(),
            ));
        }
        if self.forest.max_depth == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "max depth must be >= 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Optional overrides read from `PRICECAST_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvSettings {
    pub horizon: Option<usize>,
    pub test_ratio: Option<f64>,
    pub trees: Option<usize>,
    pub seed: Option<u64>,
    pub max_depth: Option<usize>,
    pub min_samples_split: Option<usize>,
    pub min_samples_leaf: Option<usize>,
    pub lookback_years: Option<u32>,
    pub yahoo_url: Option<String>,
    pub http_timeout_secs: Option<u64>,
}

impl EnvSettings {
    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(SETTINGS_ENV_PREFIX)
                    .map(|stripped| (stripped.to_string(), value))
            })
            .collect();
        Self::from_settings_map(&settings)
    }

    /// Keys are expected without the `PRICECAST_` prefix.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            horizon: optional_setting_usize(settings, "HORIZON", 1)?,
            test_ratio: optional_setting_f64(settings, "TEST_RATIO", Some(0.0), Some(1.0))?,
            trees: optional_setting_usize(settings, "TREES", 1)?,
            seed: optional_setting_u64(settings, "SEED")?,
            max_depth: optional_setting_usize(settings, "MAX_DEPTH", 1)?,
            min_samples_split: optional_setting_usize(settings, "MIN_SAMPLES_SPLIT", 2)?,
            min_samples_leaf: optional_setting_usize(settings, "MIN_SAMPLES_LEAF", 1)?,
            lookback_years: optional_setting_usize(settings, "LOOKBACK_YEARS", 1)?
                .map(|value| value as u32),
            yahoo_url: optional_setting(settings, "YAHOO_URL")
                .map(|value| value.trim_end_matches('/').to_string()),
            http_timeout_secs: optional_setting_usize(settings, "HTTP_TIMEOUT_SECS", 1)?
                .map(|value| value as u64),
        })
    }

    pub fn yahoo_url(&self) -> String {
        self.yahoo_url
            .clone()
            .unwrap_or_else(|| DEFAULT_YAHOO_CHART_URL.to_string())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS))
    }
}

/// Resolves the requested window; a missing end means today and a missing start
/// means `lookback_years` before the end.
pub fn resolve_date_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    lookback_years: u32,
) -> Result<(NaiveDate, NaiveDate)> {
    let end = end.unwrap_or_else(|| Utc::now().date_naive());
    let start = match start {
        Some(value) => value,
        None => end
            .checked_sub_months(Months::new(lookback_years.saturating_mul(12)))
            .ok_or_else(|| anyhow!("lookback of {} years is out of range", lookback_years))?,
    };
    Ok((start, end))
}

/// Splits comma/whitespace separated tickers, upper-cases them and drops blanks
/// and repeats while keeping first-seen order.
pub fn normalize_tickers(raw: &[String]) -> Vec<String> {
    let mut tickers: Vec<String> = Vec::new();
    for ticker in raw
        .iter()
        .flat_map(|value| value.split(|c: char| c == ',' || c.is_whitespace()))
        .map(|value| value.trim().to_uppercase())
        .filter(|value| !value.is_empty())
    {
        if !tickers.contains(&ticker) {
            tickers.push(ticker);
        }
    }
    tickers
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow!("date must be in YYYY-MM-DD format (value: {})", raw))
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Option<f64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value <= min_value {
            return Err(anyhow!(
                "Setting {} must be > {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value >= max_value {
            return Err(anyhow!(
                "Setting {} must be < {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(Some(value))
}

fn optional_setting_u64(settings: &HashMap<String, String>, key: &str) -> Result<Option<u64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        anyhow!(
            "Setting {} must be a non-negative integer (value: {})",
            key,
            raw
        )
    })?;
    Ok(Some(value))
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<Option<usize>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(Some(value as usize))
}
