//! Technical indicators aligned to the input series.
//!
//! Every function returns one value per input element. Positions whose look-back
//! window is not yet satisfied hold `f64::NAN`, and each value depends only on
//! inputs at or before its own index.

use crate::models::PriceSeries;

pub const SMA_SHORT: usize = 10;
pub const SMA_LONG: usize = 20;
pub const EMA_SHORT: usize = 10;
pub const EMA_LONG: usize = 20;
pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_STD_DEV: f64 = 2.0;
pub const ATR_PERIOD: usize = 14;

pub const INDICATOR_COLUMNS: [&str; 12] = [
    "sma_10",
    "sma_20",
    "ema_10",
    "ema_20",
    "rsi_14",
    "macd",
    "macd_signal",
    "macd_diff",
    "bb_upper_20",
    "bb_lower_20",
    "atr_14",
    "obv",
];

/// Computes every indicator column for the series, in `INDICATOR_COLUMNS` order.
pub fn indicator_columns(series: &PriceSeries) -> Vec<(&'static str, Vec<f64>)> {
    let highs = series.highs();
    let lows = series.lows();
    let closes = series.closes();
    let volumes = series.volumes();

    let (macd_line, signal_line, histogram) =
        calculate_macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
    let bands = calculate_bollinger_bands(&closes, BOLLINGER_PERIOD, BOLLINGER_STD_DEV);

    let columns = vec![
        ("sma_10", calculate_sma(&closes, SMA_SHORT)),
        ("sma_20", calculate_sma(&closes, SMA_LONG)),
        ("ema_10", calculate_ema(&closes, EMA_SHORT)),
        ("ema_20", calculate_ema(&closes, EMA_LONG)),
        ("rsi_14", calculate_rsi(&closes, RSI_PERIOD)),
        ("macd", macd_line),
        ("macd_signal", signal_line),
        ("macd_diff", histogram),
        ("bb_upper_20", bands.upper),
        ("bb_lower_20", bands.lower),
        ("atr_14", calculate_atr(&highs, &lows, &closes, ATR_PERIOD)),
        ("obv", calculate_obv(&closes, &volumes)),
    ];
    debug_assert!(columns
        .iter()
        .map(|(name, _)| *name)
        .eq(INDICATOR_COLUMNS.iter().copied()));
    columns
}

pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    let mut sma_values = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period {
        return sma_values;
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    sma_values[period - 1] = window_sum / period as f64;
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        sma_values[i] = window_sum / period as f64;
    }

    sma_values
}

/// Recursive EMA seeded with the first finite input; values before `period`
/// observations have accumulated are NaN.
pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    let mut ema_values = vec![f64::NAN; prices.len()];
    if period == 0 {
        return ema_values;
    }
    let Some(first) = prices.iter().position(|value| value.is_finite()) else {
        return ema_values;
    };

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = prices[first];
    for (observed, i) in (first..prices.len()).enumerate() {
        if observed > 0 {
            ema = (prices[i] * multiplier) + (ema * (1.0 - multiplier));
        }
        if observed + 1 >= period {
            ema_values[i] = ema;
        }
    }

    ema_values
}

pub fn calculate_macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let fast_ema = calculate_ema(prices, fast_period);
    let slow_ema = calculate_ema(prices, slow_period);

    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(fast, slow)| fast - slow)
        .collect();

    let signal_line = calculate_ema(&macd_line, signal_period);

    let histogram = macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(macd, signal)| macd - signal)
        .collect();

    (macd_line, signal_line, histogram)
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Wilder RSI. The first value appears at index `period`.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    let mut rsi_values = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period + 1 {
        return rsi_values;
    }

    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..=period {
        let delta = prices[i] - prices[i - 1];
        if delta >= 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let mut avg_gain = sum_gain / period as f64;
    let mut avg_loss = sum_loss / period as f64;
    rsi_values[period] = rsi_from_avgs(avg_gain, avg_loss);

    for i in (period + 1)..prices.len() {
        let delta = prices[i] - prices[i - 1];
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        rsi_values[i] = rsi_from_avgs(avg_gain, avg_loss);
    }

    rsi_values
}

pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Bands at `std_dev` population standard deviations around the SMA.
pub fn calculate_bollinger_bands(prices: &[f64], period: usize, std_dev: f64) -> BollingerBands {
    let middle = calculate_sma(prices, period);
    let mut upper = vec![f64::NAN; prices.len()];
    let mut lower = vec![f64::NAN; prices.len()];
    if period == 0 || prices.len() < period {
        return BollingerBands {
            upper,
            middle,
            lower,
        };
    }

    for i in (period - 1)..prices.len() {
        let window_start = i + 1 - period;
        let slice = &prices[window_start..=i];
        let mean = middle[i];
        let variance = slice.iter().map(|&val| (val - mean).powi(2)).sum::<f64>() / period as f64;
        let standard_deviation = variance.sqrt();

        upper[i] = mean + (std_dev * standard_deviation);
        lower[i] = mean - (std_dev * standard_deviation);
    }

    BollingerBands {
        upper,
        middle,
        lower,
    }
}

/// Wilder ATR, first defined at index `period`.
pub fn calculate_atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    let mut atr = vec![f64::NAN; n];
    if period == 0 || n <= period {
        return atr;
    }

    let mut tr_sum = 0.0f64;
    for i in 1..n {
        let prev_close = closes[i - 1];
        let tr = (highs[i] - lows[i])
            .max((highs[i] - prev_close).abs())
            .max((lows[i] - prev_close).abs());

        if i <= period {
            tr_sum += tr;
            if i == period {
                atr[i] = tr_sum / period as f64;
            }
        } else {
            atr[i] = ((atr[i - 1] * (period as f64 - 1.0)) + tr) / period as f64;
        }
    }

    atr
}

pub fn calculate_obv(closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let mut obv_values = vec![0.0; closes.len()];
    for i in 1..closes.len() {
        if closes[i] > closes[i - 1] {
            obv_values[i] = obv_values[i - 1] + volumes[i];
        } else if closes[i] < closes[i - 1] {
            obv_values[i] = obv_values[i - 1] - volumes[i];
        } else {
            obv_values[i] = obv_values[i - 1];
        }
    }
    obv_values
}
