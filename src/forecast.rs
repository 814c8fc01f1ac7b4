use chrono::{Datelike, Days, NaiveDate, Weekday};

use crate::error::{PipelineError, PipelineResult};
use crate::features::ForecastRow;
use crate::forest::RandomForestRegressor;
use crate::scaler::StandardScaler;

/// Adds `horizon` calendar days to `last`, then moves forward past Saturday and Sunday.
/// Market holidays are not considered. `None` when the result is outside the calendar range.
pub fn forecast_date(last: NaiveDate, horizon: usize) -> Option<NaiveDate> {
    let days = u64::try_from(horizon).ok()?;
    let mut date = last.checked_add_days(Days::new(days))?;
    while is_weekend(date) {
        date = date.succ_opt()?;
    }
    Some(date)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NextForecast {
    pub last_date: NaiveDate,
    pub last_close: f64,
    pub date: NaiveDate,
    pub price: f64,
}

impl NextForecast {
    pub fn change_pct(&self) -> f64 {
        if self.last_close != 0.0 {
            (self.price / self.last_close - 1.0) * 100.0
        } else {
            0.0
        }
    }
}

/// Scales the held-back row with the training scaler and predicts one step ahead.
pub fn forecast_next(
    scaler: &StandardScaler,
    model: &RandomForestRegressor,
    row: &ForecastRow,
    horizon: usize,
) -> PipelineResult<NextForecast> {
    let date = forecast_date(row.date, horizon).ok_or_else(|| {
        PipelineError::InvalidConfig(format!(
            "horizon of {} days from {} is outside the supported date range",
            horizon, row.date
        ))
    })?;
    let scaled = scaler.transform_row(&row.features);
    Ok(NextForecast {
        last_date: row.date,
        last_close: row.close,
        date,
        price: model.predict_row(&scaled),
    })
}
