use crate::error::{PipelineError, PipelineResult};

/// Absorbs representation error in `n * (1 - ratio)` so exact products are not floored down.
const SPLIT_EPSILON: f64 = 1e-9;

/// Position of the first test row: `floor(n * (1 - test_ratio))`, clamped to `1..=n-1`.
pub fn split_position(n: usize, test_ratio: f64) -> PipelineResult<usize> {
    if n < 2 {
        return Err(PipelineError::DegenerateSplit { rows: n });
    }
    let raw = (n as f64 * (1.0 - test_ratio) + SPLIT_EPSILON).floor();
    let position = if raw.is_finite() && raw > 0.0 {
        raw as usize
    } else {
        0
    };
    Ok(position.clamp(1, n - 1))
}

/// Splits rows chronologically: everything before the split position trains, the rest tests.
pub fn chronological_split<T>(rows: &[T], test_ratio: f64) -> PipelineResult<(&[T], &[T])> {
    let position = split_position(rows.len(), test_ratio)?;
    Ok(rows.split_at(position))
}
