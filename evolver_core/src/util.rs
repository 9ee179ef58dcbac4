//! Small numeric helpers shared by the planners.

/// Pump debounce is configured in minutes; timestamps are in hours.
pub const MINUTES_PER_HOUR: f64 = 60.0;

/// Tolerance when matching timestamps written by the same tick.
pub const TIME_EPSILON_H: f64 = 1e-9;

/// Median of `values`; the mean of the two middle values for even lengths.
/// Returns `None` for an empty slice. NaNs sort last.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    let n = sorted.len();
    let mid = n / 2;
    if n.is_multiple_of(2) {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Round half away from zero to `decimals` places.
#[inline]
pub fn round_to(x: f64, decimals: i32) -> f64 {
    let p = 10f64.powi(decimals);
    (x * p).round() / p
}

/// Whether two experiment timestamps refer to the same instant.
#[inline]
pub fn same_time(a: f64, b: f64) -> bool {
    (a - b).abs() <= TIME_EPSILON_H
}
