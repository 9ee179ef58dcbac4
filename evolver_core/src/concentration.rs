//! Concentration tracker.
//!
//! Fresh media dilutes cells and selective agent alike, so the OD drop across
//! a dilution measures the concentration drop. The effect is read once a
//! pump event has `window` OD samples on each side of it.

use crate::error::ControllerError;
use crate::records::OdSample;
use crate::util::{median, same_time};

/// Whether `pump_time` falls between the two halves of `od_window`: at or
/// after sample `window - 1` and before sample `window`.
pub fn splits_window(od_window: &[OdSample], pump_time: f64, window: usize) -> bool {
    if window == 0 || od_window.len() != 2 * window {
        return false;
    }
    let start = od_window[window - 1].time;
    let end = od_window[window].time;
    (pump_time >= start || same_time(pump_time, start))
        && pump_time < end
        && !same_time(pump_time, end)
}

/// Dilution factor measured across a pump event, if one is due.
///
/// `od_window` must hold the last `2 * window` samples, oldest first. The
/// factor is due when one of `pump_times` splits the window (see
/// [`splits_window`]), so the pump and sampler clocks need not agree to the
/// instant.
pub fn dilution_factor(
    od_window: &[OdSample],
    pump_times: &[f64],
    window: usize,
) -> Result<Option<f64>, ControllerError> {
    if !pump_times
        .iter()
        .any(|&t| splits_window(od_window, t, window))
    {
        return Ok(None);
    }

    let before: Vec<f64> = od_window[..window].iter().map(|s| s.od).collect();
    let after: Vec<f64> = od_window[window..].iter().map(|s| s.od).collect();
    let (Some(b), Some(a)) = (median(&before), median(&after)) else {
        return Ok(None);
    };
    let factor = a / b;
    if !factor.is_finite() || factor < 0.0 {
        return Err(ControllerError::NumericDegeneracy(format!(
            "dilution factor {factor} from OD {b} -> {a}"
        )));
    }
    Ok(Some(factor))
}
