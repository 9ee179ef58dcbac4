//! Rescue dilutions after a selection decrease.

use evolver_traits::{Channel, LogStore};

use crate::error::ControllerError;
use crate::records::{self, StepLogEntry};
use crate::threshold::MAX_PULSE_S;
use crate::util::round_to;

/// Status fragment marking a rescue dilution.
pub const RESCUE_MARKER: &str = "RESCUE";
/// Status fragment marking a selection increase; resets the rescue budget.
pub const INCREASE_MARKER: &str = "INCREASE";

const FIRST_SCAN: usize = 64;

/// Rescues in `entries` (oldest first) after the most recent increase.
///
/// Returns the count and whether an increase bounded the scan.
pub fn count_since_increase(entries: &[StepLogEntry]) -> (usize, bool) {
    let mut count = 0;
    for e in entries.iter().rev() {
        if e.status.contains(INCREASE_MARKER) {
            return (count, true);
        }
        if e.status.contains(RESCUE_MARKER) {
            count += 1;
        }
    }
    (count, false)
}

/// Rescues logged since the vessel's last increase.
///
/// Reads a growing tail of the step log until an increase is found or the
/// whole stream has been scanned.
pub fn count_rescues(store: &dyn LogStore, vessel: usize) -> Result<usize, ControllerError> {
    let total = records::stream_len(store, vessel, Channel::StepLog)?;
    let mut n = FIRST_SCAN;
    loop {
        let entries: Vec<StepLogEntry> = records::read_tail(store, vessel, Channel::StepLog, n)?;
        let (count, bounded) = count_since_increase(&entries);
        if bounded || n >= total {
            return Ok(count);
        }
        n = n.saturating_mul(2);
    }
}

/// A rescue pulse ready to schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RescuePlan {
    /// Influx seconds, rounded to hundredths.
    pub time_in_s: f64,
    /// Dilution factor the pulse achieves.
    pub dilution_factor: f64,
    /// The pulse hit the 20 s ceiling and under-dilutes.
    pub clamped: bool,
}

/// Plan a rescue dilution from `last_conc` toward `new_level`.
///
/// The factor is `new_level / last_conc`, or `rescue_threshold` when the
/// vessel was at level 0, and never below `rescue_threshold`.
pub fn plan_rescue(
    new_level: f64,
    last_level: f64,
    last_conc: f64,
    rescue_threshold: f64,
    volume_ml: f64,
    flow_ml_s: f64,
) -> Result<RescuePlan, ControllerError> {
    let mut factor = if last_level == 0.0 {
        rescue_threshold
    } else {
        new_level / last_conc
    };
    // NaN stays NaN here and is caught below.
    if factor < rescue_threshold {
        factor = rescue_threshold;
    }

    let time_in = -factor.ln() * volume_ml / flow_ml_s;
    if time_in.is_nan() {
        return Err(ControllerError::NumericDegeneracy(
            "rescue time_in is NaN".into(),
        ));
    }
    if time_in <= 0.0 {
        return Err(ControllerError::NumericDegeneracy(format!(
            "rescue time_in {time_in} is <= 0"
        )));
    }

    if time_in > MAX_PULSE_S {
        return Ok(RescuePlan {
            time_in_s: MAX_PULSE_S,
            dilution_factor: (-MAX_PULSE_S * flow_ml_s / volume_ml).exp(),
            clamped: true,
        });
    }
    Ok(RescuePlan {
        time_in_s: round_to(time_in, 2),
        dilution_factor: factor,
        clamped: false,
    })
}
