//! Dosing planner: stock bolus from the two-component mixing law.
//!
//! `C_final = (C_stock * V_bolus + C_vessel * V) / (V_bolus + V)`, solved for
//! `V_bolus` at `C_final = target`.

use crate::error::ControllerError;

pub use evolver_config::MAX_BOLUS_ML;

/// A planned bolus and the concentration it leaves behind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BolusPlan {
    /// mL of stock; 0 when nothing is added.
    pub bolus_ml: f64,
    /// Estimated concentration after the bolus.
    pub new_conc: f64,
    /// The bolus was capped at the maximum.
    pub capped: bool,
}

impl BolusPlan {
    fn none(conc: f64) -> Self {
        Self {
            bolus_ml: 0.0,
            new_conc: conc,
            capped: false,
        }
    }
}

/// Plan a bolus that brings `current_conc` up to `target`.
///
/// Anything outside `(0, max_bolus_ml]` after capping is either dropped
/// (below `min_bolus_ml`, including negative volumes when the stock is weaker
/// than the target) or capped with the partial concentration recomputed.
/// `max_bolus_ml` never exceeds [`MAX_BOLUS_ML`].
pub fn plan_bolus(
    current_conc: f64,
    target: f64,
    stock_conc: f64,
    volume_ml: f64,
    min_bolus_ml: f64,
    max_bolus_ml: f64,
) -> Result<BolusPlan, ControllerError> {
    if target <= 0.0 || current_conc / target >= 1.0 {
        return Ok(BolusPlan::none(current_conc));
    }
    let max_bolus_ml = max_bolus_ml.min(MAX_BOLUS_ML);
    let bolus = volume_ml * (current_conc - target) / (target - stock_conc);
    if bolus.is_nan() {
        return Err(ControllerError::NumericDegeneracy(format!(
            "bolus is NaN (conc {current_conc}, target {target}, stock {stock_conc})"
        )));
    }
    if bolus > max_bolus_ml {
        let new_conc = (stock_conc * max_bolus_ml + current_conc * volume_ml) / (max_bolus_ml + volume_ml);
        return Ok(BolusPlan {
            bolus_ml: max_bolus_ml,
            new_conc,
            capped: true,
        });
    }
    if bolus < min_bolus_ml {
        return Ok(BolusPlan::none(current_conc));
    }
    Ok(BolusPlan {
        bolus_ml: bolus,
        new_conc: target,
        capped: false,
    })
}

/// Seconds of dosing pump for `bolus_ml`, rounded to hundredths.
pub fn dosing_time(bolus_ml: f64, flow_ml_s: f64) -> Result<f64, ControllerError> {
    let t = bolus_ml / flow_ml_s;
    if !t.is_finite() || t < 0.0 {
        return Err(ControllerError::NumericDegeneracy(format!(
            "dosing time {t} for {bolus_ml} mL"
        )));
    }
    Ok(crate::util::round_to(t, 2))
}
