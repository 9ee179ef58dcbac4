//! Step planner: selection ladders and their persisted descriptors.
//!
//! A ladder is regenerated only when its descriptor differs from the last one
//! recorded for the vessel. The descriptor excludes the timestamp.

use evolver_traits::{Channel, LogStore};
use tracing::{info, warn};

use crate::config::{LadderSpec, Spacing, VesselConfig};
use crate::error::ControllerError;
use crate::records::{self, StepLogEntry};
use crate::util::round_to;

/// Decimal places kept for interior rungs.
const LINEAR_DECIMALS: i32 = 1;
const LOG_DECIMALS: i32 = 3;

/// Status written when a configuration change re-seeds the step log.
pub const CONFIG_CHANGE_STATUS: &str = "CONFIG CHANGE";

/// Generate `count` ascending levels from `min_level` to `max_level`.
///
/// Endpoints are exact; interior rungs are rounded and clamped to the range,
/// so the result is non-decreasing.
pub fn plan(
    min_level: f64,
    max_level: f64,
    count: u32,
    spacing: Spacing,
) -> Result<Vec<f64>, ControllerError> {
    if !(min_level.is_finite() && max_level.is_finite()) {
        return Err(ControllerError::Config(format!(
            "ladder bounds must be finite (min {min_level}, max {max_level})"
        )));
    }
    if min_level > max_level {
        return Err(ControllerError::Config(format!(
            "min_level {min_level} must be <= max_level {max_level}"
        )));
    }
    if count == 0 {
        return Err(ControllerError::Config("step_count must be >= 1".into()));
    }
    if min_level == max_level {
        return Ok(vec![min_level]);
    }
    if count == 1 {
        return Err(ControllerError::Config(format!(
            "step_count 1 cannot span {min_level}..{max_level}"
        )));
    }
    if spacing == Spacing::Log && min_level <= 0.0 {
        return Err(ControllerError::Config(format!(
            "min_level must be > 0 for logarithmic steps, got {min_level}"
        )));
    }

    let last = count as usize - 1;
    let levels = (0..=last)
        .map(|i| {
            if i == 0 {
                return min_level;
            }
            if i == last {
                return max_level;
            }
            let frac = i as f64 / last as f64;
            let raw = match spacing {
                Spacing::Linear => min_level + frac * (max_level - min_level),
                Spacing::Log => {
                    let (lo, hi) = (min_level.log10(), max_level.log10());
                    10f64.powf(lo + frac * (hi - lo))
                }
            };
            let decimals = match spacing {
                Spacing::Linear => LINEAR_DECIMALS,
                Spacing::Log => LOG_DECIMALS,
            };
            round_to(raw, decimals).clamp(min_level, max_level)
        })
        .collect();
    Ok(levels)
}

/// Check an explicit ladder: non-empty, finite and non-decreasing.
pub fn check_manual(levels: &[f64]) -> Result<(), ControllerError> {
    if levels.is_empty() {
        return Err(ControllerError::Config("manual ladder is empty".into()));
    }
    if levels.iter().any(|l| !l.is_finite() || *l < 0.0) {
        return Err(ControllerError::Config(
            "manual ladder levels must be finite and >= 0".into(),
        ));
    }
    if levels.windows(2).any(|w| w[1] < w[0]) {
        return Err(ControllerError::Config(
            "manual ladder levels must be non-decreasing".into(),
        ));
    }
    Ok(())
}

/// Levels for a ladder spec.
pub fn levels_for(spec: &LadderSpec) -> Result<Vec<f64>, ControllerError> {
    match spec {
        LadderSpec::Generated {
            spacing,
            min_level,
            max_level,
            count,
        } => plan(*min_level, *max_level, *count, *spacing),
        LadderSpec::Manual(levels) => {
            check_manual(levels)?;
            Ok(levels.clone())
        }
    }
}

/// Smallest concentration a single minimum bolus of stock reaches in plain media.
pub fn min_achievable_conc(stock_conc: f64, min_bolus_ml: f64, volume_ml: f64) -> f64 {
    stock_conc * min_bolus_ml / (min_bolus_ml + volume_ml)
}

/// Fail when the lowest rung cannot be reached with the smallest meterable bolus.
pub fn check_min_concentration(cfg: &VesselConfig) -> Result<(), ControllerError> {
    let sel = &cfg.selection;
    let mb = cfg.dosing.min_bolus_ml;
    let v = cfg.volume_ml;
    let min_level = sel.ladder.min_level();
    let max_level = sel.ladder.max_level();
    if min_level > max_level {
        return Err(ControllerError::Config(format!(
            "vessel {}: min_level {min_level} must be <= max_level {max_level}",
            cfg.vessel
        )));
    }
    let min_conc = min_achievable_conc(sel.stock_conc, mb, v);
    if min_conc > min_level {
        let usable_stock = (min_level * (mb + v) - min_conc * v) / mb;
        return Err(ControllerError::Config(format!(
            "vessel {}: min_level must be greater than {:.3}; lower the stock concentration to {:.0} or less",
            cfg.vessel, min_conc, usable_stock
        )));
    }
    Ok(())
}

/// Persisted form of a ladder spec, without the timestamp column.
pub fn descriptor(spec: &LadderSpec, stock_conc: f64) -> Vec<String> {
    match spec {
        LadderSpec::Generated {
            spacing,
            min_level,
            max_level,
            count,
        } => vec![
            spacing.as_str().to_string(),
            stock_conc.to_string(),
            min_level.to_string(),
            max_level.to_string(),
            count.to_string(),
        ],
        LadderSpec::Manual(levels) => {
            let mut d = vec!["manual".to_string(), stock_conc.to_string()];
            d.extend(levels.iter().map(f64::to_string));
            d
        }
    }
}

/// Result of reconciling the configured ladder with the stored one.
#[derive(Debug, Clone, PartialEq)]
pub struct LadderSync {
    pub levels: Vec<f64>,
    /// True when this call recorded a new descriptor.
    pub changed: bool,
}

fn load_levels(
    store: &dyn LogStore,
    vessel: usize,
) -> Result<Option<Vec<f64>>, ControllerError> {
    let Some(rec) = records::read_last_raw(store, vessel, Channel::StepLadder)? else {
        return Ok(None);
    };
    let levels = (1..rec.len())
        .map(|i| records::field_f64(&rec, i, Channel::StepLadder))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((!levels.is_empty()).then_some(levels))
}

fn record_ladder(
    store: &mut dyn LogStore,
    vessel: usize,
    elapsed_h: f64,
    levels: &[f64],
) -> Result<(), ControllerError> {
    let mut row = vec![elapsed_h.to_string()];
    row.extend(levels.iter().map(f64::to_string));
    records::append_raw(store, vessel, Channel::StepLadder, &row)
}

/// Reconcile the configured ladder with the store, recording a change.
///
/// On a change after an earlier descriptor, the step log is re-seeded at the
/// first rung with the last known concentration.
pub fn sync(
    store: &mut dyn LogStore,
    cfg: &VesselConfig,
    elapsed_h: f64,
) -> Result<LadderSync, ControllerError> {
    check_min_concentration(cfg)?;
    let vessel = cfg.vessel;
    let desc = descriptor(&cfg.selection.ladder, cfg.selection.stock_conc);
    let last = records::read_last_raw(&*store, vessel, Channel::StepConfig)?;

    if let Some(prev) = &last
        && prev.get(1..) == Some(desc.as_slice())
    {
        if let Some(levels) = load_levels(&*store, vessel)? {
            return Ok(LadderSync {
                levels,
                changed: false,
            });
        }
        let levels = levels_for(&cfg.selection.ladder)?;
        record_ladder(store, vessel, elapsed_h, &levels)?;
        return Ok(LadderSync {
            levels,
            changed: false,
        });
    }

    let levels = levels_for(&cfg.selection.ladder)?;
    let mut row = vec![elapsed_h.to_string()];
    row.extend(desc);
    records::append_raw(store, vessel, Channel::StepConfig, &row)?;
    record_ladder(store, vessel, elapsed_h, &levels)?;
    info!(
        vessel,
        count = levels.len(),
        min = levels.first().copied().unwrap_or_default(),
        max = levels.last().copied().unwrap_or_default(),
        "step ladder recorded"
    );

    if last.is_some() {
        match records::read_last::<StepLogEntry>(&*store, vessel, Channel::StepLog)? {
            Some(prev) => {
                let first = levels.first().copied().unwrap_or_default();
                let entry = StepLogEntry {
                    time: elapsed_h,
                    step_changed_time: elapsed_h,
                    target_level: round_to(first, LOG_DECIMALS),
                    concentration: prev.concentration,
                    status: CONFIG_CHANGE_STATUS.to_string(),
                };
                records::append(store, vessel, Channel::StepLog, &entry)?;
                info!(vessel, level = entry.target_level, "step log re-seeded after config change");
            }
            None => warn!(vessel, "config changed but step log is empty; not re-seeding"),
        }
    }

    Ok(LadderSync {
        levels,
        changed: true,
    })
}
