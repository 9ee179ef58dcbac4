//! Selection controller: walks a vessel along its step ladder.
//!
//! All state comes from the last step log entry and the OD, growth rate and
//! pump tails. One call decides the level, measures dilution effects, doses
//! stock, and appends at most one step log entry.

use evolver_traits::{Channel, LogStore};
use tracing::{debug, info, warn};

use crate::command::FluidicCommand;
use crate::concentration::dilution_factor;
use crate::config::{SelectionCfg, VesselConfig};
use crate::dosing::{dosing_time, plan_bolus};
use crate::error::ControllerError;
use crate::records::{self, GrowthRateSample, OdSample, PumpEvent, StepLogEntry};
use crate::rescue::{count_rescues, plan_rescue};
use crate::util::{median, round_to, same_time};

/// Decimal places kept for the logged concentration.
pub const CONC_DECIMALS: i32 = 5;

/// Pump records inspected when matching a dilution to the OD window.
const PUMP_LOOKBACK: usize = 4;

/// Controller state for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPhase {
    /// Too few growth curves or OD samples to judge the level.
    AwaitingBaseline,
    Holding,
    Increasing,
    Decreasing,
}

/// Why the level moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepReason {
    GrowthStalled,
    LowGrowth,
    HighGrowth,
}

impl StepReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StepReason::GrowthStalled => "growth stalled",
            StepReason::LowGrowth => "low growth rate",
            StepReason::HighGrowth => "high growth rate",
        }
    }
}

/// Level decision before it is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Hold,
    Increase(StepReason),
    Decrease(StepReason),
}

/// Growth-rate evidence for a decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthEvidence {
    /// Median of the last `min_curves_per_step` rates.
    pub last_gr: f64,
    pub last_gr_time: f64,
    /// Rates recorded since the last level change, capped at the tail size.
    pub curves_this_step: usize,
}

/// Decide the level move. Stalled growth wins over everything, then low
/// growth, then high growth. No growth evidence holds.
pub fn decide(
    sel: &SelectionCfg,
    ladder_len: usize,
    elapsed_h: f64,
    last_change_time: f64,
    growth: Option<&GrowthEvidence>,
) -> Decision {
    let step_time = elapsed_h - last_change_time;
    let Some(growth) = growth else {
        return Decision::Hold;
    };
    if step_time < sel.min_step_time_h || ladder_len == 1 {
        return Decision::Hold;
    }
    let enough_curves = growth.curves_this_step >= sel.min_curves_per_step;
    if elapsed_h - growth.last_gr_time > sel.growth_stalled_time_h {
        Decision::Decrease(StepReason::GrowthStalled)
    } else if growth.last_gr < sel.min_growthrate && enough_curves {
        Decision::Decrease(StepReason::LowGrowth)
    } else if growth.last_gr > sel.max_growthrate && enough_curves {
        Decision::Increase(StepReason::HighGrowth)
    } else {
        Decision::Hold
    }
}

/// Index of the rung nearest `level`; the lower one on ties.
pub fn closest_index(ladder: &[f64], level: f64) -> usize {
    ladder
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(best, dist), (i, l)| {
            let d = (l - level).abs();
            if d < dist { (i, d) } else { (best, dist) }
        })
        .0
}

/// Next level down: the previous rung, or 0 from the first rung.
pub fn step_down(ladder: &[f64], level: f64) -> f64 {
    match closest_index(ladder, level) {
        0 => 0.0,
        i => ladder[i - 1],
    }
}

/// Next level up: the first rung from below the ladder, else the next rung,
/// holding at the top.
pub fn step_up(ladder: &[f64], level: f64) -> f64 {
    let Some(&first) = ladder.first() else {
        return level;
    };
    if level < first {
        return first;
    }
    let i = closest_index(ladder, level);
    ladder.get(i + 1).copied().unwrap_or(ladder[i])
}

/// What the controller did for one vessel.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionReport {
    pub phase: SelectionPhase,
    pub decision: Decision,
    pub level: f64,
    pub concentration: f64,
    /// Actions taken this tick, `" | "`-terminated.
    pub status: String,
    /// A step log entry was appended.
    pub logged: bool,
    pub rescue_s: Option<f64>,
    pub bolus_ml: Option<f64>,
}

fn growth_evidence(
    store: &dyn LogStore,
    vessel: usize,
    sel: &SelectionCfg,
    last_change_time: f64,
) -> Result<Option<GrowthEvidence>, ControllerError> {
    let tail: Vec<GrowthRateSample> =
        records::read_tail(store, vessel, Channel::GrowthRate, sel.min_curves_per_step)?;
    let rates: Vec<f64> = tail.iter().map(|g| g.rate).collect();
    let (Some(last_gr), Some(last)) = (median(&rates), tail.last()) else {
        return Ok(None);
    };
    Ok(Some(GrowthEvidence {
        last_gr,
        last_gr_time: last.time,
        curves_this_step: tail.iter().filter(|g| g.time > last_change_time).count(),
    }))
}

/// Run one selection tick for a vessel.
///
/// `ladder` is the vessel's current ladder. Rescue and dosing pulses are
/// logged before their slots are set in `cmd`.
pub fn run(
    store: &mut dyn LogStore,
    cfg: &VesselConfig,
    ladder: &[f64],
    elapsed_h: f64,
    cmd: &mut FluidicCommand,
) -> Result<SelectionReport, ControllerError> {
    let vessel = cfg.vessel;
    let sel = &cfg.selection;
    let window = cfg.dosing.dilution_window;

    let last: StepLogEntry = records::read_last(&*store, vessel, Channel::StepLog)?
        .ok_or_else(|| ControllerError::MissingData("step log is empty".into()))?;
    let od_window: Vec<OdSample> = records::read_tail(&*store, vessel, Channel::Od, 2 * window)?;
    let window_full = od_window.len() == 2 * window;
    let od_values: Vec<f64> = od_window.iter().map(|s| s.od).collect();
    let od_median = median(&od_values);
    let curves = records::stream_len(&*store, vessel, Channel::GrowthRate)?;
    let baseline = curves >= sel.curves_to_start && window_full;

    let mut level = last.target_level;
    let mut conc = last.concentration;
    let mut changed_at = last.step_changed_time;
    let mut status = String::new();
    let mut rescue_s = None;
    let mut bolus_ml = None;

    let (phase, decision) = if !baseline {
        debug!(vessel, curves, od_samples = od_window.len(), "awaiting selection baseline");
        (SelectionPhase::AwaitingBaseline, Decision::Hold)
    } else {
        if closest_index(ladder, last.target_level) == 0
            && last.concentration == 0.0
            && last.step_changed_time == 0.0
        {
            info!(vessel, "starting selection");
        }
        let growth = growth_evidence(&*store, vessel, sel, last.step_changed_time)?;
        let decision = decide(
            sel,
            ladder.len(),
            elapsed_h,
            last.step_changed_time,
            growth.as_ref(),
        );
        let phase = match decision {
            Decision::Hold => SelectionPhase::Holding,
            Decision::Increase(_) => SelectionPhase::Increasing,
            Decision::Decrease(_) => SelectionPhase::Decreasing,
        };
        (phase, decision)
    };

    match decision {
        Decision::Hold => {}
        Decision::Decrease(reason) => {
            let idx = closest_index(ladder, last.target_level);
            level = step_down(ladder, last.target_level);
            changed_at = elapsed_h;
            status.push_str(&format!("DECREASE: {} | ", reason.as_str()));
            let units = sel.units.as_str();
            if last.target_level <= 0.0 {
                debug!(vessel, reason = reason.as_str(), "selection already at 0");
            } else if idx == 0 {
                warn!(
                    vessel,
                    reason = reason.as_str(),
                    from = last.target_level,
                    units,
                    "decreasing selection to 0 from the first step; widen the ladder or relax growth limits"
                );
            } else if idx == 1 {
                warn!(
                    vessel,
                    reason = reason.as_str(),
                    level,
                    units,
                    "decreasing selection to the first step"
                );
            } else {
                info!(
                    vessel,
                    reason = reason.as_str(),
                    from = last.target_level,
                    to = level,
                    units,
                    "decreasing selection"
                );
            }

            if sel.rescue_dilutions {
                let rescues = count_rescues(&*store, vessel)?;
                let od = od_median.unwrap_or(0.0);
                if rescues >= sel.max_rescues {
                    warn!(vessel, rescues, max = sel.max_rescues, "skipping rescue dilution; budget spent");
                } else if od > cfg.turbidostat.lower_thresh * sel.rescue_threshold {
                    match plan_rescue(
                        level,
                        last.target_level,
                        last.concentration,
                        sel.rescue_threshold,
                        cfg.volume_ml,
                        cfg.turbidostat.influx_flow_rate,
                    ) {
                        Ok(plan) => {
                            records::append(
                                store,
                                vessel,
                                Channel::PumpLog,
                                &PumpEvent {
                                    time: elapsed_h,
                                    duration: plan.time_in_s,
                                },
                            )?;
                            cmd.set_dilution(
                                vessel,
                                plan.time_in_s,
                                round_to(plan.time_in_s + cfg.turbidostat.time_out_s, 2),
                            );
                            status.push_str("RESCUE DILUTION | ");
                            rescue_s = Some(plan.time_in_s);
                            if plan.clamped {
                                info!(vessel, factor = plan.dilution_factor, target = level, "rescue dilution clamped to 20 s");
                            } else {
                                info!(vessel, factor = plan.dilution_factor, time_in_s = plan.time_in_s, "rescue dilution");
                            }
                        }
                        Err(e) => warn!(vessel, error = %e, "skipping rescue dilution"),
                    }
                } else {
                    debug!(vessel, od, "OD too low for a rescue dilution");
                }
            }
        }
        Decision::Increase(reason) => {
            let idx = closest_index(ladder, last.target_level);
            level = step_up(ladder, last.target_level);
            changed_at = elapsed_h;
            status.push_str(&format!("INCREASE: {} | ", reason.as_str()));
            if idx + 2 == ladder.len() {
                warn!(vessel, level, "reached second to last selection step; extend the ladder");
            } else if idx + 1 == ladder.len() {
                warn!(vessel, level, "reached maximum selection step; extend the ladder");
            }
            info!(
                vessel,
                from = last.target_level,
                to = level,
                units = sel.units.as_str(),
                "increasing selection"
            );
        }
    }

    if window_full {
        // A window already measured by the last step log entry is not measured again.
        let fresh_window = od_window.last().is_some_and(|sample| last.time < sample.time);
        let pumps: Vec<PumpEvent> = if fresh_window {
            records::read_tail(&*store, vessel, Channel::PumpLog, PUMP_LOOKBACK)?
        } else {
            Vec::new()
        };
        let pump_times: Vec<f64> = pumps.iter().map(|p| p.time).collect();
        match dilution_factor(&od_window, &pump_times, window) {
            Ok(Some(factor)) => {
                conc *= factor;
                status.push_str(&format!("DILUTION {factor:.3}X | "));
                debug!(vessel, factor, conc, "dilution effect measured");
            }
            Ok(None) => {}
            Err(e) => warn!(vessel, error = %e, "skipping concentration update"),
        }

        let od = od_median.unwrap_or(0.0);
        if level > 0.0 && od >= cfg.turbidostat.lower_thresh && conc / level < 1.0 {
            match plan_bolus(
                conc,
                level,
                sel.stock_conc,
                cfg.volume_ml,
                cfg.dosing.min_bolus_ml,
                cfg.dosing.max_bolus_ml,
            )
            .and_then(|p| Ok((p, dosing_time(p.bolus_ml, cfg.dosing.dosing_flow_rate)?)))
            {
                Ok((plan, secs)) if plan.bolus_ml > 0.0 => {
                    records::append(
                        store,
                        vessel,
                        Channel::DosingLog,
                        &PumpEvent {
                            time: elapsed_h,
                            duration: secs,
                        },
                    )?;
                    cmd.set_dosing(vessel, secs);
                    conc = plan.new_conc;
                    bolus_ml = Some(plan.bolus_ml);
                    status.push_str(&format!("SELECTION CHEMICAL ADDED {:.3}mL | ", plan.bolus_ml));
                    if plan.capped {
                        info!(vessel, conc, level, "bolus capped; concentration below target");
                    } else {
                        info!(vessel, bolus_ml = plan.bolus_ml, level, "selection chemical added");
                    }
                }
                Ok(_) => debug!(vessel, conc, level, "bolus too small to meter"),
                Err(e) => warn!(vessel, error = %e, "skipping dosing"),
            }
        } else if od < cfg.turbidostat.lower_thresh && level != 0.0 {
            debug!(vessel, od, "skipping dosing; OD below lower threshold");
            status.push_str(&format!("SKIPPED SELECTION CHEMICAL - LOW OD {od:.2} | "));
        }
    }

    let conc = round_to(conc, CONC_DECIMALS);
    let logged = !same_time(changed_at, last.step_changed_time)
        || level != last.target_level
        || conc != last.concentration
        || (!status.is_empty() && status != last.status);
    if logged {
        records::append(
            store,
            vessel,
            Channel::StepLog,
            &StepLogEntry {
                time: elapsed_h,
                step_changed_time: changed_at,
                target_level: level,
                concentration: conc,
                status: status.clone(),
            },
        )?;
    }

    Ok(SelectionReport {
        phase,
        decision,
        level,
        concentration: conc,
        status,
        logged,
        rescue_s,
        bolus_ml,
    })
}
