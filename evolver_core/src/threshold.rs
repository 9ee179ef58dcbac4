//! Threshold monitor and turbidostat dilution planner.
//!
//! The active OD target is the last `ODset` record; with no record the vessel
//! is growing toward its upper threshold. Crossing the upper threshold ends a
//! growth curve and hands it to the growth-rate collaborator.

use evolver_traits::{Channel, GrowthRateSource, LogStore};
use tracing::{debug, info, warn};

use crate::command::FluidicCommand;
use crate::config::VesselConfig;
use crate::error::ControllerError;
use crate::records::{self, OdSample, OdSetEvent, PumpEvent};
use crate::store_error::map_store_error;
use crate::util::{MINUTES_PER_HOUR, median, round_to};

/// Hardware ceiling for a single pump pulse, seconds.
pub const MAX_PULSE_S: f64 = 20.0;

/// Median of the most recent `od_values_to_average` samples.
pub fn average_od(store: &dyn LogStore, cfg: &VesselConfig) -> Result<f64, ControllerError> {
    let samples: Vec<OdSample> =
        records::read_tail(store, cfg.vessel, Channel::Od, cfg.od_values_to_average)?;
    let values: Vec<f64> = samples.iter().map(|s| s.od).collect();
    median(&values).ok_or_else(|| ControllerError::MissingData("no OD samples".into()))
}

/// Seconds of influx that dilute `from_od` down to `to_od`.
///
/// `-ln(to / from) * volume / flow`, clamped to `[0, max_s]` and rounded to
/// hundredths. Non-finite results are a `NumericDegeneracy`.
pub fn dilution_time(
    to_od: f64,
    from_od: f64,
    volume_ml: f64,
    flow_ml_s: f64,
    max_s: f64,
) -> Result<f64, ControllerError> {
    let raw = -(to_od / from_od).ln() * volume_ml / flow_ml_s;
    if !raw.is_finite() {
        return Err(ControllerError::NumericDegeneracy(format!(
            "dilution time is {raw} (target {to_od}, OD {from_od})"
        )));
    }
    Ok(round_to(raw.clamp(0.0, max_s.min(MAX_PULSE_S)), 2))
}

/// Whether enough minutes have passed since `last_pump_h`.
pub fn pump_allowed(elapsed_h: f64, last_pump_h: Option<f64>, pump_wait_min: f64) -> bool {
    last_pump_h.is_none_or(|t| (elapsed_h - t) * MINUTES_PER_HOUR >= pump_wait_min)
}

/// What the monitor saw and did for one vessel this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TurbidostatReport {
    pub avg_od: f64,
    /// Active OD target after transitions.
    pub target: f64,
    /// A growth curve ended this tick.
    pub curve_completed: bool,
    /// Influx seconds scheduled this tick.
    pub dilution_s: Option<f64>,
    /// Why a needed dilution did not go out.
    pub skipped: Option<String>,
}

/// Run the threshold monitor and, if needed, schedule a dilution.
///
/// Pump events are appended before the slots are set in `cmd`.
pub fn run(
    store: &mut dyn LogStore,
    growth: &mut dyn GrowthRateSource,
    cfg: &VesselConfig,
    elapsed_h: f64,
    cmd: &mut FluidicCommand,
) -> Result<TurbidostatReport, ControllerError> {
    let vessel = cfg.vessel;
    let t = &cfg.turbidostat;
    let avg_od = average_od(&*store, cfg)?;

    let last_set: Option<OdSetEvent> = records::read_last(&*store, vessel, Channel::OdSet)?;
    let mut target = last_set.map_or(t.upper_thresh, |e| e.target);
    let curve_start = last_set.map_or(0.0, |e| e.time);
    let mut curve_completed = false;

    if avg_od > t.upper_thresh && target != t.lower_thresh {
        records::append(
            store,
            vessel,
            Channel::OdSet,
            &OdSetEvent {
                time: elapsed_h,
                target: t.lower_thresh,
            },
        )?;
        target = t.lower_thresh;
        curve_completed = true;
        match growth.curve_completed(store, vessel, curve_start, elapsed_h) {
            Ok(Some(rate)) => info!(vessel, rate, start = curve_start, "growth curve completed"),
            Ok(None) => debug!(vessel, start = curve_start, "growth curve completed without a rate"),
            Err(e) => warn!(vessel, error = %map_store_error(&*e), "growth rate computation failed"),
        }
    }

    if avg_od < t.rearm_below() && target != t.upper_thresh {
        records::append(
            store,
            vessel,
            Channel::OdSet,
            &OdSetEvent {
                time: elapsed_h,
                target: t.upper_thresh,
            },
        )?;
        target = t.upper_thresh;
        debug!(vessel, avg_od, "growth curve started");
    }

    let mut report = TurbidostatReport {
        avg_od,
        target,
        curve_completed,
        dilution_s: None,
        skipped: None,
    };

    if avg_od <= target {
        return Ok(report);
    }

    let curves = records::stream_len(&*store, vessel, Channel::OdSet)? as f64 / 2.0;
    if let Some(limit) = cfg.stop_after_n_curves
        && curves > f64::from(limit) + 2.0
    {
        debug!(vessel, curves, limit, "curve budget exhausted; not diluting");
        report.skipped = Some("curve budget exhausted".into());
        return Ok(report);
    }

    let last_pump: Option<PumpEvent> = records::read_last(&*store, vessel, Channel::PumpLog)?;
    if !pump_allowed(elapsed_h, last_pump.map(|p| p.time), t.pump_wait_min) {
        debug!(vessel, avg_od, "dilution deferred by pump wait");
        report.skipped = Some("pump wait".into());
        return Ok(report);
    }

    let time_in = match dilution_time(
        t.lower_thresh,
        avg_od,
        cfg.volume_ml,
        t.influx_flow_rate,
        t.max_pump_s,
    ) {
        Ok(s) => s,
        Err(e) => {
            warn!(vessel, error = %e, "cancelling turbidostat dilution");
            report.skipped = Some(e.to_string());
            return Ok(report);
        }
    };

    records::append(
        store,
        vessel,
        Channel::PumpLog,
        &PumpEvent {
            time: elapsed_h,
            duration: time_in,
        },
    )?;
    cmd.set_dilution(vessel, time_in, round_to(time_in + t.time_out_s, 2));
    info!(vessel, avg_od, time_in_s = time_in, "turbidostat dilution");
    report.dilution_s = Some(time_in);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MemoryLogStore, NoGrowth};
    use rstest::rstest;

    #[test]
    fn dilution_time_is_clamped() {
        // -ln(1.6/2.5) * 25 / 0.2 = 55.78 s
        assert_eq!(dilution_time(1.6, 2.5, 25.0, 0.2, 20.0).unwrap(), 20.0);
        let short = dilution_time(1.6, 1.7, 25.0, 1.0, 20.0).unwrap();
        assert!((short - 1.52).abs() < 1e-9);
    }

    #[rstest]
    #[case(f64::NAN)]
    #[case(0.0)]
    fn degenerate_inputs_are_reported(#[case] od: f64) {
        assert!(matches!(
            dilution_time(1.6, od, 25.0, 0.2, 20.0),
            Err(ControllerError::NumericDegeneracy(_))
        ));
    }

    #[rstest]
    #[case(1.0, None, 20.0, true)]
    #[case(1.0, Some(0.8), 20.0, false)]
    #[case(1.0, Some(0.6), 20.0, true)]
    #[case(1.0, Some(1.0), 0.0, true)]
    fn pump_wait_in_minutes(
        #[case] now: f64,
        #[case] last: Option<f64>,
        #[case] wait: f64,
        #[case] ok: bool,
    ) {
        assert_eq!(pump_allowed(now, last, wait), ok);
    }

    fn od_store(vessel: usize, ods: &[f64]) -> MemoryLogStore {
        let mut store = MemoryLogStore::new();
        for (i, od) in ods.iter().enumerate() {
            store.push(vessel, Channel::Od, &[(i as f64 * 0.01).to_string(), od.to_string()]);
        }
        store
    }

    #[test]
    fn crossing_upper_flips_target_and_dilutes() {
        let mut cfg = VesselConfig::new(1);
        cfg.turbidostat.influx_flow_rate = 0.2;
        let mut store = od_store(1, &[2.4, 2.5, 2.6, 2.5, 2.5, 2.5]);
        let mut cmd = FluidicCommand::new();
        let r = run(&mut store, &mut NoGrowth, &cfg, 1.0, &mut cmd).unwrap();
        assert!(r.curve_completed);
        assert_eq!(r.target, 1.6);
        assert_eq!(r.dilution_s, Some(20.0));
        assert_eq!(cmd.slot(1), Some(20.0));
        assert_eq!(cmd.slot(17), Some(25.0));
        assert_eq!(store.records(1, Channel::OdSet).len(), 1);
        assert_eq!(store.records(1, Channel::PumpLog).len(), 1);
    }

    #[test]
    fn below_rearm_flips_back_to_upper_without_pumping() {
        let cfg = VesselConfig::new(0);
        let mut store = od_store(0, &[1.5; 6]);
        store.push(0, Channel::OdSet, &["0.5", "1.6"]);
        let mut cmd = FluidicCommand::new();
        let r = run(&mut store, &mut NoGrowth, &cfg, 1.0, &mut cmd).unwrap();
        assert_eq!(r.target, 2.0);
        assert!(!r.curve_completed);
        assert!(cmd.is_noop());
    }

    #[test]
    fn pump_wait_defers_dilution() {
        let cfg = VesselConfig::new(0);
        let mut store = od_store(0, &[1.8; 6]);
        store.push(0, Channel::OdSet, &["0.5", "1.6"]);
        store.push(0, Channel::PumpLog, &["0.9", "3.0"]);
        let mut cmd = FluidicCommand::new();
        let r = run(&mut store, &mut NoGrowth, &cfg, 1.0, &mut cmd).unwrap();
        assert_eq!(r.skipped.as_deref(), Some("pump wait"));
        assert!(cmd.is_noop());
    }

    #[test]
    fn curve_budget_stops_dilution() {
        let mut cfg = VesselConfig::new(0);
        cfg.stop_after_n_curves = Some(0);
        let mut store = od_store(0, &[1.8; 6]);
        for i in 0..6 {
            store.push(0, Channel::OdSet, &[i.to_string().as_str(), "1.6"]);
        }
        let mut cmd = FluidicCommand::new();
        let r = run(&mut store, &mut NoGrowth, &cfg, 10.0, &mut cmd).unwrap();
        assert_eq!(r.skipped.as_deref(), Some("curve budget exhausted"));
        assert!(cmd.is_noop());
    }

    #[test]
    fn no_samples_is_missing_data() {
        let cfg = VesselConfig::new(0);
        let mut store = MemoryLogStore::new();
        let mut cmd = FluidicCommand::new();
        let err = run(&mut store, &mut NoGrowth, &cfg, 1.0, &mut cmd).unwrap_err();
        assert!(matches!(err, ControllerError::MissingData(_)));
    }
}
