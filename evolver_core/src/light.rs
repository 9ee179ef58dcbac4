//! Light scheduler.
//!
//! Per vessel: acclimation light until `acclimation_time_h`, then
//! `final_light` until `cycle_start_h`, then on/off cycling. Intensities are
//! converted to PWM with the vessel's linear calibration.

use std::time::Duration;

use evolver_traits::{Channel, Clock, LogStore, Transport};
use tracing::info;

use crate::command::{LIGHT_SLOTS, LightCommand, LIGHT_PARAM};
use crate::config::{LightCal, LightSchedule, VesselConfig};
use crate::error::ControllerError;
use crate::records::{self, LightLogEntry};
use crate::store_error::map_transport_error;

/// Where a vessel is in its light program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightPhase {
    Acclimating,
    On,
    CyclingOn,
    CyclingOff,
}

impl LightPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            LightPhase::Acclimating => "ACCLIMATING",
            LightPhase::On => "ON",
            LightPhase::CyclingOn => "CYCLING-ON",
            LightPhase::CyclingOff => "CYCLING-OFF",
        }
    }
}

impl std::fmt::Display for LightPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduled intensity at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightState {
    pub phase: LightPhase,
    pub ue: f64,
}

/// Evaluate the light program at `elapsed_h`.
pub fn schedule(s: &LightSchedule, elapsed_h: f64) -> LightState {
    if elapsed_h < s.acclimation_time_h {
        return LightState {
            phase: LightPhase::Acclimating,
            ue: s.acclimation_light,
        };
    }
    let period = s.on_length_h + s.off_length_h;
    if elapsed_h >= s.cycle_start_h && period > 0.0 {
        let phase = (elapsed_h - s.cycle_start_h).rem_euclid(period);
        return if phase < s.on_length_h {
            LightState {
                phase: LightPhase::CyclingOn,
                ue: s.final_light,
            }
        } else {
            LightState {
                phase: LightPhase::CyclingOff,
                ue: 0.0,
            }
        };
    }
    LightState {
        phase: LightPhase::On,
        ue: s.final_light,
    }
}

/// PWM for an intensity; zero light is always PWM 0.
pub fn pwm(ue: f64, cal: &LightCal) -> Result<i64, ControllerError> {
    if ue == 0.0 {
        return Ok(0);
    }
    let raw = ((ue - cal.offset) / cal.slope).round();
    if !raw.is_finite() {
        return Err(ControllerError::NumericDegeneracy(format!(
            "PWM for {ue} uE is {raw}"
        )));
    }
    Ok(raw as i64)
}

/// Persisted light program, without the timestamp column.
pub fn config_descriptor(s: &LightSchedule) -> Vec<String> {
    [
        s.acclimation_time_h,
        s.acclimation_light,
        s.cycle_start_h,
        s.on_length_h,
        s.off_length_h,
        s.final_light,
    ]
    .iter()
    .map(f64::to_string)
    .collect()
}

/// Append the vessel's light program when it differs from the last record.
pub fn sync_config(
    store: &mut dyn LogStore,
    cfg: &VesselConfig,
    elapsed_h: f64,
) -> Result<bool, ControllerError> {
    let desc = config_descriptor(&cfg.light);
    let last = records::read_last_raw(&*store, cfg.vessel, Channel::LightConfig)?;
    if last.as_ref().and_then(|r| r.get(1..)) == Some(desc.as_slice()) {
        return Ok(false);
    }
    let mut row = vec![elapsed_h.to_string()];
    row.extend(desc);
    records::append_raw(store, cfg.vessel, Channel::LightConfig, &row)?;
    info!(vessel = cfg.vessel, "light config recorded");
    Ok(true)
}

/// One vessel's light decision for this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightReport {
    pub state: LightState,
    pub pwm: i64,
    /// The intensity differs from the last logged one.
    pub changed: bool,
}

/// Schedule the vessel's light, log changes, and set its slot in `cmd`.
pub fn run(
    store: &mut dyn LogStore,
    cfg: &VesselConfig,
    elapsed_h: f64,
    cmd: &mut LightCommand,
) -> Result<LightReport, ControllerError> {
    sync_config(store, cfg, elapsed_h)?;
    let state = schedule(&cfg.light, elapsed_h);
    let pwm = pwm(state.ue, &cfg.light_cal)?;

    let last: Option<LightLogEntry> = records::read_last(&*store, cfg.vessel, Channel::LightLog)?;
    let changed = last.is_none_or(|l| l.light_ue != state.ue);
    if changed {
        records::append(
            store,
            cfg.vessel,
            Channel::LightLog,
            &LightLogEntry {
                time: elapsed_h,
                light_time: 0.0,
                light_ue: state.ue,
                light_pwm: pwm,
            },
        )?;
        info!(
            vessel = cfg.vessel,
            phase = %state.phase,
            ue = state.ue,
            pwm,
            "light changed"
        );
    }
    cmd.set(cfg.vessel, pwm);
    Ok(LightReport {
        state,
        pwm,
        changed,
    })
}

/// PWM values stepped through by a calibration sweep.
pub const CALIBRATION_SWEEP: [i64; 8] = [2080, 2100, 2200, 2400, 3000, 3500, 4000, 4095];
pub const CALIBRATION_ON: Duration = Duration::from_secs(10);
pub const CALIBRATION_OFF: Duration = Duration::from_secs(5);

fn all_off() -> evolver_traits::WireCommand {
    evolver_traits::WireCommand {
        param: LIGHT_PARAM.to_string(),
        value: vec!["0".to_string(); LIGHT_SLOTS],
        immediate: true,
    }
}

/// Drive one vessel through the calibration sweep.
///
/// Lights go all-off first, then each value is held for `on` followed by
/// all-off for `off`. Returns the number of commands sent.
pub fn calibration_sweep(
    transport: &mut dyn Transport,
    clock: &dyn Clock,
    vessel: usize,
    on: Duration,
    off: Duration,
) -> Result<usize, ControllerError> {
    if vessel >= crate::command::VESSEL_SLOTS {
        return Err(ControllerError::InvalidCommand(format!(
            "vessel {vessel} out of range"
        )));
    }
    let mut sent = 0;
    let mut send = |cmd: &evolver_traits::WireCommand| -> Result<(), ControllerError> {
        transport.send(cmd).map_err(|e| map_transport_error(&*e))?;
        sent += 1;
        Ok(())
    };

    send(&all_off())?;
    clock.sleep(off);
    for value in CALIBRATION_SWEEP {
        let mut cmd = all_off();
        cmd.value[vessel] = value.to_string();
        info!(vessel, pwm = value, "calibration value");
        send(&cmd)?;
        clock.sleep(on);
        send(&all_off())?;
        clock.sleep(off);
    }
    Ok(sent)
}
