//! Conversions from the validated `evolver_config` schema to the controller's
//! per-vessel records.

use evolver_config::PerVessel;

use crate::config::{
    ControllerConfig, DosingCfg, LadderSpec, LightCal, LightSchedule, SelectionCfg, Spacing,
    TurbidostatCfg, VesselConfig,
};
use crate::error::ControllerError;

// ── Spacing ──────────────────────────────────────────────────────────────────

impl From<evolver_config::Spacing> for Spacing {
    fn from(s: evolver_config::Spacing) -> Self {
        match s {
            evolver_config::Spacing::Linear => Spacing::Linear,
            evolver_config::Spacing::Log => Spacing::Log,
        }
    }
}

// ── Per-vessel lookup ────────────────────────────────────────────────────────

fn pick<T: Copy>(pv: &PerVessel<T>, vessel: usize, key: &str) -> Result<T, ControllerError> {
    pv.get(vessel)
        .ok_or_else(|| ControllerError::Config(format!("{key} has no entry for vessel {vessel}")))
}

fn vessel_config(
    cfg: &evolver_config::Config,
    vessel: usize,
    manual: Option<&Vec<f64>>,
    light_cal: Option<&evolver_config::LightCalibration>,
) -> Result<VesselConfig, ControllerError> {
    let t = &cfg.turbidostat;
    let f = &cfg.fluidics;
    let s = &cfg.selection;
    let l = &cfg.light;

    let turbidostat = TurbidostatCfg {
        lower_thresh: pick(&t.lower_thresh, vessel, "turbidostat.lower_thresh")?,
        upper_thresh: pick(&t.upper_thresh, vessel, "turbidostat.upper_thresh")?,
        pump_wait_min: t.pump_wait_min,
        time_out_s: t.time_out_s,
        max_pump_s: t.max_pump_s,
        influx_flow_rate: pick(&f.influx_flow_rate, vessel, "fluidics.influx_flow_rate")?,
    };

    let dosing = DosingCfg {
        dosing_flow_rate: pick(&f.dosing_flow_rate, vessel, "fluidics.dosing_flow_rate")?,
        min_bolus_ml: f.min_bolus_ml,
        max_bolus_ml: f.max_bolus_ml,
        dilution_window: f.dilution_window,
    };

    let ladder = match manual {
        Some(levels) => LadderSpec::Manual(levels.clone()),
        None => LadderSpec::Generated {
            spacing: s.spacing.into(),
            min_level: pick(&s.min_level, vessel, "selection.min_level")?,
            max_level: pick(&s.max_level, vessel, "selection.max_level")?,
            count: pick(&s.step_count, vessel, "selection.step_count")?,
        },
    };

    let selection = SelectionCfg {
        stock_conc: pick(&s.stock_conc, vessel, "selection.stock_conc")?,
        ladder,
        curves_to_start: s.curves_to_start,
        min_curves_per_step: s.min_curves_per_step,
        min_step_time_h: s.min_step_time_h,
        growth_stalled_time_h: s.growth_stalled_time_h,
        max_growthrate: s.max_growthrate,
        min_growthrate: s.min_growthrate,
        rescue_dilutions: s.rescue_dilutions,
        rescue_threshold: s.rescue_threshold,
        max_rescues: s.max_rescues,
        units: cfg.experiment.selection_units.clone(),
    };

    let light = LightSchedule {
        acclimation_time_h: pick(&l.acclimation_time_h, vessel, "light.acclimation_time_h")?,
        acclimation_light: pick(&l.acclimation_light, vessel, "light.acclimation_light")?,
        cycle_start_h: pick(&l.cycle_start_h, vessel, "light.cycle_start_h")?,
        on_length_h: pick(&l.on_length_h, vessel, "light.on_length_h")?,
        off_length_h: pick(&l.off_length_h, vessel, "light.off_length_h")?,
        final_light: pick(&l.final_light, vessel, "light.final_light")?,
    };

    // A calibration file, when given, must cover every active vessel.
    let light_cal = match light_cal {
        Some(table) => {
            let (slope, offset) = table.get(vessel).ok_or_else(|| {
                ControllerError::Config(format!("light calibration has no row for vessel {vessel}"))
            })?;
            LightCal { slope, offset }
        }
        None => LightCal {
            slope: pick(&l.slope, vessel, "light.slope")?,
            offset: pick(&l.offset, vessel, "light.offset")?,
        },
    };

    Ok(VesselConfig {
        vessel,
        volume_ml: cfg.experiment.volume_ml,
        od_values_to_average: cfg.experiment.od_values_to_average,
        stop_after_n_curves: cfg.experiment.stop_after_n_curves,
        turbidostat,
        dosing,
        selection,
        light,
        light_cal,
    })
}

/// Resolve a validated configuration into per-vessel records.
///
/// `light_cal` is the parsed calibration CSV, when `[light].calibration` names one.
pub fn controller_config(
    cfg: &evolver_config::Config,
    light_cal: Option<&evolver_config::LightCalibration>,
) -> Result<ControllerConfig, ControllerError> {
    let manual = cfg
        .selection
        .manual_ladders()
        .map_err(|e| ControllerError::Config(e.to_string()))?;
    let vessels = cfg
        .experiment
        .vessels
        .iter()
        .map(|&v| vessel_config(cfg, v, manual.get(&v), light_cal))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ControllerConfig {
        vessels,
        light_enabled: cfg.light.enabled,
        max_curve_samples: cfg.growth.max_curve_samples,
    })
}

impl TryFrom<&evolver_config::Config> for ControllerConfig {
    type Error = ControllerError;

    fn try_from(cfg: &evolver_config::Config) -> Result<Self, Self::Error> {
        controller_config(cfg, None)
    }
}
