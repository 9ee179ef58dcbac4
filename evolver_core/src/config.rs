//! Runtime configuration for the controller.
//!
//! These are immutable per-vessel records resolved once from the TOML schema
//! in `evolver_config` (see `conversions`). The controller never reads the
//! raw schema.

/// Ladder spacing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Spacing {
    #[default]
    Linear,
    Log,
}

impl Spacing {
    /// Persisted name in the ladder descriptor.
    pub fn as_str(self) -> &'static str {
        match self {
            Spacing::Linear => "linear",
            Spacing::Log => "log",
        }
    }
}

/// OD band and dilution pump limits.
#[derive(Debug, Clone, PartialEq)]
pub struct TurbidostatCfg {
    pub lower_thresh: f64,
    pub upper_thresh: f64,
    /// Minimum minutes between pump events.
    pub pump_wait_min: f64,
    /// Efflux over-run in seconds.
    pub time_out_s: f64,
    /// Clamp for a single influx pulse, at most 20 s.
    pub max_pump_s: f64,
    /// Influx pump flow rate in mL/s.
    pub influx_flow_rate: f64,
}

impl Default for TurbidostatCfg {
    fn default() -> Self {
        Self {
            lower_thresh: 1.6,
            upper_thresh: 2.0,
            pump_wait_min: 20.0,
            time_out_s: 5.0,
            max_pump_s: 20.0,
            influx_flow_rate: 1.0,
        }
    }
}

impl TurbidostatCfg {
    /// OD below which the target flips back to the upper threshold.
    pub fn rearm_below(&self) -> f64 {
        self.lower_thresh + (self.upper_thresh - self.lower_thresh) / 3.0
    }
}

/// Stock dosing limits.
#[derive(Debug, Clone, PartialEq)]
pub struct DosingCfg {
    /// Dosing pump flow rate in mL/s.
    pub dosing_flow_rate: f64,
    pub min_bolus_ml: f64,
    pub max_bolus_ml: f64,
    /// OD samples on each side of a dilution.
    pub dilution_window: usize,
}

impl Default for DosingCfg {
    fn default() -> Self {
        Self {
            dosing_flow_rate: 1.0,
            min_bolus_ml: 0.1,
            max_bolus_ml: 5.0,
            dilution_window: 3,
        }
    }
}

/// How a vessel's ladder is obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum LadderSpec {
    Generated {
        spacing: Spacing,
        min_level: f64,
        max_level: f64,
        count: u32,
    },
    Manual(Vec<f64>),
}

impl LadderSpec {
    pub fn min_level(&self) -> f64 {
        match self {
            LadderSpec::Generated { min_level, .. } => *min_level,
            LadderSpec::Manual(levels) => levels.first().copied().unwrap_or(0.0),
        }
    }

    pub fn max_level(&self) -> f64 {
        match self {
            LadderSpec::Generated { max_level, .. } => *max_level,
            LadderSpec::Manual(levels) => levels.last().copied().unwrap_or(0.0),
        }
    }
}

/// Stepped-selection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionCfg {
    pub stock_conc: f64,
    pub ladder: LadderSpec,
    pub curves_to_start: usize,
    pub min_curves_per_step: usize,
    pub min_step_time_h: f64,
    pub growth_stalled_time_h: f64,
    pub max_growthrate: f64,
    pub min_growthrate: f64,
    pub rescue_dilutions: bool,
    pub rescue_threshold: f64,
    pub max_rescues: usize,
    /// Display unit for levels and concentrations.
    pub units: String,
}

impl Default for SelectionCfg {
    fn default() -> Self {
        Self {
            stock_conc: 0.0,
            ladder: LadderSpec::Generated {
                spacing: Spacing::Linear,
                min_level: 0.0,
                max_level: 0.0,
                count: 1,
            },
            curves_to_start: 5,
            min_curves_per_step: 4,
            min_step_time_h: 7.0,
            growth_stalled_time_h: 6.0,
            max_growthrate: 0.08,
            min_growthrate: 0.06,
            rescue_dilutions: true,
            rescue_threshold: 0.5,
            max_rescues: 2,
            units: "ug/mL".to_string(),
        }
    }
}

/// Light program for one vessel. Times in hours, intensities in uE.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSchedule {
    pub acclimation_time_h: f64,
    pub acclimation_light: f64,
    pub cycle_start_h: f64,
    pub on_length_h: f64,
    pub off_length_h: f64,
    pub final_light: f64,
}

impl Default for LightSchedule {
    fn default() -> Self {
        Self {
            acclimation_time_h: 0.0,
            acclimation_light: 0.0,
            cycle_start_h: f64::INFINITY,
            on_length_h: 12.0,
            off_length_h: 12.0,
            final_light: 0.0,
        }
    }
}

/// Linear PWM calibration: `uE = slope * pwm + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightCal {
    pub slope: f64,
    pub offset: f64,
}

impl Default for LightCal {
    fn default() -> Self {
        Self {
            slope: 1.0,
            offset: 0.0,
        }
    }
}

/// Everything the controller knows about one vessel.
#[derive(Debug, Clone, PartialEq)]
pub struct VesselConfig {
    pub vessel: usize,
    /// Culture volume in mL.
    pub volume_ml: f64,
    pub od_values_to_average: usize,
    /// `None` never stops diluting.
    pub stop_after_n_curves: Option<u32>,
    pub turbidostat: TurbidostatCfg,
    pub dosing: DosingCfg,
    pub selection: SelectionCfg,
    pub light: LightSchedule,
    pub light_cal: LightCal,
}

impl VesselConfig {
    /// Defaults for `vessel`; tests override what they need.
    pub fn new(vessel: usize) -> Self {
        Self {
            vessel,
            volume_ml: 25.0,
            od_values_to_average: 6,
            stop_after_n_curves: None,
            turbidostat: TurbidostatCfg::default(),
            dosing: DosingCfg::default(),
            selection: SelectionCfg::default(),
            light: LightSchedule::default(),
            light_cal: LightCal::default(),
        }
    }
}

/// Controller-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub vessels: Vec<VesselConfig>,
    /// Send a light command every tick.
    pub light_enabled: bool,
    /// OD samples read back for a growth curve fit.
    pub max_curve_samples: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            vessels: Vec::new(),
            light_enabled: false,
            max_curve_samples: 500,
        }
    }
}
