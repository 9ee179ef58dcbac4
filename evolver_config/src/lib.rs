#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Experiment configuration schema and light calibration parsing.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated once
//!   at startup; the controller never sees an unvalidated value.
//! - Per-vessel parameters accept either one scalar for every vessel or an
//!   array with one entry per vessel slot.
//! - The light calibration CSV loader enforces headers and rejects
//!   degenerate slopes.
use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Number of vessel slots on one device.
pub const VESSEL_SLOTS: usize = 16;

/// Largest stock bolus the dosing pump may deliver in one tick, mL.
pub const MAX_BOLUS_ML: f64 = 5.0;

/// A parameter given once for all vessels or once per vessel slot.
///
/// TOML accepts either form:
/// - `lower_thresh = 1.6`
/// - `lower_thresh = [1.6, 1.6, 0.8, ...]` (16 entries)
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum PerVessel<T> {
    One(T),
    Each(Vec<T>),
}

impl<T: Copy> PerVessel<T> {
    /// Value for `vessel`, or `None` when an array is too short.
    pub fn get(&self, vessel: usize) -> Option<T> {
        match self {
            PerVessel::One(v) => Some(*v),
            PerVessel::Each(vs) => vs.get(vessel).copied(),
        }
    }

    fn check_len(&self, key: &str) -> eyre::Result<()> {
        if let PerVessel::Each(vs) = self
            && vs.len() != VESSEL_SLOTS
        {
            eyre::bail!(
                "{key} must be a scalar or have {VESSEL_SLOTS} entries, got {}",
                vs.len()
            );
        }
        Ok(())
    }

    fn all(&self, key: &str, ok: impl Fn(T) -> bool, what: &str) -> eyre::Result<()> {
        let bad = match self {
            PerVessel::One(v) => (!ok(*v)).then_some(0),
            PerVessel::Each(vs) => vs.iter().position(|v| !ok(*v)),
        };
        if let Some(i) = bad {
            eyre::bail!("{key}[{i}] must be {what}");
        }
        Ok(())
    }
}

fn default_vessels() -> Vec<usize> {
    (0..VESSEL_SLOTS).collect()
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Experiment {
    /// Active vessel ids.
    pub vessels: Vec<usize>,
    /// Culture volume in mL, set by the efflux straw length.
    pub volume_ml: f64,
    /// Number of trailing OD samples whose median is the working OD.
    pub od_values_to_average: usize,
    /// Stop diluting after this many growth curves; absent means never.
    pub stop_after_n_curves: Option<u32>,
    /// Display unit for selection levels.
    pub selection_units: String,
    /// Root directory of the per-vessel record streams.
    pub data_dir: PathBuf,
}

impl Default for Experiment {
    fn default() -> Self {
        Self {
            vessels: default_vessels(),
            volume_ml: 25.0,
            od_values_to_average: 6,
            stop_after_n_curves: None,
            selection_units: "ug/mL".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Turbidostat {
    pub lower_thresh: PerVessel<f64>,
    pub upper_thresh: PerVessel<f64>,
    /// Minimum minutes between pump events for one vessel.
    pub pump_wait_min: f64,
    /// Extra efflux seconds added to every influx pulse.
    pub time_out_s: f64,
    /// Upper bound on a single dilution pulse in seconds.
    pub max_pump_s: f64,
}

impl Default for Turbidostat {
    fn default() -> Self {
        Self {
            lower_thresh: PerVessel::One(1.6),
            upper_thresh: PerVessel::One(2.0),
            pump_wait_min: 20.0,
            time_out_s: 5.0,
            max_pump_s: 20.0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Fluidics {
    /// Influx (media) pump flow rate in mL/s.
    pub influx_flow_rate: PerVessel<f64>,
    /// Dosing (stock) pump flow rate in mL/s.
    pub dosing_flow_rate: PerVessel<f64>,
    #[serde(default = "default_min_bolus")]
    pub min_bolus_ml: f64,
    #[serde(default = "default_max_bolus")]
    pub max_bolus_ml: f64,
    /// OD samples on each side of a dilution used to measure its effect.
    #[serde(default = "default_dilution_window")]
    pub dilution_window: usize,
}

fn default_min_bolus() -> f64 {
    0.1
}
fn default_max_bolus() -> f64 {
    5.0
}
fn default_dilution_window() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Spacing {
    #[default]
    Linear,
    #[serde(alias = "logarithmic")]
    Log,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Selection {
    pub stock_conc: PerVessel<f64>,
    pub min_level: PerVessel<f64>,
    pub max_level: PerVessel<f64>,
    pub step_count: PerVessel<u32>,
    pub spacing: Spacing,
    /// Explicit ladders keyed by vessel id; these bypass generation.
    pub manual_steps: BTreeMap<String, Vec<f64>>,
    pub curves_to_start: usize,
    pub min_curves_per_step: usize,
    pub min_step_time_h: f64,
    pub growth_stalled_time_h: f64,
    pub max_growthrate: f64,
    pub min_growthrate: f64,
    pub rescue_dilutions: bool,
    /// Fraction of the lower OD threshold below which no rescue is attempted;
    /// also the strongest allowed rescue dilution factor.
    pub rescue_threshold: f64,
    pub max_rescues: usize,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            stock_conc: PerVessel::One(0.0),
            min_level: PerVessel::One(0.0),
            max_level: PerVessel::One(0.0),
            step_count: PerVessel::One(20),
            spacing: Spacing::Linear,
            manual_steps: BTreeMap::new(),
            curves_to_start: 5,
            min_curves_per_step: 4,
            min_step_time_h: 7.0,
            growth_stalled_time_h: 6.0,
            max_growthrate: 0.08,
            min_growthrate: 0.06,
            rescue_dilutions: true,
            rescue_threshold: 0.5,
            max_rescues: 2,
        }
    }
}

impl Selection {
    /// Manual ladders with parsed vessel keys.
    pub fn manual_ladders(&self) -> eyre::Result<BTreeMap<usize, Vec<f64>>> {
        self.manual_steps
            .iter()
            .map(|(k, v)| {
                let vessel = k
                    .parse::<usize>()
                    .map_err(|_| eyre::eyre!("selection.manual_steps key {k:?} is not a vessel id"))?;
                Ok((vessel, v.clone()))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Light {
    /// Send a light command every tick.
    pub enabled: bool,
    pub acclimation_time_h: PerVessel<f64>,
    pub acclimation_light: PerVessel<f64>,
    pub cycle_start_h: PerVessel<f64>,
    pub on_length_h: PerVessel<f64>,
    pub off_length_h: PerVessel<f64>,
    pub final_light: PerVessel<f64>,
    /// Optional calibration CSV (`vessel,slope,offset`); overrides slope/offset.
    pub calibration: Option<PathBuf>,
    pub slope: PerVessel<f64>,
    pub offset: PerVessel<f64>,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            enabled: false,
            acclimation_time_h: PerVessel::One(0.0),
            acclimation_light: PerVessel::One(0.0),
            cycle_start_h: PerVessel::One(f64::INFINITY),
            on_length_h: PerVessel::One(12.0),
            off_length_h: PerVessel::One(12.0),
            final_light: PerVessel::One(0.0),
            calibration: None,
            slope: PerVessel::One(1.0),
            offset: PerVessel::One(0.0),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Growth {
    /// OD samples read back when fitting a completed curve.
    pub max_curve_samples: usize,
}

impl Default for Growth {
    fn default() -> Self {
        Self {
            max_curve_samples: 500,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct TransportCfg {
    /// JSON-lines command output; stdout when absent.
    pub output: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub experiment: Experiment,
    #[serde(default)]
    pub turbidostat: Turbidostat,
    pub fluidics: Fluidics,
    #[serde(default)]
    pub selection: Selection,
    #[serde(default)]
    pub light: Light,
    #[serde(default)]
    pub growth: Growth,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub transport: TransportCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Light calibration CSV schema.
///
/// Expected headers:
/// vessel,slope,offset
///
/// Example:
/// vessel,slope,offset
/// 0,0.52,-1070.0
/// 1,0.49,-1011.5
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct LightCalibrationRow {
    pub vessel: usize,
    /// uE per PWM count.
    pub slope: f64,
    /// uE at PWM 0 (extrapolated).
    pub offset: f64,
}

/// Linear PWM calibration per vessel: `uE = slope * pwm + offset`.
#[derive(Debug, Clone, Default)]
pub struct LightCalibration {
    rows: BTreeMap<usize, LightCalibrationRow>,
}

impl LightCalibration {
    pub fn from_rows(rows: Vec<LightCalibrationRow>) -> eyre::Result<Self> {
        let mut out = BTreeMap::new();
        for row in rows {
            if row.vessel >= VESSEL_SLOTS {
                eyre::bail!("light calibration vessel {} out of range", row.vessel);
            }
            if !row.slope.is_finite() || row.slope == 0.0 {
                eyre::bail!(
                    "light calibration slope for vessel {} must be finite and non-zero",
                    row.vessel
                );
            }
            if !row.offset.is_finite() {
                eyre::bail!("light calibration offset for vessel {} must be finite", row.vessel);
            }
            if out.insert(row.vessel, row).is_some() {
                eyre::bail!("light calibration has duplicate rows for vessel {}", row.vessel);
            }
        }
        Ok(Self { rows: out })
    }

    /// `(slope, offset)` for one vessel.
    pub fn get(&self, vessel: usize) -> Option<(f64, f64)> {
        self.rows.get(&vessel).map(|r| (r.slope, r.offset))
    }
}

pub fn load_light_calibration_csv(path: &std::path::Path) -> eyre::Result<LightCalibration> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open light calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["vessel", "slope", "offset"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "light calibration CSV must have headers 'vessel,slope,offset', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<LightCalibrationRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    LightCalibration::from_rows(rows)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Experiment
        let exp = &self.experiment;
        if exp.vessels.is_empty() {
            eyre::bail!("experiment.vessels must list at least one vessel");
        }
        let mut seen = [false; VESSEL_SLOTS];
        for &v in &exp.vessels {
            if v >= VESSEL_SLOTS {
                eyre::bail!("experiment.vessels entry {v} must be < {VESSEL_SLOTS}");
            }
            if seen[v] {
                eyre::bail!("experiment.vessels lists vessel {v} twice");
            }
            seen[v] = true;
        }
        if !(exp.volume_ml.is_finite() && exp.volume_ml > 0.0) {
            eyre::bail!("experiment.volume_ml must be > 0");
        }
        if exp.od_values_to_average == 0 {
            eyre::bail!("experiment.od_values_to_average must be >= 1");
        }

        // Turbidostat
        let t = &self.turbidostat;
        t.lower_thresh.check_len("turbidostat.lower_thresh")?;
        t.upper_thresh.check_len("turbidostat.upper_thresh")?;
        t.lower_thresh
            .all("turbidostat.lower_thresh", |v| v.is_finite() && v > 0.0, "> 0")?;
        for &v in &exp.vessels {
            let (Some(lo), Some(hi)) = (t.lower_thresh.get(v), t.upper_thresh.get(v)) else {
                eyre::bail!("turbidostat thresholds missing for vessel {v}");
            };
            if !(hi > lo) {
                eyre::bail!("turbidostat.upper_thresh must be > lower_thresh for vessel {v}");
            }
        }
        if !(t.pump_wait_min.is_finite() && t.pump_wait_min >= 0.0) {
            eyre::bail!("turbidostat.pump_wait_min must be >= 0");
        }
        if !(t.time_out_s.is_finite() && t.time_out_s >= 0.0) {
            eyre::bail!("turbidostat.time_out_s must be >= 0");
        }
        if !(t.max_pump_s > 0.0 && t.max_pump_s <= 20.0) {
            eyre::bail!("turbidostat.max_pump_s must be in (0, 20]");
        }

        // Fluidics
        let f = &self.fluidics;
        f.influx_flow_rate.check_len("fluidics.influx_flow_rate")?;
        f.dosing_flow_rate.check_len("fluidics.dosing_flow_rate")?;
        f.influx_flow_rate
            .all("fluidics.influx_flow_rate", |v| v.is_finite() && v > 0.0, "> 0")?;
        f.dosing_flow_rate
            .all("fluidics.dosing_flow_rate", |v| v.is_finite() && v > 0.0, "> 0")?;
        if !(f.min_bolus_ml.is_finite() && f.min_bolus_ml > 0.0) {
            eyre::bail!("fluidics.min_bolus_ml must be > 0");
        }
        if !(f.max_bolus_ml.is_finite() && f.max_bolus_ml >= f.min_bolus_ml) {
            eyre::bail!("fluidics.max_bolus_ml must be >= min_bolus_ml");
        }
        if f.max_bolus_ml > MAX_BOLUS_ML {
            eyre::bail!("fluidics.max_bolus_ml must be <= {MAX_BOLUS_ML}");
        }
        if f.dilution_window == 0 {
            eyre::bail!("fluidics.dilution_window must be >= 1");
        }

        // Selection
        let s = &self.selection;
        s.stock_conc.check_len("selection.stock_conc")?;
        s.min_level.check_len("selection.min_level")?;
        s.max_level.check_len("selection.max_level")?;
        s.step_count.check_len("selection.step_count")?;
        s.stock_conc
            .all("selection.stock_conc", |v| v.is_finite() && v >= 0.0, ">= 0")?;
        s.min_level
            .all("selection.min_level", |v| v.is_finite() && v >= 0.0, ">= 0")?;
        s.max_level
            .all("selection.max_level", |v| v.is_finite() && v >= 0.0, ">= 0")?;
        s.step_count.all("selection.step_count", |v| v >= 1, ">= 1")?;
        for (vessel, steps) in s.manual_ladders()? {
            if vessel >= VESSEL_SLOTS {
                eyre::bail!("selection.manual_steps vessel {vessel} must be < {VESSEL_SLOTS}");
            }
            if steps.is_empty() {
                eyre::bail!("selection.manual_steps for vessel {vessel} is empty");
            }
        }
        if s.curves_to_start == 0 {
            eyre::bail!("selection.curves_to_start must be >= 1");
        }
        if s.min_curves_per_step == 0 {
            eyre::bail!("selection.min_curves_per_step must be >= 1");
        }
        if !(s.min_step_time_h.is_finite() && s.min_step_time_h >= 0.0) {
            eyre::bail!("selection.min_step_time_h must be >= 0");
        }
        if !(s.growth_stalled_time_h.is_finite() && s.growth_stalled_time_h > 0.0) {
            eyre::bail!("selection.growth_stalled_time_h must be > 0");
        }
        if !(s.min_growthrate.is_finite() && s.max_growthrate.is_finite()) {
            eyre::bail!("selection growth rate bounds must be finite");
        }
        if s.min_growthrate > s.max_growthrate {
            eyre::bail!("selection.min_growthrate must be <= max_growthrate");
        }
        if !(s.rescue_threshold > 0.0 && s.rescue_threshold < 1.0) {
            eyre::bail!("selection.rescue_threshold must be in (0.0, 1.0)");
        }

        // Light
        let l = &self.light;
        for (key, pv) in [
            ("light.acclimation_time_h", &l.acclimation_time_h),
            ("light.acclimation_light", &l.acclimation_light),
            ("light.on_length_h", &l.on_length_h),
            ("light.off_length_h", &l.off_length_h),
            ("light.final_light", &l.final_light),
        ] {
            pv.check_len(key)?;
            pv.all(key, |v| v.is_finite() && v >= 0.0, ">= 0")?;
        }
        l.cycle_start_h.check_len("light.cycle_start_h")?;
        l.cycle_start_h
            .all("light.cycle_start_h", |v| v >= 0.0, ">= 0")?;
        for &v in &exp.vessels {
            let on = l.on_length_h.get(v).unwrap_or(0.0);
            let off = l.off_length_h.get(v).unwrap_or(0.0);
            if on + off <= 0.0 {
                eyre::bail!("light cycle for vessel {v} must have on_length_h + off_length_h > 0");
            }
        }
        l.slope.check_len("light.slope")?;
        l.offset.check_len("light.offset")?;
        l.slope
            .all("light.slope", |v| v.is_finite() && v != 0.0, "finite and non-zero")?;

        // Growth
        if self.growth.max_curve_samples < 3 {
            eyre::bail!("growth.max_curve_samples must be >= 3");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_vessel_scalar_applies_everywhere() {
        let pv = PerVessel::One(2.0);
        assert_eq!(pv.get(0), Some(2.0));
        assert_eq!(pv.get(15), Some(2.0));
    }

    #[test]
    fn per_vessel_array_indexes_by_vessel() {
        let pv = PerVessel::Each((0..16).map(f64::from).collect());
        assert_eq!(pv.get(3), Some(3.0));
        assert_eq!(pv.get(16), None);
        assert!(pv.check_len("x").is_ok());
        assert!(PerVessel::Each(vec![1.0]).check_len("x").is_err());
    }
}
