//! Fixed-width command vectors and their wire form.
//!
//! Fluidics: 48 slots (influx 0..16, efflux 16..32, dosing 32..48).
//! Light: 32 slots (16 active, 16 reserved). Empty slots carry `NO_CHANGE`.

use evolver_traits::WireCommand;

use crate::error::ControllerError;

/// Sentinel meaning "leave this actuator alone this tick".
pub const NO_CHANGE: &str = "--";

pub const VESSEL_SLOTS: usize = 16;
pub const FLUIDIC_SLOTS: usize = 48;
pub const LIGHT_SLOTS: usize = 32;

pub const PUMP_PARAM: &str = "pump";
pub const LIGHT_PARAM: &str = "light";

/// One tick of pump durations in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct FluidicCommand {
    slots: [Option<f64>; FLUIDIC_SLOTS],
}

impl Default for FluidicCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl FluidicCommand {
    pub fn new() -> Self {
        Self {
            slots: [None; FLUIDIC_SLOTS],
        }
    }

    /// Set the influx pulse and its paired efflux pulse. A later call for the
    /// same vessel replaces the earlier one.
    pub fn set_dilution(&mut self, vessel: usize, influx_s: f64, efflux_s: f64) {
        if vessel < VESSEL_SLOTS {
            self.slots[vessel] = Some(influx_s);
            self.slots[vessel + VESSEL_SLOTS] = Some(efflux_s);
        }
    }

    pub fn set_dosing(&mut self, vessel: usize, secs: f64) {
        if vessel < VESSEL_SLOTS {
            self.slots[vessel + 2 * VESSEL_SLOTS] = Some(secs);
        }
    }

    pub fn slot(&self, idx: usize) -> Option<f64> {
        self.slots.get(idx).copied().flatten()
    }

    /// True when every slot is the sentinel.
    pub fn is_noop(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn to_wire(&self) -> WireCommand {
        WireCommand {
            param: PUMP_PARAM.to_string(),
            value: self
                .slots
                .iter()
                .map(|s| match s {
                    Some(secs) => format!("{secs:.2}"),
                    None => NO_CHANGE.to_string(),
                })
                .collect(),
            immediate: true,
        }
    }
}

/// One tick of light PWM values.
#[derive(Debug, Clone, PartialEq)]
pub struct LightCommand {
    slots: [Option<i64>; LIGHT_SLOTS],
}

impl Default for LightCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl LightCommand {
    pub fn new() -> Self {
        Self {
            slots: [None; LIGHT_SLOTS],
        }
    }

    pub fn set(&mut self, vessel: usize, pwm: i64) {
        if vessel < VESSEL_SLOTS {
            self.slots[vessel] = Some(pwm);
        }
    }

    pub fn slot(&self, idx: usize) -> Option<i64> {
        self.slots.get(idx).copied().flatten()
    }

    pub fn to_wire(&self) -> WireCommand {
        WireCommand {
            param: LIGHT_PARAM.to_string(),
            value: self
                .slots
                .iter()
                .map(|s| s.map_or_else(|| NO_CHANGE.to_string(), |p| p.to_string()))
                .collect(),
            immediate: true,
        }
    }
}

/// Slot count a parameter expects on the wire.
pub fn param_width(param: &str) -> usize {
    match param {
        PUMP_PARAM => FLUIDIC_SLOTS,
        LIGHT_PARAM => LIGHT_SLOTS,
        _ => VESSEL_SLOTS,
    }
}

/// Build a single immediate command for `param` from a scalar or a
/// comma-separated array. A scalar is broadcast to every slot.
pub fn manual_command(param: &str, value: &str) -> Result<WireCommand, ControllerError> {
    let param = param.trim();
    if param.is_empty() || param.chars().any(char::is_whitespace) {
        return Err(ControllerError::InvalidCommand(format!(
            "parameter name {param:?} is not valid"
        )));
    }
    let width = param_width(param);
    let parts: Vec<String> = value.split(',').map(|s| s.trim().to_string()).collect();
    if parts.iter().any(String::is_empty) {
        return Err(ControllerError::InvalidCommand(format!(
            "value {value:?} has an empty element"
        )));
    }
    let value = match parts.len() {
        1 => vec![parts[0].clone(); width],
        n if n == width => parts,
        n => {
            return Err(ControllerError::InvalidCommand(format!(
                "{param} expects 1 or {width} values, got {n}"
            )));
        }
    };
    Ok(WireCommand {
        param: param.to_string(),
        value,
        immediate: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn fluidic_slots_and_sentinel() {
        let mut cmd = FluidicCommand::new();
        assert!(cmd.is_noop());
        cmd.set_dilution(3, 20.0, 25.0);
        cmd.set_dosing(3, 1.5);
        let wire = cmd.to_wire();
        assert_eq!(wire.param, "pump");
        assert_eq!(wire.value.len(), 48);
        assert_eq!(wire.value[3], "20.00");
        assert_eq!(wire.value[19], "25.00");
        assert_eq!(wire.value[35], "1.50");
        assert_eq!(wire.value[0], NO_CHANGE);
        assert!(!cmd.is_noop());
    }

    #[test]
    fn out_of_range_vessel_is_ignored() {
        let mut cmd = FluidicCommand::new();
        cmd.set_dilution(16, 1.0, 1.0);
        assert!(cmd.is_noop());
    }

    #[test]
    fn light_wire_has_32_slots() {
        let mut cmd = LightCommand::new();
        cmd.set(0, 2100);
        let wire = cmd.to_wire();
        assert_eq!(wire.value.len(), 32);
        assert_eq!(wire.value[0], "2100");
        assert_eq!(wire.value[16], NO_CHANGE);
    }

    #[rstest]
    #[case("temp", "1500", 16)]
    #[case("light", "0", 32)]
    #[case("pump", "--", 48)]
    fn scalar_is_broadcast(#[case] param: &str, #[case] value: &str, #[case] width: usize) {
        let cmd = manual_command(param, value).unwrap();
        assert_eq!(cmd.value.len(), width);
        assert!(cmd.value.iter().all(|v| v == value));
        assert!(cmd.immediate);
    }

    #[rstest]
    #[case("temp", "1,2,3")]
    #[case("light", "0,2100")]
    #[case("stir", "1,,2")]
    #[case("", "1")]
    fn bad_arrays_are_rejected(#[case] param: &str, #[case] value: &str) {
        assert!(matches!(
            manual_command(param, value),
            Err(ControllerError::InvalidCommand(_))
        ));
    }

    #[test]
    fn full_array_passes_through() {
        let value = (0..32).map(|i| i.to_string()).collect::<Vec<_>>().join(",");
        let cmd = manual_command("light", &value).unwrap();
        assert_eq!(cmd.value[31], "31");
    }
}
