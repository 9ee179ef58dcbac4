//! Typed views of the per-channel record streams.
//!
//! Every stream row starts with the experiment time in hours. Numbers are
//! written with `Display` so they read back bit-for-bit.

use evolver_traits::{Channel, LogStore, Record};

use crate::error::ControllerError;
use crate::store_error::map_store_error;

pub trait FromRecord: Sized {
    fn from_record(rec: &Record, channel: Channel) -> Result<Self, ControllerError>;
}

pub trait ToRecord {
    fn to_record(&self) -> Record;
}

pub(crate) fn field_f64(rec: &Record, idx: usize, channel: Channel) -> Result<f64, ControllerError> {
    let raw = rec.get(idx).ok_or_else(|| {
        ControllerError::MissingData(format!("{channel} record has no column {idx}"))
    })?;
    raw.trim().parse::<f64>().map_err(|_| {
        ControllerError::MissingData(format!("{channel} column {idx} is not a number: {raw:?}"))
    })
}

/// One optical density measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdSample {
    pub time: f64,
    pub od: f64,
}

/// Transition of the active OD target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdSetEvent {
    pub time: f64,
    pub target: f64,
}

/// Growth rate of one completed curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthRateSample {
    pub time: f64,
    pub rate: f64,
}

/// A timed pump pulse (influx or dosing).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpEvent {
    pub time: f64,
    /// Seconds.
    pub duration: f64,
}

/// The authoritative selection state of one vessel.
#[derive(Debug, Clone, PartialEq)]
pub struct StepLogEntry {
    pub time: f64,
    pub step_changed_time: f64,
    pub target_level: f64,
    pub concentration: f64,
    pub status: String,
}

impl StepLogEntry {
    /// State of a vessel before selection has ever run.
    pub fn seed() -> Self {
        Self {
            time: 0.0,
            step_changed_time: 0.0,
            target_level: 0.0,
            concentration: 0.0,
            status: String::new(),
        }
    }
}

/// A recorded light intensity change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightLogEntry {
    pub time: f64,
    pub light_time: f64,
    pub light_ue: f64,
    pub light_pwm: i64,
}

macro_rules! pair_record {
    ($ty:ident, $a:ident, $b:ident) => {
        impl FromRecord for $ty {
            fn from_record(rec: &Record, channel: Channel) -> Result<Self, ControllerError> {
                Ok(Self {
                    $a: field_f64(rec, 0, channel)?,
                    $b: field_f64(rec, 1, channel)?,
                })
            }
        }

        impl ToRecord for $ty {
            fn to_record(&self) -> Record {
                vec![self.$a.to_string(), self.$b.to_string()]
            }
        }
    };
}

pair_record!(OdSample, time, od);
pair_record!(OdSetEvent, time, target);
pair_record!(GrowthRateSample, time, rate);
pair_record!(PumpEvent, time, duration);

impl FromRecord for StepLogEntry {
    fn from_record(rec: &Record, channel: Channel) -> Result<Self, ControllerError> {
        Ok(Self {
            time: field_f64(rec, 0, channel)?,
            step_changed_time: field_f64(rec, 1, channel)?,
            target_level: field_f64(rec, 2, channel)?,
            concentration: field_f64(rec, 3, channel)?,
            status: rec.get(4..).map(|s| s.join(",")).unwrap_or_default(),
        })
    }
}

impl ToRecord for StepLogEntry {
    fn to_record(&self) -> Record {
        vec![
            self.time.to_string(),
            self.step_changed_time.to_string(),
            self.target_level.to_string(),
            self.concentration.to_string(),
            self.status.clone(),
        ]
    }
}

impl FromRecord for LightLogEntry {
    fn from_record(rec: &Record, channel: Channel) -> Result<Self, ControllerError> {
        Ok(Self {
            time: field_f64(rec, 0, channel)?,
            light_time: field_f64(rec, 1, channel)?,
            light_ue: field_f64(rec, 2, channel)?,
            light_pwm: field_f64(rec, 3, channel)? as i64,
        })
    }
}

impl ToRecord for LightLogEntry {
    fn to_record(&self) -> Record {
        vec![
            self.time.to_string(),
            self.light_time.to_string(),
            self.light_ue.to_string(),
            self.light_pwm.to_string(),
        ]
    }
}

/// Up to `n` most recent typed records, oldest first.
pub fn read_tail<T: FromRecord>(
    store: &dyn LogStore,
    vessel: usize,
    channel: Channel,
    n: usize,
) -> Result<Vec<T>, ControllerError> {
    store
        .tail(vessel, channel, n)
        .map_err(|e| map_store_error(&*e))?
        .iter()
        .map(|r| T::from_record(r, channel))
        .collect()
}

/// Most recent typed record, if the stream is non-empty.
pub fn read_last<T: FromRecord>(
    store: &dyn LogStore,
    vessel: usize,
    channel: Channel,
) -> Result<Option<T>, ControllerError> {
    store
        .last(vessel, channel)
        .map_err(|e| map_store_error(&*e))?
        .map(|r| T::from_record(&r, channel))
        .transpose()
}

/// Raw record access for variable-width streams.
pub fn read_last_raw(
    store: &dyn LogStore,
    vessel: usize,
    channel: Channel,
) -> Result<Option<Record>, ControllerError> {
    store.last(vessel, channel).map_err(|e| map_store_error(&*e))
}

pub fn stream_len(
    store: &dyn LogStore,
    vessel: usize,
    channel: Channel,
) -> Result<usize, ControllerError> {
    store.len(vessel, channel).map_err(|e| map_store_error(&*e))
}

pub fn append<T: ToRecord>(
    store: &mut dyn LogStore,
    vessel: usize,
    channel: Channel,
    record: &T,
) -> Result<(), ControllerError> {
    append_raw(store, vessel, channel, &record.to_record())
}

pub fn append_raw(
    store: &mut dyn LogStore,
    vessel: usize,
    channel: Channel,
    record: &[String],
) -> Result<(), ControllerError> {
    store
        .append(vessel, channel, record)
        .map_err(|e| map_store_error(&*e))
}
