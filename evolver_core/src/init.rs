//! Seed records for a fresh experiment.

use evolver_traits::{Channel, LogStore};
use tracing::info;

use crate::config::{ControllerConfig, VesselConfig};
use crate::error::ControllerError;
use crate::records::{self, StepLogEntry};
use crate::{ladder, light};

/// What `init_vessel` wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitReport {
    pub step_log_seeded: bool,
    pub ladder_recorded: bool,
    pub light_config_recorded: bool,
}

/// Seed one vessel's streams. Existing streams are left as they are, so
/// running this twice is harmless.
///
/// The `ODset` stream is not seeded: an empty stream means the vessel is
/// growing toward its upper threshold.
pub fn init_vessel(
    store: &mut dyn LogStore,
    cfg: &VesselConfig,
) -> Result<InitReport, ControllerError> {
    let mut report = InitReport::default();
    if records::stream_len(&*store, cfg.vessel, Channel::StepLog)? == 0 {
        records::append(store, cfg.vessel, Channel::StepLog, &StepLogEntry::seed())?;
        report.step_log_seeded = true;
    }
    report.ladder_recorded = ladder::sync(store, cfg, 0.0)?.changed;
    report.light_config_recorded = light::sync_config(store, cfg, 0.0)?;
    info!(vessel = cfg.vessel, ?report, "vessel initialised");
    Ok(report)
}

/// Seed every configured vessel; stops at the first error.
pub fn init_all(
    store: &mut dyn LogStore,
    config: &ControllerConfig,
) -> Result<Vec<InitReport>, ControllerError> {
    config
        .vessels
        .iter()
        .map(|v| init_vessel(store, v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MemoryLogStore;

    #[test]
    fn init_is_idempotent() {
        let mut store = MemoryLogStore::new();
        let cfg = VesselConfig::new(7);
        let first = init_vessel(&mut store, &cfg).unwrap();
        assert!(first.step_log_seeded && first.ladder_recorded && first.light_config_recorded);
        let second = init_vessel(&mut store, &cfg).unwrap();
        assert_eq!(second, InitReport::default());
        assert_eq!(store.records(7, Channel::StepLog).len(), 1);
        assert_eq!(store.records(7, Channel::StepLog)[0], vec!["0", "0", "0", "0", ""]);
        assert!(store.records(7, Channel::OdSet).is_empty());
    }
}
