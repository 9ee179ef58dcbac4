//! Per-vessel outcomes returned from each control tick.

use crate::error::ControllerError;
use crate::selection::SelectionReport;
use crate::threshold::TurbidostatReport;

/// Everything decided for one vessel in one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct VesselReport {
    pub vessel: usize,
    pub turbidostat: TurbidostatReport,
    pub selection: SelectionReport,
}

/// Why a vessel sat out this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SkipReason {
    pub vessel: usize,
    pub error: ControllerError,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vessel {}: {}", self.vessel, self.error)
    }
}

/// Result of processing one vessel.
#[derive(Debug, Clone, PartialEq)]
pub enum VesselOutcome {
    /// Decisions made; see the report.
    Ok(VesselReport),
    /// Recoverable; other vessels are unaffected.
    Skip(SkipReason),
    /// Stops the experiment.
    Fatal(ControllerError),
}

impl VesselOutcome {
    pub(crate) fn from_error(vessel: usize, error: ControllerError) -> Self {
        if error.is_fatal() {
            VesselOutcome::Fatal(error)
        } else {
            VesselOutcome::Skip(SkipReason { vessel, error })
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, VesselOutcome::Ok(_))
    }

    pub fn report(&self) -> Option<&VesselReport> {
        match self {
            VesselOutcome::Ok(r) => Some(r),
            _ => None,
        }
    }
}
