//! Maps `Box<dyn Error>` from the log store and transport seams to typed
//! `ControllerError`s.
//!
//! The traits in `evolver_traits` use `Box<dyn Error + Send + Sync>` so any
//! storage backend can plug in; this module recovers a typed error, with an
//! optional feature-gated path for `evolver_io::IoError` downcasting.

use crate::error::ControllerError;

/// Map a log-store error to a typed `ControllerError`.
///
/// Attempts to downcast known storage error types first, then falls back
/// to string-based heuristics.
pub fn map_store_error(e: &(dyn std::error::Error + 'static)) -> ControllerError {
    #[cfg(feature = "io-errors")]
    {
        if let Some(io) = e.downcast_ref::<evolver_io::error::IoError>() {
            return match io {
                evolver_io::error::IoError::Parse { .. } => {
                    ControllerError::MissingData(io.to_string())
                }
                other => ControllerError::Store(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("not found") || lower.contains("no such file") {
        ControllerError::MissingData(s)
    } else {
        ControllerError::Store(s)
    }
}

/// Map a transport error; delivery failures never carry more structure.
pub fn map_transport_error(e: &(dyn std::error::Error + 'static)) -> ControllerError {
    ControllerError::Transport(e.to_string())
}
