use thiserror::Error;

/// Typed controller failures.
///
/// Only `Config` is fatal; every other variant is confined to the vessel (or
/// the single action) it arose in.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControllerError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("missing data: {0}")]
    MissingData(String),
    #[error("numeric degeneracy: {0}")]
    NumericDegeneracy(String),
    #[error("log store error: {0}")]
    Store(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl ControllerError {
    /// Whether this error must stop the experiment.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ControllerError::Config(_))
    }
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
