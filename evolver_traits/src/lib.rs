//! Seams between the evolver decision engine and its collaborators.
//!
//! The core never touches files, sockets or wall-clock time directly; it is
//! handed implementations of the traits below. Errors crossing these
//! boundaries are boxed so implementations stay free to use their own types.

pub mod channel;
pub mod clock;

pub use channel::{Channel, Record};
pub use clock::{Clock, ManualClock, MonotonicClock};

/// Append-only, ordered record streams keyed by (vessel, channel).
///
/// A record is one timestamped row; field 0 is always the experiment time in
/// hours. Implementations must preserve append order and never rewrite
/// existing records.
pub trait LogStore {
    /// Up to the `n` most recent records, oldest first. Missing streams yield
    /// an empty vector.
    fn tail(
        &self,
        vessel: usize,
        channel: Channel,
        n: usize,
    ) -> Result<Vec<Record>, Box<dyn std::error::Error + Send + Sync>>;

    /// Append one record to the end of the stream, creating it if needed.
    fn append(
        &mut self,
        vessel: usize,
        channel: Channel,
        record: &[String],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Number of records in the stream (headers excluded).
    fn len(
        &self,
        vessel: usize,
        channel: Channel,
    ) -> Result<usize, Box<dyn std::error::Error + Send + Sync>>;

    /// Most recent record, if any.
    fn last(
        &self,
        vessel: usize,
        channel: Channel,
    ) -> Result<Option<Record>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.tail(vessel, channel, 1)?.pop())
    }
}

/// One command event for the device controller.
///
/// `value` holds channel-specific slots, each a number rendered as text or
/// the no-change sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireCommand {
    pub param: String,
    pub value: Vec<String>,
    pub immediate: bool,
}

/// Fire-and-forget delivery of wire commands to the device.
pub trait Transport {
    fn send(
        &mut self,
        command: &WireCommand,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// External growth-rate collaborator, invoked when a growth curve completes.
///
/// Implementations fit the curve between `start` and `end` (hours) and are
/// expected to append the result to [`Channel::GrowthRate`] themselves.
pub trait GrowthRateSource {
    fn curve_completed(
        &mut self,
        store: &mut dyn LogStore,
        vessel: usize,
        start: f64,
        end: f64,
    ) -> Result<Option<f64>, Box<dyn std::error::Error + Send + Sync>>;
}
