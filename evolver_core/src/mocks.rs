//! In-memory collaborators for tests, benches and dry runs.

use std::collections::BTreeMap;

use evolver_traits::{Channel, GrowthRateSource, LogStore, Record, Transport, WireCommand};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Log store backed by ordered vectors; missing streams read as empty.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStore {
    streams: BTreeMap<(usize, Channel), Vec<Record>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record from string-like fields.
    pub fn push<S: AsRef<str>>(&mut self, vessel: usize, channel: Channel, fields: &[S]) {
        self.streams
            .entry((vessel, channel))
            .or_default()
            .push(fields.iter().map(|f| f.as_ref().to_string()).collect());
    }

    /// Every record in a stream, oldest first.
    pub fn records(&self, vessel: usize, channel: Channel) -> &[Record] {
        self.streams
            .get(&(vessel, channel))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl LogStore for MemoryLogStore {
    fn tail(&self, vessel: usize, channel: Channel, n: usize) -> Result<Vec<Record>, BoxError> {
        let all = self.records(vessel, channel);
        Ok(all[all.len().saturating_sub(n)..].to_vec())
    }

    fn append(&mut self, vessel: usize, channel: Channel, record: &[String]) -> Result<(), BoxError> {
        self.push(vessel, channel, record);
        Ok(())
    }

    fn len(&self, vessel: usize, channel: Channel) -> Result<usize, BoxError> {
        Ok(self.records(vessel, channel).len())
    }
}

/// Transport that keeps every command it is handed.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    pub sent: Vec<WireCommand>,
    /// When set, every send fails with this message.
    pub fail_with: Option<String>,
}

impl RecordingTransport {
    /// Commands sent for `param`, oldest first.
    pub fn sent_for<'a>(&'a self, param: &'a str) -> impl Iterator<Item = &'a WireCommand> + 'a {
        self.sent.iter().filter(move |c| c.param == param)
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, command: &WireCommand) -> Result<(), BoxError> {
        if let Some(msg) = &self.fail_with {
            return Err(Box::new(std::io::Error::other(msg.clone())));
        }
        self.sent.push(command.clone());
        Ok(())
    }
}

/// Growth source that never produces a rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGrowth;

impl GrowthRateSource for NoGrowth {
    fn curve_completed(
        &mut self,
        _store: &mut dyn LogStore,
        _vessel: usize,
        _start: f64,
        _end: f64,
    ) -> Result<Option<f64>, BoxError> {
        Ok(None)
    }
}

/// Growth source that records the same rate for every completed curve.
#[derive(Debug, Clone, Copy)]
pub struct FixedGrowth(pub f64);

impl GrowthRateSource for FixedGrowth {
    fn curve_completed(
        &mut self,
        store: &mut dyn LogStore,
        vessel: usize,
        _start: f64,
        end: f64,
    ) -> Result<Option<f64>, BoxError> {
        store.append(vessel, Channel::GrowthRate, &[end.to_string(), self.0.to_string()])?;
        Ok(Some(self.0))
    }
}
