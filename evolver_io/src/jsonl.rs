//! Wire commands as one JSON object per line.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use evolver_traits::{Transport, WireCommand};
use serde_json::json;

use crate::error::Result;

/// Render one command as a single JSON line (no trailing newline).
pub fn encode(command: &WireCommand) -> Result<String> {
    let v = json!({
        "param": command.param,
        "value": command.value,
        "immediate": command.immediate,
    });
    Ok(serde_json::to_string(&v)?)
}

/// Writes every command to `W`, flushing after each line.
pub struct JsonLinesTransport<W: Write> {
    out: W,
    sent: usize,
}

impl<W: Write> JsonLinesTransport<W> {
    pub fn new(out: W) -> Self {
        Self { out, sent: 0 }
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl JsonLinesTransport<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl JsonLinesTransport<std::fs::File> {
    /// Append to `path`, creating it if needed.
    pub fn append_to(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write> Transport for JsonLinesTransport<W> {
    fn send(&mut self, command: &WireCommand) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let line = encode(command)?;
        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        self.sent += 1;
        tracing::trace!(param = %command.param, "command written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_line_per_command() {
        let mut t = JsonLinesTransport::new(Vec::new());
        let cmd = WireCommand {
            param: "pump".into(),
            value: vec!["--".into(), "1.50".into()],
            immediate: true,
        };
        t.send(&cmd).unwrap();
        t.send(&cmd).unwrap();
        assert_eq!(t.sent(), 2);
        let out = String::from_utf8(t.into_inner()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(v["param"], "pump");
        assert_eq!(v["value"][1], "1.50");
        assert_eq!(v["immediate"], true);
    }
}
