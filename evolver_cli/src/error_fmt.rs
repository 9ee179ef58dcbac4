//! Human-readable error descriptions and structured JSON error formatting.

use evolver_core::ControllerError;
use evolver_io::IoError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(ce) = err.downcast_ref::<ControllerError>() {
        return match ce {
            ControllerError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML, or a ladder the stock cannot reach.\nHow to fix: Edit the config file, then run `evolver self-check`."
            ),
            ControllerError::Store(msg) => format!(
                "What happened: The record streams could not be read or written ({msg}).\nLikely causes: Missing data directory, permissions, or a full disk.\nHow to fix: Check experiment.data_dir and run `evolver init`."
            ),
            ControllerError::Transport(msg) => format!(
                "What happened: A command could not be delivered ({msg}).\nLikely causes: transport.output is not writable or the reader went away.\nHow to fix: Check transport.output; the command will be recomputed next tick."
            ),
            ControllerError::InvalidCommand(msg) => format!(
                "What happened: The command was rejected ({msg}).\nLikely causes: Wrong array length for the parameter.\nHow to fix: Pass a single value, or 16 values (pump 48, light 32)."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if let Some(ie) = err.downcast_ref::<IoError>() {
        return match ie {
            IoError::Parse { .. } => format!(
                "What happened: A record stream is malformed ({ie}).\nLikely causes: A partially written or hand-edited file.\nHow to fix: Fix or remove the offending line."
            ),
            _ => format!(
                "What happened: File access failed ({ie}).\nLikely causes: Missing directory or permissions.\nHow to fix: Check experiment.data_dir and transport.output."
            ),
        };
    }

    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("calibration csv must have headers") {
        return "Invalid headers in light calibration CSV. Expected 'vessel,slope,offset'.".to_string();
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: configuration 2, storage 3, anything else 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(ce) = err.downcast_ref::<ControllerError>() {
        return match ce {
            ControllerError::Config(_) => 2,
            ControllerError::Store(_) => 3,
            _ => 1,
        };
    }
    if err.downcast_ref::<IoError>().is_some() {
        return 3;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    match err.downcast_ref::<ControllerError>() {
        Some(ControllerError::Config(_)) => "Config",
        Some(ControllerError::MissingData(_)) => "MissingData",
        Some(ControllerError::NumericDegeneracy(_)) => "NumericDegeneracy",
        Some(ControllerError::Store(_)) => "Store",
        Some(ControllerError::Transport(_)) => "Transport",
        Some(ControllerError::InvalidCommand(_)) => "InvalidCommand",
        None if err.downcast_ref::<IoError>().is_some() => "Store",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_exit_2() {
        let err = eyre::Report::new(ControllerError::Config("bad ladder".into()));
        assert_eq!(exit_code_for_error(&err), 2);
        assert!(humanize(&err).contains("bad ladder"));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "Config");
        assert_eq!(v["exit_code"], 2);
    }

    #[test]
    fn io_errors_exit_3() {
        let err = eyre::Report::new(IoError::Io(std::io::Error::other("disk full")));
        assert_eq!(exit_code_for_error(&err), 3);
        assert_eq!(exit_code_for_error(&eyre::eyre!("plain")), 1);
    }
}
