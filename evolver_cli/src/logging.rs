//! Tracing subscriber setup.
//!
//! Console output goes to stderr because stdout carries wire commands when no
//! `transport.output` file is configured.

use std::path::Path;

use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::FILE_GUARD;

fn file_layer_writer(
    file: &str,
    rotation: Option<&str>,
) -> tracing_appender::non_blocking::NonBlocking {
    let path = Path::new(file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map_or_else(|| "evolver.log".into(), |n| n.to_string_lossy().into_owned());
    let appender = match rotation {
        Some("daily") => tracing_appender::rolling::daily(dir, name),
        Some("hourly") => tracing_appender::rolling::hourly(dir, name),
        _ => tracing_appender::rolling::never(dir, name),
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);
    writer
}

/// Install the global subscriber. `logging` is the config's `[logging]`
/// section when the config could be read.
pub fn init(json: bool, cli_level: &str, logging: Option<&evolver_config::Logging>) {
    // an explicit --log-level beats [logging].level
    let level = logging
        .and_then(|l| l.level.as_deref())
        .filter(|_| cli_level == "info")
        .unwrap_or(cli_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file = logging.and_then(|l| l.file.as_deref()).map(|f| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(file_layer_writer(f, logging.and_then(|l| l.rotation.as_deref())))
    });

    let _ = Registry::default()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();
}
