//! Subcommand bodies. Relative paths in the config resolve against the
//! working directory.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::{Result, WrapErr};
use evolver_config::Config;
use evolver_core::{Controller, ControllerConfig, ControllerError, TickReport, VesselOutcome};
use evolver_io::{FileLogStore, JsonLinesTransport};
use evolver_traits::{Clock, MonotonicClock, Transport};
use tracing::{debug, info};

/// How long the run loop sleeps between Ctrl-C checks.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Read, parse and validate the experiment TOML.
pub fn read_config(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path).map_err(|e| {
        ControllerError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let cfg = evolver_config::load_toml(&text)
        .map_err(|e| ControllerError::Config(format!("{}: {e}", path.display())))?;
    cfg.validate()
        .map_err(|e| ControllerError::Config(e.to_string()))?;
    Ok(cfg)
}

/// Per-vessel controller records, with the light calibration CSV applied.
pub fn controller_config(cfg: &Config) -> Result<ControllerConfig> {
    let cal = match &cfg.light.calibration {
        Some(p) => Some(
            evolver_config::load_light_calibration_csv(p)
                .map_err(|e| ControllerError::Config(format!("{e:#}")))?,
        ),
        None => None,
    };
    Ok(evolver_core::conversions::controller_config(cfg, cal.as_ref())?)
}

fn build_controller(cfg: &Config) -> Result<Controller> {
    Ok(Controller::builder()
        .with_config(controller_config(cfg)?)
        .build()?)
}

fn open_transport(cfg: &Config) -> Result<Box<dyn Transport>> {
    Ok(match &cfg.transport.output {
        Some(path) => Box::new(JsonLinesTransport::append_to(path)?),
        None => Box::new(JsonLinesTransport::stdout()),
    })
}

fn log_tick(report: &TickReport) {
    for outcome in &report.outcomes {
        if let VesselOutcome::Ok(r) = outcome {
            debug!(
                vessel = r.vessel,
                od = r.turbidostat.avg_od,
                level = r.selection.level,
                conc = r.selection.concentration,
                phase = ?r.selection.phase,
                "vessel ticked"
            );
        }
    }
    info!(
        elapsed_h = report.elapsed_h,
        vessels = report.outcomes.len(),
        skipped = report.skipped().count(),
        dispatched = report.dispatched,
        undelivered = report.transport_errors.len(),
        "tick complete"
    );
}

pub fn init(cfg: &Config, json: bool) -> Result<()> {
    let controller = controller_config(cfg)?;
    let mut store = FileLogStore::new(&cfg.experiment.data_dir);
    let mut created = 0;
    for v in &controller.vessels {
        created += store.create_streams(v.vessel)?;
    }
    let reports = evolver_core::init::init_all(&mut store, &controller)?;
    let seeded = reports.iter().filter(|r| r.step_log_seeded).count();
    info!(created, seeded, dir = %cfg.experiment.data_dir.display(), "experiment initialised");
    if json {
        println!(
            "{}",
            serde_json::json!({ "vessels": reports.len(), "streams_created": created, "step_logs_seeded": seeded })
        );
    } else {
        println!(
            "initialised {} vessels in {} ({created} streams created, {seeded} step logs seeded)",
            reports.len(),
            cfg.experiment.data_dir.display()
        );
    }
    Ok(())
}

pub fn tick(cfg: &Config, elapsed_hours: f64) -> Result<()> {
    let mut ctl = build_controller(cfg)?;
    let mut store = FileLogStore::new(&cfg.experiment.data_dir);
    let mut transport = open_transport(cfg)?;
    let report = ctl.tick(&mut store, transport.as_mut(), elapsed_hours)?;
    log_tick(&report);
    Ok(())
}

pub fn run_loop(
    cfg: &Config,
    interval: Duration,
    start_hours: f64,
    max_ticks: Option<u64>,
) -> Result<()> {
    let mut ctl = build_controller(cfg)?;
    let mut store = FileLogStore::new(&cfg.experiment.data_dir);
    let mut transport = open_transport(cfg)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .wrap_err("failed to install Ctrl-C handler")?;
    }

    let clock = MonotonicClock::new();
    let epoch = clock.now();
    let mut ticks = 0u64;
    info!(interval_s = interval.as_secs(), start_hours, "run loop started");
    while !stop.load(Ordering::SeqCst) {
        let elapsed = start_hours + clock.hours_since(epoch);
        let report = ctl.tick(&mut store, transport.as_mut(), elapsed)?;
        log_tick(&report);
        ticks += 1;
        if max_ticks.is_some_and(|m| ticks >= m) {
            break;
        }
        let deadline = clock.now() + interval;
        while !stop.load(Ordering::SeqCst) {
            let left = deadline.saturating_duration_since(clock.now());
            if left.is_zero() {
                break;
            }
            clock.sleep(left.min(STOP_POLL));
        }
    }
    info!(ticks, "run loop stopped");
    Ok(())
}

pub fn set(cfg: &Config, param: &str, value: &str) -> Result<()> {
    let cmd = evolver_core::command::manual_command(param, value)?;
    let mut transport = open_transport(cfg)?;
    transport
        .send(&cmd)
        .map_err(|e| evolver_core::store_error::map_transport_error(&*e))?;
    info!(param = %cmd.param, width = cmd.value.len(), "command sent");
    Ok(())
}

pub fn light_cal(cfg: &Config, vessel: usize, on: Duration, off: Duration) -> Result<()> {
    let mut transport = open_transport(cfg)?;
    let sent = evolver_core::light::calibration_sweep(
        transport.as_mut(),
        &MonotonicClock::new(),
        vessel,
        on,
        off,
    )?;
    info!(vessel, sent, "light calibration sweep finished");
    Ok(())
}

pub fn self_check(cfg: &Config, json: bool) -> Result<()> {
    let ctl = build_controller(cfg)?;
    fs::create_dir_all(&cfg.experiment.data_dir).map_err(evolver_io::IoError::from)?;
    let vessels = ctl.config().vessels.len();
    if json {
        println!("{}", serde_json::json!({ "status": "ok", "vessels": vessels }));
    } else {
        println!(
            "self-check ok: {vessels} vessels, data in {}",
            cfg.experiment.data_dir.display()
        );
    }
    Ok(())
}
