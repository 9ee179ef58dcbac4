#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

mod cli;
mod commands;
mod error_fmt;
mod logging;

use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands, JSON_MODE};
use error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn run(cli: Cli) -> eyre::Result<()> {
    let cfg = commands::read_config(&cli.config);
    logging::init(cli.json, &cli.log_level, cfg.as_ref().ok().map(|c| &c.logging));
    let cfg = cfg?;

    match cli.cmd {
        Commands::Init => commands::init(&cfg, cli.json),
        Commands::Tick { elapsed_hours } => commands::tick(&cfg, elapsed_hours),
        Commands::Run {
            interval_secs,
            start_hours,
            max_ticks,
        } => commands::run_loop(
            &cfg,
            Duration::from_secs(interval_secs),
            start_hours,
            max_ticks,
        ),
        Commands::Set { param, value } => commands::set(&cfg, &param, &value),
        Commands::LightCal {
            vessel,
            on_secs,
            off_secs,
        } => commands::light_cal(
            &cfg,
            vessel,
            Duration::from_secs(on_secs),
            Duration::from_secs(off_secs),
        ),
        Commands::SelfCheck => commands::self_check(&cfg, cli.json),
    }
}
