#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::float_cmp
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Turbidostat evolution controller (storage- and hardware-agnostic).
//!
//! Every decision is derived from the tail of per-vessel record streams read
//! through `evolver_traits::LogStore`; commands leave through
//! `evolver_traits::Transport`. Nothing is kept in memory between ticks.
//!
//! ## Architecture
//!
//! - **Step planner**: selection ladders and change detection (`ladder`)
//! - **Threshold monitor**: OD band hysteresis and turbidostat dilutions (`threshold`)
//! - **Selection controller**: HOLD / INCREASE / DECREASE along the ladder (`selection`)
//! - **Concentration tracker**, **rescue dilutions**, **dosing planner**
//! - **Light scheduler**: acclimation and day/night cycling (`light`)
//! - **Tick driver**: per-vessel isolation and command dispatch (`tick`)
//!
//! Times are experiment hours, pump durations seconds, volumes mL.

pub mod command;
pub mod concentration;
pub mod config;
pub mod conversions;
pub mod dosing;
pub mod error;
pub mod growth;
pub mod init;
pub mod ladder;
pub mod light;
pub mod mocks;
pub mod records;
pub mod rescue;
pub mod selection;
pub mod status;
pub mod store_error;
pub mod threshold;
pub mod tick;
pub mod util;

pub use command::{FluidicCommand, LightCommand, NO_CHANGE};
pub use config::{ControllerConfig, LadderSpec, Spacing, VesselConfig};
pub use error::{ControllerError, Result};
pub use growth::LogLinearGrowth;
pub use status::{SkipReason, VesselOutcome, VesselReport};
pub use tick::{Controller, TickReport};
