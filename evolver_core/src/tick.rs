//! Tick driver: runs every vessel once and dispatches the merged commands.
//!
//! Order per tick:
//! 1. reconcile every vessel's ladder (a `Config` error stops the tick before
//!    any pump is scheduled),
//! 2. per vessel: threshold monitor, then selection controller,
//! 3. per vessel light, when enabled,
//! 4. one fluidic command (only if some slot is set) and one light command.
//!
//! Every record is appended before the command that depends on it is sent,
//! so a lost command is simply recomputed from the logs next tick.

use std::marker::PhantomData;

use evolver_traits::{GrowthRateSource, LogStore, Transport};
use tracing::{error, info, warn};

use crate::command::{FluidicCommand, LightCommand};
use crate::config::{ControllerConfig, VesselConfig};
use crate::error::ControllerError;
use crate::growth::LogLinearGrowth;
use crate::light::{self, LightReport};
use crate::status::{SkipReason, VesselOutcome, VesselReport};
use crate::store_error::map_transport_error;
use crate::{ladder, selection, threshold};

/// Everything one tick decided and sent.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub elapsed_h: f64,
    pub outcomes: Vec<VesselOutcome>,
    pub lights: Vec<(usize, Result<LightReport, ControllerError>)>,
    pub fluidic: FluidicCommand,
    pub light: Option<LightCommand>,
    /// Commands handed to the transport without error.
    pub dispatched: usize,
    pub transport_errors: Vec<ControllerError>,
}

impl TickReport {
    pub fn skipped(&self) -> impl Iterator<Item = &SkipReason> {
        self.outcomes.iter().filter_map(|o| match o {
            VesselOutcome::Skip(s) => Some(s),
            _ => None,
        })
    }
}

/// The decision engine for one device.
pub struct Controller {
    config: ControllerConfig,
    growth: Box<dyn GrowthRateSource + Send>,
}

impl core::fmt::Debug for Controller {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Controller")
            .field("vessels", &self.config.vessels.len())
            .field("light_enabled", &self.config.light_enabled)
            .finish()
    }
}

impl Controller {
    pub fn builder() -> ControllerBuilder<Missing> {
        ControllerBuilder::default()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Check every vessel's ladder and minimum concentration without
    /// touching a store.
    pub fn check_ladders(&self) -> Result<(), ControllerError> {
        for v in &self.config.vessels {
            ladder::check_min_concentration(v)?;
            ladder::levels_for(&v.selection.ladder)
                .map_err(|e| ControllerError::Config(format!("vessel {}: {e}", v.vessel)))?;
        }
        Ok(())
    }

    fn process_vessel(
        &mut self,
        store: &mut dyn LogStore,
        cfg: &VesselConfig,
        ladder: &[f64],
        elapsed_h: f64,
        cmd: &mut FluidicCommand,
    ) -> Result<VesselReport, ControllerError> {
        let turbidostat = threshold::run(store, self.growth.as_mut(), cfg, elapsed_h, cmd)?;
        let selection = selection::run(store, cfg, ladder, elapsed_h, cmd)?;
        Ok(VesselReport {
            vessel: cfg.vessel,
            turbidostat,
            selection,
        })
    }

    /// Run one control tick at `elapsed_h` experiment hours.
    ///
    /// Only a fatal (configuration) error is returned; everything else is
    /// confined to its vessel and reported in the `TickReport`.
    pub fn tick(
        &mut self,
        store: &mut dyn LogStore,
        transport: &mut dyn Transport,
        elapsed_h: f64,
    ) -> Result<TickReport, ControllerError> {
        let vessels = self.config.vessels.clone();

        let mut ladders = Vec::with_capacity(vessels.len());
        for v in &vessels {
            match ladder::sync(store, v, elapsed_h) {
                Ok(sync) => ladders.push(Ok(sync.levels)),
                Err(e) if e.is_fatal() => {
                    error!(vessel = v.vessel, error = %e, "fatal configuration error");
                    return Err(e);
                }
                Err(e) => ladders.push(Err(e)),
            }
        }

        let mut fluidic = FluidicCommand::new();
        let mut outcomes = Vec::with_capacity(vessels.len());
        for (v, levels) in vessels.iter().zip(ladders) {
            let result = levels.and_then(|levels| {
                self.process_vessel(store, v, &levels, elapsed_h, &mut fluidic)
            });
            let outcome = match result {
                Ok(report) => VesselOutcome::Ok(report),
                Err(e) => {
                    match &e {
                        ControllerError::MissingData(_) => {
                            warn!(vessel = v.vessel, error = %e, "skipping vessel this tick")
                        }
                        _ => error!(vessel = v.vessel, error = %e, "vessel failed this tick"),
                    }
                    VesselOutcome::from_error(v.vessel, e)
                }
            };
            if let VesselOutcome::Fatal(e) = &outcome {
                return Err(e.clone());
            }
            outcomes.push(outcome);
        }

        let mut lights = Vec::new();
        let light_cmd = if self.config.light_enabled {
            let mut cmd = LightCommand::new();
            for v in &vessels {
                let r = light::run(store, v, elapsed_h, &mut cmd);
                if let Err(e) = &r {
                    warn!(vessel = v.vessel, error = %e, "light control skipped");
                }
                lights.push((v.vessel, r));
            }
            Some(cmd)
        } else {
            None
        };

        let mut dispatched = 0;
        let mut transport_errors = Vec::new();
        let mut dispatch = |wire: evolver_traits::WireCommand| match transport.send(&wire) {
            Ok(()) => {
                dispatched += 1;
                info!(param = %wire.param, value = ?wire.value, "command sent");
            }
            Err(e) => {
                let e = map_transport_error(&*e);
                warn!(param = %wire.param, error = %e, "command not delivered");
                transport_errors.push(e);
            }
        };
        if !fluidic.is_noop() {
            dispatch(fluidic.to_wire());
        }
        if let Some(cmd) = &light_cmd {
            dispatch(cmd.to_wire());
        }

        Ok(TickReport {
            elapsed_h,
            outcomes,
            lights,
            fluidic,
            light: light_cmd,
            dispatched,
            transport_errors,
        })
    }
}

// ── Type-state builder ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `Controller`; `build()` needs a configuration.
pub struct ControllerBuilder<C> {
    config: Option<ControllerConfig>,
    growth: Option<Box<dyn GrowthRateSource + Send>>,
    _c: PhantomData<C>,
}

impl Default for ControllerBuilder<Missing> {
    fn default() -> Self {
        Self {
            config: None,
            growth: None,
            _c: PhantomData,
        }
    }
}

impl<C> ControllerBuilder<C> {
    /// Growth-rate collaborator; defaults to `LogLinearGrowth`.
    pub fn with_growth(mut self, growth: impl GrowthRateSource + Send + 'static) -> Self {
        self.growth = Some(Box::new(growth));
        self
    }
}

impl ControllerBuilder<Missing> {
    pub fn with_config(self, config: ControllerConfig) -> ControllerBuilder<Set> {
        ControllerBuilder {
            config: Some(config),
            growth: self.growth,
            _c: PhantomData,
        }
    }
}

impl ControllerBuilder<Set> {
    /// Validate vessel ids and ladders and build the controller.
    pub fn build(self) -> Result<Controller, ControllerError> {
        let config = self
            .config
            .ok_or_else(|| ControllerError::Config("missing controller config".into()))?;
        if config.vessels.is_empty() {
            return Err(ControllerError::Config("no vessels configured".into()));
        }
        let mut seen = [false; crate::command::VESSEL_SLOTS];
        for v in &config.vessels {
            let slot = seen.get_mut(v.vessel).ok_or_else(|| {
                ControllerError::Config(format!("vessel {} out of range", v.vessel))
            })?;
            if *slot {
                return Err(ControllerError::Config(format!("vessel {} listed twice", v.vessel)));
            }
            *slot = true;
        }
        let growth = self.growth.unwrap_or_else(|| {
            Box::new(LogLinearGrowth::new(config.max_curve_samples))
        });
        let controller = Controller { config, growth };
        controller.check_ladders()?;
        Ok(controller)
    }
}
