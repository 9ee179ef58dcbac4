//! Names and column layouts of the per-vessel record streams.

/// One delimited row of a stream. Field 0 is the experiment time (hours).
pub type Record = Vec<String>;

/// A per-vessel record stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Optical density samples: `time,od`.
    Od,
    /// Active OD target transitions: `time,target`.
    OdSet,
    /// One growth rate per completed curve: `time,rate`.
    GrowthRate,
    /// Authoritative selection state.
    StepLog,
    /// Ladder generation parameters, one row per configuration change.
    StepConfig,
    /// Ladder levels, one row per configuration change.
    StepLadder,
    /// Influx pump events (turbidostat and rescue dilutions).
    PumpLog,
    /// Selective-agent dosing pump events.
    DosingLog,
    /// Light schedule parameters, one row per configuration change.
    LightConfig,
    /// Light intensity changes.
    LightLog,
}

impl Channel {
    pub const ALL: [Channel; 10] = [
        Channel::Od,
        Channel::OdSet,
        Channel::GrowthRate,
        Channel::StepLog,
        Channel::StepConfig,
        Channel::StepLadder,
        Channel::PumpLog,
        Channel::DosingLog,
        Channel::LightConfig,
        Channel::LightLog,
    ];

    /// Stable stream name, also used as the on-disk directory name.
    pub fn name(self) -> &'static str {
        match self {
            Channel::Od => "OD",
            Channel::OdSet => "ODset",
            Channel::GrowthRate => "growthrate",
            Channel::StepLog => "step_log",
            Channel::StepConfig => "step_gen_config",
            Channel::StepLadder => "step_config",
            Channel::PumpLog => "pump_log",
            Channel::DosingLog => "slow_pump_log",
            Channel::LightConfig => "light_config",
            Channel::LightLog => "light_log",
        }
    }

    /// Header line naming the leading columns.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Channel::Od => &["time", "od"],
            Channel::OdSet => &["time", "target"],
            Channel::GrowthRate => &["time", "rate"],
            Channel::StepLog => &[
                "time",
                "step_changed_time",
                "target_level",
                "concentration",
                "status",
            ],
            Channel::StepConfig => &[
                "time",
                "spacing",
                "stock_conc",
                "min_level",
                "max_level",
                "step_count",
            ],
            Channel::StepLadder => &["time", "levels"],
            Channel::PumpLog | Channel::DosingLog => &["time", "duration"],
            Channel::LightConfig => &[
                "time",
                "acclimation_time",
                "acclimation_light",
                "cycle_start",
                "on_length",
                "off_length",
                "final_light",
            ],
            Channel::LightLog => &["time", "light_time", "light_uE", "light_pwm"],
        }
    }

    /// Parse a stream name back into a channel.
    pub fn from_name(name: &str) -> Option<Channel> {
        Channel::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl core::fmt::Display for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
