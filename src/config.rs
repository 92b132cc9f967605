//! Link and session settings, loaded from YAML and overridden by the CLI.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{ChannelSetpoint, ProtocolVariant, CHANNEL_COUNT};

/// Port name that skips the serial port entirely.
pub const SIMULATION_PORT: &str = "Simulation";

/// Accepted range for the poll timer, in milliseconds.
pub const POLL_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 500..=1000;

/// Upper bound accepted for band, integral time and rate.
pub const PARAMETER_LIMIT: f64 = 1000.0;

/// Baud rates the controller firmware can be built with.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BaudRate {
    B1200,
    B2400,
    B4800,
    #[default]
    B9600,
    B19200,
}

impl BaudRate {
    pub const ALL: [BaudRate; 5] = [
        BaudRate::B1200,
        BaudRate::B2400,
        BaudRate::B4800,
        BaudRate::B9600,
        BaudRate::B19200,
    ];
}

impl TryFrom<u32> for BaudRate {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1200 => Ok(BaudRate::B1200),
            2400 => Ok(BaudRate::B2400),
            4800 => Ok(BaudRate::B4800),
            9600 => Ok(BaudRate::B9600),
            19200 => Ok(BaudRate::B19200),
            _ => Err(Error::Config(format!(
                "baud rate must be one of 1200, 2400, 4800, 9600, 19200 (got {})",
                value
            ))),
        }
    }
}

impl From<BaudRate> for u32 {
    fn from(baud: BaudRate) -> u32 {
        match baud {
            BaudRate::B1200 => 1200,
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
        }
    }
}

impl std::fmt::Display for BaudRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

/// Everything needed to open a link and run a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial port name. `None` picks the first port that looks like an Arduino.
    pub port: Option<String>,
    /// Instrument address. Carried for completeness; this protocol ignores it.
    pub address: u8,
    pub baud_rate: BaudRate,
    /// Serial read timeout. Must exceed the firmware's worst-case response time.
    pub timeout_ms: u64,
    /// Setpoints are clamped to `[0, temperature_limit]`.
    pub temperature_limit: f64,
    pub poll_interval_ms: u64,
    /// The Arduino resets when the port opens; wait this long before the first command.
    pub reset_delay_ms: u64,
    pub variant: ProtocolVariant,
    pub channels: [ChannelSetpoint; CHANNEL_COUNT],
    /// Number of telemetry frames kept in memory.
    pub history_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: None,
            address: 0,
            baud_rate: BaudRate::default(),
            timeout_ms: 50,
            temperature_limit: 1000.0,
            poll_interval_ms: 1000,
            reset_delay_ms: 2000,
            variant: ProtocolVariant::default(),
            channels: [ChannelSetpoint::default(); CHANNEL_COUNT],
            history_capacity: 3600,
        }
    }
}

impl Config {
    /// Reads and validates a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates configuration from a YAML string.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !POLL_INTERVAL_RANGE_MS.contains(&self.poll_interval_ms) {
            return Err(Error::Config(format!(
                "poll_interval_ms must be between {} and {} (got {})",
                POLL_INTERVAL_RANGE_MS.start(),
                POLL_INTERVAL_RANGE_MS.end(),
                self.poll_interval_ms
            )));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeout_ms must be at least 1".into()));
        }
        if !self.temperature_limit.is_finite() || self.temperature_limit <= 0.0 {
            return Err(Error::Config(format!(
                "temperature_limit must be a positive number (got {})",
                self.temperature_limit
            )));
        }
        if self.history_capacity == 0 {
            return Err(Error::Config("history_capacity must be at least 1".into()));
        }
        for (channel, setpoint) in self.channels.iter().enumerate() {
            setpoint
                .scaled(channel)
                .map_err(|e| Error::Config(format!("channels[{}]: {}", channel, e)))?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reset_delay(&self) -> Duration {
        Duration::from_millis(self.reset_delay_ms)
    }

    /// Clamps a setpoint into the ranges the instrument accepts.
    ///
    /// NaN passes through untouched so the encoder can reject it.
    pub fn clamp(&self, setpoint: ChannelSetpoint) -> ChannelSetpoint {
        ChannelSetpoint {
            setpoint_c: setpoint.setpoint_c.clamp(0.0, self.temperature_limit),
            band_c: setpoint.band_c.clamp(0.0, PARAMETER_LIMIT),
            integral_time_s: setpoint.integral_time_s.clamp(0.0, PARAMETER_LIMIT),
            rate_per_s: setpoint.rate_per_s.clamp(0.0, PARAMETER_LIMIT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.baud_rate, BaudRate::B9600);
        assert_eq!(config.poll_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn load_partial_yaml() {
        let config = Config::from_yaml(
            "port: /dev/ttyACM0\n\
             baud_rate: 19200\n\
             poll_interval_ms: 500\n\
             variant:\n  sample_channel: true\n\
             channels:\n  - setpoint_c: 80.0\n  - band_c: 2.5\n",
        )
        .unwrap();
        assert_eq!(config.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.baud_rate, BaudRate::B19200);
        assert_eq!(config.variant, ProtocolVariant::WITH_SAMPLE);
        assert_eq!(config.channels[0].setpoint_c, 80.0);
        assert_eq!(config.channels[0].band_c, 5.0);
        assert_eq!(config.channels[1].band_c, 2.5);
        assert_eq!(config.timeout_ms, 50);
    }

    #[test]
    fn example_file_loads() {
        let config = Config::from_yaml(include_str!("../tempctl.example.yaml")).unwrap();
        assert_eq!(config.temperature_limit, 450.0);
        assert_eq!(config.variant, ProtocolVariant::WITH_SAMPLE);
        assert_eq!(config.channels[1], ChannelSetpoint::default());
    }

    #[test]
    fn reject_non_finite_channel_parameters() {
        let result = Config::from_yaml("channels:\n  - setpoint_c: .nan\n  - {}\n");
        assert!(matches!(result, Err(Error::Config(_))));

        let result = Config::from_yaml("channels:\n  - {}\n  - rate_per_s: .inf\n");
        match result {
            Err(Error::Config(message)) => assert!(message.starts_with("channels[1]")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reject_unknown_baud_rate() {
        let result = Config::from_yaml("baud_rate: 115200\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn reject_address_out_of_range() {
        assert!(Config::from_yaml("address: 256\n").is_err());
        assert_eq!(Config::from_yaml("address: 255\n").unwrap().address, 255);
    }

    #[test]
    fn reject_poll_interval_out_of_range() {
        let config = Config {
            poll_interval_ms: 250,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        let config = Config {
            poll_interval_ms: 1500,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_zero_timeout() {
        let config = Config {
            timeout_ms: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn clamp_limits_setpoint_and_parameters() {
        let config = Config {
            temperature_limit: 450.0,
            ..Config::default()
        };
        let clamped = config.clamp(ChannelSetpoint {
            setpoint_c: 600.0,
            band_c: -1.0,
            integral_time_s: 5000.0,
            rate_per_s: 0.5,
        });
        assert_eq!(clamped.setpoint_c, 450.0);
        assert_eq!(clamped.band_c, 0.0);
        assert_eq!(clamped.integral_time_s, 1000.0);
        assert_eq!(clamped.rate_per_s, 0.5);
    }

    #[test]
    fn clamp_keeps_nan() {
        let config = Config::default();
        let clamped = config.clamp(ChannelSetpoint {
            setpoint_c: f64::NAN,
            ..ChannelSetpoint::default()
        });
        assert!(clamped.setpoint_c.is_nan());
    }

    #[test]
    fn baud_rate_display() {
        assert_eq!(BaudRate::B4800.to_string(), "4800");
        assert_eq!(BaudRate::ALL.len(), 5);
    }
}
