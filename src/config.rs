//! Runtime configuration.
//!
//! Loaded from a JSON file; every field has a default, so a partial file (or no file)
//! is valid. Out-of-range modem parameters are clamped by the radio setters and only
//! structural problems are rejected here.
//!
//! # Example
//!
//! ```json
//! {
//!   "radio": {
//!     "frequency_hz": 868100000,
//!     "spreading_factor": 9,
//!     "completion": { "strategy": "interrupt", "timeout_ms": 500 }
//!   },
//!   "schedule": { "suspension_ms": 25, "listen_ms": 500 },
//!   "stats_port": 8081
//! }
//! ```

use crate::lora::{
    Bandwidth, CodingRate, CompletionStrategy, ModemConfig, RadioConfig, SpreadingFactor, TxPower,
    DEFAULT_OSCILLATOR_HZ,
};
use crate::stats::DEFAULT_STATS_PORT;
use crate::telemetry::Channel;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Carrier range supported by the SX1276 family.
pub const MIN_FREQUENCY_HZ: u32 = 137_000_000;
pub const MAX_FREQUENCY_HZ: u32 = 1_020_000_000;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub radio: RadioSettings,
    pub schedule: ScheduleSettings,
    pub stats_port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            radio: RadioSettings::default(),
            schedule: ScheduleSettings::default(),
            stats_port: DEFAULT_STATS_PORT,
        }
    }
}

/// Transceiver settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioSettings {
    pub frequency_hz: u32,
    pub oscillator_hz: u32,
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    /// Coding rate denominator (4/x).
    pub coding_rate: u8,
    pub crc: bool,
    pub preamble_length: u16,
    pub power_dbm: i8,
    pub mode_retries: u8,
    pub completion: CompletionSettings,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            frequency_hz: 915_000_000,
            oscillator_hz: DEFAULT_OSCILLATOR_HZ,
            spreading_factor: 7,
            bandwidth_hz: 500_000,
            coding_rate: 5,
            crc: true,
            preamble_length: 8,
            power_dbm: 20,
            mode_retries: 2,
            completion: CompletionSettings::default(),
        }
    }
}

/// Completion detection, as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum CompletionSettings {
    Poll { max_polls: u32, interval_us: u64 },
    Interrupt { timeout_ms: u64 },
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self::Poll {
            max_polls: 1000,
            interval_us: 1000,
        }
    }
}

impl From<CompletionSettings> for CompletionStrategy {
    fn from(settings: CompletionSettings) -> Self {
        match settings {
            CompletionSettings::Poll {
                max_polls,
                interval_us,
            } => CompletionStrategy::Poll {
                max_polls,
                interval: Duration::from_micros(interval_us),
            },
            CompletionSettings::Interrupt { timeout_ms } => CompletionStrategy::Interrupt {
                timeout: Duration::from_millis(timeout_ms),
            },
        }
    }
}

/// Task periods in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub suspension_ms: u64,
    pub position_ms: u64,
    pub engine_ms: u64,
    pub brakes_accel_ms: u64,
    pub temperature_ms: u64,
    /// Receive window period. 0 disables listening.
    pub listen_ms: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            suspension_ms: 20,
            position_ms: 200,
            engine_ms: 100,
            brakes_accel_ms: 50,
            temperature_ms: 1000,
            listen_ms: 0,
        }
    }
}

impl ScheduleSettings {
    pub fn period_ms(&self, channel: Channel) -> u64 {
        match channel {
            Channel::Suspension => self.suspension_ms,
            Channel::Position => self.position_ms,
            Channel::Engine => self.engine_ms,
            Channel::BrakesAccel => self.brakes_accel_ms,
            Channel::Temperature => self.temperature_ms,
        }
    }

    pub fn period(&self, channel: Channel) -> Duration {
        Duration::from_millis(self.period_ms(channel))
    }

    /// Receive window period, if listening is enabled.
    pub fn listen_period(&self) -> Option<Duration> {
        (self.listen_ms > 0).then(|| Duration::from_millis(self.listen_ms))
    }
}

impl TelemetryConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the radio or scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let radio = &self.radio;
        if radio.oscillator_hz == 0 {
            return Err(ConfigError::ZeroOscillator);
        }
        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&radio.frequency_hz) {
            return Err(ConfigError::FrequencyOutOfRange {
                hz: radio.frequency_hz,
                min: MIN_FREQUENCY_HZ,
                max: MAX_FREQUENCY_HZ,
            });
        }
        match radio.completion {
            CompletionSettings::Poll { max_polls: 0, .. } => {
                return Err(ConfigError::ZeroCompletionBound)
            }
            CompletionSettings::Interrupt { timeout_ms: 0 } => {
                return Err(ConfigError::ZeroCompletionBound)
            }
            _ => {}
        }
        for channel in Channel::ALL {
            if self.schedule.period_ms(channel) == 0 {
                return Err(ConfigError::ZeroPeriod(channel.name()));
            }
        }
        Ok(())
    }

    /// Modem parameters, clamped to what the device supports.
    pub fn modem_config(&self) -> ModemConfig {
        let radio = &self.radio;
        ModemConfig {
            bandwidth: Bandwidth::from_hz(radio.bandwidth_hz),
            spreading_factor: SpreadingFactor::new(radio.spreading_factor),
            coding_rate: CodingRate::from_denominator(radio.coding_rate),
            crc_enabled: radio.crc,
            preamble_length: radio.preamble_length,
            frequency_hz: radio.frequency_hz,
            power: TxPower::new(radio.power_dbm),
        }
    }

    /// Driver configuration for [`Radio::new`](crate::lora::Radio::new).
    pub fn radio_config(&self) -> RadioConfig {
        RadioConfig {
            modem: self.modem_config(),
            oscillator_hz: self.radio.oscillator_hz,
            completion: self.radio.completion.into(),
            mode_retries: self.radio.mode_retries,
            hardware_reset: true,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The config file could not be read.
    Io(String),
    /// The config file is not valid JSON for [`TelemetryConfig`].
    InvalidFormat(String),
    /// Oscillator frequency is zero.
    ZeroOscillator,
    /// Carrier outside the supported band.
    FrequencyOutOfRange { hz: u32, min: u32, max: u32 },
    /// Poll bound or interrupt timeout is zero.
    ZeroCompletionBound,
    /// A sender period is zero.
    ZeroPeriod(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "cannot read config: {}", msg),
            Self::InvalidFormat(msg) => write!(f, "invalid format: {}", msg),
            Self::ZeroOscillator => write!(f, "oscillator frequency must be non-zero"),
            Self::FrequencyOutOfRange { hz, min, max } => {
                write!(f, "frequency {} Hz outside {}..={} Hz", hz, min, max)
            }
            Self::ZeroCompletionBound => write!(f, "completion bound must be non-zero"),
            Self::ZeroPeriod(channel) => write!(f, "{} period must be non-zero", channel),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TelemetryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.modem_config(), ModemConfig::default());
        assert_eq!(config.schedule.period(Channel::Suspension), Duration::from_millis(20));
        assert_eq!(config.schedule.period(Channel::Temperature), Duration::from_secs(1));
        assert_eq!(config.schedule.listen_period(), None);
    }

    #[test]
    fn test_listen_period() {
        let config = TelemetryConfig::from_json(r#"{"schedule": {"listen_ms": 250}}"#).unwrap();
        assert_eq!(
            config.schedule.listen_period(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_partial_document() {
        let config = TelemetryConfig::from_json(
            r#"{"radio": {"frequency_hz": 868100000}, "schedule": {"engine_ms": 80}}"#,
        )
        .unwrap();

        assert_eq!(config.radio.frequency_hz, 868_100_000);
        assert_eq!(config.radio.spreading_factor, 7);
        assert_eq!(config.schedule.engine_ms, 80);
        assert_eq!(config.schedule.suspension_ms, 20);
        assert_eq!(config.stats_port, DEFAULT_STATS_PORT);
    }

    #[test]
    fn test_interrupt_strategy() {
        let config = TelemetryConfig::from_json(
            r#"{"radio": {"completion": {"strategy": "interrupt", "timeout_ms": 250}}}"#,
        )
        .unwrap();

        assert_eq!(
            config.radio_config().completion,
            CompletionStrategy::Interrupt {
                timeout: Duration::from_millis(250)
            }
        );
    }

    #[test]
    fn test_modem_values_clamped() {
        let config = TelemetryConfig::from_json(
            r#"{"radio": {"spreading_factor": 15, "bandwidth_hz": 300000, "coding_rate": 9, "power_dbm": 30}}"#,
        )
        .unwrap();

        let modem = config.modem_config();
        assert_eq!(modem.spreading_factor.value(), 12);
        assert_eq!(modem.bandwidth, Bandwidth::Khz250);
        assert_eq!(modem.coding_rate, CodingRate::Cr4_8);
        assert_eq!(modem.power.dbm(), 20);
    }

    #[test]
    fn test_zero_period_rejected() {
        let result = TelemetryConfig::from_json(r#"{"schedule": {"position_ms": 0}}"#);
        assert_eq!(result, Err(ConfigError::ZeroPeriod("position")));
    }

    #[test]
    fn test_zero_poll_bound_rejected() {
        let result = TelemetryConfig::from_json(
            r#"{"radio": {"completion": {"strategy": "poll", "max_polls": 0, "interval_us": 10}}}"#,
        );
        assert_eq!(result, Err(ConfigError::ZeroCompletionBound));
    }

    #[test]
    fn test_frequency_out_of_range() {
        let result = TelemetryConfig::from_json(r#"{"radio": {"frequency_hz": 2400000000}}"#);
        assert!(matches!(
            result,
            Err(ConfigError::FrequencyOutOfRange { hz: 2_400_000_000, .. })
        ));
    }

    #[test]
    fn test_invalid_json() {
        let result = TelemetryConfig::from_json("{not json");
        assert!(matches!(result, Err(ConfigError::InvalidFormat(_))));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = TelemetryConfig::load("/nonexistent/telemetry.json").unwrap();
        assert_eq!(config, TelemetryConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("telemetry-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"stats_port": 9000}"#).unwrap();

        let config = TelemetryConfig::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.stats_port, 9000);
    }
}
