//! Vehicle telemetry radio link.
//!
//! Streams five periodically-updated telemetry records over an RFM95W (SX1276) LoRa
//! transceiver shared by five independently-clocked senders. Everything except the
//! ESP-IDF bus backend builds and runs on the host against [`lora::SimulatedRadio`].

pub mod config;
pub mod lora;
pub mod producers;
pub mod scheduler;
pub mod stats;
pub mod telemetry;

// Re-export commonly used items
pub use config::{ConfigError, TelemetryConfig};
pub use lora::{Radio, RadioBus, RadioConfig, RadioError, SimulatedRadio};
pub use scheduler::{BusArbiter, Scheduler};
pub use stats::{LinkStats, StatsServer, DEFAULT_STATS_PORT};
pub use telemetry::{Channel, TelemetrySnapshot};
