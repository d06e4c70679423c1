//! LoRa radio support for the RFM95W (SX1276) transceiver.
//!
//! This module contains:
//! - [`registers`]: Register map and typed bit-field accessors
//! - [`bus`]: Bus trait and framed register transactions
//! - [`mode`]: Verified device mode transitions
//! - [`modem`]: Modem parameter encoding and frequency arithmetic
//! - [`completion`]: Polled or interrupt-driven completion detection
//! - [`airtime`]: Time-on-air calculation for LoRa packets
//! - [`radio`]: Packet engine (transmit/receive sequencing)
//! - [`sim`]: Simulated transceiver for host runs and tests
//! - `esp32`: ESP-IDF SPI/GPIO bus backend (ESP32 only)

mod airtime;
mod bus;
mod completion;
mod mode;
mod modem;
mod radio;
pub mod registers;
mod sim;

#[cfg(feature = "esp32")]
mod esp32;

pub use airtime::{
    calculate_airtime_ms, calculate_airtime_us, low_data_rate_optimize, symbol_duration_us,
};
pub use bus::{BusError, RadioBus, RegisterInterface};
pub use completion::{CompletionStrategy, CompletionWaiter, IrqNotifier};
pub use mode::{Mode, ModeController};
pub use modem::{
    carrier_frequency_register, frequency_from_register, Bandwidth, CodingRate, ModemConfig,
    ModemConfigurator, SpreadingFactor, TxPower, DEFAULT_OSCILLATOR_HZ,
};
pub use radio::{Radio, RadioConfig, RadioError, ReceivedPacket};
pub use sim::SimulatedRadio;

#[cfg(feature = "esp32")]
pub use esp32::{spawn_dio0_forwarder, EspRadioBus, EspRadioPins};
