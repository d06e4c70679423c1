//! Register-level access to the transceiver over the shared bus.
//!
//! The byte transport ([`RadioBus`]) is supplied by the platform: ESP-IDF SPI on
//! hardware, [`SimulatedRadio`](super::SimulatedRadio) on the host. The
//! [`RegisterInterface`] adds the transceiver's framing on top of it:
//!
//! - address byte first, bit 7 set for a write and clear for a read
//! - device-select asserted before the address byte and released after the last data byte
//! - burst transfers reuse the same framing; the device auto-increments its address
//!   (or its FIFO pointer when addressed at [`Register::Fifo`])
//!
//! There is no retry at this layer. A failure in the middle of a transaction leaves the
//! device in an unknown state and is reported to the caller as-is.

use super::registers::{BitField, Register, ADDRESS_MASK, WRITE_BIT};
use log::trace;
use std::fmt;

/// Byte-level bus primitives consumed by the driver.
///
/// Implementations perform blocking transfers. Device-select framing is driven by the
/// caller through [`select`](RadioBus::select) and [`deselect`](RadioBus::deselect).
pub trait RadioBus: Send {
    /// Assert the device-select line.
    fn select(&mut self) -> Result<(), BusError>;

    /// Release the device-select line.
    fn deselect(&mut self) -> Result<(), BusError>;

    /// Clock `bytes` out to the device.
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BusError>;

    /// Clock `buf.len()` bytes in from the device.
    fn receive(&mut self, buf: &mut [u8]) -> Result<(), BusError>;

    /// Drive the reset line active. Boards without a reset line keep the default no-op.
    fn assert_reset(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    /// Release the reset line.
    fn release_reset(&mut self) -> Result<(), BusError> {
        Ok(())
    }
}

/// Bus transport errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Data transfer failed.
    Transfer(String),
    /// Device-select or reset line could not be driven.
    Gpio(String),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transfer(e) => write!(f, "bus transfer failed: {}", e),
            Self::Gpio(e) => write!(f, "bus GPIO failed: {}", e),
        }
    }
}

impl std::error::Error for BusError {}

/// Framed register access on top of a [`RadioBus`].
pub struct RegisterInterface<B> {
    bus: B,
}

impl<B: RadioBus> RegisterInterface<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Read a single register.
    pub fn read_register(&mut self, reg: Register) -> Result<u8, BusError> {
        let mut value = [0u8; 1];
        self.read_into(reg, &mut value)?;
        trace!("read  {:?} = {:#04x}", reg, value[0]);
        Ok(value[0])
    }

    /// Write a single register.
    pub fn write_register(&mut self, reg: Register, value: u8) -> Result<(), BusError> {
        trace!("write {:?} = {:#04x}", reg, value);
        self.write_burst(reg, &[value])
    }

    /// Read `len` consecutive bytes starting at `reg`.
    pub fn read_burst(&mut self, reg: Register, len: usize) -> Result<Vec<u8>, BusError> {
        let mut data = vec![0u8; len];
        self.read_into(reg, &mut data)?;
        Ok(data)
    }

    /// Write `bytes` in a single transaction starting at `reg`.
    pub fn write_burst(&mut self, reg: Register, bytes: &[u8]) -> Result<(), BusError> {
        let mut frame = Vec::with_capacity(bytes.len() + 1);
        frame.push(reg.addr() | WRITE_BIT);
        frame.extend_from_slice(bytes);
        self.framed(|bus| bus.transmit(&frame))
    }

    /// Read a bit-field.
    pub fn read_field(&mut self, field: BitField) -> Result<u8, BusError> {
        Ok(field.get(self.read_register(field.register)?))
    }

    /// Read-modify-write a bit-field, leaving the rest of the register untouched.
    pub fn update_field(&mut self, field: BitField, value: u8) -> Result<(), BusError> {
        let current = self.read_register(field.register)?;
        self.write_register(field.register, field.set(current, value))
    }

    /// Access the underlying transport (reset line, test inspection).
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn read_into(&mut self, reg: Register, buf: &mut [u8]) -> Result<(), BusError> {
        let addr = [reg.addr() & ADDRESS_MASK];
        self.framed(|bus| {
            bus.transmit(&addr)?;
            bus.receive(buf)
        })
    }

    /// Bracket `op` with device-select. The select line is released even when the
    /// transfer fails; the transfer error takes precedence.
    fn framed<T>(
        &mut self,
        op: impl FnOnce(&mut B) -> Result<T, BusError>,
    ) -> Result<T, BusError> {
        self.bus.select()?;
        let result = op(&mut self.bus);
        let released = self.bus.deselect();
        let value = result?;
        released?;
        Ok(value)
    }
}
