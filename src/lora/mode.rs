//! Device mode state machine.
//!
//! The controller owns the driver's view of the transceiver mode. Every transition
//! is a read-modify-write of the 3-bit mode field followed by a read-back; the
//! cached mode is only updated once the device confirms it.

use super::bus::{RadioBus, RegisterInterface};
use super::registers::{opmode, Register};
use super::RadioError;
use log::debug;

/// Transceiver operating modes (`RegOpMode` bits 2..0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Sleep,
    Standby,
    FsTx,
    Transmit,
    FsRx,
    ReceiveContinuous,
    ReceiveSingle,
    ChannelActivityDetect,
}

impl Mode {
    pub const ALL: [Mode; 8] = [
        Mode::Sleep,
        Mode::Standby,
        Mode::FsTx,
        Mode::Transmit,
        Mode::FsRx,
        Mode::ReceiveContinuous,
        Mode::ReceiveSingle,
        Mode::ChannelActivityDetect,
    ];

    /// Encoding of this mode in the opmode mode field.
    pub const fn bits(self) -> u8 {
        match self {
            Self::Sleep => 0b000,
            Self::Standby => 0b001,
            Self::FsTx => 0b010,
            Self::Transmit => 0b011,
            Self::FsRx => 0b100,
            Self::ReceiveContinuous => 0b101,
            Self::ReceiveSingle => 0b110,
            Self::ChannelActivityDetect => 0b111,
        }
    }

    /// Decode the mode field. Only the low three bits are considered.
    pub fn from_bits(bits: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.bits() == bits & 0b111)
    }
}

/// Verified mode transitions.
#[derive(Debug)]
pub struct ModeController {
    current: Option<Mode>,
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeController {
    /// A controller that has not yet observed the device mode.
    pub fn new() -> Self {
        Self { current: None }
    }

    /// Last mode confirmed by read-back, if any.
    pub fn current(&self) -> Option<Mode> {
        self.current
    }

    /// Whether the last confirmed mode is `mode`.
    pub fn is_in(&self, mode: Mode) -> bool {
        self.current == Some(mode)
    }

    /// Transition the device to `target`.
    ///
    /// Fails with [`RadioError::ModeVerificationFailed`] when the device reports a
    /// different mode after the write; the cached mode is then cleared so the next
    /// caller cannot act on a stale value.
    pub fn set_mode<B: RadioBus>(
        &mut self,
        regs: &mut RegisterInterface<B>,
        target: Mode,
    ) -> Result<(), RadioError> {
        let value = regs.read_register(Register::OpMode)?;
        regs.write_register(Register::OpMode, opmode::MODE.set(value, target.bits()))?;

        let readback = opmode::MODE.get(regs.read_register(Register::OpMode)?);
        if readback != target.bits() {
            self.current = None;
            return Err(RadioError::ModeVerificationFailed {
                expected: target,
                actual: readback,
            });
        }

        if self.current != Some(target) {
            debug!("mode {:?} -> {:?}", self.current, target);
        }
        self.current = Some(target);
        Ok(())
    }

    /// Query the device directly and refresh the cached mode.
    pub fn read_mode<B: RadioBus>(
        &mut self,
        regs: &mut RegisterInterface<B>,
    ) -> Result<Mode, RadioError> {
        let bits = opmode::MODE.get(regs.read_register(Register::OpMode)?);
        // The field is 3 bits wide and every encoding is a valid mode.
        let mode = Mode::from_bits(bits).unwrap_or(Mode::Sleep);
        self.current = Some(mode);
        Ok(mode)
    }

    /// Switch the device into LoRa mode with high-frequency register access.
    ///
    /// The long-range bit can only change in Sleep, so the device is put to sleep
    /// first. Called once during initialization; never toggled afterwards.
    pub fn enter_lora<B: RadioBus>(
        &mut self,
        regs: &mut RegisterInterface<B>,
    ) -> Result<(), RadioError> {
        self.set_mode(regs, Mode::Sleep)?;
        let mut value = regs.read_register(Register::OpMode)?;
        value = opmode::LONG_RANGE_MODE.set(value, 1);
        value = opmode::ACCESS_SHARED_REG.set(value, 0);
        value = opmode::LOW_FREQUENCY_MODE_ON.set(value, 0);
        regs.write_register(Register::OpMode, value)?;

        if regs.read_field(opmode::LONG_RANGE_MODE)? != 1 {
            self.current = None;
            return Err(RadioError::ModeVerificationFailed {
                expected: Mode::Sleep,
                actual: opmode::MODE.get(regs.read_register(Register::OpMode)?),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lora::SimulatedRadio;

    fn setup() -> (SimulatedRadio, RegisterInterface<SimulatedRadio>) {
        let sim = SimulatedRadio::new();
        // Keep TX from completing so Transmit stays observable.
        sim.set_tx_done_after_polls(None);
        (sim.clone(), RegisterInterface::new(sim))
    }

    #[test]
    fn test_bits_round_trip() {
        for mode in Mode::ALL {
            assert_eq!(Mode::from_bits(mode.bits()), Some(mode));
        }
    }

    #[test]
    fn test_set_mode_every_state() {
        let (sim, mut regs) = setup();
        let mut ctrl = ModeController::new();

        for mode in Mode::ALL {
            ctrl.set_mode(&mut regs, mode).unwrap();
            assert!(ctrl.is_in(mode));
            assert_eq!(ctrl.read_mode(&mut regs).unwrap(), mode);
            assert_eq!(sim.mode(), Some(mode));
        }
    }

    #[test]
    fn test_set_mode_preserves_upper_bits() {
        let (sim, mut regs) = setup();
        sim.set_register(Register::OpMode, 0x80);
        let mut ctrl = ModeController::new();

        ctrl.set_mode(&mut regs, Mode::Standby).unwrap();

        assert_eq!(sim.register(Register::OpMode), 0x81);
    }

    #[test]
    fn test_readback_mismatch_fails() {
        let (sim, mut regs) = setup();
        let mut ctrl = ModeController::new();
        ctrl.set_mode(&mut regs, Mode::Standby).unwrap();

        sim.force_mode_readback(Some(Mode::Sleep));
        let err = ctrl.set_mode(&mut regs, Mode::Transmit).unwrap_err();

        assert!(matches!(
            err,
            RadioError::ModeVerificationFailed {
                expected: Mode::Transmit,
                actual: 0,
            }
        ));
        assert_eq!(ctrl.current(), None);
    }

    #[test]
    fn test_enter_lora_sets_long_range_and_hf() {
        let (sim, mut regs) = setup();
        let mut ctrl = ModeController::new();

        ctrl.enter_lora(&mut regs).unwrap();

        let value = sim.register(Register::OpMode);
        assert_eq!(opmode::LONG_RANGE_MODE.get(value), 1);
        assert_eq!(opmode::LOW_FREQUENCY_MODE_ON.get(value), 0);
        assert_eq!(sim.mode(), Some(Mode::Sleep));
    }
}
