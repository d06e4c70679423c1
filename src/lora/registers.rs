//! RFM95W / SX1276 register map (LoRa mode).
//!
//! Only the registers the driver touches are listed. Partial-register fields are
//! described by [`BitField`] so every update goes through a single masked
//! read-modify-write instead of ad-hoc shifts at the call site.

/// Transceiver register addresses (LoRa page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    Fifo = 0x00,
    OpMode = 0x01,
    FrfMsb = 0x06,
    FrfMid = 0x07,
    FrfLsb = 0x08,
    PaConfig = 0x09,
    Lna = 0x0C,
    FifoAddrPtr = 0x0D,
    FifoTxBaseAddr = 0x0E,
    FifoRxBaseAddr = 0x0F,
    FifoRxCurrentAddr = 0x10,
    IrqFlags = 0x12,
    RxNbBytes = 0x13,
    PktSnrValue = 0x19,
    PktRssiValue = 0x1A,
    ModemConfig1 = 0x1D,
    ModemConfig2 = 0x1E,
    PreambleMsb = 0x20,
    PreambleLsb = 0x21,
    PayloadLength = 0x22,
    ModemConfig3 = 0x26,
    DioMapping1 = 0x40,
    Version = 0x42,
    PaDac = 0x4D,
}

impl Register {
    /// 7-bit bus address of this register.
    pub const fn addr(self) -> u8 {
        self as u8
    }
}

/// Set on the address byte for a write transaction, clear for a read.
pub const WRITE_BIT: u8 = 0x80;

/// Mask for the 7 address bits of the address byte.
pub const ADDRESS_MASK: u8 = 0x7F;

/// Size of the transceiver's packet FIFO in bytes.
pub const FIFO_SIZE: usize = 256;

/// Largest payload a single packet may carry (8-bit payload length register).
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Expected contents of [`Register::Version`] for SX1276-family silicon.
pub const SILICON_VERSION: u8 = 0x12;

/// A contiguous bit-field inside an 8-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub register: Register,
    /// Position of the least significant bit.
    pub pos: u8,
    /// Width in bits.
    pub width: u8,
}

impl BitField {
    pub const fn new(register: Register, pos: u8, width: u8) -> Self {
        Self {
            register,
            pos,
            width,
        }
    }

    /// Mask of the field's bits in register position.
    pub const fn mask(self) -> u8 {
        (((1u16 << self.width) - 1) << self.pos) as u8
    }

    /// Largest value that fits the field.
    pub const fn max_value(self) -> u8 {
        ((1u16 << self.width) - 1) as u8
    }

    /// Extract the field from a full register value.
    pub const fn get(self, reg: u8) -> u8 {
        (reg & self.mask()) >> self.pos
    }

    /// Replace the field inside `reg` with `value`, preserving every other bit.
    ///
    /// Bits of `value` beyond the field width are discarded.
    pub const fn set(self, reg: u8, value: u8) -> u8 {
        (reg & !self.mask()) | ((value << self.pos) & self.mask())
    }
}

pub mod opmode {
    use super::{BitField, Register};

    pub const MODE: BitField = BitField::new(Register::OpMode, 0, 3);
    pub const LOW_FREQUENCY_MODE_ON: BitField = BitField::new(Register::OpMode, 3, 1);
    pub const ACCESS_SHARED_REG: BitField = BitField::new(Register::OpMode, 6, 1);
    pub const LONG_RANGE_MODE: BitField = BitField::new(Register::OpMode, 7, 1);
}

pub mod pa_config {
    use super::{BitField, Register};

    pub const OUTPUT_POWER: BitField = BitField::new(Register::PaConfig, 0, 4);
    pub const MAX_POWER: BitField = BitField::new(Register::PaConfig, 4, 3);
    pub const PA_SELECT: BitField = BitField::new(Register::PaConfig, 7, 1);

    /// PA config value for +20 dBm on PA_BOOST. Must be paired with [`super::pa_dac::BOOST_20DBM`].
    pub const MAX_20DBM: u8 = 0xFF;
}

pub mod pa_dac {
    use super::{BitField, Register};

    pub const PA_DAC: BitField = BitField::new(Register::PaDac, 0, 3);

    /// High-power (+20 dBm) PA DAC setting.
    pub const BOOST_20DBM: u8 = 0x87;
    /// Power-on default PA DAC setting, used for everything below +20 dBm.
    pub const DEFAULT: u8 = 0x84;
}

pub mod lna {
    use super::{BitField, Register};

    pub const BOOST_HF: BitField = BitField::new(Register::Lna, 0, 2);
}

pub mod modem_config1 {
    use super::{BitField, Register};

    pub const IMPLICIT_HEADER_MODE_ON: BitField = BitField::new(Register::ModemConfig1, 0, 1);
    pub const CODING_RATE: BitField = BitField::new(Register::ModemConfig1, 1, 3);
    pub const BW: BitField = BitField::new(Register::ModemConfig1, 4, 4);
}

pub mod modem_config2 {
    use super::{BitField, Register};

    pub const SYMB_TIMEOUT_MSB: BitField = BitField::new(Register::ModemConfig2, 0, 2);
    pub const RX_PAYLOAD_CRC_ON: BitField = BitField::new(Register::ModemConfig2, 2, 1);
    pub const TX_CONTINUOUS_MODE: BitField = BitField::new(Register::ModemConfig2, 3, 1);
    pub const SPREADING_FACTOR: BitField = BitField::new(Register::ModemConfig2, 4, 4);
}

pub mod modem_config3 {
    use super::{BitField, Register};

    pub const AGC_AUTO_ON: BitField = BitField::new(Register::ModemConfig3, 2, 1);
    pub const LOW_DATA_RATE_OPTIMIZE: BitField = BitField::new(Register::ModemConfig3, 3, 1);
}

/// DIO0..DIO3 routing. In LoRa mode DIO0 carries exactly one of RxDone, TxDone or
/// CadDone, so it must be remapped before each operation whose completion is awaited
/// on the interrupt line.
pub mod dio_mapping1 {
    use super::{BitField, Register};

    pub const DIO0: BitField = BitField::new(Register::DioMapping1, 6, 2);

    pub const DIO0_RX_DONE: u8 = 0b00;
    pub const DIO0_TX_DONE: u8 = 0b01;
    pub const DIO0_CAD_DONE: u8 = 0b10;
}

/// IRQ flag bits. All flags are cleared by writing a 1 to them.
pub mod irq {
    pub const CAD_DETECTED: u8 = 1 << 0;
    pub const FHSS_CHANGE_CHANNEL: u8 = 1 << 1;
    pub const CAD_DONE: u8 = 1 << 2;
    pub const TX_DONE: u8 = 1 << 3;
    pub const VALID_HEADER: u8 = 1 << 4;
    pub const PAYLOAD_CRC_ERROR: u8 = 1 << 5;
    pub const RX_DONE: u8 = 1 << 6;
    pub const RX_TIMEOUT: u8 = 1 << 7;
    pub const ALL: u8 = 0xFF;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_masks() {
        assert_eq!(opmode::MODE.mask(), 0x07);
        assert_eq!(opmode::LONG_RANGE_MODE.mask(), 0x80);
        assert_eq!(modem_config1::CODING_RATE.mask(), 0x0E);
        assert_eq!(modem_config1::BW.mask(), 0xF0);
        assert_eq!(modem_config2::SPREADING_FACTOR.mask(), 0xF0);
        assert_eq!(modem_config2::RX_PAYLOAD_CRC_ON.mask(), 0x04);
        assert_eq!(dio_mapping1::DIO0.mask(), 0xC0);
        assert_eq!(dio_mapping1::DIO0.set(0x00, dio_mapping1::DIO0_TX_DONE), 0x40);
    }

    #[test]
    fn test_set_preserves_other_bits() {
        let reg = 0b1010_0101;
        let updated = modem_config2::SPREADING_FACTOR.set(reg, 0x0C);
        assert_eq!(updated, 0b1100_0101);
        assert_eq!(modem_config2::SPREADING_FACTOR.get(updated), 0x0C);
    }

    #[test]
    fn test_set_discards_overflowing_bits() {
        let updated = opmode::MODE.set(0x80, 0xFF);
        assert_eq!(updated, 0x87);
    }

    #[test]
    fn test_max_value() {
        assert_eq!(modem_config2::SPREADING_FACTOR.max_value(), 15);
        assert_eq!(opmode::MODE.max_value(), 7);
    }

    #[test]
    fn test_write_bit_framing() {
        assert_eq!(Register::Fifo.addr() | WRITE_BIT, 0x80);
        assert_eq!(Register::PaDac.addr() & ADDRESS_MASK, 0x4D);
    }
}
