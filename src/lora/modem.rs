//! LoRa modem parameters and their register encoding.
//!
//! Every setter clamps out-of-range input to the nearest valid value instead of
//! rejecting it, then writes only its own bit-field. Setters must only be used
//! while the device is not transmitting; [`Radio`](super::Radio) forces Standby
//! before calling into this module.

use super::airtime::low_data_rate_optimize;
use super::bus::{RadioBus, RegisterInterface};
use super::registers::{
    lna, modem_config1, modem_config2, modem_config3, pa_config, pa_dac, Register,
};
use super::RadioError;
use log::debug;

/// Crystal oscillator frequency of the RFM95W module.
pub const DEFAULT_OSCILLATOR_HZ: u32 = 32_000_000;

/// Frequency synthesizer resolution exponent: `F_step = F_osc / 2^19`.
const FRF_SHIFT: u32 = 19;

/// Largest value representable by the 24-bit frequency register.
const FRF_MAX: u32 = 0x00FF_FFFF;

/// LoRa spreading factor, always within `[6, 12]`.
///
/// SF6 additionally requires implicit header mode on the transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpreadingFactor(u8);

impl SpreadingFactor {
    pub const MIN: u8 = 6;
    pub const MAX: u8 = 12;

    /// Clamp `sf` into the supported range.
    pub fn new(sf: u8) -> Self {
        Self(sf.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

/// Signal bandwidth (`RegModemConfig1` bits 7..4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Bandwidth {
    Khz7_8,
    Khz10_4,
    Khz15_6,
    Khz20_8,
    Khz31_25,
    Khz41_7,
    Khz62_5,
    Khz125,
    Khz250,
    Khz500,
}

impl Bandwidth {
    pub const ALL: [Bandwidth; 10] = [
        Bandwidth::Khz7_8,
        Bandwidth::Khz10_4,
        Bandwidth::Khz15_6,
        Bandwidth::Khz20_8,
        Bandwidth::Khz31_25,
        Bandwidth::Khz41_7,
        Bandwidth::Khz62_5,
        Bandwidth::Khz125,
        Bandwidth::Khz250,
        Bandwidth::Khz500,
    ];

    /// Nominal bandwidth in Hz.
    pub const fn hz(self) -> u32 {
        match self {
            Self::Khz7_8 => 7_800,
            Self::Khz10_4 => 10_400,
            Self::Khz15_6 => 15_600,
            Self::Khz20_8 => 20_800,
            Self::Khz31_25 => 31_250,
            Self::Khz41_7 => 41_700,
            Self::Khz62_5 => 62_500,
            Self::Khz125 => 125_000,
            Self::Khz250 => 250_000,
            Self::Khz500 => 500_000,
        }
    }

    /// Register encoding.
    pub const fn bits(self) -> u8 {
        self as u8
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        Self::ALL.get(bits as usize).copied()
    }

    /// Largest supported bandwidth not above `hz`; anything below the narrowest
    /// step clamps to 7.8 kHz and anything above 500 kHz clamps to 500 kHz.
    pub fn from_hz(hz: u32) -> Self {
        Self::ALL
            .into_iter()
            .rev()
            .find(|bw| bw.hz() <= hz)
            .unwrap_or(Self::Khz7_8)
    }
}

/// Forward error correction rate (`RegModemConfig1` bits 3..1).
///
/// The register value 0 is reserved and never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CodingRate {
    Cr4_5,
    Cr4_6,
    Cr4_7,
    Cr4_8,
}

impl CodingRate {
    /// Clamp a coding-rate denominator (`5` for 4/5 … `8` for 4/8).
    pub fn from_denominator(denominator: u8) -> Self {
        match denominator {
            0..=5 => Self::Cr4_5,
            6 => Self::Cr4_6,
            7 => Self::Cr4_7,
            _ => Self::Cr4_8,
        }
    }

    pub const fn denominator(self) -> u8 {
        match self {
            Self::Cr4_5 => 5,
            Self::Cr4_6 => 6,
            Self::Cr4_7 => 7,
            Self::Cr4_8 => 8,
        }
    }

    pub const fn bits(self) -> u8 {
        self.denominator() - 4
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1..=4 => Some(Self::from_denominator(bits + 4)),
            _ => None,
        }
    }
}

/// Output power on the PA_BOOST pin, in dBm, always within `[2, 20]`.
///
/// 18 and 19 dBm are not reachable without the high-power DAC and clamp down to 17.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TxPower(i8);

impl TxPower {
    pub const MIN_DBM: i8 = 2;
    pub const MAX_DBM: i8 = 20;
    const MAX_NORMAL_DBM: i8 = 17;

    pub fn new(dbm: i8) -> Self {
        match dbm {
            d if d >= Self::MAX_DBM => Self(Self::MAX_DBM),
            d => Self(d.clamp(Self::MIN_DBM, Self::MAX_NORMAL_DBM)),
        }
    }

    pub fn dbm(self) -> i8 {
        self.0
    }

    /// `(RegPaConfig, RegPaDac)` for this power level.
    ///
    /// The two registers are a matched pair and are always written together: +20 dBm
    /// needs `0xFF`/`0x87`, every other level needs the default DAC setting, and
    /// mixing them drives the amplifier out of its specified operating point.
    pub fn register_pair(self) -> (u8, u8) {
        if self.0 >= Self::MAX_DBM {
            return (pa_config::MAX_20DBM, pa_dac::BOOST_20DBM);
        }
        let mut value = pa_config::PA_SELECT.set(0, 1);
        value = pa_config::MAX_POWER.set(value, pa_config::MAX_POWER.max_value());
        // Pout = 2 + OutputPower on PA_BOOST.
        value = pa_config::OUTPUT_POWER.set(value, (self.0 - Self::MIN_DBM) as u8);
        (value, pa_dac::DEFAULT)
    }

    /// Decode a register pair written by [`register_pair`](Self::register_pair).
    pub fn from_registers(pa_config_value: u8, pa_dac_value: u8) -> Self {
        if pa_dac::PA_DAC.get(pa_dac_value) == pa_dac::PA_DAC.get(pa_dac::BOOST_20DBM) {
            return Self(Self::MAX_DBM);
        }
        Self::new(pa_config::OUTPUT_POWER.get(pa_config_value) as i8 + Self::MIN_DBM)
    }
}

/// Complete modem configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModemConfig {
    pub bandwidth: Bandwidth,
    pub spreading_factor: SpreadingFactor,
    pub coding_rate: CodingRate,
    pub crc_enabled: bool,
    pub preamble_length: u16,
    pub frequency_hz: u32,
    pub power: TxPower,
}

impl Default for ModemConfig {
    /// 915 MHz, +20 dBm, 500 kHz, SF7, 4/5, CRC on.
    fn default() -> Self {
        Self {
            bandwidth: Bandwidth::Khz500,
            spreading_factor: SpreadingFactor::new(7),
            coding_rate: CodingRate::Cr4_5,
            crc_enabled: true,
            preamble_length: 8,
            frequency_hz: 915_000_000,
            power: TxPower::new(20),
        }
    }
}

/// Frequency register value for a carrier: `round(freq_hz / (osc_hz / 2^19))`.
///
/// The result saturates at the 24-bit register width.
pub fn carrier_frequency_register(freq_hz: u32, osc_hz: u32) -> u32 {
    if osc_hz == 0 {
        return 0;
    }
    let scaled = ((freq_hz as u64) << FRF_SHIFT) + osc_hz as u64 / 2;
    (scaled / osc_hz as u64).min(FRF_MAX as u64) as u32
}

/// Carrier frequency for a frequency register value, rounded to the nearest Hz.
pub fn frequency_from_register(frf: u32, osc_hz: u32) -> u32 {
    let half_step = 1u64 << (FRF_SHIFT - 1);
    (((frf as u64) * osc_hz as u64 + half_step) >> FRF_SHIFT) as u32
}

/// Register-level modem configuration.
#[derive(Debug)]
pub struct ModemConfigurator {
    config: ModemConfig,
    oscillator_hz: u32,
}

impl ModemConfigurator {
    pub fn new(oscillator_hz: u32) -> Self {
        Self {
            config: ModemConfig::default(),
            oscillator_hz,
        }
    }

    /// Configuration as last written to the device.
    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    pub fn oscillator_hz(&self) -> u32 {
        self.oscillator_hz
    }

    /// Write every modem parameter, the LNA boost and AGC, in register order.
    pub fn apply<B: RadioBus>(
        &mut self,
        regs: &mut RegisterInterface<B>,
        config: &ModemConfig,
    ) -> Result<(), RadioError> {
        self.set_frequency(regs, config.frequency_hz)?;
        self.set_power(regs, config.power.dbm())?;
        regs.update_field(lna::BOOST_HF, 0b11)?;
        self.set_bandwidth(regs, config.bandwidth.hz())?;
        self.set_coding_rate(regs, config.coding_rate.denominator())?;
        regs.update_field(modem_config1::IMPLICIT_HEADER_MODE_ON, 0)?;
        self.set_spreading_factor(regs, config.spreading_factor.value())?;
        self.set_crc(regs, config.crc_enabled)?;
        self.set_preamble_length(regs, config.preamble_length)?;
        regs.update_field(modem_config3::AGC_AUTO_ON, 1)?;
        debug!("modem configured: {:?}", self.config);
        Ok(())
    }

    pub fn set_spreading_factor<B: RadioBus>(
        &mut self,
        regs: &mut RegisterInterface<B>,
        sf: u8,
    ) -> Result<SpreadingFactor, RadioError> {
        let sf = SpreadingFactor::new(sf);
        regs.update_field(modem_config2::SPREADING_FACTOR, sf.value())?;
        self.config.spreading_factor = sf;
        self.update_low_data_rate_optimize(regs)?;
        Ok(sf)
    }

    pub fn set_bandwidth<B: RadioBus>(
        &mut self,
        regs: &mut RegisterInterface<B>,
        hz: u32,
    ) -> Result<Bandwidth, RadioError> {
        let bw = Bandwidth::from_hz(hz);
        regs.update_field(modem_config1::BW, bw.bits())?;
        self.config.bandwidth = bw;
        self.update_low_data_rate_optimize(regs)?;
        Ok(bw)
    }

    pub fn set_coding_rate<B: RadioBus>(
        &mut self,
        regs: &mut RegisterInterface<B>,
        denominator: u8,
    ) -> Result<CodingRate, RadioError> {
        let cr = CodingRate::from_denominator(denominator);
        regs.update_field(modem_config1::CODING_RATE, cr.bits())?;
        self.config.coding_rate = cr;
        Ok(cr)
    }

    pub fn set_crc<B: RadioBus>(
        &mut self,
        regs: &mut RegisterInterface<B>,
        enabled: bool,
    ) -> Result<(), RadioError> {
        regs.update_field(modem_config2::RX_PAYLOAD_CRC_ON, enabled as u8)?;
        self.config.crc_enabled = enabled;
        Ok(())
    }

    /// Preamble length in symbols, written MSB first.
    pub fn set_preamble_length<B: RadioBus>(
        &mut self,
        regs: &mut RegisterInterface<B>,
        symbols: u16,
    ) -> Result<(), RadioError> {
        let [msb, lsb] = symbols.to_be_bytes();
        regs.write_register(Register::PreambleMsb, msb)?;
        regs.write_register(Register::PreambleLsb, lsb)?;
        self.config.preamble_length = symbols;
        Ok(())
    }

    /// Program the carrier frequency. Returns the 24-bit register value written.
    pub fn set_frequency<B: RadioBus>(
        &mut self,
        regs: &mut RegisterInterface<B>,
        freq_hz: u32,
    ) -> Result<u32, RadioError> {
        let frf = carrier_frequency_register(freq_hz, self.oscillator_hz);
        let bytes = frf.to_be_bytes();
        regs.write_burst(Register::FrfMsb, &bytes[1..])?;
        self.config.frequency_hz = freq_hz;
        Ok(frf)
    }

    /// Program the output power; PA config and PA DAC are always written as a pair.
    pub fn set_power<B: RadioBus>(
        &mut self,
        regs: &mut RegisterInterface<B>,
        dbm: i8,
    ) -> Result<TxPower, RadioError> {
        let power = TxPower::new(dbm);
        let (pa, dac) = power.register_pair();
        regs.write_register(Register::PaConfig, pa)?;
        regs.write_register(Register::PaDac, dac)?;
        self.config.power = power;
        Ok(power)
    }

    /// Decode the modem configuration currently held by the device.
    pub fn read_modem_config<B: RadioBus>(
        &self,
        regs: &mut RegisterInterface<B>,
    ) -> Result<ModemConfig, RadioError> {
        let frf = regs.read_burst(Register::FrfMsb, 3)?;
        let frf = u32::from_be_bytes([0, frf[0], frf[1], frf[2]]);
        let mc1 = regs.read_register(Register::ModemConfig1)?;
        let mc2 = regs.read_register(Register::ModemConfig2)?;
        let preamble = regs.read_burst(Register::PreambleMsb, 2)?;
        let pa = regs.read_register(Register::PaConfig)?;
        let dac = regs.read_register(Register::PaDac)?;

        Ok(ModemConfig {
            bandwidth: Bandwidth::from_bits(modem_config1::BW.get(mc1))
                .unwrap_or(Bandwidth::Khz500),
            spreading_factor: SpreadingFactor::new(modem_config2::SPREADING_FACTOR.get(mc2)),
            coding_rate: CodingRate::from_bits(modem_config1::CODING_RATE.get(mc1))
                .unwrap_or(CodingRate::Cr4_5),
            crc_enabled: modem_config2::RX_PAYLOAD_CRC_ON.get(mc2) == 1,
            preamble_length: u16::from_be_bytes([preamble[0], preamble[1]]),
            frequency_hz: frequency_from_register(frf, self.oscillator_hz),
            power: TxPower::from_registers(pa, dac),
        })
    }

    fn update_low_data_rate_optimize<B: RadioBus>(
        &mut self,
        regs: &mut RegisterInterface<B>,
    ) -> Result<(), RadioError> {
        let ldro = low_data_rate_optimize(&self.config);
        regs.update_field(modem_config3::LOW_DATA_RATE_OPTIMIZE, ldro as u8)?;
        Ok(())
    }
}
