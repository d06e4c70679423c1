//! RFM95W packet engine.
//!
//! [`Radio`] owns the register interface, the mode controller, the modem
//! configurator and the completion waiter, and sequences single transmit and
//! receive operations on top of them. It is not reentrant; concurrent users share
//! it through the [`BusArbiter`](crate::scheduler::BusArbiter).
//!
//! # Pin Configuration (vehicle telemetry board)
//!
//! | Signal | Notes |
//! |--------|-------|
//! | SPI MOSI/MISO/CLK | SPI2 |
//! | NSS (CS) | driven manually by the bus backend |
//! | RESET | active low |
//! | DIO0 | TxDone / RxDone, rising edge |

use super::bus::{BusError, RadioBus, RegisterInterface};
use super::completion::{CompletionStrategy, CompletionWaiter, IrqNotifier};
use super::mode::{Mode, ModeController};
use super::modem::{
    Bandwidth, CodingRate, ModemConfig, ModemConfigurator, SpreadingFactor, TxPower,
    DEFAULT_OSCILLATOR_HZ,
};
use super::registers::{dio_mapping1, irq, Register, MAX_PAYLOAD_LEN, SILICON_VERSION};
use log::{debug, info, warn};
use std::fmt;
use std::time::Duration;

/// FIFO base address for outgoing packets.
const FIFO_TX_BASE_ADDR: u8 = 0x00;

/// FIFO base address for incoming packets.
const FIFO_RX_BASE_ADDR: u8 = 0x00;

/// Reset pulse width and the time the device needs before it accepts commands.
const RESET_PULSE: Duration = Duration::from_millis(1);
const RESET_SETTLE: Duration = Duration::from_millis(10);

/// RSSI offset for the high-frequency RF port (dBm).
const RSSI_OFFSET_HF: i16 = -157;

/// Driver settings fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioConfig {
    pub modem: ModemConfig,
    pub oscillator_hz: u32,
    pub completion: CompletionStrategy,
    /// Extra attempts after a mode read-back mismatch before giving up.
    pub mode_retries: u8,
    /// Pulse the reset line during [`Radio::init`].
    pub hardware_reset: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            modem: ModemConfig::default(),
            oscillator_hz: DEFAULT_OSCILLATOR_HZ,
            completion: CompletionStrategy::default(),
            mode_retries: 2,
            hardware_reset: true,
        }
    }
}

/// A received LoRa packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    /// Packet payload.
    pub data: Vec<u8>,
    /// Packet RSSI in dBm.
    pub rssi: i16,
    /// Packet SNR in dB.
    pub snr: i8,
}

/// LoRa radio driver.
pub struct Radio<B> {
    regs: RegisterInterface<B>,
    mode: ModeController,
    modem: ModemConfigurator,
    completion: CompletionWaiter,
    config: RadioConfig,
    initialized: bool,
}

impl<B: RadioBus> Radio<B> {
    /// Wrap a bus. The device is not touched until [`init`](Self::init).
    pub fn new(bus: B, config: RadioConfig) -> Self {
        Self {
            regs: RegisterInterface::new(bus),
            mode: ModeController::new(),
            modem: ModemConfigurator::new(config.oscillator_hz),
            completion: CompletionWaiter::new(config.completion),
            config,
            initialized: false,
        }
    }

    /// Interrupt notifier to hand to the DIO0 handler; `None` when polling.
    pub fn irq_notifier(&self) -> Option<IrqNotifier> {
        self.completion.notifier()
    }

    /// Reset and configure the transceiver for LoRa operation, ending in Standby.
    pub fn init(&mut self) -> Result<(), RadioError> {
        info!("Initializing RFM95W radio");

        if self.config.hardware_reset {
            self.hardware_reset()?;
        }

        let version = self.regs.read_register(Register::Version)?;
        if version != SILICON_VERSION {
            warn!(
                "Unexpected silicon version {:#04x} (expected {:#04x})",
                version, SILICON_VERSION
            );
        }

        self.mode.enter_lora(&mut self.regs)?;
        self.regs.write_register(Register::FifoTxBaseAddr, FIFO_TX_BASE_ADDR)?;
        self.regs.write_register(Register::FifoRxBaseAddr, FIFO_RX_BASE_ADDR)?;

        let modem = self.config.modem;
        self.modem.apply(&mut self.regs, &modem)?;
        self.ensure_mode(Mode::Standby)?;

        self.initialized = true;
        info!(
            "RFM95W initialized: {} Hz, SF{}, {} Hz, CR 4/{}, {} dBm",
            modem.frequency_hz,
            modem.spreading_factor.value(),
            modem.bandwidth.hz(),
            modem.coding_rate.denominator(),
            modem.power.dbm()
        );
        Ok(())
    }

    /// Transmit one packet and wait for the device to report it sent.
    ///
    /// On [`RadioError::TransmitTimeout`] the device is left in Transmit mode; call
    /// [`force_standby`](Self::force_standby) before reusing it.
    pub fn transmit(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        if payload.is_empty() || payload.len() > MAX_PAYLOAD_LEN {
            return Err(RadioError::InvalidPayload {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }

        self.ensure_mode(Mode::Standby)?;
        self.regs.write_register(Register::FifoAddrPtr, FIFO_TX_BASE_ADDR)?;
        self.regs.write_burst(Register::Fifo, payload)?;
        self.regs.write_register(Register::PayloadLength, payload.len() as u8)?;
        self.regs.update_field(dio_mapping1::DIO0, dio_mapping1::DIO0_TX_DONE)?;
        // A stale TX-done from an earlier packet must not complete this one.
        self.regs.write_register(Register::IrqFlags, irq::TX_DONE)?;
        self.completion.arm();

        debug!("TX {} bytes", payload.len());
        self.ensure_mode(Mode::Transmit)?;

        if self.completion.wait(&mut self.regs, irq::TX_DONE)?.is_none() {
            warn!("TX done not observed within bound");
            return Err(RadioError::TransmitTimeout);
        }

        self.regs.write_register(Register::IrqFlags, irq::TX_DONE)?;
        self.ensure_mode(Mode::Standby)
    }

    /// Listen in receive-continuous mode until one packet arrives.
    ///
    /// Packets with a payload CRC error are discarded and reported as
    /// [`RadioError::PayloadCrcError`].
    pub fn receive(&mut self) -> Result<ReceivedPacket, RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }

        self.ensure_mode(Mode::Standby)?;
        self.regs.write_register(Register::FifoAddrPtr, FIFO_RX_BASE_ADDR)?;
        self.regs.update_field(dio_mapping1::DIO0, dio_mapping1::DIO0_RX_DONE)?;
        self.regs.write_register(Register::IrqFlags, irq::ALL)?;
        self.completion.arm();
        self.ensure_mode(Mode::ReceiveContinuous)?;

        let Some(flags) = self.completion.wait(&mut self.regs, irq::RX_DONE)? else {
            return Err(RadioError::ReceiveTimeout);
        };

        if flags & irq::PAYLOAD_CRC_ERROR != 0 {
            self.regs.write_register(Register::IrqFlags, irq::ALL)?;
            self.ensure_mode(Mode::Standby)?;
            warn!("RX payload CRC error, packet discarded");
            return Err(RadioError::PayloadCrcError);
        }

        let len = self.regs.read_register(Register::RxNbBytes)? as usize;
        // The device reports where the packet landed; it need not be the RX base.
        let current = self.regs.read_register(Register::FifoRxCurrentAddr)?;
        self.regs.write_register(Register::FifoAddrPtr, current)?;
        let data = self.regs.read_burst(Register::Fifo, len)?;

        let rssi_raw = self.regs.read_register(Register::PktRssiValue)?;
        let snr_raw = self.regs.read_register(Register::PktSnrValue)?;

        self.regs.write_register(Register::IrqFlags, irq::ALL)?;
        self.ensure_mode(Mode::Standby)?;

        debug!("RX {} bytes", data.len());
        Ok(ReceivedPacket {
            data,
            rssi: RSSI_OFFSET_HF + rssi_raw as i16,
            snr: (snr_raw as i8) / 4,
        })
    }

    /// Return to Standby after a timeout or an interrupted sequence.
    pub fn force_standby(&mut self) -> Result<(), RadioError> {
        self.regs.write_register(Register::IrqFlags, irq::ALL)?;
        self.ensure_mode(Mode::Standby)
    }

    /// Last mode confirmed by the device.
    pub fn mode(&self) -> Option<Mode> {
        self.mode.current()
    }

    pub fn is_in(&self, mode: Mode) -> bool {
        self.mode.is_in(mode)
    }

    /// Completion detection in use.
    pub fn completion(&self) -> CompletionStrategy {
        self.config.completion
    }

    /// Modem configuration as last written.
    pub fn modem_config(&self) -> &ModemConfig {
        self.modem.config()
    }

    /// Decode the modem configuration held by the device.
    pub fn read_modem_config(&mut self) -> Result<ModemConfig, RadioError> {
        self.modem.read_modem_config(&mut self.regs)
    }

    pub fn set_spreading_factor(&mut self, sf: u8) -> Result<SpreadingFactor, RadioError> {
        self.ensure_mode(Mode::Standby)?;
        self.modem.set_spreading_factor(&mut self.regs, sf)
    }

    pub fn set_bandwidth(&mut self, hz: u32) -> Result<Bandwidth, RadioError> {
        self.ensure_mode(Mode::Standby)?;
        self.modem.set_bandwidth(&mut self.regs, hz)
    }

    pub fn set_coding_rate(&mut self, denominator: u8) -> Result<CodingRate, RadioError> {
        self.ensure_mode(Mode::Standby)?;
        self.modem.set_coding_rate(&mut self.regs, denominator)
    }

    pub fn set_crc(&mut self, enabled: bool) -> Result<(), RadioError> {
        self.ensure_mode(Mode::Standby)?;
        self.modem.set_crc(&mut self.regs, enabled)
    }

    pub fn set_preamble_length(&mut self, symbols: u16) -> Result<(), RadioError> {
        self.ensure_mode(Mode::Standby)?;
        self.modem.set_preamble_length(&mut self.regs, symbols)
    }

    pub fn set_frequency(&mut self, freq_hz: u32) -> Result<u32, RadioError> {
        self.ensure_mode(Mode::Standby)?;
        self.modem.set_frequency(&mut self.regs, freq_hz)
    }

    pub fn set_power(&mut self, dbm: i8) -> Result<TxPower, RadioError> {
        self.ensure_mode(Mode::Standby)?;
        self.modem.set_power(&mut self.regs, dbm)
    }

    /// The underlying bus (reset line, test inspection).
    pub fn bus(&self) -> &B {
        self.regs.bus()
    }

    /// Mode transition with bounded retry on read-back mismatch.
    fn ensure_mode(&mut self, target: Mode) -> Result<(), RadioError> {
        let mut attempt = 0;
        loop {
            match self.mode.set_mode(&mut self.regs, target) {
                Err(RadioError::ModeVerificationFailed { actual, .. })
                    if attempt < self.config.mode_retries =>
                {
                    attempt += 1;
                    warn!(
                        "Mode {:?} not confirmed (device reports {:#05b}), retry {}",
                        target, actual, attempt
                    );
                }
                result => return result,
            }
        }
    }

    fn hardware_reset(&mut self) -> Result<(), RadioError> {
        debug!("Resetting radio");
        self.regs.bus_mut().assert_reset()?;
        std::thread::sleep(RESET_PULSE);
        self.regs.bus_mut().release_reset()?;
        std::thread::sleep(RESET_SETTLE);
        Ok(())
    }
}

/// Radio errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// Bus transaction failed. Fatal: the device state is unknown.
    Bus(BusError),
    /// Radio used before [`Radio::init`].
    NotInitialized,
    /// The device did not confirm a requested mode.
    ModeVerificationFailed { expected: Mode, actual: u8 },
    /// Empty or oversized payload, rejected before any bus access.
    InvalidPayload { len: usize, max: usize },
    /// TX done was not observed within the configured bound.
    TransmitTimeout,
    /// RX done was not observed within the configured bound.
    ReceiveTimeout,
    /// A packet arrived with a bad payload CRC and was discarded.
    PayloadCrcError,
}

impl RadioError {
    /// Whether the bus itself failed.
    pub fn is_bus_fault(&self) -> bool {
        matches!(self, Self::Bus(_))
    }

    /// Whether the device may be left outside Standby.
    pub fn needs_standby(&self) -> bool {
        matches!(
            self,
            Self::TransmitTimeout | Self::ReceiveTimeout | Self::ModeVerificationFailed { .. }
        )
    }
}

impl From<BusError> for RadioError {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "bus fault: {}", e),
            Self::NotInitialized => write!(f, "radio not initialized"),
            Self::ModeVerificationFailed { expected, actual } => write!(
                f,
                "mode verification failed: expected {:?}, device reports {:#05b}",
                expected, actual
            ),
            Self::InvalidPayload { len, max } => {
                write!(f, "invalid payload: {} bytes (must be 1..={})", len, max)
            }
            Self::TransmitTimeout => write!(f, "transmit timeout"),
            Self::ReceiveTimeout => write!(f, "receive timeout"),
            Self::PayloadCrcError => write!(f, "payload CRC error"),
        }
    }
}

impl std::error::Error for RadioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bus(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lora::registers::{dio_mapping1, opmode};
    use crate::lora::SimulatedRadio;

    fn poll_config(max_polls: u32) -> RadioConfig {
        RadioConfig {
            completion: CompletionStrategy::Poll {
                max_polls,
                interval: Duration::ZERO,
            },
            hardware_reset: false,
            ..RadioConfig::default()
        }
    }

    fn setup() -> (SimulatedRadio, Radio<SimulatedRadio>) {
        let sim = SimulatedRadio::new();
        let mut radio = Radio::new(sim.clone(), poll_config(10));
        radio.init().unwrap();
        (sim, radio)
    }

    #[test]
    fn test_init_configures_lora_standby() {
        let (sim, radio) = setup();

        let opmode = sim.register(Register::OpMode);
        assert_eq!(opmode::LONG_RANGE_MODE.get(opmode), 1);
        assert_eq!(sim.mode(), Some(Mode::Standby));
        assert!(radio.is_in(Mode::Standby));
        assert_eq!(sim.register(Register::FrfMsb), 0xE4);
        assert_eq!(sim.register(Register::FrfMid), 0xC0);
        assert_eq!(sim.register(Register::FrfLsb), 0x00);
        assert_eq!(sim.register(Register::PaConfig), 0xFF);
        assert_eq!(sim.register(Register::PaDac), 0x87);
        assert_eq!(sim.register(Register::FifoTxBaseAddr), FIFO_TX_BASE_ADDR);
    }

    #[test]
    fn test_init_pulses_reset() {
        let sim = SimulatedRadio::new();
        let mut radio = Radio::new(
            sim.clone(),
            RadioConfig {
                hardware_reset: true,
                ..poll_config(10)
            },
        );
        radio.init().unwrap();
        assert_eq!(sim.reset_count(), 1);
    }

    #[test]
    fn test_transmit_before_init() {
        let sim = SimulatedRadio::new();
        let mut radio = Radio::new(sim, poll_config(10));
        assert_eq!(radio.transmit(&[1]), Err(RadioError::NotInitialized));
    }

    #[test]
    fn test_transmit_writes_fifo_frame() {
        let (sim, mut radio) = setup();
        sim.clear_frames();

        radio.transmit(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        let frames = sim.frames();
        assert!(frames.contains(&vec![0x80, 0xDE, 0xAD, 0xBE, 0xEF]));
        assert!(frames.contains(&vec![0x8D, FIFO_TX_BASE_ADDR]));
        assert!(frames.contains(&vec![0xA2, 4]));
        assert_eq!(sim.sent_packets(), vec![vec![0xDE, 0xAD, 0xBE, 0xEF]]);
        assert_eq!(sim.register(Register::IrqFlags) & irq::TX_DONE, 0);
        assert!(radio.is_in(Mode::Standby));
    }

    #[test]
    fn test_transmit_clears_stale_tx_done_before_starting() {
        let (sim, mut radio) = setup();
        sim.set_register(Register::IrqFlags, irq::TX_DONE);
        sim.set_tx_done_after_polls(Some(3));

        radio.transmit(&[1, 2]).unwrap();

        // The stale flag did not end the wait on the first poll.
        assert_eq!(sim.irq_reads(), 3);
    }

    #[test]
    fn test_transmit_rejects_invalid_payload_without_bus_access() {
        let (sim, mut radio) = setup();
        sim.clear_frames();

        assert_eq!(
            radio.transmit(&[]),
            Err(RadioError::InvalidPayload { len: 0, max: 255 })
        );
        assert_eq!(
            radio.transmit(&[0u8; 256]),
            Err(RadioError::InvalidPayload { len: 256, max: 255 })
        );
        assert!(sim.frames().is_empty());
    }

    #[test]
    fn test_transmit_accepts_full_fifo_payload() {
        let (sim, mut radio) = setup();
        let payload: Vec<u8> = (0..=254).collect();

        radio.transmit(&payload).unwrap();

        assert_eq!(sim.sent_packets(), vec![payload]);
    }

    #[test]
    fn test_transmit_timeout_after_exact_bound() {
        let sim = SimulatedRadio::new();
        let mut radio = Radio::new(sim.clone(), poll_config(25));
        radio.init().unwrap();
        sim.set_tx_done_after_polls(None);

        assert_eq!(radio.transmit(&[1, 2, 3]), Err(RadioError::TransmitTimeout));
        assert_eq!(sim.irq_reads(), 25);
        assert_eq!(sim.mode(), Some(Mode::Transmit));

        radio.force_standby().unwrap();
        assert_eq!(sim.mode(), Some(Mode::Standby));
    }

    #[test]
    fn test_transmit_completes_on_last_allowed_poll() {
        let sim = SimulatedRadio::new();
        let mut radio = Radio::new(sim.clone(), poll_config(5));
        radio.init().unwrap();
        sim.set_tx_done_after_polls(Some(5));

        radio.transmit(&[7]).unwrap();
        assert_eq!(sim.irq_reads(), 5);
    }

    fn interrupt_setup(timeout: Duration) -> (SimulatedRadio, Radio<SimulatedRadio>) {
        let sim = SimulatedRadio::new();
        // Without a DIO0 edge the flag would only appear on a later poll.
        sim.set_tx_done_after_polls(Some(3));
        let mut radio = Radio::new(
            sim.clone(),
            RadioConfig {
                completion: CompletionStrategy::Interrupt { timeout },
                hardware_reset: false,
                ..RadioConfig::default()
            },
        );
        sim.attach_irq(radio.irq_notifier().unwrap());
        radio.init().unwrap();
        (sim, radio)
    }

    fn dio0(sim: &SimulatedRadio) -> u8 {
        dio_mapping1::DIO0.get(sim.register(Register::DioMapping1))
    }

    #[test]
    fn test_transmit_interrupt_driven() {
        let (sim, mut radio) = interrupt_setup(Duration::from_secs(2));
        let reads_before = sim.irq_reads();

        let start = std::time::Instant::now();
        radio.transmit(&[0x42; 16]).unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(sim.irq_reads() - reads_before, 1);
        assert_eq!(sim.sent_packets(), vec![vec![0x42; 16]]);
        assert!(radio.is_in(Mode::Standby));
    }

    #[test]
    fn test_dio0_mapped_per_operation() {
        let (sim, mut radio) = setup();
        sim.clear_frames();

        radio.transmit(&[1, 2, 3]).unwrap();
        assert_eq!(dio0(&sim), dio_mapping1::DIO0_TX_DONE);
        assert!(sim.frames().contains(&vec![0xC0, 0x40]));

        sim.inject_packet(0x00, &[4], false);
        radio.receive().unwrap();
        assert_eq!(dio0(&sim), dio_mapping1::DIO0_RX_DONE);
        assert!(sim.frames().contains(&vec![0xC0, 0x00]));
    }

    #[test]
    fn test_dio0_update_keeps_other_lines() {
        let (sim, mut radio) = setup();
        sim.set_register(Register::DioMapping1, 0x3C);

        radio.transmit(&[1]).unwrap();

        assert_eq!(sim.register(Register::DioMapping1), 0x7C);
    }

    #[test]
    fn test_receive_interrupt_driven() {
        let (sim, mut radio) = interrupt_setup(Duration::from_secs(2));
        // Leaves DIO0 on TxDone; receive has to route it back.
        radio.transmit(&[9]).unwrap();

        let sender = sim.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            sender.inject_packet(0x30, &[0xCA, 0xFE], false);
        });
        let start = std::time::Instant::now();
        let packet = radio.receive().unwrap();
        handle.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(packet.data, vec![0xCA, 0xFE]);
        assert_eq!(sim.register(Register::IrqFlags), 0);
        assert!(radio.is_in(Mode::Standby));
    }

    #[test]
    fn test_receive_interrupt_crc_error() {
        let (sim, mut radio) = interrupt_setup(Duration::from_secs(2));

        let sender = sim.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            sender.inject_packet(0x00, &[1, 2, 3], true);
        });
        let start = std::time::Instant::now();
        let result = radio.receive();
        handle.join().unwrap();

        assert_eq!(result, Err(RadioError::PayloadCrcError));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(radio.is_in(Mode::Standby));
        assert_eq!(sim.register(Register::IrqFlags), 0);
    }

    #[test]
    fn test_receive_interrupt_timeout() {
        let (sim, mut radio) = interrupt_setup(Duration::from_millis(40));

        assert_eq!(radio.receive(), Err(RadioError::ReceiveTimeout));
        assert_eq!(sim.mode(), Some(Mode::ReceiveContinuous));
    }

    #[test]
    fn test_mode_mismatch_retried_then_reported() {
        let (sim, mut radio) = setup();
        sim.force_mode_readback(Some(Mode::Sleep));

        let err = radio.transmit(&[1]).unwrap_err();

        assert_eq!(
            err,
            RadioError::ModeVerificationFailed {
                expected: Mode::Standby,
                actual: 0,
            }
        );
        assert!(sim.sent_packets().is_empty());
    }

    #[test]
    fn test_receive_reads_from_current_rx_address() {
        let (sim, mut radio) = setup();
        sim.inject_packet(0x40, &[0x10, 0x20, 0x30], false);

        let packet = radio.receive().unwrap();

        assert_eq!(packet.data, vec![0x10, 0x20, 0x30]);
        assert_eq!(packet.rssi, -157 + 0x50);
        assert_eq!(packet.snr, 10);
        assert_eq!(sim.register(Register::IrqFlags), 0);
        assert!(radio.is_in(Mode::Standby));
    }

    #[test]
    fn test_receive_negative_snr() {
        let (sim, mut radio) = setup();
        sim.inject_packet_with_signal(0x00, &[1], false, 0x20, 0xF0);

        let packet = radio.receive().unwrap();

        assert_eq!(packet.snr, -4);
    }

    #[test]
    fn test_receive_crc_error_discards_payload() {
        let (sim, mut radio) = setup();
        sim.inject_packet(0x00, &[1, 2, 3], true);

        assert_eq!(radio.receive(), Err(RadioError::PayloadCrcError));
        assert!(radio.is_in(Mode::Standby));
        assert_eq!(sim.register(Register::IrqFlags), 0);
    }

    #[test]
    fn test_receive_timeout() {
        let (sim, mut radio) = setup();

        assert_eq!(radio.receive(), Err(RadioError::ReceiveTimeout));
        assert_eq!(sim.mode(), Some(Mode::ReceiveContinuous));
        assert!(RadioError::ReceiveTimeout.needs_standby());
    }

    #[test]
    fn test_setters_force_standby_first() {
        let (sim, mut radio) = setup();
        sim.set_tx_done_after_polls(None);
        let _ = radio.transmit(&[1]);
        assert_eq!(sim.mode(), Some(Mode::Transmit));

        let sf = radio.set_spreading_factor(14).unwrap();

        assert_eq!(sf.value(), 12);
        assert_eq!(sim.mode(), Some(Mode::Standby));
    }

    #[test]
    fn test_bus_fault_is_fatal() {
        let (sim, mut radio) = setup();
        sim.fail_next_transfer();

        let err = radio.transmit(&[1, 2]).unwrap_err();

        assert!(err.is_bus_fault());
        assert!(err.to_string().contains("injected fault"));
    }

    #[test]
    fn test_end_to_end_suspension_packet() {
        let sim = SimulatedRadio::new();
        let mut config = poll_config(10);
        config.modem = ModemConfig {
            spreading_factor: SpreadingFactor::new(7),
            bandwidth: Bandwidth::Khz500,
            coding_rate: CodingRate::Cr4_5,
            frequency_hz: 915_000_000,
            ..ModemConfig::default()
        };
        let mut radio = Radio::new(sim.clone(), config);
        radio.init().unwrap();
        sim.clear_frames();

        let payload = [0x01, 0x00, 0x34, 0x12, 0x78, 0x56];
        radio.transmit(&payload).unwrap();

        let frames = sim.frames();
        let mut expected_fifo = vec![0x80];
        expected_fifo.extend_from_slice(&payload);
        assert!(frames.contains(&expected_fifo));
        assert_eq!(sim.register(Register::PayloadLength), 6);
        assert_eq!(sim.sent_packets(), vec![payload.to_vec()]);
    }
}
