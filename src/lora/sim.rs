//! Simulated transceiver for host testing.
//!
//! [`SimulatedRadio`] implements [`RadioBus`] on top of an in-memory register file and
//! FIFO that follow the real device's bus behaviour closely enough to run the full
//! driver and scheduler without hardware:
//!
//! - address byte framing with the write bit, address auto-increment in bursts
//! - FIFO pointer auto-increment when addressed at the FIFO register
//! - clear-by-write-1 IRQ flags
//! - TX completion after a programmable number of IRQ-flag polls (or never)
//! - injected RX packets delivered on entry to receive-continuous mode
//! - a DIO0 line that only fires for the event selected in the DIO mapping register
//!
//! Clones share state, so a test keeps one handle for inspection while the driver owns
//! another.

use super::bus::{BusError, RadioBus};
use super::completion::IrqNotifier;
use super::mode::Mode;
use super::registers::{
    dio_mapping1, irq, opmode, Register, ADDRESS_MASK, FIFO_SIZE, WRITE_BIT,
};
use std::sync::{Arc, Mutex, MutexGuard};

const REGISTER_COUNT: usize = 0x80;

/// In-memory model of the transceiver reachable through [`RadioBus`].
#[derive(Clone)]
pub struct SimulatedRadio {
    state: Arc<Mutex<SimState>>,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    addr: u8,
    write: bool,
}

#[derive(Debug, Clone)]
struct PendingRx {
    addr: u8,
    data: Vec<u8>,
    crc_error: bool,
    rssi_raw: u8,
    snr_raw: u8,
}

struct SimState {
    regs: [u8; REGISTER_COUNT],
    fifo: [u8; FIFO_SIZE],
    selected: bool,
    cursor: Option<Cursor>,
    frame: Vec<u8>,
    frames: Vec<Vec<u8>>,
    overlapping_selects: usize,
    irq_reads: usize,
    tx_done_after_polls: Option<u32>,
    pending_tx: Option<u32>,
    sent: Vec<Vec<u8>>,
    forced_mode: Option<Mode>,
    pending_rx: Option<PendingRx>,
    notifier: Option<IrqNotifier>,
    fail_next: bool,
    resets: usize,
}

impl SimState {
    fn new() -> Self {
        let mut regs = [0u8; REGISTER_COUNT];
        // Power-on defaults of the registers the driver reads back.
        regs[Register::OpMode.addr() as usize] = 0x09;
        regs[Register::FrfMsb.addr() as usize] = 0x6C;
        regs[Register::FrfMid.addr() as usize] = 0x80;
        regs[Register::PaConfig.addr() as usize] = 0x4F;
        regs[Register::Lna.addr() as usize] = 0x20;
        regs[Register::FifoTxBaseAddr.addr() as usize] = 0x80;
        regs[Register::ModemConfig1.addr() as usize] = 0x72;
        regs[Register::ModemConfig2.addr() as usize] = 0x70;
        regs[Register::PreambleLsb.addr() as usize] = 0x08;
        regs[Register::PayloadLength.addr() as usize] = 0x01;
        regs[Register::ModemConfig3.addr() as usize] = 0x04;
        regs[Register::Version.addr() as usize] = 0x12;
        regs[Register::PaDac.addr() as usize] = 0x84;

        Self {
            regs,
            fifo: [0u8; FIFO_SIZE],
            selected: false,
            cursor: None,
            frame: Vec::new(),
            frames: Vec::new(),
            overlapping_selects: 0,
            irq_reads: 0,
            tx_done_after_polls: Some(1),
            pending_tx: None,
            sent: Vec::new(),
            forced_mode: None,
            pending_rx: None,
            notifier: None,
            fail_next: false,
            resets: 0,
        }
    }

    fn reg(&self, reg: Register) -> u8 {
        self.regs[reg.addr() as usize]
    }

    fn reg_mut(&mut self, reg: Register) -> &mut u8 {
        &mut self.regs[reg.addr() as usize]
    }

    fn write_byte(&mut self, addr: u8, value: u8) {
        match addr {
            a if a == Register::Fifo.addr() => {
                let ptr = self.reg(Register::FifoAddrPtr);
                self.fifo[ptr as usize] = value;
                *self.reg_mut(Register::FifoAddrPtr) = ptr.wrapping_add(1);
            }
            a if a == Register::IrqFlags.addr() => {
                *self.reg_mut(Register::IrqFlags) &= !value;
            }
            a if a == Register::OpMode.addr() => {
                let previous = opmode::MODE.get(self.reg(Register::OpMode));
                *self.reg_mut(Register::OpMode) = value;
                let mode = opmode::MODE.get(value);
                if mode != previous {
                    self.on_mode_change(mode);
                }
            }
            a => self.regs[a as usize] = value,
        }
    }

    fn read_byte(&mut self, addr: u8) -> u8 {
        match addr {
            a if a == Register::Fifo.addr() => {
                let ptr = self.reg(Register::FifoAddrPtr);
                *self.reg_mut(Register::FifoAddrPtr) = ptr.wrapping_add(1);
                self.fifo[ptr as usize]
            }
            a if a == Register::IrqFlags.addr() => {
                self.irq_reads += 1;
                if let Some(remaining) = self.pending_tx {
                    if remaining <= 1 {
                        self.pending_tx = None;
                        self.raise(irq::TX_DONE);
                    } else {
                        self.pending_tx = Some(remaining - 1);
                    }
                }
                self.reg(Register::IrqFlags)
            }
            a if a == Register::OpMode.addr() => {
                let value = self.reg(Register::OpMode);
                match self.forced_mode {
                    Some(mode) => opmode::MODE.set(value, mode.bits()),
                    None => value,
                }
            }
            a => self.regs[a as usize],
        }
    }

    fn advance(&mut self) {
        if let Some(cursor) = self.cursor.as_mut() {
            if cursor.addr != Register::Fifo.addr() {
                cursor.addr = (cursor.addr + 1) & ADDRESS_MASK;
            }
        }
    }

    fn on_mode_change(&mut self, mode: u8) {
        if mode == Mode::Transmit.bits() {
            let base = self.reg(Register::FifoTxBaseAddr) as usize;
            let len = self.reg(Register::PayloadLength) as usize;
            let packet = (0..len).map(|i| self.fifo[(base + i) % FIFO_SIZE]).collect();
            self.sent.push(packet);

            // With the line wired and routed to TxDone the edge arrives as soon as the
            // packet is out; otherwise the flag only shows up to a later poll.
            let edge = self.notifier.is_some() && self.dio0_event() == irq::TX_DONE;
            match (self.tx_done_after_polls, edge) {
                (None, _) => {}
                (Some(_), true) | (Some(0), false) => self.raise(irq::TX_DONE),
                (Some(polls), false) => self.pending_tx = Some(polls),
            }
        } else if mode == Mode::ReceiveContinuous.bits() {
            self.deliver_rx();
        }
    }

    fn deliver_rx(&mut self) {
        let Some(rx) = self.pending_rx.take() else {
            return;
        };
        for (i, byte) in rx.data.iter().enumerate() {
            self.fifo[(rx.addr as usize + i) % FIFO_SIZE] = *byte;
        }
        *self.reg_mut(Register::RxNbBytes) = rx.data.len() as u8;
        *self.reg_mut(Register::FifoRxCurrentAddr) = rx.addr;
        *self.reg_mut(Register::PktRssiValue) = rx.rssi_raw;
        *self.reg_mut(Register::PktSnrValue) = rx.snr_raw;
        let mut flags = irq::RX_DONE | irq::VALID_HEADER;
        if rx.crc_error {
            flags |= irq::PAYLOAD_CRC_ERROR;
        }
        self.raise(flags);
    }

    /// IRQ flag currently routed to DIO0.
    fn dio0_event(&self) -> u8 {
        match dio_mapping1::DIO0.get(self.reg(Register::DioMapping1)) {
            dio_mapping1::DIO0_RX_DONE => irq::RX_DONE,
            dio_mapping1::DIO0_TX_DONE => irq::TX_DONE,
            dio_mapping1::DIO0_CAD_DONE => irq::CAD_DONE,
            _ => 0,
        }
    }

    /// Set IRQ flags and pulse DIO0 if one of them is routed to it.
    fn raise(&mut self, flags: u8) {
        *self.reg_mut(Register::IrqFlags) |= flags;
        if flags & self.dio0_event() != 0 {
            if let Some(notifier) = &self.notifier {
                notifier.notify();
            }
        }
    }

    fn take_failure(&mut self) -> Result<(), BusError> {
        if self.fail_next {
            self.fail_next = false;
            return Err(BusError::Transfer("injected fault".to_string()));
        }
        Ok(())
    }
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRadio {
    /// Create a simulated transceiver with power-on register defaults.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new())),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current raw register value, bypassing read side effects.
    pub fn register(&self, reg: Register) -> u8 {
        self.state().reg(reg)
    }

    /// Overwrite a register, bypassing write side effects.
    pub fn set_register(&self, reg: Register, value: u8) {
        *self.state().reg_mut(reg) = value;
    }

    /// Current device mode as stored in the opmode register.
    pub fn mode(&self) -> Option<Mode> {
        Mode::from_bits(opmode::MODE.get(self.register(Register::OpMode)))
    }

    /// Every completed chip-select frame (bytes clocked out), oldest first.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state().frames.clone()
    }

    pub fn clear_frames(&self) {
        self.state().frames.clear();
    }

    pub fn fifo_slice(&self, start: u8, len: usize) -> Vec<u8> {
        let state = self.state();
        (0..len)
            .map(|i| state.fifo[(start as usize + i) % FIFO_SIZE])
            .collect()
    }

    pub fn load_fifo(&self, start: u8, bytes: &[u8]) {
        let mut state = self.state();
        for (i, byte) in bytes.iter().enumerate() {
            state.fifo[(start as usize + i) % FIFO_SIZE] = *byte;
        }
    }

    /// Packets captured from the FIFO each time the device entered transmit mode.
    pub fn sent_packets(&self) -> Vec<Vec<u8>> {
        self.state().sent.clone()
    }

    /// Raise TX-done on the given IRQ-flag poll after entering transmit mode
    /// (`Some(0)` raises it immediately, `None` never raises it).
    pub fn set_tx_done_after_polls(&self, polls: Option<u32>) {
        self.state().tx_done_after_polls = polls;
    }

    /// Make opmode reads report `mode` regardless of what was written.
    pub fn force_mode_readback(&self, mode: Option<Mode>) {
        self.state().forced_mode = mode;
    }

    /// Number of IRQ-flag register reads so far.
    pub fn irq_reads(&self) -> usize {
        self.state().irq_reads
    }

    /// Queue a packet to be delivered at `addr` the next time the device enters
    /// receive-continuous mode (immediately if it already is).
    pub fn inject_packet(&self, addr: u8, data: &[u8], crc_error: bool) {
        self.inject_packet_with_signal(addr, data, crc_error, 0x50, 0x28);
    }

    /// As [`inject_packet`](Self::inject_packet) with explicit raw RSSI/SNR register values.
    pub fn inject_packet_with_signal(
        &self,
        addr: u8,
        data: &[u8],
        crc_error: bool,
        rssi_raw: u8,
        snr_raw: u8,
    ) {
        let mut state = self.state();
        state.pending_rx = Some(PendingRx {
            addr,
            data: data.to_vec(),
            crc_error,
            rssi_raw,
            snr_raw,
        });
        if opmode::MODE.get(state.reg(Register::OpMode)) == Mode::ReceiveContinuous.bits() {
            state.deliver_rx();
        }
    }

    /// Wire the DIO0 line to the driver's interrupt channel. Only the event selected
    /// in the DIO mapping register pulses it.
    pub fn attach_irq(&self, notifier: IrqNotifier) {
        self.state().notifier = Some(notifier);
    }

    /// Make the next transfer fail with a bus fault.
    pub fn fail_next_transfer(&self) {
        self.state().fail_next = true;
    }

    pub fn is_selected(&self) -> bool {
        self.state().selected
    }

    /// Times a select was asserted while another frame was still open.
    pub fn overlapping_selects(&self) -> usize {
        self.state().overlapping_selects
    }

    pub fn reset_count(&self) -> usize {
        self.state().resets
    }
}

impl RadioBus for SimulatedRadio {
    fn select(&mut self) -> Result<(), BusError> {
        let mut state = self.state();
        if state.selected {
            state.overlapping_selects += 1;
        }
        state.selected = true;
        state.cursor = None;
        state.frame.clear();
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), BusError> {
        let mut state = self.state();
        state.selected = false;
        state.cursor = None;
        let frame = std::mem::take(&mut state.frame);
        if !frame.is_empty() {
            state.frames.push(frame);
        }
        Ok(())
    }

    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        let mut state = self.state();
        if !state.selected {
            return Err(BusError::Transfer("transmit without select".to_string()));
        }
        state.take_failure()?;
        state.frame.extend_from_slice(bytes);
        for &byte in bytes {
            match state.cursor {
                None => {
                    state.cursor = Some(Cursor {
                        addr: byte & ADDRESS_MASK,
                        write: byte & WRITE_BIT != 0,
                    })
                }
                Some(Cursor { addr, write: true }) => {
                    state.write_byte(addr, byte);
                    state.advance();
                }
                Some(Cursor { write: false, .. }) => {
                    return Err(BusError::Transfer("data byte in read frame".to_string()));
                }
            }
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        let mut state = self.state();
        if !state.selected {
            return Err(BusError::Transfer("receive without select".to_string()));
        }
        state.take_failure()?;
        if !matches!(state.cursor, Some(Cursor { write: false, .. })) {
            return Err(BusError::Transfer("receive without read address".to_string()));
        }
        for slot in buf.iter_mut() {
            let Some(cursor) = state.cursor else { break };
            *slot = state.read_byte(cursor.addr);
            state.advance();
        }
        Ok(())
    }

    fn assert_reset(&mut self) -> Result<(), BusError> {
        self.state().resets += 1;
        Ok(())
    }

    fn release_reset(&mut self) -> Result<(), BusError> {
        let mut state = self.state();
        let resets = state.resets;
        let notifier = state.notifier.take();
        let tx_done_after_polls = state.tx_done_after_polls;
        let forced_mode = state.forced_mode;
        let frames = std::mem::take(&mut state.frames);
        let sent = std::mem::take(&mut state.sent);
        *state = SimState::new();
        state.resets = resets;
        state.notifier = notifier;
        state.tx_done_after_polls = tx_done_after_polls;
        state.forced_mode = forced_mode;
        state.frames = frames;
        state.sent = sent;
        Ok(())
    }
}
