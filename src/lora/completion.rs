//! Completion detection for transmit and receive sequences.
//!
//! Two strategies sit behind one interface and are chosen by configuration:
//!
//! - [`CompletionStrategy::Poll`] reads the IRQ flags register up to a fixed number
//!   of times. The waiting task stays busy for the whole on-air time, so a
//!   high-priority caller starves lower-priority producers while it polls.
//! - [`CompletionStrategy::Interrupt`] blocks on a channel fed by the DIO0 interrupt
//!   through an [`IrqNotifier`]. The interrupt side only sends a notification; flag
//!   inspection and clearing stay in the waiting task.

use super::bus::{RadioBus, RegisterInterface};
use super::registers::Register;
use super::RadioError;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::{Duration, Instant};

/// How the driver detects that the device raised a completion flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStrategy {
    /// Read the IRQ flags at most `max_polls` times, sleeping `interval` between reads.
    Poll { max_polls: u32, interval: Duration },
    /// Wait for interrupt notifications for at most `timeout`.
    Interrupt { timeout: Duration },
}

impl Default for CompletionStrategy {
    fn default() -> Self {
        Self::Poll {
            max_polls: 1000,
            interval: Duration::from_millis(1),
        }
    }
}

impl CompletionStrategy {
    /// Longest a single wait can block.
    pub fn max_wait(&self) -> Duration {
        match *self {
            Self::Poll {
                max_polls,
                interval,
            } => interval * max_polls.saturating_sub(1),
            Self::Interrupt { timeout } => timeout,
        }
    }
}

/// Sending half of the interrupt channel, handed to the interrupt source.
#[derive(Debug, Clone)]
pub struct IrqNotifier {
    tx: SyncSender<()>,
}

impl IrqNotifier {
    /// Signal that the interrupt line fired. Never blocks; a notification that is
    /// already pending absorbs this one.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Waits for IRQ flags using the configured strategy.
pub struct CompletionWaiter {
    strategy: CompletionStrategy,
    irq: Option<(IrqNotifier, Receiver<()>)>,
}

impl CompletionWaiter {
    pub fn new(strategy: CompletionStrategy) -> Self {
        let irq = match strategy {
            CompletionStrategy::Interrupt { .. } => {
                let (tx, rx) = mpsc::sync_channel(1);
                Some((IrqNotifier { tx }, rx))
            }
            CompletionStrategy::Poll { .. } => None,
        };
        Self { strategy, irq }
    }

    pub fn strategy(&self) -> CompletionStrategy {
        self.strategy
    }

    /// Notifier for the interrupt source; `None` in polling mode.
    pub fn notifier(&self) -> Option<IrqNotifier> {
        self.irq.as_ref().map(|(notifier, _)| notifier.clone())
    }

    /// Discard notifications left over from a previous operation.
    ///
    /// Call before starting the operation whose completion will be awaited.
    pub fn arm(&self) {
        if let Some((_, rx)) = &self.irq {
            while rx.try_recv().is_ok() {}
        }
    }

    /// Wait until any bit of `mask` is set in the IRQ flags register.
    ///
    /// Returns the full flags value, or `None` when the bound expired first.
    pub fn wait<B: RadioBus>(
        &self,
        regs: &mut RegisterInterface<B>,
        mask: u8,
    ) -> Result<Option<u8>, RadioError> {
        match (self.strategy, &self.irq) {
            (CompletionStrategy::Interrupt { timeout }, Some((_, rx))) => {
                Self::wait_interrupt(regs, mask, timeout, rx)
            }
            (CompletionStrategy::Poll { max_polls, interval }, _) => {
                Self::wait_poll(regs, mask, max_polls, interval)
            }
            (CompletionStrategy::Interrupt { .. }, None) => Ok(None),
        }
    }

    fn wait_poll<B: RadioBus>(
        regs: &mut RegisterInterface<B>,
        mask: u8,
        max_polls: u32,
        interval: Duration,
    ) -> Result<Option<u8>, RadioError> {
        for poll in 0..max_polls {
            let flags = regs.read_register(Register::IrqFlags)?;
            if flags & mask != 0 {
                return Ok(Some(flags));
            }
            if !interval.is_zero() && poll + 1 < max_polls {
                std::thread::sleep(interval);
            }
        }
        Ok(None)
    }

    fn wait_interrupt<B: RadioBus>(
        regs: &mut RegisterInterface<B>,
        mask: u8,
        timeout: Duration,
        rx: &Receiver<()>,
    ) -> Result<Option<u8>, RadioError> {
        let deadline = Instant::now() + timeout;
        loop {
            let flags = regs.read_register(Register::IrqFlags)?;
            if flags & mask != 0 {
                return Ok(Some(flags));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match rx.recv_timeout(remaining) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    let flags = regs.read_register(Register::IrqFlags)?;
                    return Ok((flags & mask != 0).then_some(flags));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lora::registers::{dio_mapping1, irq, opmode};
    use crate::lora::{Mode, SimulatedRadio};

    /// Interrupt waiter wired to a simulated DIO0 line that raises TX-done late when
    /// nothing pulses the line.
    fn wired(
        timeout: Duration,
    ) -> (SimulatedRadio, RegisterInterface<SimulatedRadio>, CompletionWaiter) {
        let sim = SimulatedRadio::new();
        sim.set_tx_done_after_polls(Some(2));
        let waiter = CompletionWaiter::new(CompletionStrategy::Interrupt { timeout });
        sim.attach_irq(waiter.notifier().unwrap());
        (sim.clone(), RegisterInterface::new(sim), waiter)
    }

    fn enter_transmit(regs: &mut RegisterInterface<SimulatedRadio>) {
        regs.update_field(opmode::MODE, Mode::Transmit.bits()).unwrap();
    }

    #[test]
    fn test_poll_stops_at_bound() {
        let sim = SimulatedRadio::new();
        let mut regs = RegisterInterface::new(sim.clone());
        let waiter = CompletionWaiter::new(CompletionStrategy::Poll {
            max_polls: 7,
            interval: Duration::ZERO,
        });

        assert_eq!(waiter.wait(&mut regs, irq::TX_DONE).unwrap(), None);
        assert_eq!(sim.irq_reads(), 7);
    }

    #[test]
    fn test_poll_returns_flags_when_set() {
        let sim = SimulatedRadio::new();
        sim.set_register(Register::IrqFlags, irq::RX_DONE | irq::PAYLOAD_CRC_ERROR);
        let mut regs = RegisterInterface::new(sim.clone());
        let waiter = CompletionWaiter::new(CompletionStrategy::default());

        let flags = waiter.wait(&mut regs, irq::RX_DONE).unwrap();

        assert_eq!(flags, Some(irq::RX_DONE | irq::PAYLOAD_CRC_ERROR));
        assert_eq!(sim.irq_reads(), 1);
    }

    #[test]
    fn test_polling_has_no_notifier() {
        let waiter = CompletionWaiter::new(CompletionStrategy::default());
        assert!(waiter.notifier().is_none());
    }

    #[test]
    fn test_interrupt_wakes_on_notification() {
        let sim = SimulatedRadio::new();
        let mut regs = RegisterInterface::new(sim.clone());
        let waiter = CompletionWaiter::new(CompletionStrategy::Interrupt {
            timeout: Duration::from_secs(5),
        });
        let notifier = waiter.notifier().unwrap();

        let raiser = sim.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            raiser.set_register(Register::IrqFlags, irq::TX_DONE);
            notifier.notify();
        });

        let flags = waiter.wait(&mut regs, irq::TX_DONE).unwrap();
        handle.join().unwrap();

        assert_eq!(flags, Some(irq::TX_DONE));
    }

    #[test]
    fn test_interrupt_tx_done_routed_to_dio0() {
        let (sim, mut regs, waiter) = wired(Duration::from_secs(2));
        regs.update_field(dio_mapping1::DIO0, dio_mapping1::DIO0_TX_DONE).unwrap();
        waiter.arm();

        let start = Instant::now();
        enter_transmit(&mut regs);
        let flags = waiter.wait(&mut regs, irq::TX_DONE).unwrap();

        assert_eq!(flags.map(|f| f & irq::TX_DONE), Some(irq::TX_DONE));
        assert_eq!(sim.irq_reads(), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_interrupt_without_tx_done_routing_runs_to_bound() {
        let (_sim, mut regs, waiter) = wired(Duration::from_millis(80));
        // DIO0 left on its reset mapping, RxDone.
        waiter.arm();

        let start = Instant::now();
        enter_transmit(&mut regs);
        let flags = waiter.wait(&mut regs, irq::TX_DONE).unwrap();

        // Only the final flag read after the timeout sees the packet sent.
        assert_eq!(flags.map(|f| f & irq::TX_DONE), Some(irq::TX_DONE));
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn test_max_wait() {
        let poll = CompletionStrategy::Poll {
            max_polls: 5,
            interval: Duration::from_millis(2),
        };
        assert_eq!(poll.max_wait(), Duration::from_millis(8));
        let irq = CompletionStrategy::Interrupt {
            timeout: Duration::from_millis(300),
        };
        assert_eq!(irq.max_wait(), Duration::from_millis(300));
    }

    #[test]
    fn test_interrupt_times_out() {
        let sim = SimulatedRadio::new();
        let mut regs = RegisterInterface::new(sim);
        let waiter = CompletionWaiter::new(CompletionStrategy::Interrupt {
            timeout: Duration::from_millis(30),
        });

        let start = Instant::now();
        assert_eq!(waiter.wait(&mut regs, irq::RX_DONE).unwrap(), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_arm_discards_stale_notification() {
        let sim = SimulatedRadio::new();
        let mut regs = RegisterInterface::new(sim);
        let waiter = CompletionWaiter::new(CompletionStrategy::Interrupt {
            timeout: Duration::from_millis(20),
        });
        waiter.notifier().unwrap().notify();

        waiter.arm();

        // Without a fresh notification or flag the wait runs to its bound.
        assert_eq!(waiter.wait(&mut regs, irq::TX_DONE).unwrap(), None);
    }
}
