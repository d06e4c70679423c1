//! Bus arbitration and the multi-rate sender schedule.
//!
//! All radio access goes through one [`BusArbiter`], a blocking mutex around the
//! packet engine. Each telemetry channel gets a sender task that wakes on an absolute
//! schedule, takes the bus lock, copies its own sub-record, transmits it and releases
//! the lock. The lock is held for one build-and-transmit cycle only. An optional
//! listener opens a receive window on its own period, also under the lock, and feeds
//! the receive counters.
//!
//! Radio work blocks (bus transfers, completion wait), so it runs on the tokio
//! blocking pool. Tokio has no task priorities: the fast senders do not preempt the
//! slow ones, they only contend fairly for the bus lock. With the polling completion
//! strategy the sender holding the lock keeps a blocking thread busy for the whole
//! on-air time.

use crate::config::ScheduleSettings;
use crate::lora::{
    calculate_airtime_us, ModemConfig, Radio, RadioBus, RadioError, ReceivedPacket,
};
use crate::stats::LinkStats;
use crate::telemetry::{Channel, TelemetrySnapshot};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Exclusive access to the single physical radio.
pub struct BusArbiter<B> {
    radio: Arc<Mutex<Radio<B>>>,
}

impl<B> Clone for BusArbiter<B> {
    fn clone(&self) -> Self {
        Self {
            radio: self.radio.clone(),
        }
    }
}

impl<B: RadioBus> BusArbiter<B> {
    pub fn new(radio: Radio<B>) -> Self {
        Self {
            radio: Arc::new(Mutex::new(radio)),
        }
    }

    /// Blocking acquire. A sender that panicked mid-sequence poisons the lock; the
    /// radio is recovered into Standby before the next user sees it.
    fn lock(&self) -> MutexGuard<'_, Radio<B>> {
        match self.radio.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Radio lock poisoned, recovering");
                self.radio.clear_poison();
                let mut guard = poisoned.into_inner();
                if let Err(e) = guard.force_standby() {
                    error!("Standby after poisoned lock failed: {}", e);
                }
                guard
            }
        }
    }

    /// Run `f` with exclusive radio access.
    pub fn with_radio<R>(&self, f: impl FnOnce(&mut Radio<B>) -> R) -> R {
        f(&mut self.lock())
    }

    /// Transmit `payload` under the bus lock.
    pub fn transmit(&self, payload: &[u8]) -> Result<(), RadioError> {
        let mut radio = self.lock();
        let result = radio.transmit(payload);
        Self::recover(&mut radio, result)
    }

    /// Build the payload and transmit it inside one lock hold.
    ///
    /// Returns the number of bytes sent.
    pub fn transmit_with(&self, build: impl FnOnce() -> Vec<u8>) -> Result<usize, RadioError> {
        let mut radio = self.lock();
        let payload = build();
        let result = radio.transmit(&payload).map(|()| payload.len());
        Self::recover(&mut radio, result)
    }

    /// Receive one packet under the bus lock.
    pub fn receive(&self) -> Result<ReceivedPacket, RadioError> {
        let mut radio = self.lock();
        let result = radio.receive();
        Self::recover(&mut radio, result)
    }

    /// Leave the radio in Standby after a timeout so the next holder starts clean.
    fn recover<T>(radio: &mut Radio<B>, result: Result<T, RadioError>) -> Result<T, RadioError> {
        if let Err(e) = &result {
            if e.needs_standby() {
                if let Err(standby) = radio.force_standby() {
                    error!("Forcing standby after {} failed: {}", e, standby);
                }
            }
        }
        result
    }
}

/// Advance an absolute deadline by one period.
///
/// When `now` is already past the following deadline the missed wakes are skipped
/// and counted; the phase of the schedule is kept.
pub fn next_deadline<I>(deadline: I, now: I, period: Duration) -> (I, u32)
where
    I: Copy + Ord + std::ops::Add<Duration, Output = I> + std::ops::Sub<I, Output = Duration>,
{
    let next = deadline + period;
    if next > now || period.is_zero() {
        return (next, 0);
    }
    let behind = now - next;
    let missed = (behind.as_nanos() / period.as_nanos()) as u32 + 1;
    (next + period * missed, missed)
}

/// Periodic senders sharing one radio.
pub struct Scheduler<B> {
    arbiter: BusArbiter<B>,
    snapshot: Arc<TelemetrySnapshot>,
    stats: Arc<LinkStats>,
    schedule: ScheduleSettings,
}

impl<B: RadioBus + 'static> Scheduler<B> {
    pub fn new(
        arbiter: BusArbiter<B>,
        snapshot: Arc<TelemetrySnapshot>,
        stats: Arc<LinkStats>,
        schedule: ScheduleSettings,
    ) -> Self {
        Self {
            arbiter,
            snapshot,
            stats,
            schedule,
        }
    }

    /// Channels whose packet airtime exceeds their period under `modem`.
    pub fn airtime_overruns(&self, modem: &ModemConfig) -> Vec<(Channel, u64)> {
        Channel::ALL
            .into_iter()
            .filter_map(|channel| {
                let airtime_us = calculate_airtime_us(self.snapshot.packet_len(channel), modem);
                let period_us = self.schedule.period(channel).as_micros() as u64;
                (airtime_us > period_us).then_some((channel, airtime_us))
            })
            .collect()
    }

    /// Start one task per channel, plus the receive listener when enabled. Tasks stop
    /// at the next wake after `cancel` fires.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let (modem, window) = self
            .arbiter
            .with_radio(|radio| (*radio.modem_config(), radio.completion().max_wait()));
        for (channel, airtime_us) in self.airtime_overruns(&modem) {
            warn!(
                "{} packet airtime {} us exceeds its {} ms period",
                channel.name(),
                airtime_us,
                self.schedule.period_ms(channel)
            );
        }

        let mut jobs: Vec<(Job, Duration)> = Channel::ALL
            .into_iter()
            .map(|channel| (Job::Send(channel), self.schedule.period(channel)))
            .collect();
        if let Some(period) = self.schedule.listen_period() {
            let fastest = jobs.iter().map(|(_, p)| *p).min().unwrap_or(period);
            if window > fastest {
                warn!(
                    "Receive window of up to {} ms holds the bus longer than the {} ms send period",
                    window.as_millis(),
                    fastest.as_millis()
                );
            }
            jobs.push((Job::Listen, period));
        }

        jobs.into_iter()
            .map(|(job, period)| {
                let task = Periodic {
                    job,
                    period,
                    arbiter: self.arbiter.clone(),
                    snapshot: self.snapshot.clone(),
                    stats: self.stats.clone(),
                };
                info!("Starting {} every {} ms", job.name(), period.as_millis());
                tokio::spawn(task.run(cancel.clone()))
            })
            .collect()
    }
}

/// What a periodic task does when it wakes.
#[derive(Debug, Clone, Copy)]
enum Job {
    Send(Channel),
    Listen,
}

impl Job {
    fn name(self) -> &'static str {
        match self {
            Self::Send(channel) => channel.name(),
            Self::Listen => "listener",
        }
    }
}

struct Periodic<B> {
    job: Job,
    period: Duration,
    arbiter: BusArbiter<B>,
    snapshot: Arc<TelemetrySnapshot>,
    stats: Arc<LinkStats>,
}

impl<B: RadioBus + 'static> Periodic<B> {
    async fn run(self, cancel: CancellationToken) {
        let mut deadline = Instant::now() + self.period;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep_until(deadline) => {}
            }

            match self.job {
                Job::Send(channel) => self.send_once(channel).await,
                Job::Listen => self.listen_once().await,
            }

            let (next, missed) = next_deadline(deadline, Instant::now(), self.period);
            if missed > 0 {
                debug!("{} missed {} wake(s)", self.job.name(), missed);
                if let Job::Send(channel) = self.job {
                    for _ in 0..missed {
                        self.stats.channel(channel).record_late();
                    }
                }
            }
            deadline = next;
        }
        debug!("{} stopped", self.job.name());
    }

    async fn send_once(&self, channel: Channel) {
        let arbiter = self.arbiter.clone();
        let snapshot = self.snapshot.clone();
        let result = tokio::task::spawn_blocking(move || {
            arbiter.transmit_with(|| snapshot.packet(channel))
        })
        .await;

        let stats = self.stats.channel(channel);
        match result {
            Ok(Ok(len)) => {
                debug!("{} sent {} bytes", channel.name(), len);
                stats.record_sent();
            }
            Ok(Err(e)) if e.is_bus_fault() => {
                error!("{} transmit: {}", channel.name(), e);
                stats.record_failed();
            }
            Ok(Err(e)) => {
                warn!("{} transmit skipped: {}", channel.name(), e);
                stats.record_failed();
            }
            Err(e) => {
                error!("{} sender task failed: {}", channel.name(), e);
                stats.record_failed();
            }
        }
    }

    /// One receive window under the bus lock.
    async fn listen_once(&self) {
        let arbiter = self.arbiter.clone();
        let result = tokio::task::spawn_blocking(move || arbiter.receive()).await;

        let stats = &self.stats.receive;
        match result {
            Ok(Ok(packet)) => {
                debug!(
                    "Received {} bytes, RSSI {} dBm, SNR {} dB",
                    packet.data.len(),
                    packet.rssi,
                    packet.snr
                );
                stats.record_packet(packet.rssi, packet.snr);
            }
            Ok(Err(RadioError::ReceiveTimeout)) => stats.record_timeout(),
            Ok(Err(RadioError::PayloadCrcError)) => stats.record_crc_error(),
            Ok(Err(e)) if e.is_bus_fault() => error!("receive: {}", e),
            Ok(Err(e)) => warn!("receive skipped: {}", e),
            Err(e) => error!("listener task failed: {}", e),
        }
    }
}
