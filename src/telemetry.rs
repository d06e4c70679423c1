//! Shared telemetry snapshot.
//!
//! The snapshot holds one sub-record per sender. Each sub-record sits behind its own
//! lock: a producer replaces or updates it in one critical section and the sender
//! copies it out in one, so a packet never mixes fields from two updates. The radio
//! bus lock is unrelated and never taken here.
//!
//! # Wire format
//!
//! Every packet is the channel's packet ID as a little-endian `u16` followed by the
//! record's fields in declaration order, each little-endian:
//!
//! ```text
//! suspension {front_pot: 0x1234, rear_pot: 0x5678}  ->  01 00 34 12 78 56
//! ```

use std::sync::{Mutex, MutexGuard};

/// The five telemetry streams, one per sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Suspension,
    Position,
    Engine,
    BrakesAccel,
    Temperature,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Suspension,
        Channel::Position,
        Channel::Engine,
        Channel::BrakesAccel,
        Channel::Temperature,
    ];

    /// Stable packet ID sent as the first field of every packet.
    pub const fn packet_id(self) -> u16 {
        match self {
            Self::Suspension => 1,
            Self::Position => 2,
            Self::Engine => 3,
            Self::BrakesAccel => 4,
            Self::Temperature => 5,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Suspension => "suspension",
            Self::Position => "position",
            Self::Engine => "engine",
            Self::BrakesAccel => "brakes_accel",
            Self::Temperature => "temperature",
        }
    }

    /// Index into per-channel tables.
    pub const fn index(self) -> usize {
        self.packet_id() as usize - 1
    }
}

/// A telemetry sub-record that can be serialized into a packet body.
pub trait Record: Copy + Default + Send {
    const CHANNEL: Channel;

    /// Append the record's fields to `out`.
    fn encode_fields(&self, out: &mut Vec<u8>);

    /// Complete packet: packet ID followed by the fields.
    fn packet(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        out.extend_from_slice(&Self::CHANNEL.packet_id().to_le_bytes());
        self.encode_fields(&mut out);
        out
    }
}

/// Suspension potentiometers (raw ADC counts).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Suspension {
    pub front_pot: u16,
    pub rear_pot: u16,
}

impl Record for Suspension {
    const CHANNEL: Channel = Channel::Suspension;

    fn encode_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.front_pot.to_le_bytes());
        out.extend_from_slice(&self.rear_pot.to_le_bytes());
    }
}

/// GPS fix in 1e-7 degree units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub latitude: i32,
    pub longitude: i32,
}

impl Record for Position {
    const CHANNEL: Channel = Channel::Position;

    fn encode_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.latitude.to_le_bytes());
        out.extend_from_slice(&self.longitude.to_le_bytes());
    }
}

/// Engine control unit data as decoded from the vehicle bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Engine {
    pub rpm: u16,
    /// Throttle position, percent x10.
    pub tps: u16,
    /// Injector open time, microseconds.
    pub fuel_open_time: u16,
    /// Ignition advance, degrees x10.
    pub ignition_angle: i16,
    /// Air/fuel ratio x100.
    pub lambda: u16,
    /// Vehicle speed, km/h x10.
    pub speed: u16,
    /// Oil pressure, kPa.
    pub oil_pressure: u16,
}

impl Record for Engine {
    const CHANNEL: Channel = Channel::Engine;

    fn encode_fields(&self, out: &mut Vec<u8>) {
        for field in [
            self.rpm,
            self.tps,
            self.fuel_open_time,
            self.ignition_angle as u16,
            self.lambda,
            self.speed,
            self.oil_pressure,
        ] {
            out.extend_from_slice(&field.to_le_bytes());
        }
    }
}

/// Brake disc temperatures and three-axis acceleration (milli-g).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrakesAccel {
    pub front_brake_temp: u16,
    pub rear_brake_temp: u16,
    pub accel_x: i16,
    pub accel_y: i16,
    pub accel_z: i16,
}

impl Record for BrakesAccel {
    const CHANNEL: Channel = Channel::BrakesAccel;

    fn encode_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.front_brake_temp.to_le_bytes());
        out.extend_from_slice(&self.rear_brake_temp.to_le_bytes());
        out.extend_from_slice(&self.accel_x.to_le_bytes());
        out.extend_from_slice(&self.accel_y.to_le_bytes());
        out.extend_from_slice(&self.accel_z.to_le_bytes());
    }
}

/// Temperatures in 0.1 degC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Temperature {
    pub air_temp: i16,
    pub coolant_temp: i16,
}

impl Record for Temperature {
    const CHANNEL: Channel = Channel::Temperature;

    fn encode_fields(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.air_temp.to_le_bytes());
        out.extend_from_slice(&self.coolant_temp.to_le_bytes());
    }
}

/// A sub-record behind its own lock.
#[derive(Debug, Default)]
pub struct SharedRecord<T> {
    inner: Mutex<T>,
}

impl<T: Record> SharedRecord<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        // A panicking producer cannot leave a Copy record half-written.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replace the whole record.
    pub fn store(&self, value: T) {
        *self.lock() = value;
    }

    /// Modify several fields in one critical section.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.lock());
    }

    /// Consistent copy of the record.
    pub fn load(&self) -> T {
        *self.lock()
    }

    /// Encoded packet for the current value.
    pub fn packet(&self) -> Vec<u8> {
        self.load().packet()
    }
}

/// Process-wide telemetry state, created once at startup and shared by `Arc`.
#[derive(Debug, Default)]
pub struct TelemetrySnapshot {
    pub suspension: SharedRecord<Suspension>,
    pub position: SharedRecord<Position>,
    pub engine: SharedRecord<Engine>,
    pub brakes_accel: SharedRecord<BrakesAccel>,
    pub temperature: SharedRecord<Temperature>,
}

impl TelemetrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoded packet for `channel`, copied under that record's lock only.
    pub fn packet(&self, channel: Channel) -> Vec<u8> {
        match channel {
            Channel::Suspension => self.suspension.packet(),
            Channel::Position => self.position.packet(),
            Channel::Engine => self.engine.packet(),
            Channel::BrakesAccel => self.brakes_accel.packet(),
            Channel::Temperature => self.temperature.packet(),
        }
    }

    /// Packet length for `channel`, fixed per record type.
    pub fn packet_len(&self, channel: Channel) -> usize {
        self.packet(channel).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_suspension_packet_layout() {
        let record = Suspension {
            front_pot: 0x1234,
            rear_pot: 0x5678,
        };
        assert_eq!(record.packet(), vec![0x01, 0x00, 0x34, 0x12, 0x78, 0x56]);
    }

    #[test]
    fn test_packet_ids_are_stable() {
        let ids: Vec<u16> = Channel::ALL.iter().map(|c| c.packet_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        for (i, channel) in Channel::ALL.iter().enumerate() {
            assert_eq!(channel.index(), i);
        }
    }

    #[test]
    fn test_packet_lengths() {
        let snapshot = TelemetrySnapshot::new();
        assert_eq!(snapshot.packet_len(Channel::Suspension), 6);
        assert_eq!(snapshot.packet_len(Channel::Position), 10);
        assert_eq!(snapshot.packet_len(Channel::Engine), 16);
        assert_eq!(snapshot.packet_len(Channel::BrakesAccel), 12);
        assert_eq!(snapshot.packet_len(Channel::Temperature), 6);
    }

    #[test]
    fn test_negative_fields_little_endian() {
        let record = BrakesAccel {
            accel_z: -1000,
            ..BrakesAccel::default()
        };
        let packet = record.packet();
        assert_eq!(&packet[10..12], &(-1000i16).to_le_bytes());
    }

    #[test]
    fn test_update_is_atomic_per_record() {
        let snapshot = Arc::new(TelemetrySnapshot::new());
        let writer = {
            let snapshot = snapshot.clone();
            std::thread::spawn(move || {
                for i in 0..5_000u16 {
                    snapshot.suspension.update(|s| {
                        s.front_pot = i;
                        s.rear_pot = i;
                    });
                }
            })
        };

        for _ in 0..5_000 {
            let copy = snapshot.suspension.load();
            assert_eq!(copy.front_pot, copy.rear_pot, "torn read");
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_snapshot_packet_reflects_store() {
        let snapshot = TelemetrySnapshot::new();
        snapshot.temperature.store(Temperature {
            air_temp: 215,
            coolant_temp: 880,
        });

        let packet = snapshot.packet(Channel::Temperature);

        assert_eq!(packet, vec![0x05, 0x00, 0xD7, 0x00, 0x70, 0x03]);
    }
}
