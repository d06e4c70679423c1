//! Synthetic telemetry producers.
//!
//! Stand-ins for the vehicle-bus, GPS, ADC and temperature subsystems so the full
//! pipeline runs on a host. Each producer owns one sub-record and writes it at its own
//! rate, like the real ones.

use crate::telemetry::{BrakesAccel, Engine, Position, Suspension, Temperature, TelemetrySnapshot};
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Writes one sub-record for time `t` seconds.
type Produce = fn(&TelemetrySnapshot, f64);

fn wave(t: f64, period: f64) -> f64 {
    (t * TAU / period).sin()
}

pub fn suspension(t: f64) -> Suspension {
    Suspension {
        front_pot: (2048.0 + 900.0 * wave(t, 0.4)) as u16,
        rear_pot: (2048.0 + 700.0 * wave(t, 0.55)) as u16,
    }
}

pub fn position(t: f64) -> Position {
    Position {
        latitude: 483_583_000 + (1_000.0 * wave(t, 60.0)) as i32,
        longitude: 109_013_000 + (1_000.0 * wave(t, 45.0)) as i32,
    }
}

pub fn engine(t: f64) -> Engine {
    let rpm = 6_000.0 + 4_000.0 * wave(t, 8.0);
    Engine {
        rpm: rpm as u16,
        tps: (500.0 + 500.0 * wave(t, 8.0)) as u16,
        fuel_open_time: (rpm / 2.0) as u16,
        ignition_angle: (200.0 + 100.0 * wave(t, 8.0)) as i16,
        lambda: 100,
        speed: (600.0 + 400.0 * wave(t, 20.0)) as u16,
        oil_pressure: (300.0 + rpm / 40.0) as u16,
    }
}

pub fn brakes_accel(t: f64) -> BrakesAccel {
    BrakesAccel {
        front_brake_temp: (350.0 + 150.0 * wave(t, 20.0)) as u16,
        rear_brake_temp: (250.0 + 100.0 * wave(t, 20.0)) as u16,
        accel_x: (800.0 * wave(t, 5.0)) as i16,
        accel_y: (1200.0 * wave(t, 7.0)) as i16,
        accel_z: 1000,
    }
}

pub fn temperature(t: f64) -> Temperature {
    Temperature {
        air_temp: 215,
        coolant_temp: (880.0 + 20.0 * wave(t, 120.0)) as i16,
    }
}

/// Start one producer task per sub-record.
pub fn spawn_simulated(
    snapshot: Arc<TelemetrySnapshot>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let producers: [(u64, Produce); 5] = [
        (10, |s, t| s.suspension.store(suspension(t))),
        (100, |s, t| s.position.store(position(t))),
        (20, |s, t| s.engine.store(engine(t))),
        (10, |s, t| s.brakes_accel.store(brakes_accel(t))),
        (500, |s, t| s.temperature.store(temperature(t))),
    ];
    let start = tokio::time::Instant::now();

    producers
        .into_iter()
        .map(|(rate_ms, produce)| {
            let snapshot = snapshot.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = interval(Duration::from_millis(rate_ms));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    produce(&snapshot, start.elapsed().as_secs_f64());
                }
            })
        })
        .collect()
}
