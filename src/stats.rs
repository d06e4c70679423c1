//! Link statistics and the HTTP stats server.
//!
//! Provides a simple `/stats` endpoint that returns link statistics as JSON.
//! Uses `tiny_http` which works on both host and ESP32 (via std::net).
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 3600,
//!   "channels": {
//!     "suspension": { "sent": 180000, "failed": 2, "late": 0 },
//!     "temperature": { "sent": 3600, "failed": 0, "late": 0 }
//!   },
//!   "receive": { "packets": 12, "crc_errors": 1, "timeouts": 3, "last_rssi": -77, "last_snr": 9 }
//! }
//! ```

use crate::telemetry::Channel;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tiny_http::{Header, Method, Response, Server};

/// Default port for the stats server.
pub const DEFAULT_STATS_PORT: u16 = 8080;

/// Counters for one sender.
#[derive(Debug, Default)]
pub struct ChannelStats {
    /// Packets transmitted successfully.
    pub sent: AtomicUsize,
    /// Periods skipped because the transmit failed.
    pub failed: AtomicUsize,
    /// Wakes that started after the following period had already begun.
    pub late: AtomicUsize,
}

impl ChannelStats {
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late(&self) {
        self.late.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self) -> ChannelReport {
        ChannelReport {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            late: self.late.load(Ordering::Relaxed),
        }
    }
}

/// Receive-side counters.
#[derive(Debug, Default)]
pub struct ReceiveStats {
    pub packets: AtomicUsize,
    pub crc_errors: AtomicUsize,
    pub timeouts: AtomicUsize,
    pub last_rssi: AtomicI32,
    pub last_snr: AtomicI32,
}

impl ReceiveStats {
    pub fn record_packet(&self, rssi: i16, snr: i8) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.last_rssi.store(rssi as i32, Ordering::Relaxed);
        self.last_snr.store(snr as i32, Ordering::Relaxed);
    }

    pub fn record_crc_error(&self) {
        self.crc_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self) -> ReceiveReport {
        ReceiveReport {
            packets: self.packets.load(Ordering::Relaxed),
            crc_errors: self.crc_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            last_rssi: self.last_rssi.load(Ordering::Relaxed),
            last_snr: self.last_snr.load(Ordering::Relaxed),
        }
    }
}

/// Link statistics container.
///
/// Shared across the scheduler and the stats server. All fields are atomic, so
/// updates never contend with the radio bus lock.
#[derive(Debug)]
pub struct LinkStats {
    start_time: Instant,
    channels: [ChannelStats; 5],
    pub receive: ReceiveStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelReport {
    pub sent: usize,
    pub failed: usize,
    pub late: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiveReport {
    pub packets: usize,
    pub crc_errors: usize,
    pub timeouts: usize,
    pub last_rssi: i32,
    pub last_snr: i32,
}

/// Point-in-time view of [`LinkStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    pub uptime_secs: u64,
    pub channels: BTreeMap<&'static str, ChannelReport>,
    pub receive: ReceiveReport,
}

impl LinkStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            channels: Default::default(),
            receive: ReceiveStats::default(),
        }
    }

    /// Counters for one sender.
    pub fn channel(&self, channel: Channel) -> &ChannelStats {
        &self.channels[channel.index()]
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn report(&self) -> StatsReport {
        StatsReport {
            uptime_secs: self.uptime_secs(),
            channels: Channel::ALL
                .iter()
                .map(|c| (c.name(), self.channel(*c).report()))
                .collect(),
            receive: self.receive.report(),
        }
    }

    /// Serialize all statistics to JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.report()).unwrap_or_else(|e| {
            warn!("Failed to serialize stats: {}", e);
            "{}".to_string()
        })
    }
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP stats server.
///
/// Runs in a background thread and serves link statistics as JSON.
pub struct StatsServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl StatsServer {
    /// Start the stats server on `bind_addr:port` (`None` binds 0.0.0.0).
    ///
    /// Drop the returned handle to stop the server.
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        stats: Arc<LinkStats>,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;

        info!("Stats server listening on http://{}/stats", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::spawn(move || {
            Self::run_server(server, stats, shutdown_clone);
        });

        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    fn run_server(server: Server, stats: Arc<LinkStats>, shutdown: Arc<AtomicBool>) {
        let content_type = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
            .expect("static header");
        let allow_get = Header::from_bytes(&b"Allow"[..], &b"GET"[..]).expect("static header");

        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("Stats server shutting down");
                break;
            }

            match server.recv_timeout(Duration::from_millis(100)) {
                Ok(Some(request)) => {
                    if request.method() != &Method::Get {
                        let response = Response::from_string("Method Not Allowed")
                            .with_status_code(405)
                            .with_header(allow_get.clone());
                        let _ = request.respond(response);
                        continue;
                    }

                    let response = match request.url() {
                        "/stats" | "/stats/" => Response::from_string(stats.to_json())
                            .with_header(content_type.clone())
                            .with_status_code(200),
                        _ => Response::from_string("Not Found").with_status_code(404),
                    };

                    if let Err(e) = request.respond(response) {
                        warn!("Failed to send response: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Server error: {}", e);
                    break;
                }
            }
        }
    }

    /// Stop the server. May take up to 100ms due to the polling interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}
