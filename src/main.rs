//! Telemetry radio firmware binary.
//!
//! With the `esp32` feature this drives the RFM95W over SPI2. Without it, the same
//! pipeline runs on the host against a simulated transceiver with synthetic producers
//! and serves link statistics at http://localhost:8080/stats.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- telemetry.json
//! RUST_LOG=debug cargo run
//! ```

#[cfg(feature = "esp32")]
fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("=== Telemetry radio starting ===");

    if let Err(e) = esp32::run() {
        log::error!("Fatal: {}", e);
    }
}

#[cfg(feature = "esp32")]
mod esp32 {
    use esp_idf_hal::peripherals::Peripherals;
    use log::info;
    use std::sync::Arc;
    use telemetry_radio::lora::{spawn_dio0_forwarder, EspRadioBus, EspRadioPins};
    use telemetry_radio::{
        BusArbiter, LinkStats, Radio, Scheduler, TelemetryConfig, TelemetrySnapshot,
    };
    use tokio_util::sync::CancellationToken;

    pub fn run() -> Result<(), Box<dyn std::error::Error>> {
        let peripherals = Peripherals::take()?;
        let config = TelemetryConfig::default();

        let pins = EspRadioPins {
            sclk: peripherals.pins.gpio12.downgrade_output(),
            mosi: peripherals.pins.gpio11.downgrade_output(),
            miso: peripherals.pins.gpio13.downgrade_input(),
            cs: peripherals.pins.gpio10.downgrade_output(),
            reset: peripherals.pins.gpio5.downgrade_output(),
        };
        let bus = EspRadioBus::new(peripherals.spi2, pins)?;

        let mut radio = Radio::new(bus, config.radio_config());
        let _dio0 = match radio.irq_notifier() {
            Some(notifier) => Some(spawn_dio0_forwarder(
                peripherals.pins.gpio4.downgrade_input(),
                notifier,
            )?),
            None => None,
        };
        radio.init()?;

        // Producers write these records from their own subsystems.
        let snapshot = Arc::new(TelemetrySnapshot::new());
        let stats = Arc::new(LinkStats::new());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        runtime.block_on(async move {
            let cancel = CancellationToken::new();
            let handles = Scheduler::new(
                BusArbiter::new(radio),
                snapshot,
                stats,
                config.schedule.clone(),
            )
            .spawn(cancel);
            info!("{} senders running", handles.len());
            for handle in handles {
                let _ = handle.await;
            }
        });
        Ok(())
    }
}

#[cfg(not(feature = "esp32"))]
#[tokio::main]
async fn main() {
    use log::{error, info, warn};
    use std::sync::Arc;
    use telemetry_radio::{
        producers, BusArbiter, LinkStats, Radio, Scheduler, SimulatedRadio, StatsServer,
        TelemetryConfig, TelemetrySnapshot,
    };
    use tokio_util::sync::CancellationToken;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== Telemetry radio (host simulation) starting ===");

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "telemetry.json".to_string());
    let config = match TelemetryConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let sim = SimulatedRadio::new();
    // Simulated air: a packet is on air for a few IRQ polls.
    sim.set_tx_done_after_polls(Some(3));
    let mut radio = Radio::new(sim.clone(), config.radio_config());
    if let Some(notifier) = radio.irq_notifier() {
        sim.attach_irq(notifier);
    }
    if let Err(e) = radio.init() {
        error!("Radio initialization failed: {}", e);
        std::process::exit(1);
    }

    let snapshot = Arc::new(TelemetrySnapshot::new());
    let stats = Arc::new(LinkStats::new());

    // Keep server alive - variable intentionally unused except for Drop
    let _stats_server = match StatsServer::start(None, config.stats_port, stats.clone()) {
        Ok(server) => Some(server),
        Err(e) => {
            warn!("Failed to start stats server: {}", e);
            warn!("Continuing without stats server");
            None
        }
    };

    let cancel = CancellationToken::new();
    let mut handles = producers::spawn_simulated(snapshot.clone(), cancel.clone());
    handles.extend(
        Scheduler::new(
            BusArbiter::new(radio),
            snapshot,
            stats.clone(),
            config.schedule.clone(),
        )
        .spawn(cancel.clone()),
    );

    info!("Running (Ctrl+C to exit)...");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Signal handler failed: {}", e);
    }

    info!("Shutting down");
    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    info!("Final stats: {}", stats.to_json());
}
