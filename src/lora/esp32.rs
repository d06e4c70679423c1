//! ESP-IDF bus backend for the RFM95W.
//!
//! Chip select is a plain GPIO driven by [`RadioBus::select`]/[`RadioBus::deselect`] so
//! an address byte and its data can span several SPI transfers inside one frame.
//! DIO0 (TxDone/RxDone) is forwarded to the driver's completion channel by a small
//! thread; the ISR itself only signals a task notification.

use super::bus::{BusError, RadioBus};
use super::completion::IrqNotifier;
use esp_idf_hal::delay::BLOCK;
use esp_idf_hal::gpio::{AnyInputPin, AnyOutputPin, InterruptType, Output, PinDriver};
use esp_idf_hal::spi::config::{Config as SpiConfig, DriverConfig};
use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriver, SPI2};
use esp_idf_hal::task::notification::Notification;
use esp_idf_hal::units::FromValueType;
use log::{error, info};
use std::num::NonZeroU32;
use std::thread::JoinHandle;

/// Pins wired to the RFM95W module.
pub struct EspRadioPins {
    pub sclk: AnyOutputPin,
    pub mosi: AnyOutputPin,
    pub miso: AnyInputPin,
    pub cs: AnyOutputPin,
    pub reset: AnyOutputPin,
}

/// SPI + GPIO transport for the transceiver.
pub struct EspRadioBus {
    spi: SpiDeviceDriver<'static, SpiDriver<'static>>,
    cs: PinDriver<'static, AnyOutputPin, Output>,
    reset: PinDriver<'static, AnyOutputPin, Output>,
}

fn transfer_err(e: esp_idf_sys::EspError) -> BusError {
    BusError::Transfer(format!("{:?}", e))
}

fn gpio_err(e: esp_idf_sys::EspError) -> BusError {
    BusError::Gpio(format!("{:?}", e))
}

impl EspRadioBus {
    /// Configure SPI2 (mode 0, 1 MHz) and the select/reset lines, both idle high.
    pub fn new(spi: SPI2, pins: EspRadioPins) -> Result<Self, BusError> {
        let driver = SpiDriver::new(
            spi,
            pins.sclk,
            pins.mosi,
            Some(pins.miso),
            &DriverConfig::new(),
        )
        .map_err(transfer_err)?;

        let config = SpiConfig::new().baudrate(1.MHz().into());
        let spi = SpiDeviceDriver::new(driver, Option::<AnyOutputPin>::None, &config)
            .map_err(transfer_err)?;

        let mut cs = PinDriver::output(pins.cs).map_err(gpio_err)?;
        cs.set_high().map_err(gpio_err)?;
        let mut reset = PinDriver::output(pins.reset).map_err(gpio_err)?;
        reset.set_high().map_err(gpio_err)?;

        info!("RFM95W SPI bus ready");
        Ok(Self { spi, cs, reset })
    }
}

impl RadioBus for EspRadioBus {
    fn select(&mut self) -> Result<(), BusError> {
        self.cs.set_low().map_err(gpio_err)
    }

    fn deselect(&mut self) -> Result<(), BusError> {
        self.cs.set_high().map_err(gpio_err)
    }

    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        self.spi.write(bytes).map_err(transfer_err)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        self.spi.read(buf).map_err(transfer_err)
    }

    fn assert_reset(&mut self) -> Result<(), BusError> {
        self.reset.set_low().map_err(gpio_err)
    }

    fn release_reset(&mut self) -> Result<(), BusError> {
        self.reset.set_high().map_err(gpio_err)
    }
}

/// Forward DIO0 rising edges to `irq` from a dedicated thread.
///
/// The interrupt is one-shot in ESP-IDF, so the thread re-arms it after every edge.
pub fn spawn_dio0_forwarder(
    dio0: AnyInputPin,
    irq: IrqNotifier,
) -> Result<JoinHandle<()>, BusError> {
    let mut pin = PinDriver::input(dio0).map_err(gpio_err)?;
    pin.set_interrupt_type(InterruptType::PosEdge)
        .map_err(gpio_err)?;

    std::thread::Builder::new()
        .name("dio0".into())
        .stack_size(4096)
        .spawn(move || {
            let notification = Notification::new();
            let notifier = notification.notifier();

            // SAFETY: the callback only signals a task notification.
            let subscribed = unsafe {
                pin.subscribe(move || {
                    notifier.notify_and_yield(NonZeroU32::MIN);
                })
            };
            if let Err(e) = subscribed {
                error!("DIO0 subscribe failed: {:?}", e);
                return;
            }

            loop {
                if let Err(e) = pin.enable_interrupt() {
                    error!("DIO0 enable failed: {:?}", e);
                    return;
                }
                if notification.wait(BLOCK).is_some() {
                    irq.notify();
                }
            }
        })
        .map_err(|e| BusError::Gpio(e.to_string()))
}
