//! Ambient pressure / temperature / humidity sensor seam
//!
//! The concrete environment driver lives with the platform. The core only needs
//! [`EnvironmentSensor`] and a way to find out what is fitted.

use embedded_hal_async::i2c::I2c;
use log::{info, warn};
use serde::Serialize;

use super::{Sensor, SensorError};
use crate::bus::BusTransport;

const CHIP_ID_REGISTER: u8 = 0xD0;
const CHIP_ID_BME280: u8 = 0x60;
const CHIP_IDS_BMP280: [u8; 3] = [0x56, 0x57, 0x58];

/// Ambient conditions reported by the environment sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnvironmentReading {
    pub pressure_pa: f32,
    pub temperature_c: f32,
    /// Only meaningful when `has_humidity` is set.
    pub relative_humidity_pct: f32,
    pub has_humidity: bool,
}

impl EnvironmentReading {
    pub const fn dry(pressure_pa: f32, temperature_c: f32) -> Self {
        Self {
            pressure_pa,
            temperature_c,
            relative_humidity_pct: 0.0,
            has_humidity: false,
        }
    }

    pub const fn humid(pressure_pa: f32, temperature_c: f32, relative_humidity_pct: f32) -> Self {
        Self {
            pressure_pa,
            temperature_c,
            relative_humidity_pct,
            has_humidity: true,
        }
    }

    /// Reject readings a driver produced from a failed measurement.
    ///
    /// Non-finite pressure or temperature fails the read; non-finite humidity
    /// only drops the humidity channel.
    pub fn validated(self, sensor: &'static str) -> Result<Self, SensorError> {
        if !self.pressure_pa.is_finite() || !self.temperature_c.is_finite() {
            return Err(SensorError::InvalidReading { sensor });
        }

        if self.has_humidity && !self.relative_humidity_pct.is_finite() {
            return Ok(Self::dry(self.pressure_pa, self.temperature_c));
        }

        Ok(self)
    }
}

/// External environment driver as seen by the acquisition loop.
pub trait EnvironmentSensor: Sensor<Readings = EnvironmentReading> {
    /// Detect and configure the device. Returns whether one was found.
    fn begin(&mut self) -> impl Future<Output = bool>;

    fn available(&self) -> bool;
}

/// What the environment probe found on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentPresence {
    NotPresent,
    PresentWithHumidity { address: u8 },
    PresentWithoutHumidity { address: u8 },
}

impl EnvironmentPresence {
    pub const fn address(self) -> Option<u8> {
        match self {
            Self::NotPresent => None,
            Self::PresentWithHumidity { address } | Self::PresentWithoutHumidity { address } => {
                Some(address)
            }
        }
    }

    pub const fn has_humidity(self) -> bool {
        matches!(self, Self::PresentWithHumidity { .. })
    }
}

/// Look for a BME280/BMP280-class sensor at each address in turn.
///
/// The first address answering with a known chip id wins. Returns the bus
/// handle so the platform can hand it to the matching driver.
pub async fn probe_environment<I: I2c>(i2c: I, addresses: &[u8]) -> (EnvironmentPresence, I) {
    let mut i2c = i2c;

    for &address in addresses {
        let mut bus = BusTransport::new(i2c, address);
        let mut id = [0u8; 1];
        let result = bus.request(CHIP_ID_REGISTER, &mut id).await;
        i2c = bus.release();

        match result {
            Ok(()) if id[0] == CHIP_ID_BME280 => {
                info!("Environment sensor with humidity at 0x{:02X}", address);
                return (EnvironmentPresence::PresentWithHumidity { address }, i2c);
            }
            Ok(()) if CHIP_IDS_BMP280.contains(&id[0]) => {
                info!("Environment sensor without humidity at 0x{:02X}", address);
                return (EnvironmentPresence::PresentWithoutHumidity { address }, i2c);
            }
            Ok(()) => warn!("Unknown chip id 0x{:02X} at 0x{:02X}", id[0], address),
            Err(_) => {}
        }
    }

    warn!("No environment sensor found");
    (EnvironmentPresence::NotPresent, i2c)
}
