mod environment;
mod ms5525;

use crate::bus::BusFault;
use thiserror_no_std::Error;

pub use environment::*;
pub use ms5525::*;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor} startup failed during {stage}: {fault}")]
    StartupFailed {
        sensor: &'static str,
        stage: &'static str,
        fault: BusFault,
    },
    #[error("{sensor} failed to {operation}: {fault}")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        fault: BusFault,
    },
    #[error("{sensor} was not detected on the bus")]
    NotPresent { sensor: &'static str },
    #[error("{sensor} returned a non-finite value")]
    InvalidReading { sensor: &'static str },
    #[error("{sensor} calibration model is out of range")]
    InvalidModel { sensor: &'static str },
}

/// A sensor that produces typed readings.
///
/// A failed read never mutates state the caller can observe; what to do with
/// the previous value is up to the caller.
pub trait Sensor {
    /// The type of readings this sensor produces.
    type Readings;

    /// Read the sensor and return typed readings.
    fn read(&mut self) -> impl Future<Output = Result<Self::Readings, SensorError>>;
}
