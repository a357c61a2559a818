//! Address-bound bus transactions
//!
//! [`BusTransport`] is the only place that touches the two-wire bus for a
//! device. It performs exactly one transaction per call and reports failure
//! as a [`BusFault`]; retrying is the caller's decision.

use embedded_hal::i2c::{Error as _, ErrorKind};
use embedded_hal_async::i2c::I2c;
use thiserror_no_std::Error;

/// Why a single bus transaction failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusFault {
    #[error("device did not acknowledge")]
    NoAcknowledge,
    #[error("bus error (misplaced start/stop)")]
    Bus,
    #[error("arbitration lost")]
    ArbitrationLoss,
    #[error("receive overrun")]
    Overrun,
    /// Anything else the HAL reports, including its transaction timeout.
    #[error("bus transaction failed or timed out")]
    Other,
}

impl From<ErrorKind> for BusFault {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NoAcknowledge(_) => Self::NoAcknowledge,
            ErrorKind::Bus => Self::Bus,
            ErrorKind::ArbitrationLoss => Self::ArbitrationLoss,
            ErrorKind::Overrun => Self::Overrun,
            _ => Self::Other,
        }
    }
}

/// A device at a fixed 7-bit address on an async I2C bus.
pub struct BusTransport<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> BusTransport<I> {
    #[inline]
    pub const fn new(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    #[inline]
    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Send a single opcode byte followed by a stop condition.
    pub async fn write(&mut self, opcode: u8) -> Result<(), BusFault> {
        self.i2c
            .write(self.address, &[opcode])
            .await
            .map_err(|e| BusFault::from(e.kind()))
    }

    /// Send `opcode`, then read `buf.len()` bytes after a repeated start.
    pub async fn request(&mut self, opcode: u8, buf: &mut [u8]) -> Result<(), BusFault> {
        self.i2c
            .write_read(self.address, &[opcode], buf)
            .await
            .map_err(|e| BusFault::from(e.kind()))
    }

    /// Give the underlying bus handle back.
    pub fn release(self) -> I {
        self.i2c
    }
}
