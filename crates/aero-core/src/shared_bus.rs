//! One async I2C bus, several drivers
//!
//! The differential pressure transducer and the environment sensor sit on the
//! same two wires. Each driver gets a [`SharedI2cDevice`]; a transaction holds
//! the bus mutex only for its own duration, so a conversion wait in one driver
//! never blocks the other.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::i2c::{ErrorType, I2c, Operation};

pub type SharedBus<T> = Mutex<CriticalSectionRawMutex, T>;

/// Handle to a [`SharedBus`] for one driver.
///
/// Every I2C call locks the bus, runs its whole transaction and unlocks again.
/// Nothing stays locked between calls, so another device may talk in between
/// a driver's conversion start and its result read.
pub struct SharedI2cDevice<'a, T> {
    bus: &'a SharedBus<T>,
}

impl<'a, T> SharedI2cDevice<'a, T> {
    #[inline]
    pub const fn new(bus: &'a SharedBus<T>) -> Self {
        Self { bus }
    }
}

impl<T> Clone for SharedI2cDevice<'_, T> {
    fn clone(&self) -> Self {
        Self { bus: self.bus }
    }
}

impl<T: ErrorType> ErrorType for SharedI2cDevice<'_, T> {
    type Error = T::Error;
}

impl<T: I2c> I2c for SharedI2cDevice<'_, T> {
    #[inline]
    async fn read(&mut self, address: u8, read: &mut [u8]) -> Result<(), Self::Error> {
        self.bus.lock().await.read(address, read).await
    }

    #[inline]
    async fn write(&mut self, address: u8, write: &[u8]) -> Result<(), Self::Error> {
        self.bus.lock().await.write(address, write).await
    }

    #[inline]
    async fn write_read(
        &mut self,
        address: u8,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.bus.lock().await.write_read(address, write, read).await
    }

    #[inline]
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.bus.lock().await.transaction(address, operations).await
    }
}
