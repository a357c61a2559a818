//! Acquisition and calibration core for the aero instrument
//!
//! Reads a differential pressure transducer and an ambient environment sensor
//! over a shared I2C bus, compensates the raw counts, derives air density and
//! aggregates everything into one [`acquisition::Sample`] per cycle.
//!
//! The crate is `#![no_std]` with `alloc` and talks to hardware only through
//! `embedded-hal-async` traits, so the same code runs on the target and on a
//! desktop host (simulator and tests).
//!
//! Everything runs in one cooperative context. Calibration and conversions
//! await their delays in place; a platform that serves requests from another
//! task shares the state through [`acquisition::SharedAcquisition`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod acquisition;
pub mod bus;
pub mod calibration;
pub mod config;
pub mod density;
pub mod report;
pub mod sensors;
pub mod shared_bus;
pub mod time;

#[cfg(test)]
mod test_support;
