//! Zero-offset calibration of the differential pressure channel
//!
//! With both ports open to ambient the transducer should read zero. The mean
//! reading over a short window becomes the baseline subtracted from every
//! later sample.
//!
//! Calibration occupies the calling task for the whole window. Nothing else
//! touching the bus or the acquisition state runs meanwhile, and there is no
//! way to cancel it early.

use embedded_hal_async::delay::DelayNs;
use log::{info, warn};
use serde::Serialize;
use thiserror_no_std::Error;

use crate::config::ZeroSettings;
use crate::sensors::{CompensatedReading, Sensor};
use crate::time::Clock;

/// Baseline differential pressure in pascals.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ZeroOffset(f32);

impl ZeroOffset {
    /// Restore a baseline captured by an earlier calibration (e.g. from settings).
    pub const fn restore(pa: f32) -> Self {
        Self(pa)
    }

    pub const fn pa(self) -> f32 {
        self.0
    }

    /// Differential pressure with the baseline removed.
    #[inline]
    pub fn correct(self, pressure_pa: f32) -> f32 {
        pressure_pa - self.0
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("only {obtained} valid samples, need at least {required}")]
    InsufficientSamples { obtained: u32, required: u32 },
}

/// Outcome of a calibration, as handed to the reporting layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationReport {
    pub ok: bool,
    /// The zero offset in force after the attempt.
    #[serde(rename = "dp_zero")]
    pub zero_pa: f32,
    #[serde(rename = "samples")]
    pub sample_count: u32,
}

/// Mean of the valid readings collected during one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZeroMeasurement {
    pub mean_pa: f32,
    pub sample_count: u32,
}

pub struct ZeroCalibrator<C, D> {
    clock: C,
    delay: D,
    settings: ZeroSettings,
}

impl<C: Clock, D: DelayNs> ZeroCalibrator<C, D> {
    pub fn new(clock: C, delay: D, settings: ZeroSettings) -> Self {
        Self {
            clock,
            delay,
            settings,
        }
    }

    pub const fn settings(&self) -> &ZeroSettings {
        &self.settings
    }

    /// Calibrate over the configured window and cadence.
    pub async fn calibrate<S>(&mut self, source: &mut S, zero: &mut ZeroOffset) -> CalibrationReport
    where
        S: Sensor<Readings = CompensatedReading>,
    {
        let ZeroSettings {
            duration_ms,
            sample_period_ms,
            ..
        } = self.settings;
        self.calibrate_for(source, zero, duration_ms, sample_period_ms)
            .await
    }

    /// Sample `source` every `sample_period_ms` for `duration_ms` and, if
    /// enough readings succeeded, replace `zero` with their mean.
    pub async fn calibrate_for<S>(
        &mut self,
        source: &mut S,
        zero: &mut ZeroOffset,
        duration_ms: u32,
        sample_period_ms: u32,
    ) -> CalibrationReport
    where
        S: Sensor<Readings = CompensatedReading>,
    {
        match self.measure(source, duration_ms, sample_period_ms).await {
            Ok(measurement) => {
                *zero = ZeroOffset(measurement.mean_pa);
                info!(
                    "Zero calibrated: {:.4} Pa from {} samples",
                    measurement.mean_pa, measurement.sample_count
                );
                CalibrationReport {
                    ok: true,
                    zero_pa: measurement.mean_pa,
                    sample_count: measurement.sample_count,
                }
            }
            Err(e) => {
                warn!("Zero calibration failed: {}", e);
                let CalibrationError::InsufficientSamples { obtained, .. } = e;
                CalibrationReport {
                    ok: false,
                    zero_pa: zero.pa(),
                    sample_count: obtained,
                }
            }
        }
    }

    /// Collect the mean reading over a window without touching any offset.
    pub async fn measure<S>(
        &mut self,
        source: &mut S,
        duration_ms: u32,
        sample_period_ms: u32,
    ) -> Result<ZeroMeasurement, CalibrationError>
    where
        S: Sensor<Readings = CompensatedReading>,
    {
        let started = self.clock.now_ms();
        let mut sum = 0.0_f64;
        let mut count = 0_u32;

        while self.clock.now_ms().saturating_sub(started) < u64::from(duration_ms) {
            if let Ok(reading) = source.read().await {
                sum += f64::from(reading.pressure_pa);
                count += 1;
            }
            self.delay.delay_ms(sample_period_ms).await;
        }

        let required = self.required_samples();
        if count == 0 || count < required {
            return Err(CalibrationError::InsufficientSamples {
                obtained: count,
                required,
            });
        }

        Ok(ZeroMeasurement {
            mean_pa: (sum / f64::from(count)) as f32,
            sample_count: count,
        })
    }

    fn required_samples(&self) -> u32 {
        u32::from(self.settings.required_samples())
    }
}
