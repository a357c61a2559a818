//! Sample aggregation
//!
//! [`Acquisition`] owns the device state that used to be scattered around the
//! firmware: the zero offset, the last environment reading and the last good
//! [`Sample`]. Each [`Acquisition::tick`] reads both sensors and publishes a new
//! sample built from whatever was fresh, keeping the previous values for any
//! source that failed.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::delay::DelayNs;
use log::{debug, error};
use serde::Serialize;
use thiserror_no_std::Error;

use crate::calibration::{CalibrationReport, ZeroCalibrator, ZeroOffset};
use crate::config::{AcquisitionSettings, DensitySource, STANDARD_AIR_DENSITY};
use crate::density::compute_density;
use crate::sensors::{CompensatedReading, EnvironmentReading, EnvironmentSensor, Sensor};
use crate::time::Clock;

/// One aggregated row, as logged and reported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Monotonic device time of the acquisition.
    pub t_ms: u64,
    /// Differential pressure with the zero offset removed.
    pub dp_pa: f32,
    /// Temperature of the differential pressure transducer.
    pub temp_p_c: f32,
    pub temp_env_c: f32,
    /// Ambient absolute pressure.
    pub abs_p_pa: f32,
    /// 0 when the environment sensor has no humidity channel.
    pub rh_pct: f32,
    pub rho_kgm3: f32,
}

impl Sample {
    fn is_finite(&self) -> bool {
        [
            self.dp_pa,
            self.temp_p_c,
            self.temp_env_c,
            self.abs_p_pa,
            self.rh_pct,
            self.rho_kgm3,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            t_ms: 0,
            dp_pa: 0.0,
            temp_p_c: 0.0,
            temp_env_c: 0.0,
            abs_p_pa: 0.0,
            rh_pct: 0.0,
            rho_kgm3: STANDARD_AIR_DENSITY,
        }
    }
}

/// Which sources contributed fresh data to a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub pressure_fresh: bool,
    pub environment_fresh: bool,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("neither sensor produced a reading")]
    NoFreshData,
    #[error("computed sample contained a non-finite value")]
    NonFinite,
}

/// Acquisition state behind a mutex, for platforms that serve requests from
/// another task than the one sampling.
pub type SharedAcquisition<P, E, C> = Mutex<CriticalSectionRawMutex, Acquisition<P, E, C>>;

pub struct Acquisition<P, E, C> {
    pressure: P,
    environment: E,
    clock: C,
    settings: AcquisitionSettings,
    zero: ZeroOffset,
    environment_reading: Option<EnvironmentReading>,
    sample: Sample,
}

impl<P, E, C> Acquisition<P, E, C>
where
    P: Sensor<Readings = CompensatedReading>,
    E: EnvironmentSensor,
    C: Clock,
{
    pub fn new(
        pressure: P,
        environment: E,
        clock: C,
        settings: AcquisitionSettings,
        zero: ZeroOffset,
    ) -> Self {
        Self {
            pressure,
            environment,
            clock,
            settings,
            zero,
            environment_reading: None,
            sample: Sample::default(),
        }
    }

    /// Bring up the environment sensor. The pressure driver starts on first read.
    pub async fn begin(&mut self) -> bool {
        self.environment.begin().await
    }

    /// The most recent good sample.
    pub const fn sample(&self) -> &Sample {
        &self.sample
    }

    pub const fn zero_offset(&self) -> ZeroOffset {
        self.zero
    }

    pub const fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// Apply operator settings. Takes effect from the next tick.
    pub fn set_settings(&mut self, settings: AcquisitionSettings) {
        self.settings = settings;
    }

    pub const fn environment_reading(&self) -> Option<&EnvironmentReading> {
        self.environment_reading.as_ref()
    }

    pub fn pressure_sensor(&mut self) -> &mut P {
        &mut self.pressure
    }

    /// Read both sensors and publish a new sample.
    ///
    /// Fields of a source that failed keep their previous values. If nothing
    /// was fresh, or the result would not be finite, the previous sample is
    /// left exactly as it was.
    pub async fn tick(&mut self) -> Result<TickOutcome, AcquisitionError> {
        let pressure = self.pressure.read().await.ok();

        let environment = if self.environment.available() {
            match self
                .environment
                .read()
                .await
                .and_then(|reading| reading.validated("environment"))
            {
                Ok(reading) => Some(reading),
                Err(e) => {
                    debug!("Environment read failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        if pressure.is_none() && environment.is_none() {
            return Err(AcquisitionError::NoFreshData);
        }

        let environment_reading = environment.or(self.environment_reading);
        let sample = self.compose(pressure, environment, environment_reading);
        if !sample.is_finite() {
            error!("Discarding non-finite sample at {} ms", sample.t_ms);
            return Err(AcquisitionError::NonFinite);
        }

        self.environment_reading = environment_reading;
        self.sample = sample;

        Ok(TickOutcome {
            pressure_fresh: pressure.is_some(),
            environment_fresh: environment.is_some(),
        })
    }

    fn compose(
        &self,
        pressure: Option<CompensatedReading>,
        environment: Option<EnvironmentReading>,
        latest_environment: Option<EnvironmentReading>,
    ) -> Sample {
        let mut sample = self.sample;
        sample.t_ms = self.clock.now_ms();

        if let Some(reading) = pressure {
            let dp = self.zero.correct(reading.pressure_pa);
            sample.dp_pa = if self.settings.invert_dp { -dp } else { dp };
            sample.temp_p_c = reading.temperature_c;
        }

        if let Some(env) = environment {
            sample.temp_env_c = env.temperature_c;
            sample.abs_p_pa = env.pressure_pa;
            sample.rh_pct = if env.has_humidity {
                env.relative_humidity_pct
            } else {
                0.0
            };
        }

        sample.rho_kgm3 = match self.settings.density {
            DensitySource::Manual(rho) => rho,
            DensitySource::Auto => latest_environment
                .as_ref()
                .map_or(STANDARD_AIR_DENSITY, compute_density),
        };

        sample
    }

    /// Run a zero calibration on the pressure sensor.
    ///
    /// Blocks this context for the calibrator's whole window.
    pub async fn calibrate_zero<K, D>(
        &mut self,
        calibrator: &mut ZeroCalibrator<K, D>,
    ) -> CalibrationReport
    where
        K: Clock,
        D: DelayNs,
    {
        calibrator
            .calibrate(&mut self.pressure, &mut self.zero)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ZeroSettings;
    use crate::test_support::{ScriptedEnvironment, ScriptedPressure, SimTime};
    use embassy_futures::block_on;
    use float_cmp::approx_eq;

    const HUMID: EnvironmentReading = EnvironmentReading::humid(100_000.0, 20.0, 50.0);
    const DRY: EnvironmentReading = EnvironmentReading::dry(99_000.0, 10.0);

    fn acquisition(
        pressure: ScriptedPressure,
        environment: ScriptedEnvironment,
        time: &SimTime,
    ) -> Acquisition<ScriptedPressure, ScriptedEnvironment, SimTime> {
        Acquisition::new(
            pressure,
            environment,
            time.clone(),
            AcquisitionSettings::default(),
            ZeroOffset::restore(2.0),
        )
    }

    #[test]
    fn test_tick_builds_sample_from_both_sources() {
        let time = SimTime::new();
        time.advance_ms(1_500);
        let mut acq = acquisition(
            ScriptedPressure::constant(12.0),
            ScriptedEnvironment::script(vec![Some(HUMID)]),
            &time,
        );

        let outcome = block_on(acq.tick()).unwrap();

        assert!(outcome.pressure_fresh && outcome.environment_fresh);
        let sample = acq.sample();
        assert_eq!(sample.t_ms, 1_500);
        assert_eq!(sample.dp_pa, 10.0);
        assert!(approx_eq!(f32, sample.temp_p_c, 21.12, epsilon = 1e-5));
        assert_eq!(sample.temp_env_c, 20.0);
        assert_eq!(sample.abs_p_pa, 100_000.0);
        assert_eq!(sample.rh_pct, 50.0);
        assert_eq!(sample.rho_kgm3, compute_density(&HUMID));
    }

    #[test]
    fn test_failed_pressure_read_keeps_pressure_fields() {
        let time = SimTime::new();
        let mut acq = acquisition(
            ScriptedPressure::script(vec![Some(7.25), None]),
            ScriptedEnvironment::script(vec![Some(HUMID), Some(DRY)]),
            &time,
        );

        block_on(acq.tick()).unwrap();
        let before = *acq.sample();

        time.advance_ms(1_000);
        let outcome = block_on(acq.tick()).unwrap();
        let after = acq.sample();

        assert!(!outcome.pressure_fresh);
        assert_eq!(after.dp_pa.to_bits(), before.dp_pa.to_bits());
        assert_eq!(after.temp_p_c.to_bits(), before.temp_p_c.to_bits());
        assert_eq!(after.temp_env_c, 10.0);
        assert_eq!(after.rh_pct, 0.0);
        assert_eq!(after.t_ms, 1_000);
    }

    #[test]
    fn test_failed_environment_read_keeps_stale_reading() {
        let time = SimTime::new();
        let mut acq = acquisition(
            ScriptedPressure::constant(3.0),
            ScriptedEnvironment::script(vec![Some(HUMID), None]),
            &time,
        );

        block_on(acq.tick()).unwrap();
        let before = *acq.sample();
        let outcome = block_on(acq.tick()).unwrap();

        assert!(!outcome.environment_fresh);
        assert_eq!(acq.sample().abs_p_pa, before.abs_p_pa);
        assert_eq!(acq.sample().rh_pct, before.rh_pct);
        assert_eq!(acq.sample().rho_kgm3, before.rho_kgm3);
        assert_eq!(acq.environment_reading(), Some(&HUMID));
    }

    #[test]
    fn test_tick_with_no_fresh_data_changes_nothing() {
        let time = SimTime::new();
        let mut acq = acquisition(
            ScriptedPressure::script(vec![Some(5.0), None]),
            ScriptedEnvironment::script(vec![Some(DRY), None]),
            &time,
        );

        block_on(acq.tick()).unwrap();
        let before = *acq.sample();

        time.advance_ms(250);
        assert_eq!(block_on(acq.tick()), Err(AcquisitionError::NoFreshData));
        assert_eq!(*acq.sample(), before);
    }

    #[test]
    fn test_missing_environment_sensor_uses_standard_density() {
        let time = SimTime::new();
        let mut acq = acquisition(
            ScriptedPressure::constant(2.0),
            ScriptedEnvironment::absent(),
            &time,
        );

        assert!(!block_on(acq.begin()));
        let outcome = block_on(acq.tick()).unwrap();

        assert!(!outcome.environment_fresh);
        assert_eq!(acq.sample().dp_pa, 0.0);
        assert_eq!(acq.sample().rho_kgm3, STANDARD_AIR_DENSITY);
    }

    #[test]
    fn test_operator_settings() {
        let time = SimTime::new();
        let mut acq = acquisition(
            ScriptedPressure::constant(12.0),
            ScriptedEnvironment::script(vec![Some(DRY)]),
            &time,
        );
        acq.set_settings(AcquisitionSettings {
            invert_dp: true,
            density: DensitySource::Manual(1.1),
            ..AcquisitionSettings::default()
        });

        block_on(acq.tick()).unwrap();

        assert_eq!(acq.sample().dp_pa, -10.0);
        assert_eq!(acq.sample().rho_kgm3, 1.1);
    }

    #[test]
    fn test_non_finite_manual_density_is_rejected() {
        let time = SimTime::new();
        let mut acq = acquisition(
            ScriptedPressure::constant(12.0),
            ScriptedEnvironment::absent(),
            &time,
        );
        acq.set_settings(AcquisitionSettings {
            density: DensitySource::Manual(f32::NAN),
            ..AcquisitionSettings::default()
        });

        assert_eq!(block_on(acq.tick()), Err(AcquisitionError::NonFinite));
        assert_eq!(*acq.sample(), Sample::default());
    }

    #[test]
    fn test_zero_calibration_feeds_later_samples() {
        let time = SimTime::new();
        let mut acq = acquisition(
            ScriptedPressure::constant(8.5),
            ScriptedEnvironment::script(vec![Some(HUMID)]),
            &time,
        );
        let mut calibrator = ZeroCalibrator::new(time.clone(), time.clone(), ZeroSettings::default());

        let report = block_on(acq.calibrate_zero(&mut calibrator));
        assert!(report.ok);
        assert_eq!(acq.zero_offset().pa(), 8.5);

        block_on(acq.tick()).unwrap();
        assert!(approx_eq!(f32, acq.sample().dp_pa, 0.0, epsilon = 1e-6));
        assert!(acq.sample().t_ms >= 2_000);
    }

    #[test]
    fn test_shared_acquisition_ticks_under_lock() {
        let time = SimTime::new();
        let shared: SharedAcquisition<_, _, _> = Mutex::new(acquisition(
            ScriptedPressure::constant(4.0),
            ScriptedEnvironment::script(vec![Some(DRY)]),
            &time,
        ));

        block_on(async {
            shared.lock().await.tick().await.unwrap();
            assert_eq!(shared.lock().await.sample().dp_pa, 2.0);
        });
    }
}
