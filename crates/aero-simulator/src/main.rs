//! Desktop simulator for the aero acquisition loop.
//!
//! Puts a virtual differential pressure transducer and a virtual environment
//! sensor on an in-memory I2C bus, then runs the same start-up, zero
//! calibration and sampling sequence as the instrument. Log rows are printed
//! through `log` in the CSV layout the instrument writes.
//!
//! ```text
//! RUST_LOG=debug cargo run -p aero-simulator -- 10
//! ```
//!
//! The optional argument is the run time in seconds after calibration.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use embassy_sync::mutex::Mutex;
use embedded_hal::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation};
use embedded_hal_async::delay::DelayNs;
use log::{error, info, warn};

use aero_core::acquisition::{Acquisition, SharedAcquisition};
use aero_core::calibration::{ZeroCalibrator, ZeroOffset};
use aero_core::config::{CalibrationModel, InstrumentConfig};
use aero_core::report::{CSV_HEADER, LogSchedule, WallClock, csv_row};
use aero_core::sensors::{
    EnvironmentPresence, EnvironmentReading, EnvironmentSensor, Ms5525, Sensor, SensorError,
    probe_environment,
};
use aero_core::shared_bus::{SharedBus, SharedI2cDevice};
use aero_core::time::Clock;

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

const DEFAULT_RUN_SECS: u64 = 5;

/// Pause between acquisition ticks.
const TICK_INTERVAL_MS: u32 = 100;

/// Every Nth conversion start is not acknowledged, to exercise the retry path.
const NACK_EVERY: u32 = 37;

/// Calibration words of the virtual transducer (MS5611 datasheet example).
const PROM: [u16; 8] = [0, 40127, 36924, 23317, 23282, 33464, 28312, 0];
const D1_NOMINAL: f64 = 9_085_466.0;
const D2_NOMINAL: f64 = 8_569_150.0;

/// Chip id the virtual environment sensor answers with (BME280).
const ENV_CHIP_ID: u8 = 0x60;

// ---------------------------------------------------------------------------
// Host time
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct StdClock {
    origin: Instant,
}

impl StdClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    fn elapsed_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

#[derive(Clone, Copy)]
struct StdDelay;

impl DelayNs for StdDelay {
    async fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

// ---------------------------------------------------------------------------
// Virtual bus
// ---------------------------------------------------------------------------

/// Differential pressure transducer answering the conversion protocol.
struct VirtualTransducer {
    clock: StdClock,
    command: u8,
    latched: Option<u32>,
    conversions: u32,
}

impl VirtualTransducer {
    fn new(clock: StdClock) -> Self {
        Self {
            clock,
            command: 0,
            latched: None,
            conversions: 0,
        }
    }

    fn counts(&self, channel: u8) -> u32 {
        let t = self.clock.elapsed_secs();
        let value = match channel {
            // A slow gust on top of a fixed bias, ~0.02 Pa per count
            0x40 => D1_NOMINAL + 400.0 * (t / 3.0).sin() + 25.0 * (t * 7.0).cos(),
            _ => D2_NOMINAL + 1_500.0 * (t / 20.0).sin(),
        };
        value as u32 & 0x00FF_FFFF
    }

    fn on_write(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        let Some(&command) = bytes.first() else {
            return Ok(());
        };
        self.command = command;

        match command {
            0x1E => self.latched = None,
            0x40..=0x48 | 0x50..=0x58 => {
                self.conversions += 1;
                if self.conversions % NACK_EVERY == 0 {
                    return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));
                }
                self.latched = Some(self.counts(command & 0xF0));
            }
            _ => {}
        }
        Ok(())
    }

    fn on_read(&mut self, buf: &mut [u8]) {
        match self.command {
            0xA0..=0xAE => {
                let word = PROM[usize::from((self.command - 0xA0) / 2)];
                for (dst, src) in buf.iter_mut().zip(word.to_be_bytes()) {
                    *dst = src;
                }
            }
            // Reading without a finished conversion yields zero
            0x00 => {
                let counts = self.latched.take().unwrap_or(0).to_be_bytes();
                for (dst, src) in buf.iter_mut().zip(&counts[1..]) {
                    *dst = *src;
                }
            }
            _ => buf.fill(0),
        }
    }
}

/// In-memory I2C bus with the transducer and an environment chip-id responder.
struct VirtualBus {
    pressure_address: u8,
    environment_address: u8,
    transducer: VirtualTransducer,
}

impl ErrorType for VirtualBus {
    type Error = ErrorKind;
}

impl embedded_hal_async::i2c::I2c for VirtualBus {
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        for operation in operations {
            match operation {
                Operation::Write(bytes) if address == self.pressure_address => {
                    self.transducer.on_write(bytes)?
                }
                Operation::Read(buf) if address == self.pressure_address => {
                    self.transducer.on_read(buf)
                }
                Operation::Write(_) if address == self.environment_address => {}
                Operation::Read(buf) if address == self.environment_address => {
                    buf.fill(ENV_CHIP_ID)
                }
                _ => return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Virtual environment sensor
// ---------------------------------------------------------------------------

struct VirtualEnvironment {
    presence: EnvironmentPresence,
    clock: StdClock,
}

impl Sensor for VirtualEnvironment {
    type Readings = EnvironmentReading;

    async fn read(&mut self) -> Result<EnvironmentReading, SensorError> {
        let t = self.clock.elapsed_secs();
        let pressure_pa = (101_325.0 + 40.0 * (t / 30.0).sin()) as f32;
        let temperature_c = (21.0 + 0.8 * (t / 45.0).sin()) as f32;

        match self.presence {
            EnvironmentPresence::NotPresent => Err(SensorError::NotPresent {
                sensor: "environment",
            }),
            EnvironmentPresence::PresentWithHumidity { .. } => Ok(EnvironmentReading::humid(
                pressure_pa,
                temperature_c,
                (48.0 + 6.0 * (t / 60.0).cos()) as f32,
            )),
            EnvironmentPresence::PresentWithoutHumidity { .. } => {
                Ok(EnvironmentReading::dry(pressure_pa, temperature_c))
            }
        }
    }
}

impl EnvironmentSensor for VirtualEnvironment {
    async fn begin(&mut self) -> bool {
        self.available()
    }

    fn available(&self) -> bool {
        self.presence != EnvironmentPresence::NotPresent
    }
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let run_secs = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DEFAULT_RUN_SECS);

    embassy_futures::block_on(run(run_secs));
}

async fn run(run_secs: u64) {
    let config = InstrumentConfig::new(CalibrationModel::MS5611_FAMILY);
    let clock = StdClock::new();

    let bus: SharedBus<VirtualBus> = Mutex::new(VirtualBus {
        pressure_address: config.bus.pressure_address,
        environment_address: config.bus.environment_primary_address,
        transducer: VirtualTransducer::new(clock),
    });

    let (presence, _) = probe_environment(
        SharedI2cDevice::new(&bus),
        &[
            config.bus.environment_primary_address,
            config.bus.environment_fallback_address,
        ],
    )
    .await;

    let mut pressure = Ms5525::new(
        SharedI2cDevice::new(&bus),
        config.bus.pressure_address,
        StdDelay,
        config.calibration,
    )
    .with_oversampling(config.oversampling);

    if let Err(e) = pressure.begin().await {
        warn!("Pressure sensor not ready, will retry on read: {}", e);
    }

    let acquisition: SharedAcquisition<_, _, _> = Mutex::new(Acquisition::new(
        pressure,
        VirtualEnvironment { presence, clock },
        clock,
        config.acquisition,
        ZeroOffset::default(),
    ));

    if !acquisition.lock().await.begin().await {
        warn!("No environment sensor, density falls back to standard air");
    }

    info!("Zeroing for {} ms (ports open)...", config.zero.duration_ms);
    let mut calibrator = ZeroCalibrator::new(clock, StdDelay, config.zero);
    let report = acquisition.lock().await.calibrate_zero(&mut calibrator).await;
    info!(
        "Zero: ok={} dp_zero={:.4} Pa samples={}",
        report.ok, report.zero_pa, report.sample_count
    );

    let mut wall = WallClock::default();
    let epoch_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    wall.sync(epoch_ms, clock.now_ms());

    let mut schedule = LogSchedule::new(config.acquisition.log_interval_ms);
    let end_ms = clock.now_ms() + run_secs * 1_000;
    info!("{}", CSV_HEADER);

    while clock.now_ms() < end_ms {
        let sample = {
            let mut acq = acquisition.lock().await;
            if let Err(e) = acq.tick().await {
                warn!("Acquisition tick failed: {}", e);
            }
            *acq.sample()
        };

        if schedule.due(sample.t_ms) {
            match csv_row(&sample, &wall) {
                Ok(row) => info!("{}", row),
                Err(e) => error!("Dropping log row: {}", e),
            }
        }

        StdDelay.delay_ms(TICK_INTERVAL_MS).await;
    }
}
