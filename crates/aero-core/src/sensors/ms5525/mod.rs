//! Differential pressure transducer driver (MS5525DSO and MS56xx-compatible parts)
//!
//! Protocol:
//! - reset: `0x1E`, then wait for the calibration memory to reload
//! - calibration word `i`: `0xA0 + 2 * i`, 2 bytes big-endian
//! - start conversion: `0x40` (D1) or `0x50` (D2) plus the oversampling offset
//! - read result: `0x00` after a repeated start, 3 bytes big-endian

mod compensation;

pub use compensation::*;

use embedded_hal_async::{delay::DelayNs, i2c::I2c};
use log::{error, info, trace, warn};

use super::{Sensor, SensorError};
use crate::bus::{BusFault, BusTransport};
use crate::config::{CalibrationModel, Oversampling};

const SENSOR: &str = "MS5525";

const CMD_RESET: u8 = 0x1E;
const CMD_PROM_READ: u8 = 0xA0;
const CMD_CONVERT_D1: u8 = 0x40;
const CMD_CONVERT_D2: u8 = 0x50;
const CMD_ADC_READ: u8 = 0x00;

const POWER_UP_MS: u32 = 20;
const RESET_SETTLE_MS: u32 = 3;

/// A conversion is attempted at most this many times.
const CONVERSION_ATTEMPTS: u8 = 2;

/// ADC input selected for a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// D1
    Pressure,
    /// D2
    Temperature,
}

impl Channel {
    pub const fn convert_opcode(self, oversampling: Oversampling) -> u8 {
        let base = match self {
            Self::Pressure => CMD_CONVERT_D1,
            Self::Temperature => CMD_CONVERT_D2,
        };
        base + oversampling.opcode_offset()
    }

    const fn operation(self) -> &'static str {
        match self {
            Self::Pressure => "convert pressure",
            Self::Temperature => "convert temperature",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    Ready,
    /// Startup failed; the next read tries the startup sequence again.
    Faulted,
}

/// Progress of a single conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionState {
    Idle,
    /// Start opcode sent (or about to be), waiting out the conversion time.
    Converting { attempt: u8 },
    Reading { attempt: u8 },
    Done(u32),
    Failed(BusFault),
}

impl ConversionState {
    /// Where a conversion goes after `fault` hit the given attempt.
    pub const fn after_fault(attempt: u8, fault: BusFault) -> Self {
        if attempt < CONVERSION_ATTEMPTS {
            Self::Converting {
                attempt: attempt + 1,
            }
        } else {
            Self::Failed(fault)
        }
    }
}

pub struct Ms5525<I, D> {
    bus: BusTransport<I>,
    delay: D,
    model: CalibrationModel,
    oversampling: Oversampling,
    coefficients: Option<Coefficients>,
    state: DriverState,
}

impl<I: I2c, D: DelayNs> Ms5525<I, D> {
    pub fn new(i2c: I, address: u8, delay: D, model: CalibrationModel) -> Self {
        Self {
            bus: BusTransport::new(i2c, address),
            delay,
            model,
            oversampling: Oversampling::default(),
            coefficients: None,
            state: DriverState::Uninitialized,
        }
    }

    pub fn with_oversampling(mut self, oversampling: Oversampling) -> Self {
        self.oversampling = oversampling;
        self
    }

    /// Use known calibration words instead of reading them from the device.
    pub fn with_coefficients(mut self, coefficients: Coefficients) -> Self {
        self.coefficients = Some(coefficients);
        self.state = DriverState::Ready;
        self
    }

    pub const fn state(&self) -> DriverState {
        self.state
    }

    pub const fn coefficients(&self) -> Option<&Coefficients> {
        self.coefficients.as_ref()
    }

    pub const fn model(&self) -> &CalibrationModel {
        &self.model
    }

    /// Reset the device and load its calibration words.
    ///
    /// On failure the driver is `Faulted` and the next read repeats this.
    pub async fn begin(&mut self) -> Result<(), SensorError> {
        if self.coefficients.is_some() {
            self.state = DriverState::Ready;
            return Ok(());
        }

        self.delay.delay_ms(POWER_UP_MS).await;

        let started = match self.reset().await {
            Ok(()) => self.load_coefficients().await.map(|_| ()),
            Err(e) => Err(e),
        };

        match started {
            Ok(()) => {
                self.state = DriverState::Ready;
                Ok(())
            }
            Err(e) => {
                error!("{} startup failed: {}", SENSOR, e);
                self.state = DriverState::Faulted;
                Err(e)
            }
        }
    }

    pub async fn reset(&mut self) -> Result<(), SensorError> {
        self.bus
            .write(CMD_RESET)
            .await
            .map_err(|fault| SensorError::StartupFailed {
                sensor: SENSOR,
                stage: "reset",
                fault,
            })?;

        self.delay.delay_ms(RESET_SETTLE_MS).await;
        Ok(())
    }

    /// Read the eight calibration words. Once loaded they are never replaced.
    pub async fn load_coefficients(&mut self) -> Result<Coefficients, SensorError> {
        if let Some(coefficients) = self.coefficients {
            return Ok(coefficients);
        }

        let mut words = [0u16; COEFFICIENT_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            let mut buf = [0u8; 2];
            self.bus
                .request(CMD_PROM_READ + 2 * i as u8, &mut buf)
                .await
                .map_err(|fault| SensorError::StartupFailed {
                    sensor: SENSOR,
                    stage: "coefficient load",
                    fault,
                })?;
            *word = u16::from_be_bytes(buf);
        }

        info!("{} calibration words:", SENSOR);
        for (i, word) in words.iter().enumerate() {
            info!(" C[{}]=0x{:04X}", i, word);
        }

        let coefficients = Coefficients::from_words(words);
        self.coefficients = Some(coefficients);
        Ok(coefficients)
    }

    /// Run one conversion on `channel` and return the 24-bit result.
    ///
    /// The whole start/wait/read sequence is repeated once on any bus fault.
    pub async fn convert(&mut self, channel: Channel) -> Result<u32, BusFault> {
        let opcode = channel.convert_opcode(self.oversampling);
        let mut state = ConversionState::Idle;

        loop {
            state = match state {
                ConversionState::Idle => ConversionState::Converting { attempt: 1 },
                ConversionState::Converting { attempt } => match self.bus.write(opcode).await {
                    Ok(()) => {
                        self.delay.delay_us(self.oversampling.settle_us()).await;
                        ConversionState::Reading { attempt }
                    }
                    Err(fault) => {
                        warn!(
                            "{} {} start: {} (attempt {})",
                            SENSOR,
                            channel.operation(),
                            fault,
                            attempt
                        );
                        ConversionState::after_fault(attempt, fault)
                    }
                },
                ConversionState::Reading { attempt } => {
                    let mut buf = [0u8; 3];
                    match self.bus.request(CMD_ADC_READ, &mut buf).await {
                        Ok(()) => {
                            ConversionState::Done(u32::from_be_bytes([0, buf[0], buf[1], buf[2]]))
                        }
                        Err(fault) => {
                            warn!(
                                "{} {} read: {} (attempt {})",
                                SENSOR,
                                channel.operation(),
                                fault,
                                attempt
                            );
                            ConversionState::after_fault(attempt, fault)
                        }
                    }
                }
                ConversionState::Done(value) => return Ok(value),
                ConversionState::Failed(fault) => return Err(fault),
            };
        }
    }

    /// Convert both channels and compensate them.
    ///
    /// Nothing held by the driver changes when this fails. A calibration model
    /// out of range fails before any bus traffic.
    pub async fn read_compensated(&mut self) -> Result<CompensatedReading, SensorError> {
        self.model
            .validate()
            .map_err(|_| SensorError::InvalidModel { sensor: SENSOR })?;

        let coefficients = match self.coefficients {
            Some(c) => c,
            None => {
                self.begin().await?;
                self.load_coefficients().await?
            }
        };

        let raw = RawConversion {
            d1: self.convert_channel(Channel::Pressure).await?,
            d2: self.convert_channel(Channel::Temperature).await?,
        };
        let reading = FixedPointTerms::compute(raw, &coefficients, &self.model)
            .to_reading(self.model.pressure_scale);

        trace!(
            "[{}] D1={} D2={} T={:.2} C P={:.1} Pa",
            SENSOR, raw.d1, raw.d2, reading.temperature_c, reading.pressure_pa
        );

        Ok(reading)
    }

    async fn convert_channel(&mut self, channel: Channel) -> Result<u32, SensorError> {
        self.convert(channel).await.map_err(|fault| {
            error!("{} failed to {}: {}", SENSOR, channel.operation(), fault);
            SensorError::ReadFailed {
                sensor: SENSOR,
                operation: channel.operation(),
                fault,
            }
        })
    }

    pub fn release(self) -> (I, D) {
        (self.bus.release(), self.delay)
    }
}

impl<I: I2c, D: DelayNs> Sensor for Ms5525<I, D> {
    type Readings = CompensatedReading;

    async fn read(&mut self) -> Result<CompensatedReading, SensorError> {
        self.read_compensated().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SimTime;
    use embassy_futures::block_on;
    use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};
    use float_cmp::approx_eq;

    const ADDR: u8 = 0x76;
    const NACK: ErrorKind = ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address);

    const PROM: [u16; COEFFICIENT_WORDS] = [0, 40127, 36924, 23317, 23282, 33464, 28312, 0];
    const D1_BYTES: [u8; 3] = [0x8A, 0xA2, 0x1A];
    const D2_BYTES: [u8; 3] = [0x82, 0xC1, 0x3E];

    fn prom_expectations() -> Vec<Transaction> {
        PROM.iter()
            .enumerate()
            .map(|(i, word)| {
                Transaction::write_read(ADDR, vec![0xA0 + 2 * i as u8], word.to_be_bytes().to_vec())
            })
            .collect()
    }

    fn conversion(opcode: u8, result: [u8; 3]) -> [Transaction; 2] {
        [
            Transaction::write(ADDR, vec![opcode]),
            Transaction::write_read(ADDR, vec![0x00], result.to_vec()),
        ]
    }

    fn driver(expectations: &[Transaction], time: &SimTime) -> Ms5525<I2cMock, SimTime> {
        Ms5525::new(
            I2cMock::new(expectations),
            ADDR,
            time.clone(),
            CalibrationModel::MS5611_FAMILY,
        )
    }

    fn finish(sensor: Ms5525<I2cMock, SimTime>) {
        let (mut i2c, _) = sensor.release();
        i2c.done();
    }

    #[test]
    fn test_begin_resets_and_loads_calibration_words() {
        let mut expectations = vec![Transaction::write(ADDR, vec![0x1E])];
        expectations.extend(prom_expectations());
        let time = SimTime::new();
        let mut sensor = driver(&expectations, &time);

        block_on(sensor.begin()).unwrap();

        assert_eq!(sensor.state(), DriverState::Ready);
        assert_eq!(sensor.coefficients().unwrap().words(), &PROM);
        assert_eq!(time.elapsed_us(), u64::from(POWER_UP_MS + RESET_SETTLE_MS) * 1_000);
        finish(sensor);
    }

    #[test]
    fn test_reset_nack_faults_the_driver() {
        let expectations = [Transaction::write(ADDR, vec![0x1E]).with_error(NACK)];
        let time = SimTime::new();
        let mut sensor = driver(&expectations, &time);

        let err = block_on(sensor.begin()).unwrap_err();

        assert_eq!(
            err,
            SensorError::StartupFailed {
                sensor: SENSOR,
                stage: "reset",
                fault: BusFault::NoAcknowledge,
            }
        );
        assert_eq!(sensor.state(), DriverState::Faulted);
        assert!(sensor.coefficients().is_none());
        finish(sensor);
    }

    #[test]
    fn test_faulted_driver_retries_startup_on_read() {
        let mut expectations = vec![
            Transaction::write(ADDR, vec![0x1E]),
            Transaction::write_read(ADDR, vec![0xA0], vec![0, 0]).with_error(ErrorKind::Other),
            Transaction::write(ADDR, vec![0x1E]),
        ];
        expectations.extend(prom_expectations());
        expectations.extend(conversion(0x48, D1_BYTES));
        expectations.extend(conversion(0x58, D2_BYTES));
        let time = SimTime::new();
        let mut sensor = driver(&expectations, &time);

        let err = block_on(sensor.begin()).unwrap_err();
        assert!(matches!(
            err,
            SensorError::StartupFailed {
                stage: "coefficient load",
                ..
            }
        ));
        assert_eq!(sensor.state(), DriverState::Faulted);

        let reading = block_on(sensor.read_compensated()).unwrap();
        assert_eq!(sensor.state(), DriverState::Ready);
        assert!(approx_eq!(f32, reading.temperature_c, 20.07, epsilon = 1e-4));
        finish(sensor);
    }

    #[test]
    fn test_read_reproduces_datasheet_example() {
        let mut expectations = Vec::new();
        expectations.extend(conversion(0x48, D1_BYTES));
        expectations.extend(conversion(0x58, D2_BYTES));
        let time = SimTime::new();
        let mut sensor =
            driver(&expectations, &time).with_coefficients(Coefficients::from_words(PROM));

        let reading = block_on(sensor.read()).unwrap();

        assert!(approx_eq!(f32, reading.pressure_pa, 100_009.0, epsilon = 0.01));
        assert!(approx_eq!(f32, reading.temperature_c, 20.07, epsilon = 1e-4));
        finish(sensor);
    }

    #[test]
    fn test_conversion_waits_for_worst_case_time() {
        let expectations = conversion(0x48, D1_BYTES);
        let time = SimTime::new();
        let mut sensor =
            driver(&expectations, &time).with_coefficients(Coefficients::from_words(PROM));

        assert_eq!(block_on(sensor.convert(Channel::Pressure)), Ok(9_085_466));
        assert!(time.elapsed_us() >= u64::from(Oversampling::Osr4096.max_conversion_us()));
        finish(sensor);
    }

    #[test]
    fn test_oversampling_selects_opcode_and_wait() {
        let expectations = conversion(0x52, D2_BYTES);
        let time = SimTime::new();
        let mut sensor = driver(&expectations, &time)
            .with_oversampling(Oversampling::Osr512)
            .with_coefficients(Coefficients::from_words(PROM));

        assert_eq!(block_on(sensor.convert(Channel::Temperature)), Ok(8_569_150));
        assert_eq!(time.elapsed_us(), u64::from(Oversampling::Osr512.settle_us()));
        finish(sensor);
    }

    #[test]
    fn test_transient_nack_is_retried_once() {
        let mut expectations = vec![Transaction::write(ADDR, vec![0x48]).with_error(NACK)];
        expectations.extend(conversion(0x48, D1_BYTES));
        expectations.extend([
            Transaction::write(ADDR, vec![0x58]),
            Transaction::write_read(ADDR, vec![0x00], vec![0, 0, 0]).with_error(ErrorKind::Bus),
        ]);
        expectations.extend(conversion(0x58, D2_BYTES));
        let time = SimTime::new();
        let mut sensor =
            driver(&expectations, &time).with_coefficients(Coefficients::from_words(PROM));

        let reading = block_on(sensor.read_compensated()).unwrap();

        assert!(approx_eq!(f32, reading.pressure_pa, 100_009.0, epsilon = 0.01));
        finish(sensor);
    }

    #[test]
    fn test_second_fault_fails_the_read() {
        let expectations = [
            Transaction::write(ADDR, vec![0x48]).with_error(NACK),
            Transaction::write(ADDR, vec![0x48]),
            Transaction::write_read(ADDR, vec![0x00], vec![0, 0, 0]).with_error(ErrorKind::Other),
        ];
        let time = SimTime::new();
        let mut sensor =
            driver(&expectations, &time).with_coefficients(Coefficients::from_words(PROM));

        let err = block_on(sensor.read_compensated()).unwrap_err();

        assert_eq!(
            err,
            SensorError::ReadFailed {
                sensor: SENSOR,
                operation: "convert pressure",
                fault: BusFault::Other,
            }
        );
        assert_eq!(sensor.coefficients().unwrap().words(), &PROM);
        assert_eq!(sensor.state(), DriverState::Ready);
        finish(sensor);
    }

    #[test]
    fn test_repeated_reads_are_bit_identical() {
        let mut expectations = Vec::new();
        for _ in 0..3 {
            expectations.extend(conversion(0x48, D1_BYTES));
            expectations.extend(conversion(0x58, D2_BYTES));
        }
        let time = SimTime::new();
        let mut sensor =
            driver(&expectations, &time).with_coefficients(Coefficients::from_words(PROM));

        let first = block_on(sensor.read_compensated()).unwrap();
        for _ in 0..2 {
            let again = block_on(sensor.read_compensated()).unwrap();
            assert_eq!(first.pressure_pa.to_bits(), again.pressure_pa.to_bits());
            assert_eq!(first.temperature_c.to_bits(), again.temperature_c.to_bits());
        }
        finish(sensor);
    }

    #[test]
    fn test_out_of_range_model_fails_without_bus_traffic() {
        let model = CalibrationModel {
            reference_scale_shift: 64,
            ..CalibrationModel::MS5611_FAMILY
        };
        let expectations: [Transaction; 0] = [];
        let mut sensor = Ms5525::new(I2cMock::new(&expectations), ADDR, SimTime::new(), model)
            .with_coefficients(Coefficients::from_words(PROM));

        assert_eq!(
            block_on(sensor.read()),
            Err(SensorError::InvalidModel { sensor: SENSOR })
        );
        finish(sensor);
    }

    #[test]
    fn test_retry_state_transitions() {
        assert_eq!(
            ConversionState::after_fault(1, BusFault::Bus),
            ConversionState::Converting { attempt: 2 }
        );
        assert_eq!(
            ConversionState::after_fault(2, BusFault::Bus),
            ConversionState::Failed(BusFault::Bus)
        );
    }
}
