//! Fixed-point compensation of raw ADC counts.
//!
//! ```text
//! dT   = D2 - C5 * K1
//! TEMP = 2000 + dT * C6 / 2^23                 (0.01 °C)
//! OFF  = C2 * 2^16 + C4 * dT / 2^7
//! SENS = C1 * 2^15 + C3 * dT / 2^8
//! TEMP < 2000:  OFF -= 5 (TEMP-2000)^2 / 2,  SENS -= 5 (TEMP-2000)^2 / 4
//! P    = (D1 * SENS / 2^21 - OFF) / 2^15       (variant unit, times SCALE -> Pa)
//! ```
//!
//! All intermediates are `i64`; `D1 * SENS` needs ~56 bits.

use serde::Serialize;

use crate::config::{CalibrationModel, ConfigError};

/// Number of 16-bit words in the factory calibration memory.
pub const COEFFICIENT_WORDS: usize = 8;

/// Factory calibration words. Index 0 and 7 are reserved, 1..=6 are C1..C6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coefficients {
    words: [u16; COEFFICIENT_WORDS],
}

impl Coefficients {
    pub const fn from_words(words: [u16; COEFFICIENT_WORDS]) -> Self {
        Self { words }
    }

    pub const fn words(&self) -> &[u16; COEFFICIENT_WORDS] {
        &self.words
    }

    /// Pressure sensitivity.
    #[inline]
    pub const fn c1(&self) -> i64 {
        self.words[1] as i64
    }

    /// Pressure offset.
    #[inline]
    pub const fn c2(&self) -> i64 {
        self.words[2] as i64
    }

    /// Temperature coefficient of pressure sensitivity.
    #[inline]
    pub const fn c3(&self) -> i64 {
        self.words[3] as i64
    }

    /// Temperature coefficient of pressure offset.
    #[inline]
    pub const fn c4(&self) -> i64 {
        self.words[4] as i64
    }

    /// Reference temperature.
    #[inline]
    pub const fn c5(&self) -> i64 {
        self.words[5] as i64
    }

    /// Temperature coefficient of the temperature.
    #[inline]
    pub const fn c6(&self) -> i64 {
        self.words[6] as i64
    }
}

/// One pair of 24-bit conversions: D1 (pressure) and D2 (temperature).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawConversion {
    pub d1: u32,
    pub d2: u32,
}

/// Calibrated pressure and sensor-chain temperature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompensatedReading {
    pub pressure_pa: f32,
    pub temperature_c: f32,
}

/// Intermediate fixed-point terms of one compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPointTerms {
    pub dt: i64,
    /// Hundredths of a degree Celsius.
    pub temp: i64,
    pub off: i64,
    pub sens: i64,
    /// Pressure in the variant's nominal unit.
    pub pressure: i64,
}

impl FixedPointTerms {
    /// Run the fixed-point pipeline. `model` must pass
    /// [`CalibrationModel::validate`], otherwise the intermediates overflow.
    pub fn compute(raw: RawConversion, c: &Coefficients, model: &CalibrationModel) -> Self {
        let r = model.rounding;

        let dt = i64::from(raw.d2) - c.c5() * model.reference_scale();
        let temp = 2000 + r.scale_down(dt * c.c6(), 23);
        let mut off = c.c2() * (1 << 16) + r.scale_down(c.c4() * dt, 7);
        let mut sens = c.c1() * (1 << 15) + r.scale_down(c.c3() * dt, 8);

        // Second order, below 20 °C
        if temp < 2000 {
            let t2 = temp - 2000;
            let sq = 5 * t2 * t2;
            off -= r.scale_down(sq, 1);
            sens -= r.scale_down(sq, 2);
        }

        let pressure = r.scale_down(r.scale_down(i64::from(raw.d1) * sens, 21) - off, 15);

        Self {
            dt,
            temp,
            off,
            sens,
            pressure,
        }
    }

    pub fn to_reading(&self, pressure_scale: f32) -> CompensatedReading {
        CompensatedReading {
            pressure_pa: self.pressure as f32 * pressure_scale,
            temperature_c: self.temp as f32 / 100.0,
        }
    }
}

/// Convert a raw conversion pair into physical units.
pub fn compensate(
    raw: RawConversion,
    coefficients: &Coefficients,
    model: &CalibrationModel,
) -> Result<CompensatedReading, ConfigError> {
    model.validate()?;
    Ok(FixedPointTerms::compute(raw, coefficients, model).to_reading(model.pressure_scale))
}
