//! Instrument configuration
//!
//! Everything here is plain data: the platform layer owns persistence and
//! hands the decoded [`InstrumentConfig`] to the acquisition components.

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Standard sea-level air density (kg/m³), used whenever no better value exists.
pub const STANDARD_AIR_DENSITY: f32 = 1.225;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct InstrumentConfig {
    pub bus: BusConfig,
    pub calibration: CalibrationModel,
    pub oversampling: Oversampling,
    pub acquisition: AcquisitionSettings,
    pub zero: ZeroSettings,
}

impl InstrumentConfig {
    /// Build a configuration around an explicitly chosen calibration model.
    /// The compensation constants depend on the fitted transducer variant,
    /// so they have no default.
    pub fn new(calibration: CalibrationModel) -> Self {
        Self {
            bus: BusConfig::default(),
            calibration,
            oversampling: Oversampling::default(),
            acquisition: AcquisitionSettings::default(),
            zero: ZeroSettings::default(),
        }
    }

    /// Encode into `buf` for the settings store. Returns the used prefix.
    pub fn encode<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], ConfigError> {
        postcard::to_slice(self, buf).map_err(|_| ConfigError::Encode)
    }

    /// Decode a stored configuration. Values outside the supported ranges are
    /// rejected like a corrupt record.
    pub fn decode(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Decode)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.calibration.validate()?;
        self.zero.validate()
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("settings buffer too small or unserializable")]
    Encode,
    #[error("stored settings are corrupt or from an incompatible layout")]
    Decode,
    #[error("reference scale shift {0} is out of range")]
    ReferenceScaleShift(u8),
    #[error("pressure scale must be finite and positive")]
    PressureScale,
    #[error("zero calibration needs at least 6 samples, configured {0}")]
    ZeroSampleCount(u16),
}

/// Two-wire bus wiring and device addresses.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub frequency_hz: u32,
    /// Per-transaction timeout the platform HAL must enforce.
    pub timeout_ms: u32,
    pub pressure_address: u8,
    pub environment_primary_address: u8,
    pub environment_fallback_address: u8,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 100_000,
            timeout_ms: 50,
            pressure_address: 0x76,
            environment_primary_address: 0x77,
            environment_fallback_address: 0x76,
        }
    }
}

/// How fixed-point intermediates are scaled down by powers of two.
///
/// The two differ only for negative operands: a shift floors towards
/// negative infinity while integer division truncates towards zero.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    ArithmeticShift,
    TruncatingDivision,
}

impl Rounding {
    #[inline]
    pub fn scale_down(self, value: i64, shift: u32) -> i64 {
        match self {
            Self::ArithmeticShift => value >> shift,
            Self::TruncatingDivision => value / (1_i64 << shift),
        }
    }
}

/// Variant-specific parameters of the transducer calibration model.
///
/// `K1 = 2^reference_scale_shift` scales the reference temperature word (C5),
/// `pressure_scale` converts the nominal output unit into pascals. Take both
/// from the datasheet of the fitted part.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CalibrationModel {
    pub reference_scale_shift: u8,
    pub pressure_scale: f32,
    pub rounding: Rounding,
}

impl CalibrationModel {
    /// MS56xx datasheet model: C5 × 2^8, output already in pascals (0.01 mbar).
    pub const MS5611_FAMILY: Self = Self {
        reference_scale_shift: 8,
        pressure_scale: 1.0,
        rounding: Rounding::ArithmeticShift,
    };

    /// Model the first field firmware shipped with: same arithmetic, output
    /// treated as hPa.
    pub const LEGACY_HPA: Self = Self {
        reference_scale_shift: 8,
        pressure_scale: 100.0,
        rounding: Rounding::ArithmeticShift,
    };

    /// Largest K1 exponent for which every compensation intermediate fits in
    /// an `i64` with full-scale counts and coefficients.
    pub const MAX_REFERENCE_SCALE_SHIFT: u8 = 10;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reference_scale_shift > Self::MAX_REFERENCE_SCALE_SHIFT {
            return Err(ConfigError::ReferenceScaleShift(self.reference_scale_shift));
        }
        if !self.pressure_scale.is_finite() || self.pressure_scale <= 0.0 {
            return Err(ConfigError::PressureScale);
        }
        Ok(())
    }

    /// K1. Only meaningful for a model that passed [`Self::validate`].
    #[inline]
    pub const fn reference_scale(&self) -> i64 {
        1_i64 << self.reference_scale_shift
    }
}

/// ADC oversampling ratio: higher ratios trade conversion time for resolution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Oversampling {
    Osr256,
    Osr512,
    Osr1024,
    Osr2048,
    #[default]
    Osr4096,
}

impl Oversampling {
    /// Added on top of the datasheet maximum before reading the ADC.
    pub const GUARD_US: u32 = 3_000;

    /// Offset added to a channel's base conversion opcode.
    pub const fn opcode_offset(self) -> u8 {
        match self {
            Self::Osr256 => 0x00,
            Self::Osr512 => 0x02,
            Self::Osr1024 => 0x04,
            Self::Osr2048 => 0x06,
            Self::Osr4096 => 0x08,
        }
    }

    /// Datasheet worst-case conversion time in microseconds.
    pub const fn max_conversion_us(self) -> u32 {
        match self {
            Self::Osr256 => 600,
            Self::Osr512 => 1_170,
            Self::Osr1024 => 2_280,
            Self::Osr2048 => 4_540,
            Self::Osr4096 => 9_040,
        }
    }

    /// Time to wait between starting a conversion and reading the result.
    pub const fn settle_us(self) -> u32 {
        self.max_conversion_us() + Self::GUARD_US
    }
}

/// Where the reported air density comes from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub enum DensitySource {
    /// Derived from the environment sensor, standard density until it reports.
    #[default]
    Auto,
    /// Fixed value in kg/m³ entered by the operator.
    Manual(f32),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSettings {
    /// Flip the sign of the corrected differential pressure (ports swapped).
    pub invert_dp: bool,
    pub density: DensitySource,
    pub log_interval_ms: u32,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            invert_dp: false,
            density: DensitySource::Auto,
            log_interval_ms: 1_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroSettings {
    pub duration_ms: u32,
    pub sample_period_ms: u32,
    /// Valid readings needed for a calibration to count. Never below
    /// [`Self::MIN_VALID_SAMPLES`].
    pub min_samples: u16,
}

impl ZeroSettings {
    pub const MIN_VALID_SAMPLES: u16 = 6;

    /// Threshold actually applied, whatever the stored value says.
    pub fn required_samples(&self) -> u16 {
        self.min_samples.max(Self::MIN_VALID_SAMPLES)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_samples < Self::MIN_VALID_SAMPLES {
            return Err(ConfigError::ZeroSampleCount(self.min_samples));
        }
        Ok(())
    }
}

impl Default for ZeroSettings {
    fn default() -> Self {
        Self {
            duration_ms: 2_000,
            sample_period_ms: 10,
            min_samples: 6,
        }
    }
}
