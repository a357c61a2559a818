//! Air density from ambient conditions

use crate::config::STANDARD_AIR_DENSITY;
use crate::sensors::EnvironmentReading;

/// Specific gas constant of dry air, J/(kg·K).
pub const R_DRY: f32 = 287.05;
/// Specific gas constant of water vapour, J/(kg·K).
pub const R_VAPOUR: f32 = 461.495;

const KELVIN_OFFSET: f32 = 273.15;

/// Saturation vapour pressure over water (Magnus), in pascals.
pub fn saturation_vapour_pressure(temperature_c: f32) -> f32 {
    let es_hpa = 6.112 * libm::expf((17.62 * temperature_c) / (243.12 + temperature_c));
    es_hpa * 100.0
}

/// Density of (moist) air in kg/m³.
///
/// Without humidity the dry-air gas law is used. With humidity the air is
/// split into dry and vapour partial pressures. Inputs that would give a
/// non-finite or non-physical result yield [`STANDARD_AIR_DENSITY`].
pub fn compute_density(env: &EnvironmentReading) -> f32 {
    let t_k = env.temperature_c + KELVIN_OFFSET;
    if !t_k.is_finite() || t_k <= 0.0 {
        return STANDARD_AIR_DENSITY;
    }

    let rho = if env.has_humidity {
        let es = saturation_vapour_pressure(env.temperature_c);
        let pv = env.relative_humidity_pct.clamp(0.0, 100.0) / 100.0 * es;
        let pd = (env.pressure_pa - pv).max(0.0);
        pd / (R_DRY * t_k) + pv / (R_VAPOUR * t_k)
    } else {
        env.pressure_pa / (R_DRY * t_k)
    };

    if rho.is_finite() { rho } else { STANDARD_AIR_DENSITY }
}
