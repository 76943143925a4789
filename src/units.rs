//! Physical lengths and the small-angle conversion to angular size.

use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

pub const METERS_PER_AU: f64 = 1.495_978_707e11;
pub const METERS_PER_LIGHT_YEAR: f64 = 9.460_730_472_580_8e15;
/// 648000/π AU.
pub const METERS_PER_PARSEC: f64 = 3.085_677_581_491_367e16;
pub const ARCSEC_PER_DEGREE: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum LengthUnit {
    #[value(name = "m")]
    #[serde(rename = "m")]
    Meter,
    #[value(name = "km")]
    #[serde(rename = "km")]
    Kilometer,
    #[value(name = "au")]
    #[serde(rename = "au")]
    AstronomicalUnit,
    #[value(name = "ly")]
    #[serde(rename = "ly")]
    LightYear,
    #[value(name = "pc")]
    #[serde(rename = "pc")]
    Parsec,
}

impl LengthUnit {
    pub fn meters(self) -> f64 {
        match self {
            LengthUnit::Meter => 1.0,
            LengthUnit::Kilometer => 1.0e3,
            LengthUnit::AstronomicalUnit => METERS_PER_AU,
            LengthUnit::LightYear => METERS_PER_LIGHT_YEAR,
            LengthUnit::Parsec => METERS_PER_PARSEC,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            LengthUnit::Meter => "m",
            LengthUnit::Kilometer => "km",
            LengthUnit::AstronomicalUnit => "AU",
            LengthUnit::LightYear => "ly",
            LengthUnit::Parsec => "pc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Length {
    pub value: f64,
    pub unit: LengthUnit,
}

impl Length {
    pub fn new(value: f64, unit: LengthUnit) -> Self {
        Length { value, unit }
    }

    pub fn au(value: f64) -> Self {
        Length::new(value, LengthUnit::AstronomicalUnit)
    }

    pub fn parsec(value: f64) -> Self {
        Length::new(value, LengthUnit::Parsec)
    }

    pub fn to_meters(&self) -> f64 {
        self.value * self.unit.meters()
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.symbol())
    }
}

/// Angle subtended by `size` at `distance`, small-angle approximation.
///
/// Returns degrees. One AU at one parsec is one arcsecond.
pub fn angular_size_deg(size: Length, distance: Length) -> Result<f64> {
    let size_m = size.to_meters();
    let distance_m = distance.to_meters();
    if !(size_m.is_finite() && size_m > 0.0) {
        bail!("Physical size must be positive, got {}", size);
    }
    if !(distance_m.is_finite() && distance_m > 0.0) {
        bail!("Distance must be positive, got {}", distance);
    }
    Ok((size_m / distance_m).to_degrees())
}

pub fn angular_size_arcsec(size: Length, distance: Length) -> Result<f64> {
    Ok(angular_size_deg(size, distance)? * ARCSEC_PER_DEGREE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_au_at_parsec_is_arcsec() {
        let arcsec = angular_size_arcsec(Length::au(1.0), Length::parsec(1.0)).unwrap();
        assert_relative_eq!(arcsec, 1.0, max_relative = 1e-9);
    }

    #[test]
    fn test_scaling_with_distance() {
        let near = angular_size_arcsec(Length::au(10.0), Length::parsec(140.0)).unwrap();
        assert_relative_eq!(near, 10.0 / 140.0, max_relative = 1e-9);
    }

    #[test]
    fn test_rejects_non_positive() {
        assert!(angular_size_deg(Length::au(0.0), Length::parsec(1.0)).is_err());
        assert!(angular_size_deg(Length::au(1.0), Length::parsec(-3.0)).is_err());
    }

    #[test]
    fn test_unit_serde_names() {
        let json = serde_json::to_string(&Length::parsec(140.0)).unwrap();
        assert_eq!(json, r#"{"value":140.0,"unit":"pc"}"#);
        let back: Length = serde_json::from_str(r#"{"value":5,"unit":"au"}"#).unwrap();
        assert_eq!(back, Length::au(5.0));
    }
}
