//! Linear tangent-plane (TAN) world coordinate system.
//!
//! The transformation follows the FITS WCS convention:
//!
//! 1. Pixel to intermediate: `(ξ, η) = (CDELT1 · (p1 − CRPIX1), CDELT2 · (p2 − CRPIX2))`
//! 2. Intermediate to sky: gnomonic de-projection about `(CRVAL1, CRVAL2)`
//!
//! `p1`, `p2` are 1-based FITS pixel coordinates; the public methods take
//! 0-based array indices (column, row) and convert internally.

use anyhow::{bail, Context, Result};

use crate::formats::FitsHeader;
use crate::units::{angular_size_deg, Length, ARCSEC_PER_DEGREE};

#[derive(Debug, Clone, PartialEq)]
pub struct LinearWcs {
    /// Reference pixel (CRPIX1, CRPIX2), 1-based.
    pub crpix: (f64, f64),
    /// Degrees per pixel along each axis (CDELT1, CDELT2).
    pub cdelt: (f64, f64),
    /// Sky position of the reference pixel in degrees (CRVAL1 = RA, CRVAL2 = Dec).
    pub crval: (f64, f64),
    pub ctype: (String, String),
    pub cunit: (String, String),
}

impl LinearWcs {
    pub fn new(crpix: (f64, f64), cdelt: (f64, f64), crval: (f64, f64)) -> Self {
        LinearWcs {
            crpix,
            cdelt,
            crval,
            ctype: ("RA---TAN".to_string(), "DEC--TAN".to_string()),
            cunit: ("deg".to_string(), "deg".to_string()),
        }
    }

    /// Build the WCS of an image whose pixels have a known physical size at a known distance.
    ///
    /// `shape` is `(rows, cols)`. The reference pixel is the image centre and RA
    /// increases to the left (negative CDELT1).
    pub fn from_physical(
        pixel_size: Length,
        distance: Length,
        ra_deg: f64,
        dec_deg: f64,
        shape: (usize, usize),
    ) -> Result<Self> {
        if !ra_deg.is_finite() || !dec_deg.is_finite() {
            bail!("Sky position must be finite, got RA={} Dec={}", ra_deg, dec_deg);
        }
        if dec_deg.abs() > 90.0 {
            bail!("Declination must be within [-90, 90] degrees, got {}", dec_deg);
        }
        let scale = angular_size_deg(pixel_size, distance)?;
        let (rows, cols) = shape;
        let crpix = ((cols as f64 + 1.0) / 2.0, (rows as f64 + 1.0) / 2.0);
        Ok(LinearWcs::new(crpix, (-scale, scale), (ra_deg.rem_euclid(360.0), dec_deg)))
    }

    /// Pixel scale along the second axis in arcseconds.
    pub fn pixel_scale_arcsec(&self) -> f64 {
        self.cdelt.1.abs() * ARCSEC_PER_DEGREE
    }

    /// Intermediate world coordinates (degrees) of a 0-based pixel index.
    pub fn pixel_to_intermediate(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.cdelt.0 * (x + 1.0 - self.crpix.0),
            self.cdelt.1 * (y + 1.0 - self.crpix.1),
        )
    }

    /// Convert a 0-based pixel index to sky coordinates (RA, Dec in degrees).
    pub fn pixel_to_world(&self, x: f64, y: f64) -> (f64, f64) {
        let (xi, eta) = self.pixel_to_intermediate(x, y);
        let xi = xi.to_radians();
        let eta = eta.to_radians();

        let ra0 = self.crval.0.to_radians();
        let dec0 = self.crval.1.to_radians();
        let (sin_dec0, cos_dec0) = dec0.sin_cos();
        let denom = cos_dec0 - eta * sin_dec0;

        let ra = ra0 + xi.atan2(denom);
        let dec = (sin_dec0 + eta * cos_dec0).atan2((xi * xi + denom * denom).sqrt());

        (ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
    }

    /// Convert sky coordinates (degrees) to a 0-based pixel index.
    ///
    /// Returns `None` for points on or behind the tangent plane.
    pub fn world_to_pixel(&self, ra: f64, dec: f64) -> Option<(f64, f64)> {
        let ra = ra.to_radians();
        let dec = dec.to_radians();
        let ra0 = self.crval.0.to_radians();
        let dec0 = self.crval.1.to_radians();

        let (sin_dec, cos_dec) = dec.sin_cos();
        let (sin_dec0, cos_dec0) = dec0.sin_cos();
        let (sin_dra, cos_dra) = (ra - ra0).sin_cos();

        let d = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
        if d <= 1e-12 {
            return None;
        }
        let xi = (cos_dec * sin_dra / d).to_degrees();
        let eta = ((sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / d).to_degrees();

        Some((
            xi / self.cdelt.0 + self.crpix.0 - 1.0,
            eta / self.cdelt.1 + self.crpix.1 - 1.0,
        ))
    }

    /// Write the WCS keywords into `header`, replacing existing ones.
    pub fn to_header(&self, header: &mut FitsHeader) {
        header.set_int("WCSAXES", 2, Some("number of World Coordinate System axes"));
        header.set_string("CTYPE1", &self.ctype.0, Some("Right ascension, gnomonic projection"));
        header.set_string("CTYPE2", &self.ctype.1, Some("Declination, gnomonic projection"));
        header.set_string("CUNIT1", &self.cunit.0, None);
        header.set_string("CUNIT2", &self.cunit.1, None);
        header.set_float("CRPIX1", self.crpix.0, Some("Pixel coordinate of reference point"));
        header.set_float("CRPIX2", self.crpix.1, Some("Pixel coordinate of reference point"));
        header.set_float("CDELT1", self.cdelt.0, Some("[deg] Coordinate increment at reference point"));
        header.set_float("CDELT2", self.cdelt.1, Some("[deg] Coordinate increment at reference point"));
        header.set_float("CRVAL1", self.crval.0, Some("[deg] Coordinate value at reference point"));
        header.set_float("CRVAL2", self.crval.1, Some("[deg] Coordinate value at reference point"));
    }

    /// Copy of `header` with this WCS embedded.
    pub fn embed(&self, header: &FitsHeader) -> FitsHeader {
        let mut out = header.clone();
        self.to_header(&mut out);
        out
    }

    /// Reconstruct a WCS from header keywords.
    ///
    /// Falls back to the diagonal of a CD matrix when CDELT is absent; a CD
    /// matrix with rotation terms is rejected.
    pub fn from_header(header: &FitsHeader) -> Result<Self> {
        let get = |key: &str| {
            header
                .get_float(key)
                .with_context(|| format!("Missing {} keyword in FITS header", key))
        };

        let cdelt = match (header.get_float("CDELT1"), header.get_float("CDELT2")) {
            (Some(c1), Some(c2)) => (c1, c2),
            _ => {
                let cross = header.get_float("CD1_2").unwrap_or(0.0).abs()
                    + header.get_float("CD2_1").unwrap_or(0.0).abs();
                if cross > 0.0 {
                    bail!("Rotated CD matrices are not supported by a linear WCS");
                }
                (get("CD1_1")?, get("CD2_2")?)
            }
        };
        if cdelt.0 == 0.0 || cdelt.1 == 0.0 {
            bail!("WCS pixel scale must be non-zero");
        }

        let ctype = (
            header.get_string("CTYPE1").unwrap_or("RA---TAN").to_string(),
            header.get_string("CTYPE2").unwrap_or("DEC--TAN").to_string(),
        );
        let cunit = (
            header.get_string("CUNIT1").unwrap_or("deg").to_string(),
            header.get_string("CUNIT2").unwrap_or("deg").to_string(),
        );

        Ok(LinearWcs {
            crpix: (get("CRPIX1")?, get("CRPIX2")?),
            cdelt,
            crval: (get("CRVAL1")?, get("CRVAL2")?),
            ctype,
            cunit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Length;
    use approx::assert_relative_eq;

    fn sample_wcs() -> LinearWcs {
        LinearWcs::from_physical(Length::au(1.0), Length::parsec(140.0), 83.8221, -5.3911, (512, 512))
            .unwrap()
    }

    #[test]
    fn test_from_physical_scale_and_center() {
        let wcs = sample_wcs();
        assert_relative_eq!(wcs.pixel_scale_arcsec(), 1.0 / 140.0, max_relative = 1e-9);
        assert!(wcs.cdelt.0 < 0.0 && wcs.cdelt.1 > 0.0);
        assert_eq!(wcs.crpix, (256.5, 256.5));
    }

    #[test]
    fn test_reference_pixel_maps_to_crval() {
        let wcs = sample_wcs();
        let (ra, dec) = wcs.pixel_to_world(255.5, 255.5);
        assert_relative_eq!(ra, 83.8221, epsilon = 1e-10);
        assert_relative_eq!(dec, -5.3911, epsilon = 1e-10);
    }

    #[test]
    fn test_ra_increases_to_the_left() {
        let wcs = sample_wcs();
        let (ra_left, _) = wcs.pixel_to_world(0.0, 255.5);
        let (ra_right, _) = wcs.pixel_to_world(511.0, 255.5);
        assert!(ra_left > ra_right);
    }

    #[test]
    fn test_world_pixel_roundtrip() {
        let wcs = sample_wcs();
        for &(x, y) in &[(0.0, 0.0), (100.0, 400.0), (511.0, 3.5)] {
            let (ra, dec) = wcs.pixel_to_world(x, y);
            let (px, py) = wcs.world_to_pixel(ra, dec).unwrap();
            assert_relative_eq!(px, x, epsilon = 1e-6);
            assert_relative_eq!(py, y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let wcs = sample_wcs();
        let mut header = FitsHeader::new();
        wcs.to_header(&mut header);
        let parsed = LinearWcs::from_header(&header).unwrap();
        assert_eq!(parsed, wcs);

        // Through serialized 80-character cards as well.
        let mut reparsed = FitsHeader::new();
        for card in header.cards() {
            reparsed.push(crate::formats::Card::parse(&card.to_record()));
        }
        assert_eq!(LinearWcs::from_header(&reparsed).unwrap(), wcs);
    }

    #[test]
    fn test_cd_matrix_fallback() {
        let mut header = FitsHeader::new();
        header.set_float("CRPIX1", 10.0, None);
        header.set_float("CRPIX2", 20.0, None);
        header.set_float("CRVAL1", 1.0, None);
        header.set_float("CRVAL2", 2.0, None);
        header.set_float("CD1_1", -1e-4, None);
        header.set_float("CD2_2", 1e-4, None);
        let wcs = LinearWcs::from_header(&header).unwrap();
        assert_eq!(wcs.cdelt, (-1e-4, 1e-4));

        header.set_float("CD1_2", 1e-6, None);
        assert!(LinearWcs::from_header(&header).is_err());
    }

    #[test]
    fn test_rejects_bad_declination() {
        assert!(LinearWcs::from_physical(Length::au(1.0), Length::parsec(1.0), 0.0, 91.0, (8, 8)).is_err());
    }
}
