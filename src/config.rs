//! Run configuration: inputs, physical assumptions, smoothing, binning and rendering.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::formats::ImageSelector;
use crate::kernel::KernelPolicy;
use crate::polarization::DEFAULT_THRESHOLD;
use crate::processing::binning::{BinFactors, BinMode};
use crate::processing::stretch::StretchMode;
use crate::render::{Background, QuiverConfig};
use crate::units::Length;

/// Settings for the rendered polarization map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub background: Background,
    pub stretch: StretchMode,
    pub quiver: QuiverConfig,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings {
            background: Background::I,
            stretch: StretchMode::Auto,
            quiver: QuiverConfig::default(),
            jpeg_quality: 95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stokes I input, a local path or an http(s) URL.
    pub stokes_i: String,
    pub stokes_q: String,
    pub stokes_u: String,
    /// Applied to all three inputs.
    pub selector: ImageSelector,

    /// Physical edge length of one pixel.
    pub pixel_size: Length,
    pub distance: Length,
    pub ra_deg: f64,
    pub dec_deg: f64,

    /// Beam FWHM in arcseconds.
    pub resolution_arcsec: f64,
    pub kernel: KernelPolicy,

    pub bin_rows: usize,
    pub bin_cols: usize,
    pub bin_mode: BinMode,
    /// Bins with binned Stokes I below this are masked. The default suits
    /// `BinMode::Mean`; under `BinMode::Sum` it compares against block flux.
    pub threshold: f64,

    pub render: RenderSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            stokes_i: String::new(),
            stokes_q: String::new(),
            stokes_u: String::new(),
            selector: ImageSelector::default(),
            pixel_size: Length::au(1.0),
            distance: Length::parsec(140.0),
            ra_deg: 0.0,
            dec_deg: 0.0,
            resolution_arcsec: 0.05,
            kernel: KernelPolicy::default(),
            bin_rows: 64,
            bin_cols: 66,
            bin_mode: BinMode::Mean,
            threshold: DEFAULT_THRESHOLD,
            render: RenderSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file; missing fields keep their defaults.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn with_inputs(mut self, i: &str, q: &str, u: &str) -> Self {
        self.stokes_i = i.to_string();
        self.stokes_q = q.to_string();
        self.stokes_u = u.to_string();
        self
    }

    pub fn with_bins(mut self, rows: usize, cols: usize) -> Self {
        self.bin_rows = rows;
        self.bin_cols = cols;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_kernel(mut self, kernel: KernelPolicy, resolution_arcsec: f64) -> Self {
        self.kernel = kernel;
        self.resolution_arcsec = resolution_arcsec;
        self
    }

    pub fn bin_factors(&self) -> BinFactors {
        BinFactors::new(self.bin_rows, self.bin_cols)
    }

    /// Reject values no stage could work with. Shape-dependent checks happen in the stages.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("I", &self.stokes_i), ("Q", &self.stokes_q), ("U", &self.stokes_u)] {
            if value.trim().is_empty() {
                bail!("No input given for Stokes {}", name);
            }
        }
        for (name, length) in [("Pixel size", self.pixel_size), ("Distance", self.distance)] {
            if !(length.value.is_finite() && length.value > 0.0) {
                bail!("{} must be positive, got {}", name, length);
            }
        }
        if !self.ra_deg.is_finite() {
            bail!("Right ascension must be finite, got {}", self.ra_deg);
        }
        if !(self.dec_deg.is_finite() && self.dec_deg.abs() <= 90.0) {
            bail!("Declination must be within [-90, 90] degrees, got {}", self.dec_deg);
        }
        if !(self.resolution_arcsec.is_finite() && self.resolution_arcsec > 0.0) {
            bail!("Resolution must be positive, got {}", self.resolution_arcsec);
        }
        if self.bin_rows == 0 || self.bin_cols == 0 {
            bail!("Bin factors must be >= 1, got {}x{}", self.bin_rows, self.bin_cols);
        }
        if !self.threshold.is_finite() {
            bail!("Intensity threshold must be finite, got {}", self.threshold);
        }
        let lw = self.render.quiver.line_width;
        if !(1..=3).contains(&lw) {
            bail!("Vector line width must be 1-3, got {}", lw);
        }
        if !(1..=100).contains(&self.render.jpeg_quality) {
            bail!("JPEG quality must be 1-100, got {}", self.render.jpeg_quality);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::LengthUnit;

    fn valid() -> PipelineConfig {
        PipelineConfig::default().with_inputs("I.fits", "Q.fits", "U.fits")
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.bin_factors(), BinFactors::new(64, 66));
        assert_eq!(config.threshold, 0.1);
        assert_eq!(config.kernel, KernelPolicy::gaussian());
        assert_eq!(config.bin_mode, BinMode::Mean);
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_input_rejected() {
        let err = PipelineConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("Stokes I"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut c = valid();
        c.distance = Length::new(0.0, LengthUnit::Parsec);
        assert!(c.validate().is_err());

        let mut c = valid();
        c.dec_deg = 91.0;
        assert!(c.validate().is_err());

        assert!(valid().with_bins(0, 4).validate().is_err());
        assert!(valid().with_threshold(f64::NAN).validate().is_err());
        assert!(valid().with_kernel(KernelPolicy::lorentzian(), -1.0).validate().is_err());

        let mut c = valid();
        c.render.quiver.line_width = 4;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{
                "stokes_i": "https://example.org/I.fits",
                "stokes_q": "Q.fits",
                "stokes_u": "U.fits",
                "selector": {"extension": "STOKES"},
                "distance": {"value": 1.3, "unit": "ly"},
                "kernel": {"type": "lorentzian", "truncate": 6.0},
                "bin_rows": 32,
                "render": {"background": "pi", "quiver": {"color_scheme": "fraction"}}
            }"#,
        )
        .unwrap();

        let c = PipelineConfig::load_json(&path).unwrap();
        assert_eq!(c.selector, ImageSelector::named("STOKES"));
        assert_eq!(c.distance, Length::new(1.3, LengthUnit::LightYear));
        assert_eq!(c.kernel, KernelPolicy::Lorentzian { truncate: 6.0 });
        assert_eq!(c.bin_factors(), BinFactors::new(32, 66));
        assert_eq!(c.render.background, Background::Pi);
        assert_eq!(c.render.quiver.line_width, 1);
        assert_eq!(c.threshold, DEFAULT_THRESHOLD);
        c.validate().unwrap();
    }

    #[test]
    fn test_load_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(PipelineConfig::load_json(&path).is_err());
        assert!(PipelineConfig::load_json(dir.path().join("missing.json")).is_err());
    }
}
