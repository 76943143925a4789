//! PSF kernels sized from an angular resolution.

use std::fmt;

use anyhow::{bail, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// FWHM = 2·sqrt(2·ln 2)·σ for a Gaussian.
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_3;

/// Kernel shape used to model the instrument response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KernelPolicy {
    /// Radially symmetric Gaussian truncated at `truncate` sigmas.
    Gaussian {
        #[serde(default = "default_gaussian_truncate")]
        truncate: f64,
    },
    /// Radially symmetric Lorentzian truncated at `truncate` half-widths.
    Lorentzian {
        #[serde(default = "default_lorentzian_truncate")]
        truncate: f64,
    },
}

fn default_gaussian_truncate() -> f64 {
    4.0
}

fn default_lorentzian_truncate() -> f64 {
    8.0
}

impl KernelPolicy {
    pub fn gaussian() -> Self {
        KernelPolicy::Gaussian {
            truncate: default_gaussian_truncate(),
        }
    }

    pub fn lorentzian() -> Self {
        KernelPolicy::Lorentzian {
            truncate: default_lorentzian_truncate(),
        }
    }

    pub fn truncate(&self) -> f64 {
        match *self {
            KernelPolicy::Gaussian { truncate } | KernelPolicy::Lorentzian { truncate } => truncate,
        }
    }

    /// Same shape with the truncation radius replaced.
    pub fn with_truncate(self, truncate: f64) -> Self {
        match self {
            KernelPolicy::Gaussian { .. } => KernelPolicy::Gaussian { truncate },
            KernelPolicy::Lorentzian { .. } => KernelPolicy::Lorentzian { truncate },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KernelPolicy::Gaussian { .. } => "gaussian",
            KernelPolicy::Lorentzian { .. } => "lorentzian",
        }
    }

    /// Build the kernel for a beam of `resolution_arcsec` FWHM sampled at `pixel_scale_arcsec`.
    pub fn build(&self, resolution_arcsec: f64, pixel_scale_arcsec: f64) -> Result<Kernel> {
        if !(resolution_arcsec.is_finite() && resolution_arcsec > 0.0) {
            bail!("Resolution must be positive, got {}", resolution_arcsec);
        }
        if !(pixel_scale_arcsec.is_finite() && pixel_scale_arcsec > 0.0) {
            bail!("Pixel scale must be positive, got {}", pixel_scale_arcsec);
        }
        let fwhm_px = resolution_arcsec / pixel_scale_arcsec;
        match *self {
            KernelPolicy::Gaussian { truncate } => {
                Kernel::gaussian(fwhm_px / FWHM_PER_SIGMA, truncate)
            }
            KernelPolicy::Lorentzian { truncate } => Kernel::lorentzian(fwhm_px / 2.0, truncate),
        }
    }
}

impl Default for KernelPolicy {
    fn default() -> Self {
        KernelPolicy::gaussian()
    }
}

impl fmt::Display for KernelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Square, odd-sized kernel whose weights sum to one.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    weights: Array2<f64>,
}

impl Kernel {
    /// Gaussian with standard deviation `sigma` pixels, half-size `ceil(truncate·sigma)`.
    pub fn gaussian(sigma: f64, truncate: f64) -> Result<Self> {
        if !(sigma.is_finite() && sigma > 0.0) {
            bail!("Gaussian sigma must be positive, got {}", sigma);
        }
        let half = half_size(sigma, truncate)?;
        let two_sigma_sq = 2.0 * sigma * sigma;
        Kernel::radial(half, |r_sq| (-r_sq / two_sigma_sq).exp())
    }

    /// Lorentzian with half-width at half-maximum `gamma` pixels, half-size `ceil(truncate·gamma)`.
    pub fn lorentzian(gamma: f64, truncate: f64) -> Result<Self> {
        if !(gamma.is_finite() && gamma > 0.0) {
            bail!("Lorentzian half-width must be positive, got {}", gamma);
        }
        let half = half_size(gamma, truncate)?;
        let gamma_sq = gamma * gamma;
        Kernel::radial(half, |r_sq| 1.0 / (1.0 + r_sq / gamma_sq))
    }

    /// Wrap caller-supplied weights, normalizing them to unit sum.
    pub fn from_weights(weights: Array2<f64>) -> Result<Self> {
        let (rows, cols) = weights.dim();
        if rows == 0 || cols == 0 || rows % 2 == 0 || cols % 2 == 0 {
            bail!("Kernel dimensions must be odd and non-zero, got {}x{}", rows, cols);
        }
        Kernel::normalized(weights)
    }

    fn radial(half: usize, profile: impl Fn(f64) -> f64) -> Result<Self> {
        let size = 2 * half + 1;
        let c = half as f64;
        let weights = Array2::from_shape_fn((size, size), |(y, x)| {
            let dy = y as f64 - c;
            let dx = x as f64 - c;
            profile(dx * dx + dy * dy)
        });
        Kernel::normalized(weights)
    }

    fn normalized(mut weights: Array2<f64>) -> Result<Self> {
        let sum = weights.sum();
        if !(sum.is_finite() && sum != 0.0) {
            bail!("Kernel weights sum to {}, cannot normalize", sum);
        }
        weights.mapv_inplace(|w| w / sum);
        Ok(Kernel { weights })
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    /// Side length in pixels.
    pub fn size(&self) -> usize {
        self.weights.nrows()
    }

    /// Index of the central tap `(row, col)`.
    pub fn center(&self) -> (usize, usize) {
        (self.weights.nrows() / 2, self.weights.ncols() / 2)
    }

    pub fn sum(&self) -> f64 {
        self.weights.sum()
    }
}

fn half_size(width: f64, truncate: f64) -> Result<usize> {
    if !(truncate.is_finite() && truncate > 0.0) {
        bail!("Kernel truncation must be positive, got {}", truncate);
    }
    let half = (truncate * width).ceil();
    if half > 4096.0 {
        bail!("Kernel half-size {} pixels is unreasonably large", half);
    }
    Ok(half as usize)
}
