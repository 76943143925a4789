//! Polarization angle and fraction from binned Stokes I, Q, U.

use std::f64::consts::FRAC_PI_2;

use anyhow::{bail, Result};
use ndarray::{Array2, Zip};
use tracing::warn;

use crate::processing::binning::{BinFactors, BinnedStokes};

/// Example threshold below which a bin's intensity is treated as noise.
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// Per-bin polarization vectors.
#[derive(Debug, Clone)]
pub struct PolarizationField {
    /// `0.5 · atan2(U, Q)` in radians, in `(-π/2, π/2]`.
    pub angle: Array2<f64>,
    /// `sqrt(Q² + U²) / I`.
    pub fraction: Array2<f64>,
    /// `fraction · cos(angle)`.
    pub u: Array2<f64>,
    /// `fraction · sin(angle)`.
    pub v: Array2<f64>,
    /// False where the bin was masked as low signal.
    pub valid: Array2<bool>,
    pub factors: BinFactors,
    pub threshold: f64,
}

/// Angle and fraction of a single bin; `None` when masked.
#[inline]
pub fn polarization_of(i: f64, q: f64, u: f64, threshold: f64) -> Option<(f64, f64)> {
    if !i.is_finite() || i < threshold || i <= 0.0 {
        return None;
    }
    let mut angle = 0.5 * u.atan2(q);
    // atan2(-0.0, q < 0) lands on -π/2; fold it onto the same headless orientation.
    if angle <= -FRAC_PI_2 {
        angle = FRAC_PI_2;
    }
    let fraction = q.hypot(u) / i;
    if !angle.is_finite() || !fraction.is_finite() {
        return None;
    }
    Some((angle, fraction))
}

impl PolarizationField {
    pub fn from_planes(
        i: &Array2<f64>,
        q: &Array2<f64>,
        u: &Array2<f64>,
        factors: BinFactors,
        threshold: f64,
    ) -> Result<Self> {
        if i.dim() != q.dim() || i.dim() != u.dim() {
            bail!(
                "Stokes planes must share one shape: I={:?} Q={:?} U={:?}",
                i.dim(),
                q.dim(),
                u.dim()
            );
        }
        if threshold.is_nan() {
            bail!("Intensity threshold must be a number");
        }

        let shape = i.dim();
        let mut angle = Array2::zeros(shape);
        let mut fraction = Array2::zeros(shape);
        let mut valid = Array2::from_elem(shape, false);

        Zip::from(&mut angle)
            .and(&mut fraction)
            .and(&mut valid)
            .and(i)
            .and(q)
            .and(u)
            .for_each(|a, f, ok, &i, &q, &u| {
                if let Some((pa, pf)) = polarization_of(i, q, u, threshold) {
                    *a = pa;
                    *f = pf;
                    *ok = true;
                }
            });

        let u_vec = Zip::from(&angle).and(&fraction).map_collect(|&a, &f| f * a.cos());
        let v_vec = Zip::from(&angle).and(&fraction).map_collect(|&a, &f| f * a.sin());

        let over_unity = fraction.iter().filter(|&&f| f > 1.0).count();
        if over_unity > 0 {
            warn!("{} bin(s) with polarization fraction above 1", over_unity);
        }

        Ok(PolarizationField {
            angle,
            fraction,
            u: u_vec,
            v: v_vec,
            valid,
            factors,
            threshold,
        })
    }

    pub fn from_binned(binned: &BinnedStokes, threshold: f64) -> Result<Self> {
        let cube = &binned.cube;
        Self::from_planes(cube.i(), cube.q(), cube.u(), binned.factors, threshold)
    }

    /// `(rows, cols)` of the binned grid.
    pub fn dim(&self) -> (usize, usize) {
        self.angle.dim()
    }

    pub fn angle_degrees(&self) -> Array2<f64> {
        self.angle.mapv(f64::to_degrees)
    }

    pub fn summary(&self) -> PolarizationSummary {
        let mut valid_bins = 0usize;
        let mut sum_fraction = 0.0;
        let mut max_fraction = 0.0f64;
        let (mut sum_cos, mut sum_sin) = (0.0f64, 0.0f64);

        Zip::from(&self.valid)
            .and(&self.angle)
            .and(&self.fraction)
            .for_each(|&ok, &a, &f| {
                if ok {
                    valid_bins += 1;
                    sum_fraction += f;
                    max_fraction = max_fraction.max(f);
                    // Orientations are axial: average on 2θ.
                    sum_cos += (2.0 * a).cos();
                    sum_sin += (2.0 * a).sin();
                }
            });

        let total = self.valid.len();
        let (mean_fraction, mean_angle, coherence) = if valid_bins > 0 {
            let n = valid_bins as f64;
            (
                sum_fraction / n,
                0.5 * sum_sin.atan2(sum_cos),
                (sum_cos * sum_cos + sum_sin * sum_sin) / (n * n),
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        PolarizationSummary {
            valid_bins,
            masked_bins: total - valid_bins,
            mean_fraction,
            max_fraction,
            mean_angle,
            coherence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarizationSummary {
    pub valid_bins: usize,
    pub masked_bins: usize,
    pub mean_fraction: f64,
    pub max_fraction: f64,
    /// Circular mean orientation in radians.
    pub mean_angle: f64,
    /// Rayleigh R² of the orientations: 0 = random, 1 = all aligned.
    pub coherence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_4;

    fn field(i: &[f64], q: &[f64], u: &[f64], threshold: f64) -> PolarizationField {
        let shape = (1, i.len());
        let i = Array2::from_shape_vec(shape, i.to_vec()).unwrap();
        let q = Array2::from_shape_vec(shape, q.to_vec()).unwrap();
        let u = Array2::from_shape_vec(shape, u.to_vec()).unwrap();
        PolarizationField::from_planes(&i, &q, &u, BinFactors::new(1, 1), threshold).unwrap()
    }

    #[test]
    fn test_q_only_bin() {
        let f = field(&[2.0], &[1.0], &[0.0], DEFAULT_THRESHOLD);
        assert_eq!(f.angle[[0, 0]], 0.0);
        assert_eq!(f.fraction[[0, 0]], 0.5);
        assert_eq!(f.u[[0, 0]], 0.5);
        assert_eq!(f.v[[0, 0]], 0.0);
        assert!(f.valid[[0, 0]]);
    }

    #[test]
    fn test_low_intensity_masked_exactly() {
        let f = field(&[0.05, 0.0999, -1.0, f64::NAN], &[5.0, 0.3, 1.0, 1.0], &[-3.0, 0.2, 1.0, 1.0], 0.1);
        for x in 0..4 {
            assert_eq!(f.angle[[0, x]], 0.0);
            assert_eq!(f.fraction[[0, x]], 0.0);
            assert_eq!(f.u[[0, x]], 0.0);
            assert_eq!(f.v[[0, x]], 0.0);
            assert!(!f.valid[[0, x]]);
        }
    }

    #[test]
    fn test_negative_zero_u_angle_in_range() {
        let f = field(&[1.0, 1.0], &[-0.5, -0.5], &[-0.0, 0.0], 0.1);
        for &a in f.angle.iter() {
            assert_eq!(a, FRAC_PI_2);
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let f = field(&[0.1], &[0.01], &[0.0], 0.1);
        assert!(f.valid[[0, 0]]);
        assert_relative_eq!(f.fraction[[0, 0]], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_u_only_gives_45_degrees() {
        let f = field(&[1.0, 1.0], &[0.0, 0.0], &[0.2, -0.2], 0.1);
        assert_relative_eq!(f.angle[[0, 0]], FRAC_PI_4, epsilon = 1e-12);
        assert_relative_eq!(f.angle[[0, 1]], -FRAC_PI_4, epsilon = 1e-12);
        assert_relative_eq!(f.fraction[[0, 0]], 0.2, epsilon = 1e-12);
        assert_relative_eq!(f.u[[0, 0]], 0.2 * FRAC_PI_4.cos(), epsilon = 1e-12);
        assert_relative_eq!(f.angle_degrees()[[0, 1]], -45.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fraction_bounded_for_physical_inputs() {
        let i: Vec<f64> = (1..50).map(|k| k as f64).collect();
        let q: Vec<f64> = i.iter().enumerate().map(|(k, &v)| 0.3 * v * (k as f64).cos()).collect();
        let u: Vec<f64> = i.iter().enumerate().map(|(k, &v)| 0.3 * v * (k as f64).sin()).collect();
        let f = field(&i, &q, &u, 0.1);
        assert!(f.fraction.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let a = Array2::<f64>::ones((2, 2));
        let b = Array2::<f64>::ones((2, 3));
        assert!(PolarizationField::from_planes(&a, &a, &b, BinFactors::new(1, 1), 0.1).is_err());
    }

    #[test]
    fn test_summary_coherence() {
        // All vectors at +30°, plus one masked bin.
        let a = 30f64.to_radians();
        let (q, u) = ((2.0 * a).cos() * 0.1, (2.0 * a).sin() * 0.1);
        let f = field(&[1.0, 1.0, 1.0, 0.0], &[q, q, q, 0.0], &[u, u, u, 0.0], 0.1);
        let s = f.summary();
        assert_eq!(s.valid_bins, 3);
        assert_eq!(s.masked_bins, 1);
        assert_relative_eq!(s.mean_fraction, 0.1, epsilon = 1e-12);
        assert_relative_eq!(s.mean_angle, a, epsilon = 1e-12);
        assert_relative_eq!(s.coherence, 1.0, epsilon = 1e-12);

        // Orthogonal pair cancels.
        let f = field(&[1.0, 1.0], &[0.1, -0.1], &[0.0, 0.0], 0.1);
        assert!(f.summary().coherence < 1e-12);
    }
}
