//! Block reduction of image planes to a coarser grid.

use anyhow::{bail, Result};
use ndarray::{s, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::StokesCube;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BinMode {
    /// Average of every pixel in the block.
    #[default]
    Mean,
    /// Total of every pixel in the block; intensity thresholds then apply to block flux.
    Sum,
    /// First (top-left in array order) pixel of the block.
    Subsample,
}

/// Block size in pixels along rows and columns.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BinFactors {
    pub rows: usize,
    pub cols: usize,
}

impl BinFactors {
    pub fn new(rows: usize, cols: usize) -> Self {
        BinFactors { rows, cols }
    }

    /// Output shape for an input of `shape`; partial blocks at the far edges are dropped.
    pub fn output_shape(&self, shape: (usize, usize)) -> Result<(usize, usize)> {
        if self.rows == 0 || self.cols == 0 {
            bail!("Bin factors must be >= 1, got {}x{}", self.rows, self.cols);
        }
        let out = (shape.0 / self.rows, shape.1 / self.cols);
        if out.0 == 0 || out.1 == 0 {
            bail!(
                "Bin factors {}x{} exceed image size {}x{}",
                self.rows,
                self.cols,
                shape.0,
                shape.1
            );
        }
        Ok(out)
    }

    /// Centre of bin `(row, col)` in 0-based pixel coordinates `(x, y)` of the unbinned image.
    pub fn bin_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            (col as f64 + 0.5) * self.cols as f64 - 0.5,
            (row as f64 + 0.5) * self.rows as f64 - 0.5,
        )
    }
}

pub fn bin_plane(plane: &Array2<f64>, factors: BinFactors, mode: BinMode) -> Result<Array2<f64>> {
    let (out_h, out_w) = factors.output_shape(plane.dim())?;
    let mut output = vec![0f64; out_h * out_w];

    output
        .par_chunks_mut(out_w)
        .enumerate()
        .for_each(|(y, out_row)| bin_row(plane, factors, mode, y, out_row));

    Ok(Array2::from_shape_vec((out_h, out_w), output)?)
}

fn bin_row(plane: &Array2<f64>, factors: BinFactors, mode: BinMode, y: usize, out_row: &mut [f64]) {
    let row0 = y * factors.rows;
    let count = (factors.rows * factors.cols) as f64;
    for (x, out) in out_row.iter_mut().enumerate() {
        let col0 = x * factors.cols;
        *out = match mode {
            BinMode::Subsample => plane[[row0, col0]],
            BinMode::Mean | BinMode::Sum => {
                let total = plane
                    .slice(s![row0..row0 + factors.rows, col0..col0 + factors.cols])
                    .sum();
                if mode == BinMode::Mean {
                    total / count
                } else {
                    total
                }
            }
        };
    }
}

/// Binned Stokes planes and the factors that produced them.
#[derive(Debug, Clone)]
pub struct BinnedStokes {
    pub cube: StokesCube,
    pub factors: BinFactors,
    pub mode: BinMode,
}

pub fn bin_stokes(cube: &StokesCube, factors: BinFactors, mode: BinMode) -> Result<BinnedStokes> {
    let binned = cube.try_map(|_, plane| bin_plane(plane, factors, mode))?;
    Ok(BinnedStokes {
        cube: binned,
        factors,
        mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_binning() {
        let data = Array2::from_shape_fn((4, 6), |(y, x)| (y * 6 + x) as f64);
        let binned = bin_plane(&data, BinFactors::new(2, 3), BinMode::Mean).unwrap();
        assert_eq!(binned.dim(), (2, 2));
        // Block rows 0-1, cols 0-2: 0,1,2,6,7,8 → mean 4
        assert_eq!(binned[[0, 0]], 4.0);
        assert_eq!(binned[[1, 1]], (15.0 + 16.0 + 17.0 + 21.0 + 22.0 + 23.0) / 6.0);
    }

    #[test]
    fn test_sum_binning_scales_mean() {
        let data = Array2::from_shape_fn((4, 6), |(y, x)| (y * 6 + x) as f64);
        let factors = BinFactors::new(2, 3);
        let sum = bin_plane(&data, factors, BinMode::Sum).unwrap();
        let mean = bin_plane(&data, factors, BinMode::Mean).unwrap();
        assert_eq!(sum[[0, 0]], 24.0);
        for (s, m) in sum.iter().zip(mean.iter()) {
            assert!((s - 6.0 * m).abs() < 1e-12);
        }
    }

    #[test]
    fn test_subsample_and_remainder_dropped() {
        let data = Array2::from_shape_fn((5, 7), |(y, x)| (y * 100 + x) as f64);
        let binned = bin_plane(&data, BinFactors::new(2, 3), BinMode::Subsample).unwrap();
        assert_eq!(binned.dim(), (2, 2));
        assert_eq!(binned[[0, 0]], data[[0, 0]]);
        assert_eq!(binned[[1, 1]], data[[2, 3]]);
    }

    #[test]
    fn test_invalid_factors() {
        let data = Array2::<f64>::zeros((10, 10));
        assert!(bin_plane(&data, BinFactors::new(0, 2), BinMode::Mean).is_err());
        assert!(bin_plane(&data, BinFactors::new(11, 2), BinMode::Mean).is_err());
    }

    #[test]
    fn test_default_example_factors() {
        let data = Array2::<f64>::ones((256, 264));
        let binned = bin_plane(&data, BinFactors::new(64, 66), BinMode::Mean).unwrap();
        assert_eq!(binned.dim(), (4, 4));
        assert!(binned.iter().all(|&v| (v - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_bin_center() {
        let f = BinFactors::new(4, 2);
        assert_eq!(f.bin_center(0, 0), (0.5, 1.5));
        assert_eq!(f.bin_center(1, 3), (6.5, 5.5));
    }
}
