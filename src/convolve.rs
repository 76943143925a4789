//! Frequency-domain convolution with periodic (wrap) boundaries.
//!
//! The kernel is embedded into a grid of the image's shape with its central
//! tap moved to index `(0, 0)`; taps reaching past the image edge wrap
//! around. The product of the two spectra, transformed back and divided by
//! `rows · cols`, is the circular convolution of the image with the kernel.

use std::sync::Arc;

use anyhow::{bail, Result};
use ndarray::Array2;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use tracing::{debug, warn};

use crate::kernel::Kernel;
use crate::types::StokesCube;

/// Weight below which a convolved validity mask counts as "no valid input".
const MASK_EPSILON: f64 = 1e-8;

struct Fft2 {
    rows: usize,
    cols: usize,
    row_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl Fft2 {
    fn new(rows: usize, cols: usize) -> Self {
        let mut planner = FftPlanner::new();
        Fft2 {
            rows,
            cols,
            row_forward: planner.plan_fft_forward(cols),
            row_inverse: planner.plan_fft_inverse(cols),
            col_forward: planner.plan_fft_forward(rows),
            col_inverse: planner.plan_fft_inverse(rows),
        }
    }

    fn forward(&self, data: &mut Vec<Complex<f64>>) {
        self.process(data, &self.row_forward, &self.col_forward);
    }

    /// Unnormalized inverse transform.
    fn inverse(&self, data: &mut Vec<Complex<f64>>) {
        self.process(data, &self.row_inverse, &self.col_inverse);
    }

    fn process(&self, data: &mut Vec<Complex<f64>>, row_fft: &Arc<dyn Fft<f64>>, col_fft: &Arc<dyn Fft<f64>>) {
        data.par_chunks_mut(self.cols).for_each(|row| row_fft.process(row));

        let mut transposed = transpose(data, self.rows, self.cols);
        transposed
            .par_chunks_mut(self.rows)
            .for_each(|col| col_fft.process(col));
        *data = transpose(&transposed, self.cols, self.rows);
    }
}

fn transpose(data: &[Complex<f64>], rows: usize, cols: usize) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); data.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = data[r * cols + c];
        }
    }
    out
}

/// Convolver for one image shape and one kernel; the kernel spectrum is computed once.
pub struct FftConvolver {
    fft: Fft2,
    kernel_spectrum: Vec<Complex<f64>>,
}

impl FftConvolver {
    pub fn new(shape: (usize, usize), kernel: &Kernel) -> Result<Self> {
        let (rows, cols) = shape;
        if rows == 0 || cols == 0 {
            bail!("Cannot convolve an empty image ({}x{})", rows, cols);
        }
        if kernel.size() > rows || kernel.size() > cols {
            debug!(
                "kernel {}x{} exceeds image {}x{}, taps wrap around",
                kernel.size(),
                kernel.size(),
                rows,
                cols
            );
        }

        let fft = Fft2::new(rows, cols);
        let (cy, cx) = kernel.center();
        let mut grid = vec![Complex::new(0.0, 0.0); rows * cols];
        for ((ky, kx), &w) in kernel.weights().indexed_iter() {
            let r = (ky as isize - cy as isize).rem_euclid(rows as isize) as usize;
            let c = (kx as isize - cx as isize).rem_euclid(cols as isize) as usize;
            grid[r * cols + c].re += w;
        }
        fft.forward(&mut grid);

        Ok(FftConvolver {
            fft,
            kernel_spectrum: grid,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.fft.rows, self.fft.cols)
    }

    fn circular(&self, values: impl Iterator<Item = f64>) -> Vec<f64> {
        let mut data: Vec<Complex<f64>> = values.map(|v| Complex::new(v, 0.0)).collect();
        self.fft.forward(&mut data);
        data.par_iter_mut()
            .zip(self.kernel_spectrum.par_iter())
            .for_each(|(d, k)| *d *= *k);
        self.fft.inverse(&mut data);
        let norm = (self.fft.rows * self.fft.cols) as f64;
        data.into_iter().map(|c| c.re / norm).collect()
    }

    /// Convolve one plane. Non-finite pixels are interpolated from their
    /// kernel-weighted valid neighbours; pixels with no valid neighbour stay NaN.
    pub fn apply(&self, plane: &Array2<f64>) -> Result<Array2<f64>> {
        if plane.dim() != self.shape() {
            bail!(
                "Plane shape {:?} does not match convolver shape {:?}",
                plane.dim(),
                self.shape()
            );
        }

        let invalid = plane.iter().filter(|v| !v.is_finite()).count();
        let result = if invalid == 0 {
            self.circular(plane.iter().copied())
        } else {
            warn!("{} non-finite pixel(s) interpolated during convolution", invalid);
            let filled = self.circular(plane.iter().map(|&v| if v.is_finite() { v } else { 0.0 }));
            let weight = self.circular(plane.iter().map(|&v| if v.is_finite() { 1.0 } else { 0.0 }));
            filled
                .into_iter()
                .zip(weight)
                .map(|(v, w)| if w > MASK_EPSILON { v / w } else { f64::NAN })
                .collect()
        };

        Ok(Array2::from_shape_vec(self.shape(), result)?)
    }
}

/// Convolve a single plane with `kernel` using periodic boundaries.
pub fn convolve_fft(plane: &Array2<f64>, kernel: &Kernel) -> Result<Array2<f64>> {
    FftConvolver::new(plane.dim(), kernel)?.apply(plane)
}

/// Convolve I, Q and U with the same kernel.
pub fn convolve_stokes(cube: &StokesCube, kernel: &Kernel) -> Result<StokesCube> {
    let convolver = FftConvolver::new(cube.dim(), kernel)?;
    cube.try_map(|stokes, plane| {
        debug!("convolving Stokes {}", stokes);
        convolver.apply(plane)
    })
}
