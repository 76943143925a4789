use std::fmt;

use anyhow::{bail, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Stokes {
    I,
    Q,
    U,
}

impl Stokes {
    pub const ALL: [Stokes; 3] = [Stokes::I, Stokes::Q, Stokes::U];
}

impl fmt::Display for Stokes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stokes::I => f.write_str("I"),
            Stokes::Q => f.write_str("Q"),
            Stokes::U => f.write_str("U"),
        }
    }
}

/// Stokes I, Q and U planes sharing one shape, indexed `(row, col)`.
#[derive(Debug, Clone, PartialEq)]
pub struct StokesCube {
    i: Array2<f64>,
    q: Array2<f64>,
    u: Array2<f64>,
}

impl StokesCube {
    pub fn new(i: Array2<f64>, q: Array2<f64>, u: Array2<f64>) -> Result<Self> {
        if i.dim() != q.dim() || i.dim() != u.dim() {
            bail!(
                "Stokes planes must share one shape: I={:?} Q={:?} U={:?}",
                i.dim(),
                q.dim(),
                u.dim()
            );
        }
        if i.is_empty() {
            bail!("Stokes planes are empty");
        }
        Ok(StokesCube { i, q, u })
    }

    pub fn i(&self) -> &Array2<f64> {
        &self.i
    }

    pub fn q(&self) -> &Array2<f64> {
        &self.q
    }

    pub fn u(&self) -> &Array2<f64> {
        &self.u
    }

    pub fn plane(&self, stokes: Stokes) -> &Array2<f64> {
        match stokes {
            Stokes::I => &self.i,
            Stokes::Q => &self.q,
            Stokes::U => &self.u,
        }
    }

    /// `(rows, cols)`.
    pub fn dim(&self) -> (usize, usize) {
        self.i.dim()
    }

    /// Polarized intensity `sqrt(Q² + U²)`.
    pub fn polarized_intensity(&self) -> Array2<f64> {
        ndarray::Zip::from(&self.q)
            .and(&self.u)
            .map_collect(|&q, &u| q.hypot(u))
    }

    /// Apply `f` to each plane, keeping the shape invariant.
    pub fn try_map<F>(&self, mut f: F) -> Result<StokesCube>
    where
        F: FnMut(Stokes, &Array2<f64>) -> Result<Array2<f64>>,
    {
        StokesCube::new(
            f(Stokes::I, &self.i)?,
            f(Stokes::Q, &self.q)?,
            f(Stokes::U, &self.u)?,
        )
    }
}

/// 8-bit display image, interleaved RGB or RGBA, row 0 at the top.
pub struct RenderedImage {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    /// Number of channels in `data`: 3 = RGB, 4 = RGBA.
    pub channels: u8,
    /// True when array row 0 was drawn at the bottom of the image.
    pub flip_vertical: bool,
}

impl RenderedImage {
    pub fn new_rgb(width: usize, height: usize) -> Self {
        RenderedImage {
            data: vec![0u8; width * height * 3],
            width,
            height,
            channels: 3,
            flip_vertical: false,
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> &[u8] {
        let bpp = self.channels as usize;
        let idx = (y * self.width + x) * bpp;
        &self.data[idx..idx + bpp]
    }
}
