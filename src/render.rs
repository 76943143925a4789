//! Polarization vector overlay: draws headless quiver segments onto a rendered Stokes plane.

use std::borrow::Cow;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::polarization::PolarizationField;
use crate::processing::color::{replicate_gray_to_rgb, vertical_flip};
use crate::processing::stretch::{stretch_plane, StretchMode};
use crate::types::{RenderedImage, StokesCube};

/// Plane drawn underneath the vectors.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Background {
    #[default]
    I,
    Q,
    U,
    /// Polarized intensity `sqrt(Q² + U²)`.
    Pi,
}

impl Background {
    pub fn select<'a>(&self, cube: &'a StokesCube) -> Cow<'a, Array2<f64>> {
        match self {
            Background::I => Cow::Borrowed(cube.i()),
            Background::Q => Cow::Borrowed(cube.q()),
            Background::U => Cow::Borrowed(cube.u()),
            Background::Pi => Cow::Owned(cube.polarized_intensity()),
        }
    }
}

/// Color scheme for polarization vectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    /// All vectors use a single color (green).
    Uniform,
    /// Color by polarization fraction: green (weak) → yellow → red (strong).
    Fraction,
}

/// Configuration for vector rendering.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QuiverConfig {
    pub color_scheme: ColorScheme,
    /// A fully polarized bin is drawn `scale · min(bin_rows, bin_cols)` source pixels long.
    pub scale: f32,
    /// Vectors shorter than this many output pixels are skipped.
    pub min_length: f32,
    /// Line thickness: 1 = single pixel, 2 = plus of radius 1, 3 or more = plus of radius 2.
    pub line_width: u8,
    /// Fraction below this is green.
    pub fraction_good: f32,
    /// Fraction between `fraction_good` and this is yellow; at or above is red.
    pub fraction_warn: f32,
}

impl Default for QuiverConfig {
    fn default() -> Self {
        QuiverConfig {
            color_scheme: ColorScheme::Uniform,
            scale: 1.0,
            min_length: 1.0,
            line_width: 1,
            fraction_good: 0.1,
            fraction_warn: 0.3,
        }
    }
}

/// One vector in output image coordinates, pivoting on its midpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct QuiverVector {
    pub x: f32,
    pub y: f32,
    /// Half-extent along X.
    pub half_dx: f32,
    /// Half-extent along Y (output rows grow downward).
    pub half_dy: f32,
    pub fraction: f32,
    pub color: [u8; 3],
}

impl QuiverVector {
    pub fn length(&self) -> f32 {
        2.0 * self.half_dx.hypot(self.half_dy)
    }
}

// ── Tier 1: Raw geometry ──

/// Vector geometry for every valid bin of `field`.
///
/// `source_shape` is the `(rows, cols)` of the unbinned image the field was
/// derived from; the output image may be a scaled rendering of it.
pub fn compute_vectors(
    field: &PolarizationField,
    source_shape: (usize, usize),
    output_width: usize,
    output_height: usize,
    flip_vertical: bool,
    config: &QuiverConfig,
) -> Vec<QuiverVector> {
    let (src_rows, src_cols) = source_shape;
    if src_rows == 0 || src_cols == 0 || output_width == 0 || output_height == 0 {
        return Vec::new();
    }

    let scale_x = output_width as f32 / src_cols as f32;
    let scale_y = output_height as f32 / src_rows as f32;
    let bin_len = field.factors.rows.min(field.factors.cols) as f32;

    let mut vectors = Vec::new();
    for ((row, col), &ok) in field.valid.indexed_iter() {
        if !ok {
            continue;
        }
        let fraction = field.fraction[[row, col]] as f32;
        let angle = field.angle[[row, col]] as f32;
        let half = 0.5 * fraction * config.scale * bin_len;

        let (cx, cy) = field.factors.bin_center(row, col);
        let x = cx as f32 * scale_x;
        let half_dx = half * angle.cos() * scale_x;
        let (y, half_dy) = if flip_vertical {
            (
                output_height as f32 - 1.0 - cy as f32 * scale_y,
                -half * angle.sin() * scale_y,
            )
        } else {
            (cy as f32 * scale_y, half * angle.sin() * scale_y)
        };

        let vector = QuiverVector {
            x,
            y,
            half_dx,
            half_dy,
            fraction,
            color: vector_color(config, fraction),
        };
        if vector.length() >= config.min_length {
            vectors.push(vector);
        }
    }
    vectors
}

// ── Tier 2: RGBA overlay layer ──

/// Rasterize vectors into a transparent RGBA buffer of the output size.
pub fn create_vector_layer(
    field: &PolarizationField,
    source_shape: (usize, usize),
    output_width: usize,
    output_height: usize,
    flip_vertical: bool,
    config: &QuiverConfig,
) -> Vec<u8> {
    let mut layer = vec![0u8; output_width * output_height * 4];
    let vectors = compute_vectors(field, source_shape, output_width, output_height, flip_vertical, config);
    for v in &vectors {
        draw_vector(&mut layer, output_width, output_height, 4, v, config.line_width);
    }
    layer
}

// ── Tier 3: Burn into RenderedImage ──

/// Draw vectors directly onto a rendered image (RGB or RGBA).
pub fn draw_vectors(
    image: &mut RenderedImage,
    field: &PolarizationField,
    source_shape: (usize, usize),
    config: &QuiverConfig,
) {
    let vectors = compute_vectors(
        field,
        source_shape,
        image.width,
        image.height,
        image.flip_vertical,
        config,
    );
    let bpp = image.channels as usize;
    for v in &vectors {
        draw_vector(&mut image.data, image.width, image.height, bpp, v, config.line_width);
    }
}

/// Stretched grayscale rendering of a plane with array row 0 at the bottom.
pub fn render_plane(plane: &Array2<f64>, mode: StretchMode) -> RenderedImage {
    let (height, width) = plane.dim();
    let gray = stretch_plane(plane, mode);
    let mut data = replicate_gray_to_rgb(&gray);
    vertical_flip(&mut data, width, height, 3);
    RenderedImage {
        data,
        width,
        height,
        channels: 3,
        flip_vertical: true,
    }
}

/// Background plane with the polarization vectors burned in.
pub fn render_map(
    cube: &StokesCube,
    background: Background,
    field: &PolarizationField,
    mode: StretchMode,
    config: &QuiverConfig,
) -> RenderedImage {
    let plane = background.select(cube);
    let mut image = render_plane(&plane, mode);
    draw_vectors(&mut image, field, cube.dim(), config);
    image
}

// ── Drawing primitives (private) ──

/// Bounds-checked single pixel write; RGBA buffers get alpha 255.
#[inline]
fn set_pixel_one(buf: &mut [u8], width: usize, height: usize, bpp: usize, x: i32, y: i32, color: [u8; 3]) {
    if x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height {
        let idx = (y as usize * width + x as usize) * bpp;
        buf[idx..idx + 3].copy_from_slice(&color);
        if bpp == 4 {
            buf[idx + 3] = 255;
        }
    }
}

/// lw=1: single pixel, lw=2: 5px plus, lw>=3: 9px plus of radius 2.
#[inline]
fn set_pixel(buf: &mut [u8], width: usize, height: usize, bpp: usize, x: i32, y: i32, color: [u8; 3], lw: u8) {
    set_pixel_one(buf, width, height, bpp, x, y, color);
    for r in 1..lw.min(3) as i32 {
        set_pixel_one(buf, width, height, bpp, x - r, y, color);
        set_pixel_one(buf, width, height, bpp, x + r, y, color);
        set_pixel_one(buf, width, height, bpp, x, y - r, color);
        set_pixel_one(buf, width, height, bpp, x, y + r, color);
    }
}

/// Bresenham line drawing with thickness.
#[allow(clippy::too_many_arguments)]
fn draw_line(buf: &mut [u8], width: usize, height: usize, bpp: usize, x0: i32, y0: i32, x1: i32, y1: i32, color: [u8; 3], lw: u8) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let mut x = x0;
    let mut y = y0;

    loop {
        set_pixel(buf, width, height, bpp, x, y, color, lw);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            if x == x1 { break; }
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            if y == y1 { break; }
            err += dx;
            y += sy;
        }
    }
}

/// Draws `v` with its half-extent capped at the image diagonal, so the
/// rounded endpoints stay near the buffer whatever the fraction.
fn draw_vector(buf: &mut [u8], width: usize, height: usize, bpp: usize, v: &QuiverVector, lw: u8) {
    if !(v.x.is_finite() && v.y.is_finite() && v.half_dx.is_finite() && v.half_dy.is_finite()) {
        return;
    }
    let half = v.half_dx.hypot(v.half_dy);
    let diagonal = (width as f32).hypot(height as f32);
    let shrink = if half > diagonal { diagonal / half } else { 1.0 };
    let (hx, hy) = (v.half_dx * shrink, v.half_dy * shrink);

    draw_line(
        buf,
        width,
        height,
        bpp,
        (v.x - hx).round() as i32,
        (v.y - hy).round() as i32,
        (v.x + hx).round() as i32,
        (v.y + hy).round() as i32,
        v.color,
        lw,
    );
}

fn vector_color(config: &QuiverConfig, fraction: f32) -> [u8; 3] {
    match config.color_scheme {
        ColorScheme::Uniform => [0, 255, 0],
        ColorScheme::Fraction => {
            if fraction < config.fraction_good {
                [0, 255, 0]
            } else if fraction < config.fraction_warn {
                [255, 255, 0]
            } else {
                [255, 64, 64]
            }
        }
    }
}
