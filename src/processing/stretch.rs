use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StretchMode {
    /// Midtones transfer function driven by median and MADN.
    #[default]
    Auto,
    /// Finite min..max mapped linearly to 0..255.
    Linear,
}

/// Quickselect: find k-th smallest element (in-place, modifies slice).
fn quickselect(arr: &mut [f32], k: usize) -> f32 {
    let mut left = 0usize;
    let mut right = arr.len() - 1;

    while left < right {
        let mid = left + (right - left) / 2;

        // Median-of-three pivot
        if arr[mid] < arr[left] {
            arr.swap(left, mid);
        }
        if arr[right] < arr[left] {
            arr.swap(left, right);
        }
        if arr[right] < arr[mid] {
            arr.swap(mid, right);
        }
        if right - left < 3 {
            // Three or fewer elements are sorted by the pivot selection above.
            return arr[k];
        }

        let pivot = arr[mid];
        arr.swap(mid, right - 1);

        let mut i = left;
        let mut j = right - 1;
        loop {
            i += 1;
            while arr[i] < pivot {
                i += 1;
            }
            j -= 1;
            while arr[j] > pivot {
                j -= 1;
            }
            if i >= j {
                break;
            }
            arr.swap(i, j);
        }

        // Restore pivot
        arr.swap(i, right - 1);

        if i == k {
            return arr[k];
        } else if i > k {
            right = i - 1;
        } else {
            left = i + 1;
        }
    }

    arr[k]
}

pub fn find_median(data: &mut [f32]) -> f32 {
    let k = data.len() / 2;
    quickselect(data, k)
}

pub struct StretchParams {
    pub shadows: f32,
    pub highlights: f32,
    pub midtones: f32,
}

/// Auto-stretch parameters for data normalized to `[0, max_input]`.
pub fn compute_stretch_params(data: &[f32], max_input: f32) -> StretchParams {
    const MAX_SAMPLES: usize = 500_000;

    if data.is_empty() {
        return StretchParams {
            shadows: 0.0,
            highlights: 1.0,
            midtones: 0.5,
        };
    }

    let num_samples = data.len().min(MAX_SAMPLES);
    let mut samples = if data.len() <= MAX_SAMPLES {
        data.to_vec()
    } else {
        let step = data.len() / MAX_SAMPLES;
        (0..num_samples).map(|i| data[i * step]).collect()
    };

    let median = find_median(&mut samples);

    // Compute MADN
    let mut deviations: Vec<f32> = samples.iter().map(|&v| (v - median).abs()).collect();
    let madn = 1.4826 * find_median(&mut deviations);

    let norm_median = median / max_input;
    let norm_madn = madn / max_input;

    let upper_half = norm_median > 0.5;

    let shadows = if upper_half || norm_madn == 0.0 {
        0.0
    } else {
        (norm_median + (-2.8 * norm_madn)).clamp(0.0, 1.0)
    };

    let highlights = if !upper_half || norm_madn == 0.0 {
        1.0
    } else {
        (norm_median - (-2.8 * norm_madn)).clamp(0.0, 1.0)
    };

    // Midtones via the target-background formula
    let b = 0.25f32;
    let (x, m) = if !upper_half {
        (norm_median - shadows, b)
    } else {
        (b, highlights - norm_median)
    };

    let midtones = if x == 0.0 {
        0.0
    } else if x == m {
        0.5
    } else if x == 1.0 {
        1.0
    } else {
        ((m - 1.0) * x) / ((2.0 * m - 1.0) * x - m)
    };

    StretchParams {
        shadows,
        highlights,
        midtones,
    }
}

/// Midtones transfer of one normalized pixel to 8 bits.
fn stretch_pixel(input: f32, params: &StretchParams) -> u8 {
    let out = if input < params.shadows {
        0.0f32
    } else if input >= params.highlights {
        255.0f32
    } else {
        let range = params.highlights - params.shadows;
        let x = if range > 0.0 { (input - params.shadows) / range } else { 0.0 };
        let m = params.midtones;
        let denom = (2.0 * m - 1.0) * x - m;
        if denom == 0.0 {
            0.0
        } else {
            255.0 * ((m - 1.0) * x) / denom
        }
    };
    out.clamp(0.0, 255.0) as u8
}

/// Finite minimum and maximum, or `None` if the plane has no finite pixel.
fn finite_range(plane: &Array2<f64>) -> Option<(f64, f64)> {
    plane
        .iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Stretch a plane to 8-bit grayscale in array order. Non-finite pixels become 0.
pub fn stretch_plane(plane: &Array2<f64>, mode: StretchMode) -> Vec<u8> {
    let Some((lo, hi)) = finite_range(plane) else {
        return vec![0u8; plane.len()];
    };
    let span = hi - lo;
    let normalized: Vec<f32> = plane
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                f32::NAN
            } else if span > 0.0 {
                ((v - lo) / span) as f32
            } else {
                0.0
            }
        })
        .collect();

    match mode {
        StretchMode::Linear => normalized
            .iter()
            .map(|&v| if v.is_nan() { 0 } else { (v * 255.0).round().clamp(0.0, 255.0) as u8 })
            .collect(),
        StretchMode::Auto => {
            let finite: Vec<f32> = normalized.iter().copied().filter(|v| !v.is_nan()).collect();
            let params = compute_stretch_params(&finite, 1.0);
            normalized
                .iter()
                .map(|&v| if v.is_nan() { 0 } else { stretch_pixel(v, &params) })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_median() {
        let mut data = vec![5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(find_median(&mut data), 3.0);
        let mut data = vec![2.0, 1.0];
        assert_eq!(find_median(&mut data), 2.0);
        let mut data: Vec<f32> = (0..1001).rev().map(|v| v as f32).collect();
        assert_eq!(find_median(&mut data), 500.0);
    }

    #[test]
    fn test_stretch_params_compute() {
        let data: Vec<f32> = (0..1000).map(|x| x as f32).collect();
        let params = compute_stretch_params(&data, 1000.0);

        assert!(params.shadows >= 0.0 && params.shadows < 1.0);
        assert!(params.highlights > 0.0 && params.highlights <= 1.0);
        assert!(params.highlights > params.shadows);
    }

    #[test]
    fn test_linear_stretch_endpoints() {
        let plane = Array2::from_shape_vec((1, 3), vec![-1.0, 0.0, 1.0]).unwrap();
        let out = stretch_plane(&plane, StretchMode::Linear);
        assert_eq!(out, vec![0, 128, 255]);
    }

    #[test]
    fn test_auto_stretch_monotonic_and_nan_black() {
        let mut plane = Array2::from_shape_fn((32, 32), |(y, x)| (y * 32 + x) as f64);
        plane[[0, 0]] = f64::NAN;
        let out = stretch_plane(&plane, StretchMode::Auto);
        assert_eq!(out.len(), 32 * 32);
        assert_eq!(out[0], 0);
        assert!(out[1..].windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*out.last().unwrap(), 255);
    }

    #[test]
    fn test_constant_plane() {
        let plane = Array2::from_elem((4, 4), 7.0);
        let out = stretch_plane(&plane, StretchMode::Auto);
        assert!(out.iter().all(|&v| v == out[0]));
    }
}
