use std::path::Path;
use std::process::Command;

use approx::assert_relative_eq;
use ndarray::Array2;

use stokesmap::formats::fits::write_fits_image;
use stokesmap::{
    save_image, FitsFile, FitsHeader, ImageSelector, JpegConfig, KernelPolicy, LinearWcs, Pipeline,
    PipelineConfig,
};

const ROWS: usize = 128;
const COLS: usize = 132;
const FRACTION: f64 = 0.2;

/// Bright left half, faint right half, uniformly polarized at 30°.
fn write_scene(dir: &Path) -> PipelineConfig {
    let angle = 30f64.to_radians();
    let i = Array2::from_shape_fn((ROWS, COLS), |(_, x)| if x < COLS / 2 { 1.0 } else { 0.01 });
    let q = i.mapv(|v| FRACTION * v * (2.0 * angle).cos());
    let u = i.mapv(|v| FRACTION * v * (2.0 * angle).sin());

    let mut header = FitsHeader::new();
    header.set_string("OBJECT", "synthetic disk", None);
    let mut paths = Vec::new();
    for (name, plane) in [("I", &i), ("Q", &q), ("U", &u)] {
        let path = dir.join(format!("{}.fits", name));
        write_fits_image(&path, &header, plane).unwrap();
        paths.push(path.to_string_lossy().into_owned());
    }

    PipelineConfig::default()
        .with_inputs(&paths[0], &paths[1], &paths[2])
        .with_kernel(KernelPolicy::gaussian(), 0.02)
}

#[test]
fn test_full_pipeline_masks_faint_half() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_scene(dir.path());
    let result = Pipeline::new(config).run().unwrap();

    assert_eq!(result.convolved.dim(), (ROWS, COLS));
    assert_eq!(result.binned.cube.dim(), (2, 2));
    let field = &result.field;
    for row in 0..2 {
        assert!(field.valid[[row, 0]]);
        assert_relative_eq!(field.fraction[[row, 0]], FRACTION, max_relative = 1e-9);
        assert_relative_eq!(field.angle_degrees()[[row, 0]], 30.0, epsilon = 1e-6);

        assert!(!field.valid[[row, 1]]);
        assert_eq!(field.fraction[[row, 1]], 0.0);
        assert_eq!(field.angle[[row, 1]], 0.0);
    }

    let summary = field.summary();
    assert_eq!(summary.valid_bins, 2);
    assert_eq!(summary.masked_bins, 2);
    assert_relative_eq!(summary.coherence, 1.0, epsilon = 1e-9);
}

#[test]
fn test_saved_planes_carry_wcs() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_scene(dir.path());
    config.ra_deg = 67.5;
    config.dec_deg = 18.25;
    let result = Pipeline::new(config).run().unwrap();

    let out_dir = dir.path().join("convolved");
    let written = result.save_planes(&out_dir).unwrap();
    assert_eq!(written.len(), 3);

    let fits = FitsFile::open(&written[1]).unwrap();
    let image = fits.read_image(&ImageSelector::default()).unwrap();
    assert_eq!(image.header.get_string("STOKES"), Some("Q"));
    assert_eq!(image.header.get_string("OBJECT"), Some("synthetic disk"));
    for (a, b) in image.data.iter().zip(result.convolved.q().iter()) {
        assert_eq!(a, b);
    }

    let wcs = LinearWcs::from_header(&image.header).unwrap();
    assert_relative_eq!(wcs.crval.0, 67.5, epsilon = 1e-12);
    assert_relative_eq!(wcs.crval.1, 18.25, epsilon = 1e-12);
    assert_relative_eq!(wcs.crpix.0, (COLS as f64 + 1.0) / 2.0, epsilon = 1e-12);
    assert_relative_eq!(wcs.cdelt.0, result.wcs.cdelt.0, max_relative = 1e-12);
    assert!(wcs.cdelt.0 < 0.0);
}

#[test]
fn test_rendered_map_written() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_scene(dir.path());
    let result = Pipeline::new(config.clone()).run().unwrap();

    let image = result.render(&config);
    assert_eq!((image.width, image.height), (COLS, ROWS));
    let path = dir.path().join("map.png");
    save_image(&image, &path, JpegConfig::default()).unwrap();
    assert!(path.metadata().unwrap().len() > 0);
}

#[test]
fn test_cli_reports_summary() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_scene(dir.path());
    let output = dir.path().join("map.jpg");

    let run = Command::new(env!("CARGO_BIN_EXE_stokesmap"))
        .args([
            "--stokes-i",
            config.stokes_i.as_str(),
            "--stokes-q",
            config.stokes_q.as_str(),
            "--stokes-u",
            config.stokes_u.as_str(),
            "--resolution",
            "0.02",
            "--dec",
            "-30",
            "--output",
        ])
        .arg(&output)
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&run.stdout);
    assert!(run.status.success(), "stderr: {}", String::from_utf8_lossy(&run.stderr));
    assert!(stdout.contains("Valid bins:      2 (2 masked"));
    assert!(output.exists());
}

#[test]
fn test_cli_error_exit_code() {
    let run = Command::new(env!("CARGO_BIN_EXE_stokesmap"))
        .args(["--stokes-i", "missing.fits"])
        .output()
        .unwrap();
    assert_eq!(run.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&run.stderr).starts_with("Error:"));
}
