//! Polarization map from Stokes I, Q and U FITS images.

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::Level;

use stokesmap::{
    save_image, Background, BinMode, ImageSelector, JpegConfig, KernelPolicy, LengthUnit, Pipeline,
    PipelineConfig, StretchMode,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum KernelArg {
    Gaussian,
    Lorentzian,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Polarization vector maps from Stokes I/Q/U FITS images")]
struct Args {
    /// Stokes I image (path or http(s) URL)
    #[arg(long)]
    stokes_i: Option<String>,

    /// Stokes Q image (path or http(s) URL)
    #[arg(long)]
    stokes_q: Option<String>,

    /// Stokes U image (path or http(s) URL)
    #[arg(long)]
    stokes_u: Option<String>,

    /// EXTNAME of the image HDU in each input (default: first image HDU)
    #[arg(long)]
    extension: Option<String>,

    /// Plane index for data cubes
    #[arg(long)]
    plane: Option<usize>,

    /// JSON run configuration; flags given here override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Physical size of one pixel, in the configured unit (au by default)
    #[arg(long)]
    pixel_size: Option<f64>,

    /// Unit of the pixel size
    #[arg(long, value_enum)]
    pixel_unit: Option<LengthUnit>,

    /// Distance to the source, in the configured unit (pc by default)
    #[arg(long)]
    distance: Option<f64>,

    /// Unit of the distance
    #[arg(long, value_enum)]
    distance_unit: Option<LengthUnit>,

    /// Right ascension of the image centre in degrees
    #[arg(long, allow_negative_numbers = true)]
    ra: Option<f64>,

    /// Declination of the image centre in degrees
    #[arg(long, allow_negative_numbers = true)]
    dec: Option<f64>,

    /// Instrument response model
    #[arg(long, value_enum)]
    kernel: Option<KernelArg>,

    /// Kernel half-size in sigmas (gaussian) or half-widths (lorentzian)
    #[arg(long)]
    truncate: Option<f64>,

    /// Beam FWHM in arcseconds
    #[arg(long)]
    resolution: Option<f64>,

    /// Block height in pixels
    #[arg(long)]
    bin_rows: Option<usize>,

    /// Block width in pixels
    #[arg(long)]
    bin_cols: Option<usize>,

    #[arg(long, value_enum)]
    bin_mode: Option<BinMode>,

    /// Bins with Stokes I below this are masked
    #[arg(long, allow_negative_numbers = true)]
    threshold: Option<f64>,

    /// Output image (.png, .jpg)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Plane drawn under the vectors
    #[arg(long, value_enum)]
    background: Option<Background>,

    #[arg(long, value_enum)]
    stretch: Option<StretchMode>,

    /// Vector length for a fully polarized bin, in units of the smaller bin side
    #[arg(long)]
    vector_scale: Option<f32>,

    /// Save the convolved planes with their WCS as FITS into this directory
    #[arg(long)]
    save_planes: Option<PathBuf>,

    /// Download directory for remote inputs
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn into_config(self) -> Result<(PipelineConfig, Option<PathBuf>, Option<PathBuf>, Option<PathBuf>)> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load_json(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(v) = self.stokes_i {
            config.stokes_i = v;
        }
        if let Some(v) = self.stokes_q {
            config.stokes_q = v;
        }
        if let Some(v) = self.stokes_u {
            config.stokes_u = v;
        }
        if let Some(ext) = self.extension {
            config.selector = ImageSelector {
                extension: Some(ext),
                plane: config.selector.plane,
            };
        }
        if let Some(plane) = self.plane {
            config.selector.plane = plane;
        }
        if let Some(v) = self.pixel_size {
            config.pixel_size.value = v;
        }
        if let Some(unit) = self.pixel_unit {
            config.pixel_size.unit = unit;
        }
        if let Some(v) = self.distance {
            config.distance.value = v;
        }
        if let Some(unit) = self.distance_unit {
            config.distance.unit = unit;
        }
        if let Some(v) = self.ra {
            config.ra_deg = v;
        }
        if let Some(v) = self.dec {
            config.dec_deg = v;
        }
        // Truncation is in different units per shape, so it only carries over
        // when the configured shape is kept.
        config.kernel = match (self.kernel, config.kernel) {
            (Some(KernelArg::Gaussian), KernelPolicy::Lorentzian { .. }) => KernelPolicy::gaussian(),
            (Some(KernelArg::Lorentzian), KernelPolicy::Gaussian { .. }) => KernelPolicy::lorentzian(),
            (_, kernel) => kernel,
        };
        if let Some(t) = self.truncate {
            config.kernel = config.kernel.with_truncate(t);
        }
        if let Some(v) = self.resolution {
            config.resolution_arcsec = v;
        }
        if let Some(v) = self.bin_rows {
            config.bin_rows = v;
        }
        if let Some(v) = self.bin_cols {
            config.bin_cols = v;
        }
        if let Some(v) = self.bin_mode {
            config.bin_mode = v;
        }
        if let Some(v) = self.threshold {
            config.threshold = v;
        }
        if let Some(v) = self.background {
            config.render.background = v;
        }
        if let Some(v) = self.stretch {
            config.render.stretch = v;
        }
        if let Some(v) = self.vector_scale {
            config.render.quiver.scale = v;
        }

        Ok((config, self.output, self.save_planes, self.cache_dir))
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let (config, output, save_planes, cache_dir) = args.into_config()?;

    let mut pipeline = Pipeline::new(config);
    if let Some(dir) = cache_dir {
        pipeline = pipeline.with_cache_dir(dir);
    }
    let result = pipeline.run()?;
    let config = pipeline.config();

    let summary = result.field.summary();
    let (rows, cols) = result.field.dim();
    println!("Image:           {}x{} px", result.convolved.dim().1, result.convolved.dim().0);
    println!("Pixel scale:     {:.6}\"", result.wcs.pixel_scale_arcsec());
    println!("Kernel:          {} {}x{}", config.kernel, result.kernel.size(), result.kernel.size());
    println!("Bins:            {}x{} ({}x{} px blocks, {:?})", cols, rows, config.bin_cols, config.bin_rows, config.bin_mode);
    println!("Valid bins:      {} ({} masked, I < {})", summary.valid_bins, summary.masked_bins, config.threshold);
    println!("Mean fraction:   {:.4}", summary.mean_fraction);
    println!("Max fraction:    {:.4}", summary.max_fraction);
    println!("Mean angle:      {:.2} deg", summary.mean_angle.to_degrees());
    println!("Coherence (R²):  {:.4}", summary.coherence);

    if let Some(dir) = save_planes {
        let written = result.save_planes(&dir)?;
        println!("Saved {} plane(s) to {}", written.len(), dir.display());
    }

    if let Some(path) = output {
        let image = result.render(config);
        save_image(
            &image,
            &path,
            JpegConfig {
                quality: config.render.jpeg_quality,
            },
        )?;
        println!("Saved map to {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_file(dir: &std::path::Path, json: &str) -> String {
        let path = dir.join("run.json");
        std::fs::write(&path, json).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn parse(args: &[&str]) -> PipelineConfig {
        let args = Args::try_parse_from(std::iter::once("stokesmap").chain(args.iter().copied())).unwrap();
        args.into_config().unwrap().0
    }

    #[test]
    fn test_kernel_flag_keeps_configured_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file(dir.path(), r#"{"kernel": {"type": "gaussian", "truncate": 2.5}}"#);

        let config = parse(&["--config", path.as_str(), "--kernel", "gaussian"]);
        assert_eq!(config.kernel, KernelPolicy::Gaussian { truncate: 2.5 });

        let config = parse(&["--config", path.as_str(), "--kernel", "lorentzian"]);
        assert_eq!(config.kernel, KernelPolicy::lorentzian());

        let config = parse(&["--config", path.as_str(), "--kernel", "lorentzian", "--truncate", "3"]);
        assert_eq!(config.kernel, KernelPolicy::Lorentzian { truncate: 3.0 });
    }

    #[test]
    fn test_unit_flags_apply_to_configured_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file(
            dir.path(),
            r#"{"pixel_size": {"value": 2.0, "unit": "au"}, "distance": {"value": 50.0, "unit": "pc"}}"#,
        );

        let config = parse(&["--config", path.as_str(), "--distance-unit", "ly"]);
        assert_eq!(config.distance.value, 50.0);
        assert_eq!(config.distance.unit, LengthUnit::LightYear);
        assert_eq!(config.pixel_size.value, 2.0);

        let config = parse(&["--config", path.as_str(), "--pixel-size", "3"]);
        assert_eq!(config.pixel_size.value, 3.0);
        assert_eq!(config.pixel_size.unit, LengthUnit::AstronomicalUnit);

        let config = parse(&["--pixel-unit", "km", "--pixel-size", "1e8"]);
        assert_eq!(config.pixel_size.unit, LengthUnit::Kilometer);
        assert_eq!(config.pixel_size.value, 1e8);
    }
}
