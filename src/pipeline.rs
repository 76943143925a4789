use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::convolve::convolve_stokes;
use crate::fetch::{DataSource, FitsFetcher};
use crate::formats::{self, fits::write_fits_image, FitsHeader, ImageSelector};
use crate::kernel::Kernel;
use crate::polarization::PolarizationField;
use crate::processing::binning::{bin_stokes, BinnedStokes};
use crate::render::render_map;
use crate::types::{RenderedImage, Stokes, StokesCube};
use crate::wcs::LinearWcs;

/// Everything a run produces, stage by stage.
pub struct PipelineResult {
    /// Stokes I header with the assigned WCS.
    pub header: FitsHeader,
    pub wcs: LinearWcs,
    pub kernel: Kernel,
    pub convolved: StokesCube,
    pub binned: BinnedStokes,
    pub field: PolarizationField,
}

impl PipelineResult {
    /// Background plane of the convolved cube with the vectors drawn on top.
    pub fn render(&self, config: &PipelineConfig) -> RenderedImage {
        let settings = &config.render;
        render_map(
            &self.convolved,
            settings.background,
            &self.field,
            settings.stretch,
            &settings.quiver,
        )
    }

    /// Write the convolved planes as `<dir>/stokes_{i,q,u}.fits`, each carrying the WCS.
    pub fn save_planes(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let mut written = Vec::with_capacity(3);
        for stokes in Stokes::ALL {
            let path = dir.join(format!("stokes_{}.fits", stokes.to_string().to_lowercase()));
            let mut header = self.header.clone();
            header.set_string("STOKES", &stokes.to_string(), Some("Stokes parameter"));
            header.add_history(&format!("Convolved with {}x{} kernel", self.kernel.size(), self.kernel.size()));
            write_fits_image(&path, &header, self.convolved.plane(stokes))?;
            info!("Wrote {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    cache_dir: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline {
            config,
            cache_dir: None,
        }
    }

    /// Download remote inputs into `dir` instead of the user cache.
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self) -> Result<PipelineResult> {
        let config = &self.config;
        config.validate()?;

        let paths = self.resolve_inputs()?;
        let (cube, header) = load_stokes(&paths, &config.selector)?;
        info!("Loaded Stokes cube {}x{} (cols x rows)", cube.dim().1, cube.dim().0);

        let (wcs, header) = assign_wcs(&header, config, cube.dim())?;
        info!(
            "Pixel scale {:.6}\" at {}, reference ({:.6}, {:.6}) deg",
            wcs.pixel_scale_arcsec(),
            config.distance,
            wcs.crval.0,
            wcs.crval.1
        );

        let kernel = build_kernel(config, &wcs)?;
        info!(
            "{} kernel {}x{} for {}\" resolution",
            config.kernel,
            kernel.size(),
            kernel.size(),
            config.resolution_arcsec
        );

        let convolved = convolve_stokes(&cube, &kernel).context("Convolution failed")?;
        info!("Convolved I, Q and U");

        let binned = bin_stokes(&convolved, config.bin_factors(), config.bin_mode)
            .context("Binning failed")?;
        info!(
            "Binned {}x{} blocks to {}x{} grid",
            config.bin_rows,
            config.bin_cols,
            binned.cube.dim().0,
            binned.cube.dim().1
        );

        let field = PolarizationField::from_binned(&binned, config.threshold)?;
        let summary = field.summary();
        info!(
            "Polarization: {} valid bin(s), {} masked below I = {}",
            summary.valid_bins, summary.masked_bins, config.threshold
        );

        Ok(PipelineResult {
            header,
            wcs,
            kernel,
            convolved,
            binned,
            field,
        })
    }

    /// Local paths for I, Q and U; the fetcher is only built when something is remote.
    fn resolve_inputs(&self) -> Result<[PathBuf; 3]> {
        let sources = [
            DataSource::parse(&self.config.stokes_i),
            DataSource::parse(&self.config.stokes_q),
            DataSource::parse(&self.config.stokes_u),
        ];
        let fetcher = if sources.iter().any(|s| matches!(s, DataSource::Remote(_))) {
            Some(match &self.cache_dir {
                Some(dir) => FitsFetcher::with_cache_dir(dir.clone())?,
                None => FitsFetcher::new()?,
            })
        } else {
            None
        };

        let resolve = |source: &DataSource| -> Result<PathBuf> {
            match (&fetcher, source) {
                (Some(f), _) => f.resolve(source),
                (None, DataSource::Local(path)) => {
                    if !path.exists() {
                        bail!("Input file not found: {}", path.display());
                    }
                    Ok(path.clone())
                }
                (None, DataSource::Remote(url)) => bail!("No fetcher for {}", url),
            }
        };
        Ok([
            resolve(&sources[0])?,
            resolve(&sources[1])?,
            resolve(&sources[2])?,
        ])
    }
}

/// Read I, Q and U and return the cube with the Stokes I header.
pub fn load_stokes(paths: &[PathBuf; 3], selector: &ImageSelector) -> Result<(StokesCube, FitsHeader)> {
    let mut planes = Vec::with_capacity(3);
    let mut header = None;
    for (stokes, path) in Stokes::ALL.iter().zip(paths) {
        let image = formats::read_image(path, selector)
            .with_context(|| format!("Failed to read Stokes {} from {}", stokes, path.display()))?;
        debug!("Stokes {}: {}x{} from {}", stokes, image.width(), image.height(), path.display());
        if header.is_none() {
            header = Some(image.header);
        }
        planes.push(image.data);
    }
    let (Some(header), Some(u), Some(q), Some(i)) = (header, planes.pop(), planes.pop(), planes.pop()) else {
        bail!("Expected three Stokes planes");
    };
    Ok((StokesCube::new(i, q, u)?, header))
}

/// WCS from the configured physical pixel size, distance and sky position, embedded into `header`.
pub fn assign_wcs(
    header: &FitsHeader,
    config: &PipelineConfig,
    shape: (usize, usize),
) -> Result<(LinearWcs, FitsHeader)> {
    let wcs = LinearWcs::from_physical(
        config.pixel_size,
        config.distance,
        config.ra_deg,
        config.dec_deg,
        shape,
    )?;
    let header = wcs.embed(header);
    Ok((wcs, header))
}

pub fn build_kernel(config: &PipelineConfig, wcs: &LinearWcs) -> Result<Kernel> {
    config
        .kernel
        .build(config.resolution_arcsec, wcs.pixel_scale_arcsec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::fits::tests::build_extension_file;
    use crate::processing::binning::BinMode;

    fn write_inputs(dir: &Path, i: &[i16], q: &[i16], u: &[i16], w: usize, h: usize) -> PipelineConfig {
        let mut names = Vec::new();
        for (name, values) in [("I", i), ("Q", q), ("U", u)] {
            let path = dir.join(format!("{}.fits", name));
            std::fs::write(&path, build_extension_file("STOKES", w, h, 0.0, values)).unwrap();
            names.push(path.to_string_lossy().into_owned());
        }
        let mut config = PipelineConfig::default().with_inputs(&names[0], &names[1], &names[2]);
        config.selector = ImageSelector::named("STOKES");
        config
    }

    #[test]
    fn test_run_small_uniform_field() {
        let dir = tempfile::tempdir().unwrap();
        let n = 8 * 8;
        let config = write_inputs(dir.path(), &vec![4; n], &vec![1; n], &vec![0; n], 8, 8)
            .with_bins(4, 4)
            .with_threshold(0.5);

        let result = Pipeline::new(config).run().unwrap();
        assert_eq!(result.field.dim(), (2, 2));
        assert!(result.field.valid.iter().all(|&v| v));
        for &f in result.field.fraction.iter() {
            assert!((f - 0.25).abs() < 1e-9);
        }
        assert_eq!(result.header.get_string("CTYPE1"), Some("RA---TAN"));
        assert_eq!(result.wcs.crpix, (4.5, 4.5));
    }

    #[test]
    fn test_sum_binning_thresholds_block_flux() {
        let dir = tempfile::tempdir().unwrap();
        let n = 8 * 8;
        let mut config = write_inputs(dir.path(), &vec![4; n], &vec![1; n], &vec![0; n], 8, 8).with_bins(4, 4);
        config.bin_mode = BinMode::Sum;

        // Each 4x4 block sums to I = 64.
        let result = Pipeline::new(config.clone().with_threshold(32.0)).run().unwrap();
        assert!(result.field.valid.iter().all(|&v| v));
        for &f in result.field.fraction.iter() {
            assert!((f - 0.25).abs() < 1e-9);
        }

        let result = Pipeline::new(config.with_threshold(100.0)).run().unwrap();
        assert!(result.field.valid.iter().all(|&v| !v));
    }

    #[test]
    fn test_missing_input_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.fits");
        let m = missing.to_string_lossy();
        let config = PipelineConfig::default().with_inputs(&m, &m, &m);
        let err = Pipeline::new(config).run().err().unwrap();
        assert!(format!("{:#}", err).contains("not found"));
    }

    #[test]
    fn test_bins_larger_than_image_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_inputs(dir.path(), &[1; 16], &[0; 16], &[0; 16], 4, 4);
        // Default 64x66 bins cannot fit a 4x4 image.
        assert!(Pipeline::new(config).run().is_err());
    }
}
