pub mod config;
pub mod convolve;
pub mod fetch;
pub mod formats;
pub mod kernel;
pub mod output;
pub mod pipeline;
pub mod polarization;
pub mod processing;
pub mod render;
pub mod types;
pub mod units;
pub mod wcs;

pub use config::{PipelineConfig, RenderSettings};
pub use convolve::{convolve_fft, convolve_stokes, FftConvolver};
pub use fetch::{DataSource, FitsFetcher};
pub use formats::{FitsFile, FitsHeader, FitsImage, ImageSelector};
pub use kernel::{Kernel, KernelPolicy};
pub use output::{save_image, JpegConfig};
pub use pipeline::{Pipeline, PipelineResult};
pub use polarization::{PolarizationField, PolarizationSummary};
pub use processing::binning::{bin_plane, bin_stokes, BinFactors, BinMode, BinnedStokes};
pub use processing::stretch::StretchMode;
pub use render::{
    compute_vectors, create_vector_layer, draw_vectors, render_map, render_plane, Background,
    ColorScheme, QuiverConfig, QuiverVector,
};
pub use types::{RenderedImage, Stokes, StokesCube};
pub use units::{Length, LengthUnit};
pub use wcs::LinearWcs;
