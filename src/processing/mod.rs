pub mod binning;
pub mod color;
pub mod stretch;
