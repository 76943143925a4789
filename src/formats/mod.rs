pub mod fits;
pub mod header;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Result};

pub use fits::{FitsFile, FitsImage, ImageSelector};
pub use header::{Card, FitsHeader, HeaderValue};

pub fn read_image(path: &Path, selector: &ImageSelector) -> Result<FitsImage> {
    if is_fits(path) {
        fits::read_fits_image(path, selector)
    } else {
        bail!(
            "Unsupported file format: {}",
            path.extension()
                .and_then(|e| e.to_str())
                .unwrap_or("unknown")
        )
    }
}

fn is_fits(path: &Path) -> bool {
    // Check magic bytes: "SIMPLE  ="
    if let Ok(mut f) = File::open(path) {
        let mut buf = [0u8; 9];
        if f.read_exact(&mut buf).is_ok() && &buf == b"SIMPLE  =" {
            return true;
        }
    }
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if ext.eq_ignore_ascii_case("fits") || ext.eq_ignore_ascii_case("fit") || ext.eq_ignore_ascii_case("fts") {
            return true;
        }
    }
    false
}
