use std::path::Path;

use anyhow::{bail, Context, Result};
use image::{ImageBuffer, Rgb, Rgba};

use crate::types::RenderedImage;

pub struct JpegConfig {
    /// JPEG quality (1-100)
    pub quality: u8,
}

impl Default for JpegConfig {
    fn default() -> Self {
        JpegConfig { quality: 95 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageFormat {
    Png,
    Jpeg,
}

fn format_for(path: &Path) -> Result<ImageFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => Ok(ImageFormat::Png),
        Some("jpg") | Some("jpeg") => Ok(ImageFormat::Jpeg),
        _ => bail!(
            "Unsupported output format for {} (expected .png, .jpg or .jpeg)",
            path.display()
        ),
    }
}

/// Save a rendered image as PNG or JPEG, chosen by the file extension.
pub fn save_image<P: AsRef<Path>>(image: &RenderedImage, path: P, config: JpegConfig) -> Result<()> {
    let path = path.as_ref();
    let format = format_for(path)?;
    let width = image.width as u32;
    let height = image.height as u32;

    match (format, image.channels) {
        (ImageFormat::Png, 3) => {
            let buf: ImageBuffer<Rgb<u8>, _> = ImageBuffer::from_raw(width, height, image.data.clone())
                .context("Failed to create image buffer from rendered data")?;
            buf.save(path)
                .with_context(|| format!("Failed to save PNG {}", path.display()))?;
        }
        (ImageFormat::Png, 4) => {
            let buf: ImageBuffer<Rgba<u8>, _> = ImageBuffer::from_raw(width, height, image.data.clone())
                .context("Failed to create image buffer from rendered data")?;
            buf.save(path)
                .with_context(|| format!("Failed to save PNG {}", path.display()))?;
        }
        (ImageFormat::Jpeg, 3) | (ImageFormat::Jpeg, 4) => {
            // JPEG has no alpha channel.
            let rgb: Vec<u8> = if image.channels == 4 {
                image.data.chunks_exact(4).flat_map(|px| [px[0], px[1], px[2]]).collect()
            } else {
                image.data.clone()
            };
            let buf: ImageBuffer<Rgb<u8>, _> = ImageBuffer::from_raw(width, height, rgb)
                .context("Failed to create image buffer from rendered data")?;

            let mut output = std::fs::File::create(path)
                .with_context(|| format!("Failed to create output file {}", path.display()))?;
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, config.quality);
            buf.write_with_encoder(encoder)
                .context("Failed to encode JPEG")?;
        }
        (_, channels) => bail!("Cannot save image with {} channels", channels),
    }

    Ok(())
}
