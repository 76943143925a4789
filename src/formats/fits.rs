use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::Array2;
use num_traits::ToPrimitive;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::header::{Card, FitsHeader, FITS_BLOCK_SIZE, FITS_CARD_SIZE};

const CHUNK: usize = 65536;
const PAR_THRESHOLD: usize = CHUNK * 2;

/// One header-data unit. `data` holds the raw big-endian bytes of the data array.
pub struct Hdu {
    pub header: FitsHeader,
    data: Vec<u8>,
}

/// Which image to take out of a FITS file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSelector {
    /// `EXTNAME` of the image HDU; `None` picks the first HDU carrying image data.
    pub extension: Option<String>,
    /// Plane index along the third axis for cubes.
    #[serde(default)]
    pub plane: usize,
}

impl ImageSelector {
    pub fn named(extension: &str) -> Self {
        ImageSelector {
            extension: Some(extension.to_string()),
            plane: 0,
        }
    }
}

/// A 2D image plane together with the header it came from.
#[derive(Debug, Clone)]
pub struct FitsImage {
    pub header: FitsHeader,
    pub data: Array2<f64>,
}

impl FitsImage {
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}

impl Hdu {
    pub fn extname(&self) -> Option<&str> {
        self.header.get_string("EXTNAME")
    }

    pub fn bitpix(&self) -> i64 {
        self.header.get_int("BITPIX").unwrap_or(8)
    }

    /// Axis lengths in header order (NAXIS1 first).
    pub fn axes(&self) -> Vec<usize> {
        let naxis = self.header.get_int("NAXIS").unwrap_or(0).max(0);
        (1..=naxis)
            .map(|i| self.header.get_int(&format!("NAXIS{}", i)).unwrap_or(0).max(0) as usize)
            .collect()
    }

    pub fn is_image(&self) -> bool {
        let is_image_kind = match self.header.get_string("XTENSION") {
            Some(kind) => kind.trim().eq_ignore_ascii_case("IMAGE"),
            None => true,
        };
        let axes = self.axes();
        is_image_kind && axes.len() >= 2 && axes.iter().all(|&n| n > 0)
    }

    /// Decode one plane of the data array, applying BSCALE/BZERO and BLANK.
    pub fn read_plane(&self, plane: usize) -> Result<Array2<f64>> {
        if !self.is_image() {
            bail!("HDU does not contain a 2D image");
        }
        let axes = self.axes();
        let (width, height) = (axes[0], axes[1]);
        let planes = axes[2..]
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(n))
            .context("FITS image dimensions overflow")?;
        if plane >= planes {
            bail!("Plane {} out of range: image has {} plane(s)", plane, planes);
        }

        let bytes_per_pixel = bytes_per_pixel(self.bitpix())?;
        let plane_bytes = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(bytes_per_pixel))
            .context("FITS image dimensions overflow")?;
        let start = plane
            .checked_mul(plane_bytes)
            .context("FITS image dimensions overflow")?;
        let end = start
            .checked_add(plane_bytes)
            .context("FITS image dimensions overflow")?;
        let raw = self
            .data
            .get(start..end)
            .context("FITS data array is truncated")?;

        let scaling = Scaling {
            bscale: self.header.get_float("BSCALE").unwrap_or(1.0),
            bzero: self.header.get_float("BZERO").unwrap_or(0.0),
            blank: self.header.get_int("BLANK"),
        };
        let pixels = decode_pixels(raw, self.bitpix(), &scaling)?;

        Array2::from_shape_vec((height, width), pixels).context("Failed to reshape FITS image data")
    }
}

struct Scaling {
    bscale: f64,
    bzero: f64,
    blank: Option<i64>,
}

impl Scaling {
    #[inline]
    fn apply_int<T: ToPrimitive>(&self, raw: T) -> f64 {
        let raw_i = raw.to_i64().unwrap_or_default();
        if self.blank == Some(raw_i) {
            return f64::NAN;
        }
        self.bzero + self.bscale * raw_i as f64
    }

    #[inline]
    fn apply_float<T: ToPrimitive>(&self, raw: T) -> f64 {
        self.bzero + self.bscale * raw.to_f64().unwrap_or(f64::NAN)
    }
}

/// Bytes per pixel for a supported BITPIX.
fn bytes_per_pixel(bitpix: i64) -> Result<usize> {
    match bitpix {
        8 | 16 | 32 | 64 | -32 | -64 => Ok(bitpix.unsigned_abs() as usize / 8),
        other => bail!("Unsupported BITPIX value: {}", other),
    }
}

fn decode_pixels(raw: &[u8], bitpix: i64, scaling: &Scaling) -> Result<Vec<f64>> {
    let bytes_per_pixel = bytes_per_pixel(bitpix)?;
    let num_pixels = raw.len() / bytes_per_pixel;
    let mut out = vec![0f64; num_pixels];

    let convert = |s: &[u8], d: &mut [f64]| {
        for (i, px) in d.iter_mut().enumerate() {
            let b = &s[i * bytes_per_pixel..(i + 1) * bytes_per_pixel];
            *px = match bitpix {
                8 => scaling.apply_int(b[0]),
                16 => scaling.apply_int(i16::from_be_bytes([b[0], b[1]])),
                32 => scaling.apply_int(i32::from_be_bytes([b[0], b[1], b[2], b[3]])),
                64 => scaling.apply_int(i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])),
                -32 => scaling.apply_float(f32::from_be_bytes([b[0], b[1], b[2], b[3]])),
                _ => scaling.apply_float(f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])),
            };
        }
    };

    if num_pixels >= PAR_THRESHOLD {
        raw.par_chunks(CHUNK * bytes_per_pixel)
            .zip(out.par_chunks_mut(CHUNK))
            .for_each(|(s, d)| convert(s, d));
    } else {
        convert(raw, &mut out);
    }

    Ok(out)
}

/// All HDUs of a FITS file.
pub struct FitsFile {
    hdus: Vec<Hdu>,
}

impl FitsFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to open FITS file {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("Failed to parse FITS file {}", path.display()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if !bytes.starts_with(b"SIMPLE  =") {
            bail!("Not a FITS file: missing SIMPLE keyword");
        }

        let mut hdus = Vec::new();
        let mut offset = 0;
        while offset + FITS_BLOCK_SIZE <= bytes.len() {
            let (header, header_len) = parse_header(&bytes[offset..])?;
            offset += header_len;
            if hdus.is_empty() && header.get_bool("SIMPLE") == Some(false) {
                bail!("Primary header declares SIMPLE = F: file does not conform to FITS");
            }

            let data_len = data_size(&header)?;
            let data = bytes
                .get(offset..offset + data_len)
                .context("Failed to read FITS data: file is truncated")?
                .to_vec();
            offset += data_len.div_ceil(FITS_BLOCK_SIZE) * FITS_BLOCK_SIZE;

            hdus.push(Hdu { header, data });

            // Trailing bytes that do not start a new extension are ignored.
            if !bytes.get(offset..).is_some_and(|rest| rest.starts_with(b"XTENSION")) {
                break;
            }
        }

        if hdus.is_empty() {
            bail!("FITS file contains no HDUs");
        }
        Ok(FitsFile { hdus })
    }

    pub fn hdus(&self) -> &[Hdu] {
        &self.hdus
    }

    pub fn primary(&self) -> &Hdu {
        &self.hdus[0]
    }

    /// Find an HDU by `EXTNAME` (case-insensitive).
    pub fn find(&self, extname: &str) -> Option<&Hdu> {
        self.hdus.iter().find(|h| {
            h.extname()
                .is_some_and(|name| name.trim().eq_ignore_ascii_case(extname.trim()))
        })
    }

    pub fn select(&self, selector: &ImageSelector) -> Result<&Hdu> {
        match &selector.extension {
            Some(name) => match self.find(name) {
                Some(hdu) => Ok(hdu),
                None => {
                    let available: Vec<&str> = self.hdus.iter().filter_map(Hdu::extname).collect();
                    bail!("No extension named '{}' (available: {:?})", name, available)
                }
            },
            None => self
                .hdus
                .iter()
                .find(|h| h.is_image())
                .context("FITS file contains no image HDU"),
        }
    }

    pub fn read_image(&self, selector: &ImageSelector) -> Result<FitsImage> {
        let hdu = self.select(selector)?;
        let data = hdu.read_plane(selector.plane)?;
        Ok(FitsImage {
            header: hdu.header.clone(),
            data,
        })
    }
}

/// Read one image plane from a FITS file on disk.
pub fn read_fits_image(path: &Path, selector: &ImageSelector) -> Result<FitsImage> {
    FitsFile::open(path)?.read_image(selector)
}

fn parse_header(bytes: &[u8]) -> Result<(FitsHeader, usize)> {
    let mut header = FitsHeader::new();
    let mut offset = 0;

    loop {
        let block = bytes
            .get(offset..offset + FITS_BLOCK_SIZE)
            .context("Failed to read FITS header block")?;
        offset += FITS_BLOCK_SIZE;

        for card_bytes in block.chunks_exact(FITS_CARD_SIZE) {
            let card = std::str::from_utf8(card_bytes).unwrap_or("");
            if card.starts_with("END") && card.as_bytes().get(3).map_or(true, |&b| b == b' ') {
                return Ok((header, offset));
            }
            if card.trim().is_empty() {
                continue;
            }
            header.push(Card::parse(card));
        }
    }
}

fn data_size(header: &FitsHeader) -> Result<usize> {
    let bytes_per_pixel = bytes_per_pixel(header.require_int("BITPIX")?)?;
    let naxis = header.require_int("NAXIS")?;
    if !(0..=999).contains(&naxis) {
        bail!("Invalid NAXIS value: {}", naxis);
    }
    if naxis == 0 {
        return Ok(0);
    }
    let mut pixels: usize = 1;
    for i in 1..=naxis {
        let n = header.require_int(&format!("NAXIS{}", i))?;
        if n < 0 {
            bail!("Invalid NAXIS{} value: {}", i, n);
        }
        pixels = usize::try_from(n)
            .ok()
            .and_then(|n| pixels.checked_mul(n))
            .with_context(|| format!("FITS data size overflows at NAXIS{} = {}", i, n))?;
    }
    let pcount = header.get_int("PCOUNT").unwrap_or(0).max(0) as usize;
    let gcount = header.get_int("GCOUNT").unwrap_or(1).max(1) as usize;
    pixels
        .checked_add(pcount)
        .and_then(|n| n.checked_mul(gcount))
        .and_then(|n| n.checked_mul(bytes_per_pixel))
        .context("FITS data size overflows")
}

/// Structural keywords the writer owns; copies in `header` are dropped.
const STRUCTURAL_KEYWORDS: [&str; 9] = [
    "SIMPLE", "XTENSION", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "EXTEND", "PCOUNT", "GCOUNT",
];

/// Encode a primary HDU with `BITPIX = -64` holding `data` and the user cards of `header`.
pub fn encode_image(header: &FitsHeader, data: &Array2<f64>) -> Vec<u8> {
    let (height, width) = data.dim();

    let mut out_header = FitsHeader::new();
    out_header.set_bool("SIMPLE", true, Some("conforms to FITS standard"));
    out_header.set_int("BITPIX", -64, Some("array data type"));
    out_header.set_int("NAXIS", 2, Some("number of array dimensions"));
    out_header.set_int("NAXIS1", width as i64, None);
    out_header.set_int("NAXIS2", height as i64, None);
    for card in header.cards() {
        let structural = STRUCTURAL_KEYWORDS.contains(&card.keyword.as_str())
            || card.keyword.starts_with("NAXIS")
            || matches!(card.keyword.as_str(), "BSCALE" | "BZERO" | "BLANK" | "EXTNAME");
        if !structural {
            out_header.push(card.clone());
        }
    }

    let mut out = out_header.to_bytes();
    out.reserve(data.len() * 8 + FITS_BLOCK_SIZE);
    for &v in data.iter() {
        out.extend_from_slice(&v.to_be_bytes());
    }
    let padded = out.len().div_ceil(FITS_BLOCK_SIZE) * FITS_BLOCK_SIZE;
    out.resize(padded, 0);
    out
}

pub fn write_fits_image<P: AsRef<Path>>(path: P, header: &FitsHeader, data: &Array2<f64>) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, encode_image(header, data))
        .with_context(|| format!("Failed to write FITS file {}", path.display()))
}
