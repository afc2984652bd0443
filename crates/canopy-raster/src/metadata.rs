//! EXIF handling: read a block from a source, check it for GPS data, and
//! attach it to written rasters.
//!
//! Blocks are carried as raw TIFF-structured bytes (what image decoders
//! return). A leading `Exif\0\0` preamble is tolerated on input and stripped.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ImageDecoder, ImageEncoder, ImageReader, RgbImage};
use log::{debug, warn};

const EXIF_PREAMBLE: &[u8] = b"Exif\0\0";
const GPS_IFD_POINTER: u16 = 0x8825;
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;

#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("`{0}` is not a JPEG stream")]
    NotJpeg(String),
    #[error("EXIF block of {0} bytes does not fit in one JPEG segment")]
    TooLarge(usize),
}

/// Container an output file was written as, with respect to EXIF support.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attached {
    Jpeg,
    Png,
    /// Output format cannot carry EXIF; any block was dropped.
    Unsupported,
}

impl Attached {
    pub fn supports_exif(self) -> bool {
        !matches!(self, Attached::Unsupported)
    }
}

fn strip_preamble(block: &[u8]) -> &[u8] {
    block.strip_prefix(EXIF_PREAMBLE).unwrap_or(block)
}

/// Raw EXIF block of an image file, if it carries one.
pub fn read_exif(path: &Path) -> Result<Option<Vec<u8>>, MetadataError> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    Ok(decoder.exif_metadata()?)
}

/// Whether IFD0 of the block links a GPS sub-IFD.
///
/// Malformed blocks are reported as having no GPS data.
pub fn exif_has_gps(block: &[u8]) -> bool {
    let tiff = strip_preamble(block);
    if tiff.len() < 8 {
        return false;
    }
    let big_endian = match &tiff[..4] {
        [b'I', b'I', 0x2A, 0x00] => false,
        [b'M', b'M', 0x00, 0x2A] => true,
        _ => return false,
    };
    let u16_at = |at: usize| -> Option<u16> {
        let b: [u8; 2] = tiff.get(at..at.checked_add(2)?)?.try_into().ok()?;
        Some(if big_endian {
            u16::from_be_bytes(b)
        } else {
            u16::from_le_bytes(b)
        })
    };
    let u32_at = |at: usize| -> Option<u32> {
        let b: [u8; 4] = tiff.get(at..at.checked_add(4)?)?.try_into().ok()?;
        Some(if big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    };

    let Some(ifd0) = u32_at(4).map(|o| o as usize) else {
        return false;
    };
    let Some(entries) = u16_at(ifd0) else {
        return false;
    };
    (0..entries as usize)
        .filter_map(|i| u16_at(ifd0.checked_add(2 + 12 * i)?))
        .any(|tag| tag == GPS_IFD_POINTER)
}

/// EXIF block of `path` if, and only if, it carries GPS data.
pub fn read_gps_exif(path: &Path) -> Result<Option<Vec<u8>>, MetadataError> {
    match read_exif(path)? {
        Some(block) if exif_has_gps(&block) => Ok(Some(block)),
        Some(_) => {
            debug!("{}: EXIF present without GPS data", path.display());
            Ok(None)
        }
        None => Ok(None),
    }
}

fn is_ext(path: &Path, names: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| names.iter().any(|n| e.eq_ignore_ascii_case(n)))
}

/// Encode `image` to `path`, embedding `exif` for JPEG and PNG outputs.
///
/// Other formats are written through the extension-based encoder without
/// metadata.
pub fn save_with_exif(
    image: &RgbImage,
    path: &Path,
    exif: Option<&[u8]>,
    jpeg_quality: u8,
) -> Result<Attached, MetadataError> {
    if is_ext(path, &["jpg", "jpeg"]) {
        let mut encoder =
            JpegEncoder::new_with_quality(BufWriter::new(File::create(path)?), jpeg_quality);
        if let Some(block) = exif {
            encoder
                .set_exif_metadata(strip_preamble(block).to_vec())
                .map_err(image::ImageError::Unsupported)?;
        }
        image.write_with_encoder(encoder)?;
        return Ok(Attached::Jpeg);
    }

    if is_ext(path, &["png"]) {
        let mut encoder = PngEncoder::new(BufWriter::new(File::create(path)?));
        if let Some(block) = exif {
            encoder
                .set_exif_metadata(strip_preamble(block).to_vec())
                .map_err(image::ImageError::Unsupported)?;
        }
        image.write_with_encoder(encoder)?;
        return Ok(Attached::Png);
    }

    image.save(path)?;
    if exif.is_some() {
        warn!(
            "{}: output format cannot carry EXIF, written without metadata",
            path.display()
        );
    }
    Ok(Attached::Unsupported)
}

/// Attach `block` to an already written raster.
///
/// JPEG files get the block spliced in as an APP1 segment without touching
/// the compressed data; any existing EXIF segment is replaced. PNG files
/// are decoded and re-encoded losslessly. Other formats are left as is.
pub fn attach_to_file(path: &Path, block: &[u8]) -> Result<Attached, MetadataError> {
    if is_ext(path, &["jpg", "jpeg"]) {
        let data = fs::read(path)?;
        let spliced = splice_jpeg_exif(&data, block)
            .ok_or_else(|| MetadataError::NotJpeg(path.display().to_string()))??;
        fs::write(path, spliced)?;
        return Ok(Attached::Jpeg);
    }
    if is_ext(path, &["png"]) {
        let image = ImageReader::open(path)?.decode()?.to_rgb8();
        return save_with_exif(&image, path, Some(block), 100);
    }
    warn!(
        "{}: output format cannot carry EXIF, metadata not attached",
        path.display()
    );
    Ok(Attached::Unsupported)
}

/// `None` if `data` is not a JPEG stream.
fn splice_jpeg_exif(data: &[u8], block: &[u8]) -> Option<Result<Vec<u8>, MetadataError>> {
    if data.get(..2)? != JPEG_SOI {
        return None;
    }

    let payload_len = EXIF_PREAMBLE.len() + strip_preamble(block).len();
    let Ok(seg_len) = u16::try_from(payload_len + 2) else {
        return Some(Err(MetadataError::TooLarge(payload_len)));
    };
    let mut segment = Vec::with_capacity(payload_len + 4);
    segment.extend_from_slice(&[0xFF, APP1]);
    segment.extend_from_slice(&seg_len.to_be_bytes());
    segment.extend_from_slice(EXIF_PREAMBLE);
    segment.extend_from_slice(strip_preamble(block));

    let mut out = Vec::with_capacity(data.len() + segment.len());
    out.extend_from_slice(&JPEG_SOI);

    let mut pos = 2;
    let mut inserted = false;
    // Walk the leading APPn segments; JFIF (APP0) must stay first.
    while let (Some(&0xFF), Some(&marker)) = (data.get(pos), data.get(pos + 1)) {
        if !(0xE0..=0xEF).contains(&marker) {
            break;
        }
        let len = u16::from_be_bytes([*data.get(pos + 2)?, *data.get(pos + 3)?]) as usize;
        let end = pos + 2 + len;
        let seg = data.get(pos..end)?;
        if !inserted && marker != APP0 {
            out.extend_from_slice(&segment);
            inserted = true;
        }
        let is_exif = marker == APP1 && seg.get(4..10) == Some(EXIF_PREAMBLE);
        if !is_exif {
            out.extend_from_slice(seg);
        }
        pos = end;
    }
    if !inserted {
        out.extend_from_slice(&segment);
    }
    out.extend_from_slice(&data[pos..]);
    Some(Ok(out))
}
