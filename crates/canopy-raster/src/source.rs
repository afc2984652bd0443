use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use canopy_core::GeoTransform;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use log::debug;
use tiff::decoder::Decoder as TiffDecoder;
use tiff::tags::Tag;

use crate::TilerError;

/// A decoded source raster with its optional geo-referencing and EXIF.
#[derive(Clone, Debug)]
pub struct SourceImage {
    /// Source identity used in tile names and manifest rows.
    pub id: String,
    pub path: PathBuf,
    pub image: RgbImage,
    /// Pixel -> geo transform, for GeoTIFF sources.
    pub geo: Option<GeoTransform>,
    /// Raw EXIF (TIFF-structured, without the `Exif\0\0` preamble).
    pub exif: Option<Vec<u8>>,
}

/// Source identity: the file stem.
pub fn source_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn is_tiff(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
}

/// Decode a source raster and pull out its geo transform and EXIF block.
pub fn load_source(path: &Path) -> Result<SourceImage, TilerError> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    let exif = decoder.exif_metadata()?;
    let image = DynamicImage::from_decoder(decoder)?.to_rgb8();

    let geo = if is_tiff(path) {
        read_geo_transform(path)?
    } else {
        None
    };

    debug!(
        "loaded {} ({}x{}, geo={}, exif={})",
        path.display(),
        image.width(),
        image.height(),
        geo.is_some(),
        exif.is_some()
    );

    Ok(SourceImage {
        id: source_id(path),
        path: path.to_path_buf(),
        image,
        geo,
        exif,
    })
}

/// Read the GeoTIFF model transform of `path`.
///
/// `ModelTransformationTag` wins when present; otherwise the transform is
/// built from `ModelPixelScaleTag` and the first `ModelTiepointTag`. A TIFF
/// with neither is not geo-referenced.
pub fn read_geo_transform(path: &Path) -> Result<Option<GeoTransform>, TilerError> {
    let mut decoder = TiffDecoder::new(BufReader::new(File::open(path)?))?;

    if let Some(value) = decoder.find_tag(Tag::ModelTransformationTag)? {
        return Ok(GeoTransform::from_model_transformation(
            &value.into_f64_vec()?,
        ));
    }

    let scale = decoder.find_tag(Tag::ModelPixelScaleTag)?;
    let tiepoint = decoder.find_tag(Tag::ModelTiepointTag)?;
    match (scale, tiepoint) {
        (Some(scale), Some(tiepoint)) => Ok(GeoTransform::from_scale_and_tiepoint(
            &scale.into_f64_vec()?,
            &tiepoint.into_f64_vec()?,
        )),
        _ => Ok(None),
    }
}
