use std::path::Path;

use canopy_core::{ClassVocabulary, Detection, Manifest, ManifestRecord, TileId};
use image::{imageops, ImageReader, Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::label::draw_label;
use crate::metadata::{self, Attached, MetadataError};

/// Marker colors by class position in the vocabulary.
pub const PALETTE: [Rgb<u8>; 8] = [
    Rgb([255, 0, 0]),
    Rgb([0, 0, 255]),
    Rgb([0, 200, 0]),
    Rgb([255, 0, 255]),
    Rgb([0, 255, 255]),
    Rgb([255, 128, 0]),
    Rgb([128, 0, 255]),
    Rgb([255, 255, 255]),
];
/// Color of markers whose class is not in the vocabulary.
const UNKNOWN_CLASS: Rgb<u8> = Rgb([128, 128, 128]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

#[derive(thiserror::Error, Debug)]
pub enum MosaicError {
    #[error("no tiles to assemble")]
    NoTiles,
    #[error("mosaic extent overflows for tile `{0}`")]
    ExtentOverflow(TileId),
    #[error("tile `{tile}` ({width}x{height} at {x},{y}) falls outside the {canvas_w}x{canvas_h} canvas")]
    TileOutOfBounds {
        tile: TileId,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        canvas_w: u32,
        canvas_h: u32,
    },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Marker and caption styling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerStyle {
    pub radius: u32,
    /// Magnification of the built-in caption font.
    pub label_scale: u32,
    pub jpeg_quality: u8,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            radius: 12,
            label_scale: 3,
            jpeg_quality: 95,
        }
    }
}

/// Maximum of `origin + size` over all placements, per axis.
pub fn extent<'a, I>(records: I) -> Result<(u32, u32), MosaicError>
where
    I: IntoIterator<Item = &'a ManifestRecord>,
{
    let mut extent: Option<(u32, u32)> = None;
    for rec in records {
        let (x1, y1) = rec
            .far_corner()
            .ok_or_else(|| MosaicError::ExtentOverflow(rec.tile.clone()))?;
        extent = Some(match extent {
            Some((w, h)) => (w.max(x1), h.max(y1)),
            None => (x1, y1),
        });
    }
    extent.ok_or(MosaicError::NoTiles)
}

/// Full-size canvas that tiles are pasted onto.
#[derive(Clone, Debug)]
pub struct MosaicCanvas {
    image: RgbImage,
}

impl MosaicCanvas {
    pub fn with_extent(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::new(width, height),
        }
    }

    /// Canvas sized to the bounding extent of every tile placement.
    pub fn for_records<'a, I>(records: I) -> Result<Self, MosaicError>
    where
        I: IntoIterator<Item = &'a ManifestRecord>,
    {
        let (w, h) = extent(records)?;
        Ok(Self::with_extent(w, h))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Copy `tile` onto the canvas with its top-left at `(x, y)`.
    ///
    /// Later pastes overwrite earlier ones where they overlap. A tile that
    /// does not fit entirely inside the canvas is an error and leaves the
    /// canvas untouched.
    pub fn paste(
        &mut self,
        tile_id: &TileId,
        x: u32,
        y: u32,
        tile: &RgbImage,
    ) -> Result<(), MosaicError> {
        let (cw, ch) = self.image.dimensions();
        let (tw, th) = tile.dimensions();
        let fits = x.checked_add(tw).is_some_and(|x1| x1 <= cw)
            && y.checked_add(th).is_some_and(|y1| y1 <= ch);
        if !fits {
            return Err(MosaicError::TileOutOfBounds {
                tile: tile_id.clone(),
                x,
                y,
                width: tw,
                height: th,
                canvas_w: cw,
                canvas_h: ch,
            });
        }
        imageops::replace(&mut self.image, tile, x as i64, y as i64);
        Ok(())
    }

    /// Draw one filled circle per detection, colored by class, and return
    /// the number of markers drawn.
    pub fn draw_markers(
        &mut self,
        detections: &[Detection],
        vocabulary: &ClassVocabulary,
        radius: u32,
    ) -> usize {
        let radius = radius.min(i32::MAX as u32) as i32;
        for det in detections {
            let color = vocabulary
                .index_of(&det.class)
                .map(|i| PALETTE[i % PALETTE.len()])
                .unwrap_or(UNKNOWN_CLASS);
            let center = (det.x.round() as i32, det.y.round() as i32);
            draw_filled_circle_mut(&mut self.image, center, radius, color);
        }
        detections.len()
    }

    /// Caption with the total count at the top-left corner.
    pub fn draw_count_label(&mut self, count: usize, scale: u32) {
        let text = format!("DETECTED: {count}");
        draw_label(&mut self.image, &text, 10, 10, scale.max(1), LABEL_COLOR);
    }

    pub fn finish(self, marker_count: usize) -> Mosaic {
        Mosaic {
            image: self.image,
            marker_count,
            skipped_tiles: Vec::new(),
        }
    }
}

/// Composite raster with its overlay statistics.
#[derive(Clone, Debug)]
pub struct Mosaic {
    pub image: RgbImage,
    pub marker_count: usize,
    /// Tiles whose file could not be read; their area stays black.
    pub skipped_tiles: Vec<TileId>,
}

impl Mosaic {
    /// Encode to `path` (format from the extension), embedding `exif` when
    /// the format supports it.
    pub fn save(
        &self,
        path: &Path,
        exif: Option<&[u8]>,
        jpeg_quality: u8,
    ) -> Result<Attached, MosaicError> {
        Ok(metadata::save_with_exif(&self.image, path, exif, jpeg_quality)?)
    }
}

/// Assembles the mosaic of one source from its manifest records.
#[derive(Clone, Debug)]
pub struct MosaicBuilder<'a> {
    vocabulary: &'a ClassVocabulary,
    style: MarkerStyle,
}

impl<'a> MosaicBuilder<'a> {
    pub fn new(vocabulary: &'a ClassVocabulary, style: MarkerStyle) -> Self {
        Self { vocabulary, style }
    }

    /// Paste every tile of `source` in manifest order, then overlay markers
    /// for `detections`.
    ///
    /// Missing detections (`None`) give a mosaic without markers. A tile
    /// file that cannot be decoded is skipped with a warning.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, manifest, detections), fields(source = source))
    )]
    pub fn build(
        &self,
        manifest: &Manifest,
        source: &str,
        detections: Option<&[Detection]>,
    ) -> Result<Mosaic, MosaicError> {
        let records: Vec<&ManifestRecord> = manifest.for_source(source).collect();
        let mut canvas = MosaicCanvas::for_records(records.iter().copied())?;
        let (w, h) = canvas.dimensions();
        debug!("{source}: {w}x{h} canvas for {} tiles", records.len());

        let mut skipped = Vec::new();
        for rec in &records {
            let tile = match ImageReader::open(&rec.path)
                .map_err(image::ImageError::from)
                .and_then(|r| r.decode())
            {
                Ok(img) => img.to_rgb8(),
                Err(err) => {
                    warn!("skipping tile {} ({}): {err}", rec.tile, rec.path);
                    skipped.push(rec.tile.clone());
                    continue;
                }
            };
            canvas.paste(&rec.tile, rec.origin_x, rec.origin_y, &tile)?;
        }

        let marker_count = match detections {
            Some(dets) => canvas.draw_markers(dets, self.vocabulary, self.style.radius),
            None => {
                info!("{source}: no detections supplied, mosaic has no markers");
                0
            }
        };
        canvas.draw_count_label(marker_count, self.style.label_scale);

        let mut mosaic = canvas.finish(marker_count);
        mosaic.skipped_tiles = skipped;
        Ok(mosaic)
    }
}
