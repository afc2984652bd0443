//! Detector boundary.
//!
//! The object detector is an external collaborator. The pipeline only needs
//! a function from one tile to tile-local boxes plus the class vocabulary
//! those boxes index into.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use canopy_core::{
    table, ClassVocabulary, ManifestRecord, ParseError, TableError, TileDetection, TileId,
};
use image::RgbImage;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// One tile handed to a detector.
#[derive(Clone, Copy, Debug)]
pub struct TileInput<'a> {
    pub record: &'a ManifestRecord,
    /// Decoded tile pixels; `None` for detectors that do not need them.
    pub image: Option<&'a RgbImage>,
}

/// Detector output in tile-local pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f64,
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

impl RawDetection {
    /// Attach tile identity and resolve the class name.
    pub fn resolve(
        &self,
        tile: &TileId,
        vocabulary: &ClassVocabulary,
    ) -> Result<TileDetection, ParseError> {
        let class = vocabulary.name(self.class_id).ok_or(ParseError::UnknownClass {
            class_id: self.class_id,
            vocabulary_len: vocabulary.len(),
        })?;
        Ok(TileDetection {
            tile: tile.clone(),
            class: class.to_owned(),
            confidence: self.confidence,
            x: self.x_center,
            y: self.y_center,
            width: self.width,
            height: self.height,
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DetectorError {
    /// Weights, tables or other inputs the detector cannot run without.
    #[error("detector resource not found: {0}")]
    ResourceMissing(PathBuf),
    #[error("detector table: {0}")]
    Table(#[from] TableError),
    /// Failure scoped to a single tile.
    #[error("inference failed on tile `{tile}`: {message}")]
    Inference { tile: TileId, message: String },
}

impl DetectorError {
    /// Whether the failure concerns only the tile being processed.
    pub fn is_tile_scoped(&self) -> bool {
        matches!(self, DetectorError::Inference { .. })
    }
}

/// Synchronous, side-effect-free tile detector.
pub trait Detector {
    /// Vocabulary that reported class ids index into.
    fn classes(&self) -> &ClassVocabulary;

    /// Whether [`Detector::detect`] reads tile pixels.
    fn needs_pixels(&self) -> bool {
        true
    }

    fn detect(&self, tile: &TileInput<'_>) -> Result<Vec<RawDetection>, DetectorError>;
}

/// Replays a tile-local detection table produced out of process.
///
/// The table uses the `{tile, class, confidence, x, y, w, h}` schema. The
/// `class` column holds either a class id or a class name. Tiles absent
/// from the table have no detections.
#[derive(Clone, Debug)]
pub struct TableDetector {
    vocabulary: ClassVocabulary,
    by_tile: HashMap<TileId, Vec<RawDetection>>,
}

impl TableDetector {
    /// Load `path`. Without a `vocabulary`, class names are collected from
    /// the table in first-seen order.
    pub fn load(path: &Path, vocabulary: Option<ClassVocabulary>) -> Result<Self, DetectorError> {
        let rows: Vec<TileDetection> = table::read_rows(path).map_err(|err| {
            if err.is_not_found() {
                DetectorError::ResourceMissing(path.to_path_buf())
            } else {
                DetectorError::Table(err)
            }
        })?;
        let detector = Self::from_rows(rows, vocabulary);
        info!(
            "loaded detection table {} ({} tiles, {} classes)",
            path.display(),
            detector.by_tile.len(),
            detector.vocabulary.len()
        );
        Ok(detector)
    }

    pub fn from_rows(rows: Vec<TileDetection>, vocabulary: Option<ClassVocabulary>) -> Self {
        let vocabulary = vocabulary.unwrap_or_else(|| {
            let mut names: Vec<String> = Vec::new();
            for row in &rows {
                let named = row.class.trim().parse::<usize>().is_err();
                if named && !names.iter().any(|n| n.eq_ignore_ascii_case(row.class.trim())) {
                    names.push(row.class.trim().to_owned());
                }
            }
            ClassVocabulary::new(names)
        });

        let mut by_tile: HashMap<TileId, Vec<RawDetection>> = HashMap::new();
        for row in rows {
            let class = row.class.trim();
            let class_id = match class.parse::<usize>() {
                Ok(id) => id,
                Err(_) => match vocabulary.index_of(class) {
                    Some(id) => id,
                    None => {
                        warn!(
                            "dropping row on tile `{}`: class `{class}` is not in the vocabulary",
                            row.tile
                        );
                        continue;
                    }
                },
            };
            by_tile.entry(row.tile).or_default().push(RawDetection {
                class_id,
                confidence: row.confidence,
                x_center: row.x,
                y_center: row.y,
                width: row.width,
                height: row.height,
            });
        }
        Self { vocabulary, by_tile }
    }
}

impl Detector for TableDetector {
    fn classes(&self) -> &ClassVocabulary {
        &self.vocabulary
    }

    fn needs_pixels(&self) -> bool {
        false
    }

    fn detect(&self, tile: &TileInput<'_>) -> Result<Vec<RawDetection>, DetectorError> {
        Ok(self.by_tile.get(&tile.record.tile).cloned().unwrap_or_default())
    }
}
