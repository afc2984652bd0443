use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use canopy_core::{Detection, TileId};
use canopy_geo::CoordinateConvention;
use canopy_raster::SourceFailure;
use serde::{Deserialize, Serialize};

use crate::Stage;

/// Per-source mosaic outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MosaicSummary {
    pub source: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub markers: usize,
    #[serde(default)]
    pub skipped_tiles: Vec<TileId>,
}

/// Summary of one pipeline run, written as `run_report.json`.
///
/// Counts of stages that did not run in this invocation stay `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_from: Stage,
    pub sources: Vec<PathBuf>,
    pub failed_sources: Vec<SourceFailure>,
    pub tiles: usize,
    /// Tiles the detector could not process.
    pub failed_tiles: Vec<TileId>,
    pub raw_detections: Option<usize>,
    /// Detections dropped as uninterpretable, across detection and
    /// unification.
    pub dropped_detections: usize,
    pub global_detections: Option<usize>,
    pub deduplicated_detections: Option<usize>,
    /// Deduplicated detections per class name.
    pub class_counts: BTreeMap<String, usize>,
    pub eps: f64,
    pub convention: CoordinateConvention,
    pub mosaics: Vec<MosaicSummary>,
    pub metadata_source: Option<PathBuf>,
    /// Mosaics that received the GPS EXIF block.
    pub metadata_attached: Vec<PathBuf>,
    pub feature_collections: Vec<PathBuf>,
}

impl RunReport {
    pub fn new(started_from: Stage, eps: f64, convention: CoordinateConvention) -> Self {
        Self {
            started_from,
            sources: Vec::new(),
            failed_sources: Vec::new(),
            tiles: 0,
            failed_tiles: Vec::new(),
            raw_detections: None,
            dropped_detections: 0,
            global_detections: None,
            deduplicated_detections: None,
            class_counts: BTreeMap::new(),
            eps,
            convention,
            mosaics: Vec::new(),
            metadata_source: None,
            metadata_attached: Vec::new(),
            feature_collections: Vec::new(),
        }
    }

    pub fn count_classes(&mut self, detections: &[Detection]) {
        self.class_counts.clear();
        for det in detections {
            *self.class_counts.entry(det.class.clone()).or_default() += 1;
        }
    }

    /// Load a report from JSON on disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(std::io::Error::from)
    }

    /// Write this report to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_counts_cover_every_detection() {
        let det = |class: &str| Detection {
            tile: TileId::from("t"),
            class: class.to_owned(),
            confidence: 0.9,
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        };
        let mut report = RunReport::new(Stage::Tiling, 15.0, CoordinateConvention::TopLeft);
        report.count_classes(&[det("VOP"), det("Oil Palm"), det("VOP")]);
        assert_eq!(report.class_counts.get("VOP"), Some(&2));
        assert_eq!(report.class_counts.get("Oil Palm"), Some(&1));
    }
}
