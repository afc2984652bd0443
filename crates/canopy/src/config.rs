//! JSON run configuration.

use std::fs;
use std::path::{Path, PathBuf};

use canopy_core::ClassVocabulary;
use canopy_dedup::{DedupError, DedupParams};
use canopy_geo::CoordinateConvention;
use canopy_raster::{MarkerStyle, TileFormat, TilerParams};
use serde::{Deserialize, Serialize};

/// Extensions picked up when scanning `input_dir`.
pub const SOURCE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "tif", "tiff"];

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("tile_size must be positive")]
    ZeroTileSize,
    #[error("workers must be positive")]
    ZeroWorkers,
    #[error("eps: {0}")]
    Eps(#[from] DedupError),
    #[error("marker_radius must be positive")]
    ZeroMarkerRadius,
    #[error("jpeg_quality must be in 1..=100, got {0}")]
    JpegQuality(u8),
    #[error("no source rasters: set `sources` or `input_dir`")]
    NoSources,
    #[error("cannot scan input_dir {path}: {source}")]
    InputDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("class `{0}` appears twice in `classes`")]
    DuplicateClass(String),
}

fn default_tile_size() -> u32 {
    640
}

fn default_workers() -> usize {
    6
}

fn default_jpeg_quality() -> u8 {
    95
}

fn default_marker_radius() -> u32 {
    12
}

fn default_true() -> bool {
    true
}

/// Pipeline configuration, loaded from JSON.
///
/// `eps` and `convention` have no defaults: the clustering distance depends
/// on ground resolution and the coordinate convention on the consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Explicit source rasters, tiled in the given order.
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    /// Directory scanned (non-recursively, sorted) for further sources.
    #[serde(default)]
    pub input_dir: Option<PathBuf>,
    /// Tiles, manifest and intermediate tables.
    pub work_dir: PathBuf,
    /// Deduplicated table, mosaics, feature collections and run report.
    pub output_dir: PathBuf,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub tile_format: TileFormat,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Deduplication distance in global pixels.
    pub eps: f64,
    pub convention: CoordinateConvention,
    /// Tile-local detection table replayed by the table detector.
    #[serde(default)]
    pub detections_path: Option<PathBuf>,
    /// Class vocabulary; when absent the detector supplies it.
    #[serde(default)]
    pub classes: Option<Vec<String>>,
    #[serde(default = "default_marker_radius")]
    pub marker_radius: u32,
    /// Source whose GPS EXIF is attached to the mosaics. When absent, the
    /// first source (sorted by path) carrying EXIF is used.
    #[serde(default)]
    pub metadata_source: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub propagate_metadata: bool,
}

impl PipelineConfig {
    /// Minimal configuration for the given directories and required values.
    pub fn new(
        work_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        eps: f64,
        convention: CoordinateConvention,
    ) -> Self {
        Self {
            sources: Vec::new(),
            input_dir: None,
            work_dir: work_dir.into(),
            output_dir: output_dir.into(),
            tile_size: default_tile_size(),
            workers: default_workers(),
            tile_format: TileFormat::default(),
            jpeg_quality: default_jpeg_quality(),
            eps,
            convention,
            detections_path: None,
            classes: None,
            marker_radius: default_marker_radius(),
            metadata_source: None,
            propagate_metadata: true,
        }
    }

    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Reject values that would fail mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_size == 0 {
            return Err(ConfigError::ZeroTileSize);
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        DedupParams::new(self.eps)?;
        if self.marker_radius == 0 {
            return Err(ConfigError::ZeroMarkerRadius);
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::JpegQuality(self.jpeg_quality));
        }
        if let Some(classes) = &self.classes {
            for (i, name) in classes.iter().enumerate() {
                if classes[..i].iter().any(|n| n.eq_ignore_ascii_case(name)) {
                    return Err(ConfigError::DuplicateClass(name.clone()));
                }
            }
        }
        if self.sources.is_empty() && self.input_dir.is_none() {
            return Err(ConfigError::NoSources);
        }
        Ok(())
    }

    /// Explicit sources followed by the sorted contents of `input_dir`,
    /// without repeats.
    pub fn resolve_sources(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let mut out = self.sources.clone();
        if let Some(dir) = &self.input_dir {
            let entries = fs::read_dir(dir).map_err(|source| ConfigError::InputDir {
                path: dir.clone(),
                source,
            })?;
            let mut scanned = Vec::new();
            for entry in entries {
                let path = entry
                    .map_err(|source| ConfigError::InputDir {
                        path: dir.clone(),
                        source,
                    })?
                    .path();
                if path.is_file() && has_source_extension(&path) {
                    scanned.push(path);
                }
            }
            scanned.sort();
            for path in scanned {
                if !out.contains(&path) {
                    out.push(path);
                }
            }
        }
        if out.is_empty() {
            return Err(ConfigError::NoSources);
        }
        Ok(out)
    }

    pub fn tiler_params(&self) -> TilerParams {
        TilerParams {
            tile_size: self.tile_size,
            workers: self.workers,
            format: self.tile_format,
            jpeg_quality: self.jpeg_quality,
        }
    }

    pub fn dedup_params(&self) -> Result<DedupParams, ConfigError> {
        Ok(DedupParams::new(self.eps)?)
    }

    pub fn marker_style(&self) -> MarkerStyle {
        MarkerStyle {
            radius: self.marker_radius,
            jpeg_quality: self.jpeg_quality,
            ..MarkerStyle::default()
        }
    }

    pub fn vocabulary(&self) -> Option<ClassVocabulary> {
        self.classes.as_ref().map(|c| ClassVocabulary::new(c.iter().cloned()))
    }
}

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SOURCE_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
}
