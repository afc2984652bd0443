//! Facade crate for the `canopy-*` workspace.
//!
//! Counts trees in large aerial rasters with a detector that only accepts
//! small images. The pipeline:
//!
//! 1. cuts each source raster into fixed-size tiles and records their
//!    placement in a manifest,
//! 2. runs a [`Detector`] on every tile,
//! 3. maps tile-local detections into the source's global pixel frame,
//! 4. merges detections duplicated across tile boundaries,
//! 5. reassembles an annotated mosaic per source,
//! 6. copies the GPS EXIF block of a source onto the mosaics,
//! 7. exports the merged detections as GeoJSON points,
//! 8. writes a JSON run report.
//!
//! Every stage persists its artifact, so a run can resume from any stage.
//!
//! ## Quickstart
//!
//! ```no_run
//! use canopy::{Pipeline, PipelineConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::load_json("run.json")?;
//! let pipeline = Pipeline::new(config)?;
//! let detector = pipeline.table_detector()?;
//! let report = pipeline.run(&detector)?;
//! println!("{:?} trees", report.deduplicated_detections);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `canopy::core`: detection records, tile manifest, CSV tables, logging.
//! - `canopy::raster`: tiling, source loading, mosaics, EXIF handling.
//! - `canopy::dedup`: cross-tile duplicate removal.
//! - `canopy::geo`: coordinate conventions and GeoJSON export.

pub use canopy_core as core;
pub use canopy_dedup as dedup;
pub use canopy_geo as geo;
pub use canopy_raster as raster;

mod config;
mod context;
mod detect;
mod pipeline;
mod report;

pub use config::{ConfigError, PipelineConfig, SOURCE_EXTENSIONS};
pub use context::RunContext;
pub use detect::{Detector, DetectorError, RawDetection, TableDetector, TileInput};
pub use pipeline::{FailureKind, Pipeline, PipelineError, Stage, StageError};
pub use report::{MosaicSummary, RunReport};

pub use canopy_core::{ClassVocabulary, Detection, TileDetection, TileId};
pub use canopy_geo::CoordinateConvention;

/// Exit status for configuration errors (`EX_USAGE`).
pub const CONFIG_EXIT_CODE: u8 = 64;
