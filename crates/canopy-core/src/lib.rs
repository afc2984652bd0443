//! Core types for tiled tree detection.
//!
//! This crate is small and purely geometric: detection records in the
//! tile-local and global pixel frames, the tile manifest that ties the two
//! together, the affine geo transform of geo-referenced sources, and CSV
//! persistence for detection tables. It does *not* depend on any image
//! type or detector.

mod detection;
mod error;
mod geo;
mod logger;
mod manifest;
pub mod table;
mod unify;

pub use detection::{ClassVocabulary, Detection, TileDetection, TileId};
pub use error::{ParseError, TableError};
pub use geo::GeoTransform;
pub use manifest::{Manifest, ManifestError, ManifestRecord, ManifestWriter};
pub use table::DetectionWriter;
pub use unify::{CoordinateUnifier, Unified};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, parse_level};
