//! Raster stages of the tiled detection pipeline.
//!
//! - [`TileGrid`] partitions an image into a regular grid; edge tiles are
//!   cropped, never padded.
//! - [`Tiler`] loads source rasters (JPEG, PNG, GeoTIFF), writes tiles on a
//!   bounded worker pool and records each one in the tile manifest.
//! - [`MosaicCanvas`] / [`MosaicBuilder`] paste tiles back at their origins
//!   and overlay one marker per detection.
//! - [`metadata`] reads EXIF blocks and attaches a GPS-bearing block to the
//!   final mosaic.

mod grid;
mod label;
pub mod metadata;
mod mosaic;
mod source;
mod tiler;

pub use grid::{TileGrid, TileRect};
pub use label::{draw_label, label_width};
pub use metadata::{Attached, MetadataError};
pub use mosaic::{extent, MarkerStyle, Mosaic, MosaicBuilder, MosaicCanvas, MosaicError, PALETTE};
pub use source::{load_source, read_geo_transform, source_id, SourceImage};
pub use tiler::{
    tile_id, tile_image, SourceFailure, Tile, TileFormat, Tiler, TilerError, TilerParams,
    TilingReport,
};
