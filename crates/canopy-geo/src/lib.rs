//! Point feature-collection export.
//!
//! Every deduplicated detection becomes one `Point` feature whose
//! coordinates follow a single [`CoordinateConvention`] chosen per call.
//! There is no default convention: callers must say which origin the
//! consumer expects.

mod convention;
mod export;

pub use convention::{flip_y, CoordinateConvention};
pub use export::{
    export, load_json, write_json, ExportError, Feature, FeatureCollection, FeatureCollectionType,
    FeatureType, PointGeometry, PointGeometryType, PointProperties, PointRecord,
};
