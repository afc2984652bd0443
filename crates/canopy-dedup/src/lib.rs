//! Cross-tile duplicate removal.
//!
//! Objects crossed by a tile boundary are reported once per tile with
//! slightly different centers. This crate merges such reports:
//!
//! 1. Index detection centers in a uniform grid with cells of size `eps`.
//! 2. Link every pair of centers at most `eps` apart; connected components
//!    are the clusters. Isolated centers are singleton clusters.
//! 3. Keep the most confident member of each cluster (earliest on ties).
//!
//! ```
//! use canopy_core::{Detection, TileId};
//! use canopy_dedup::{deduplicate, DedupParams};
//!
//! let at = |x: f64, confidence: f64| Detection {
//!     tile: TileId::from("t"),
//!     class: "tree".into(),
//!     confidence,
//!     x,
//!     y: 0.0,
//!     width: 10.0,
//!     height: 10.0,
//! };
//! let dets = [at(0.0, 0.4), at(5.0, 0.9), at(50.0, 0.5)];
//! let res = deduplicate(&dets, DedupParams::new(8.0).unwrap());
//! assert_eq!(res.detections.len(), 2);
//! assert_eq!(res.detections[0].confidence, 0.9);
//! ```

mod cluster;
mod dedup;
mod grid;

pub use cluster::cluster_points;
pub use dedup::{deduplicate, Cluster, DedupError, DedupParams, DedupResult, Deduplicator};
pub use grid::SpatialGrid;
