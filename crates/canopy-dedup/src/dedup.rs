use canopy_core::Detection;
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::cluster::cluster_points;

/// Errors produced while configuring the deduplicator.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DedupError {
    #[error("clustering distance must be positive, got {0}")]
    InvalidEps(f64),
}

/// Deduplication parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DedupParams {
    /// Linking distance between detection centers, in global pixels.
    ///
    /// Scale it with ground resolution and planting density: roughly 10-15
    /// for high-resolution imagery, 20-30 for coarser imagery, 8-12 for
    /// dense stands.
    pub eps: f64,
}

impl DedupParams {
    pub fn new(eps: f64) -> Result<Self, DedupError> {
        // +inf is allowed and merges everything.
        if eps.is_nan() || eps <= 0.0 {
            return Err(DedupError::InvalidEps(eps));
        }
        Ok(Self { eps })
    }
}

/// One cluster of global detections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Indices into the input, ascending.
    pub members: Vec<usize>,
    /// Index of the kept member.
    pub representative: usize,
}

/// Output of one deduplication pass.
#[derive(Clone, Debug, Default)]
pub struct DedupResult {
    /// One detection per cluster, in cluster order.
    pub detections: Vec<Detection>,
    pub clusters: Vec<Cluster>,
}

impl DedupResult {
    /// Number of input detections absorbed into another cluster member.
    pub fn removed(&self) -> usize {
        self.clusters.iter().map(|c| c.members.len() - 1).sum()
    }
}

/// Keeps one detection per spatial cluster.
///
/// Class labels play no part in clustering: two nearby detections of
/// different classes merge like any other pair.
#[derive(Clone, Debug)]
pub struct Deduplicator {
    params: DedupParams,
}

impl Deduplicator {
    pub fn new(params: DedupParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DedupParams {
        &self.params
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(self, detections),
            fields(n = detections.len(), eps = self.params.eps)
        )
    )]
    pub fn run(&self, detections: &[Detection]) -> DedupResult {
        let centers: Vec<Point2<f64>> = detections.iter().map(Detection::center).collect();
        let clusters: Vec<Cluster> = cluster_points(&centers, self.params.eps)
            .into_iter()
            .map(|members| {
                let representative = select_representative(detections, &members);
                Cluster {
                    members,
                    representative,
                }
            })
            .collect();

        let kept = clusters
            .iter()
            .map(|c| detections[c.representative].clone())
            .collect::<Vec<_>>();

        debug!(
            "deduplicated {} detections into {} clusters (eps={})",
            detections.len(),
            kept.len(),
            self.params.eps
        );

        DedupResult {
            detections: kept,
            clusters,
        }
    }
}

/// Convenience wrapper around [`Deduplicator::run`].
pub fn deduplicate(detections: &[Detection], params: DedupParams) -> DedupResult {
    Deduplicator::new(params).run(detections)
}

/// Highest-confidence member; the earliest member wins ties.
fn select_representative(detections: &[Detection], members: &[usize]) -> usize {
    let mut best = members[0];
    for &idx in &members[1..] {
        if detections[idx].confidence > detections[best].confidence {
            best = idx;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::TileId;

    fn det(tile: &str, class: &str, confidence: f64, x: f64, y: f64) -> Detection {
        Detection {
            tile: TileId::from(tile),
            class: class.to_owned(),
            confidence,
            x,
            y,
            width: 30.0,
            height: 30.0,
        }
    }

    #[test]
    fn rejects_non_positive_or_nan_eps() {
        assert!(DedupParams::new(0.0).is_err());
        assert!(DedupParams::new(-3.0).is_err());
        assert!(DedupParams::new(f64::NAN).is_err());
        assert!(DedupParams::new(f64::INFINITY).is_ok());
    }

    #[test]
    fn boundary_pair_keeps_higher_confidence() {
        let dets = vec![
            det("scene_tile_0_0", "Oil Palm", 0.71, 630.0, 100.0),
            det("scene_tile_640_0", "Oil Palm", 0.88, 642.0, 100.0),
        ];
        let res = deduplicate(&dets, DedupParams::new(15.0).unwrap());
        assert_eq!(res.detections.len(), 1);
        assert_eq!(res.detections[0], dets[1]);
        assert_eq!(res.clusters[0].members, vec![0, 1]);
        assert_eq!(res.removed(), 1);
    }

    #[test]
    fn ties_go_to_the_earliest_member() {
        let dets = vec![
            det("a", "Oil Palm", 0.9, 0.0, 0.0),
            det("b", "Oil Palm", 0.9, 3.0, 0.0),
            det("c", "Oil Palm", 0.4, 6.0, 0.0),
        ];
        let res = deduplicate(&dets, DedupParams::new(4.0).unwrap());
        assert_eq!(res.clusters.len(), 1);
        assert_eq!(res.clusters[0].representative, 0);
    }

    #[test]
    fn class_is_not_a_clustering_feature() {
        let dets = vec![
            det("a", "Oil Palm", 0.6, 10.0, 10.0),
            det("b", "VOP", 0.7, 12.0, 10.0),
        ];
        let res = deduplicate(&dets, DedupParams::new(5.0).unwrap());
        assert_eq!(res.detections.len(), 1);
        assert_eq!(res.detections[0].class, "VOP");
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let res = deduplicate(&[], DedupParams::new(5.0).unwrap());
        assert!(res.detections.is_empty());
        assert!(res.clusters.is_empty());
    }
}
