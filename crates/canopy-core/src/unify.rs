//! Tile-local -> global coordinate unification.

use log::warn;

use crate::{Detection, Manifest, ParseError, TileDetection};

/// Result of unifying a batch of tile-local detections.
#[derive(Clone, Debug, Default)]
pub struct Unified {
    pub detections: Vec<Detection>,
    /// Detections dropped because they could not be interpreted.
    pub dropped: Vec<(TileDetection, ParseError)>,
}

/// Maps tile-local detections into the source image frame using the
/// origins recorded in the manifest.
#[derive(Clone, Copy, Debug)]
pub struct CoordinateUnifier<'a> {
    manifest: &'a Manifest,
}

impl<'a> CoordinateUnifier<'a> {
    pub fn new(manifest: &'a Manifest) -> Self {
        Self { manifest }
    }

    /// `center = tile origin + tile-local center`; every other field is
    /// passed through unchanged.
    pub fn unify(&self, det: &TileDetection) -> Result<Detection, ParseError> {
        let record = self
            .manifest
            .get(&det.tile)
            .ok_or_else(|| ParseError::UnknownTile(det.tile.clone()))?;

        if !(0.0..=1.0).contains(&det.confidence) {
            return Err(ParseError::InvalidConfidence(det.confidence));
        }
        if ![det.x, det.y, det.width, det.height]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(ParseError::NonFiniteGeometry(det.tile.clone()));
        }

        let center = record.origin() + det.center().coords;
        Ok(Detection {
            tile: det.tile.clone(),
            class: det.class.clone(),
            confidence: det.confidence,
            x: center.x,
            y: center.y,
            width: det.width,
            height: det.height,
        })
    }

    /// Unify a batch; uninterpretable detections are logged and dropped.
    pub fn unify_all<'d, I>(&self, detections: I) -> Unified
    where
        I: IntoIterator<Item = &'d TileDetection>,
    {
        let mut out = Unified::default();
        for det in detections {
            match self.unify(det) {
                Ok(global) => out.detections.push(global),
                Err(err) => {
                    warn!("dropping detection on tile `{}`: {err}", det.tile);
                    out.dropped.push((det.clone(), err));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManifestRecord, TileId};

    fn manifest() -> Manifest {
        let rec = |tile: &str, x: u32, y: u32| ManifestRecord {
            tile: TileId::from(tile),
            source: "scene".to_owned(),
            path: format!("{tile}.png"),
            origin_x: x,
            origin_y: y,
            width: 640,
            height: 640,
            geo_lon: None,
            geo_lat: None,
        };
        Manifest::from_records(vec![rec("scene_tile_0_0", 0, 0), rec("scene_tile_640_0", 640, 0)])
            .expect("unique ids")
    }

    fn local(tile: &str, x: f64, y: f64, confidence: f64) -> TileDetection {
        TileDetection {
            tile: TileId::from(tile),
            class: "Oil Palm".to_owned(),
            confidence,
            x,
            y,
            width: 24.0,
            height: 26.0,
        }
    }

    #[test]
    fn adds_tile_origin_to_local_center() {
        let manifest = manifest();
        let unifier = CoordinateUnifier::new(&manifest);

        let a = unifier.unify(&local("scene_tile_0_0", 630.0, 100.0, 0.8)).expect("known tile");
        let b = unifier.unify(&local("scene_tile_640_0", 2.0, 100.0, 0.9)).expect("known tile");
        assert_eq!((a.x, a.y), (630.0, 100.0));
        assert_eq!((b.x, b.y), (642.0, 100.0));
        assert_eq!(b.tile.as_str(), "scene_tile_640_0");
        assert_eq!((b.width, b.height, b.confidence), (24.0, 26.0, 0.9));
    }

    #[test]
    fn fractional_centers_are_exact() {
        let manifest = manifest();
        let unifier = CoordinateUnifier::new(&manifest);
        let det = unifier.unify(&local("scene_tile_640_0", 0.1, 0.7, 0.5)).expect("known tile");
        assert_eq!(det.x, 640.0 + 0.1);
        assert_eq!(det.y, 0.7);
    }

    #[test]
    fn unknown_tiles_are_dropped_not_fatal() {
        let manifest = manifest();
        let unifier = CoordinateUnifier::new(&manifest);
        let batch = vec![
            local("scene_tile_0_0", 10.0, 10.0, 0.7),
            local("other_tile_0_0", 10.0, 10.0, 0.7),
            local("scene_tile_640_0", 10.0, 10.0, 1.5),
        ];
        let out = unifier.unify_all(&batch);
        assert_eq!(out.detections.len(), 1);
        assert_eq!(out.dropped.len(), 2);
        assert!(matches!(out.dropped[0].1, ParseError::UnknownTile(_)));
        assert!(matches!(out.dropped[1].1, ParseError::InvalidConfidence(c) if c == 1.5));
    }

    #[test]
    fn rejects_non_finite_geometry() {
        let manifest = manifest();
        let unifier = CoordinateUnifier::new(&manifest);
        let err = unifier
            .unify(&local("scene_tile_0_0", f64::NAN, 1.0, 0.5))
            .unwrap_err();
        assert!(matches!(err, ParseError::NonFiniteGeometry(_)));
    }
}
