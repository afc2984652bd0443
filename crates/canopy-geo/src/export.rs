use std::fs;
use std::path::Path;

use canopy_core::{Detection, TileId};
use log::debug;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::CoordinateConvention;

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("the bottom_left convention needs the mosaic height")]
    MissingMosaicHeight,
    #[error("unknown coordinate convention `{0}` (expected top_left or bottom_left)")]
    UnknownConvention(String),
    #[error("feature {index} has non-finite coordinates")]
    NonFiniteCoordinates { index: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureCollectionType {
    #[default]
    FeatureCollection,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureType {
    #[default]
    Feature,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointGeometryType {
    #[default]
    Point,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointGeometry {
    #[serde(rename = "type")]
    pub kind: PointGeometryType,
    /// `[x, y]` under the collection's convention.
    pub coordinates: [f64; 2],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointProperties {
    pub class: String,
    pub confidence: f64,
    pub tile: TileId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: FeatureType,
    pub geometry: PointGeometry,
    pub properties: PointProperties,
}

/// Point feature collection of deduplicated detections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: FeatureCollectionType,
    pub features: Vec<Feature>,
}

/// A point read back from a (possibly edited) feature collection, in the
/// global top-left pixel frame.
#[derive(Clone, Debug, PartialEq)]
pub struct PointRecord {
    pub tile: TileId,
    pub class: String,
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
}

/// Convert detections into point features under `convention`.
///
/// `mosaic_height` is required by [`CoordinateConvention::BottomLeft`] and
/// ignored otherwise.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "info",
        skip(detections),
        fields(n = detections.len(), convention = %convention)
    )
)]
pub fn export(
    detections: &[Detection],
    convention: CoordinateConvention,
    mosaic_height: Option<u32>,
) -> Result<FeatureCollection, ExportError> {
    if convention.needs_height() && mosaic_height.is_none() {
        return Err(ExportError::MissingMosaicHeight);
    }
    let features = detections
        .iter()
        .map(|det| {
            Ok(Feature {
                kind: FeatureType::Feature,
                geometry: PointGeometry {
                    kind: PointGeometryType::Point,
                    coordinates: [det.x, convention.map_y(det.y, mosaic_height)?],
                },
                properties: PointProperties {
                    class: det.class.clone(),
                    confidence: det.confidence,
                    tile: det.tile.clone(),
                },
            })
        })
        .collect::<Result<Vec<_>, ExportError>>()?;
    debug!("exported {} point features ({convention})", features.len());
    Ok(FeatureCollection {
        kind: FeatureCollectionType::FeatureCollection,
        features,
    })
}

impl FeatureCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Load a collection from JSON on disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this collection to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Map features back to the global top-left frame.
    ///
    /// `convention` and `mosaic_height` must be the ones the collection was
    /// exported with.
    pub fn to_points(
        &self,
        convention: CoordinateConvention,
        mosaic_height: Option<u32>,
    ) -> Result<Vec<PointRecord>, ExportError> {
        self.features
            .iter()
            .enumerate()
            .map(|(index, f)| {
                let [x, y] = f.geometry.coordinates;
                if !(x.is_finite() && y.is_finite()) {
                    return Err(ExportError::NonFiniteCoordinates { index });
                }
                Ok(PointRecord {
                    tile: f.properties.tile.clone(),
                    class: f.properties.class.clone(),
                    confidence: f.properties.confidence,
                    x,
                    y: convention.map_y(y, mosaic_height)?,
                })
            })
            .collect()
    }
}

/// Free-function form of [`FeatureCollection::load_json`].
pub fn load_json(path: impl AsRef<Path>) -> Result<FeatureCollection, ExportError> {
    FeatureCollection::load_json(path)
}

/// Free-function form of [`FeatureCollection::write_json`].
pub fn write_json(
    collection: &FeatureCollection,
    path: impl AsRef<Path>,
) -> Result<(), ExportError> {
    collection.write_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn det(x: f64, y: f64) -> Detection {
        Detection {
            tile: TileId::from("scene_tile_640_0"),
            class: "Oil Palm".to_owned(),
            confidence: 0.88,
            x,
            y,
            width: 31.0,
            height: 29.0,
        }
    }

    #[test]
    fn top_left_keeps_unified_coordinates() {
        let fc = export(&[det(642.0, 100.0)], CoordinateConvention::TopLeft, None).unwrap();
        let value = serde_json::to_value(&fc).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "geometry": { "type": "Point", "coordinates": [642.0, 100.0] },
                    "properties": { "class": "Oil Palm", "confidence": 0.88, "tile": "scene_tile_640_0" }
                }]
            })
        );
    }

    #[test]
    fn bottom_left_flips_against_mosaic_height() {
        let fc = export(&[det(642.0, 100.0)], CoordinateConvention::BottomLeft, Some(640)).unwrap();
        assert_eq!(fc.features[0].geometry.coordinates, [642.0, 540.0]);
        let err = export(&[det(1.0, 1.0)], CoordinateConvention::BottomLeft, None).unwrap_err();
        assert!(matches!(err, ExportError::MissingMosaicHeight));
    }

    #[test]
    fn empty_input_is_an_empty_collection() {
        let fc = export(&[], CoordinateConvention::TopLeft, None).unwrap();
        assert!(fc.is_empty());
        assert!(export(&[], CoordinateConvention::BottomLeft, None).is_err());
    }

    #[test]
    fn read_back_inverts_export() {
        let dets = [det(642.0, 100.0), det(10.5, 630.25)];
        for (conv, h) in [
            (CoordinateConvention::TopLeft, None),
            (CoordinateConvention::BottomLeft, Some(640)),
        ] {
            let points = export(&dets, conv, h).unwrap().to_points(conv, h).unwrap();
            for (p, d) in points.iter().zip(&dets) {
                assert_eq!((p.x, p.y), (d.x, d.y));
                assert_eq!(p.tile, d.tile);
            }
        }
    }

    #[test]
    fn rejects_wrong_type_tag() {
        let raw = r#"{"type":"GeometryCollection","features":[]}"#;
        assert!(serde_json::from_str::<FeatureCollection>(raw).is_err());
    }
}
