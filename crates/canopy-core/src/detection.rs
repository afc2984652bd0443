use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one tile, unique across a run. It is the manifest key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileId(pub String);

impl TileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TileId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Ordered list of class names supplied by the detector at run time.
///
/// A class id reported by the detector is an index into this list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassVocabulary {
    names: Vec<String>,
}

impl ClassVocabulary {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    /// Position of `name`, compared case-insensitively.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A detection in the pixel frame of the tile it was found in.
///
/// Serialized with the tabular schema `{tile, class, confidence, x, y, w, h}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileDetection {
    pub tile: TileId,
    pub class: String,
    pub confidence: f64,
    /// Box center, tile-local pixels.
    pub x: f64,
    pub y: f64,
    #[serde(rename = "w")]
    pub width: f64,
    #[serde(rename = "h")]
    pub height: f64,
}

impl TileDetection {
    pub fn center(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// A detection in the global pixel frame of its source image.
///
/// Same schema as [`TileDetection`]; `tile` keeps the provenance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub tile: TileId,
    pub class: String,
    pub confidence: f64,
    /// Box center, source-image pixels.
    pub x: f64,
    pub y: f64,
    #[serde(rename = "w")]
    pub width: f64,
    #[serde(rename = "h")]
    pub height: f64,
}

impl Detection {
    pub fn center(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_lookup_is_case_insensitive() {
        let vocab = ClassVocabulary::new(["Oil Palm", "VOP"]);
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.name(1), Some("VOP"));
        assert_eq!(vocab.name(2), None);
        assert_eq!(vocab.index_of("oil palm"), Some(0));
        assert_eq!(vocab.index_of("vop"), Some(1));
        assert_eq!(vocab.index_of("coconut"), None);
    }
}
