use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ExportError;

/// Origin and y direction of exported coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateConvention {
    /// Global pixel frame as produced by unification: origin at the
    /// top-left corner, y grows downwards.
    TopLeft,
    /// Origin at the bottom-left corner of the mosaic, y grows upwards:
    /// `y' = mosaic_height - y`.
    BottomLeft,
}

impl CoordinateConvention {
    pub fn as_str(self) -> &'static str {
        match self {
            CoordinateConvention::TopLeft => "top_left",
            CoordinateConvention::BottomLeft => "bottom_left",
        }
    }

    pub fn needs_height(self) -> bool {
        matches!(self, CoordinateConvention::BottomLeft)
    }

    /// Map a global-frame y into this convention (and back; the mapping is
    /// its own inverse).
    pub fn map_y(self, y: f64, mosaic_height: Option<u32>) -> Result<f64, ExportError> {
        match self {
            CoordinateConvention::TopLeft => Ok(y),
            CoordinateConvention::BottomLeft => mosaic_height
                .map(|h| flip_y(y, h))
                .ok_or(ExportError::MissingMosaicHeight),
        }
    }
}

impl fmt::Display for CoordinateConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoordinateConvention {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "top_left" => Ok(CoordinateConvention::TopLeft),
            "bottom_left" => Ok(CoordinateConvention::BottomLeft),
            _ => Err(ExportError::UnknownConvention(s.to_owned())),
        }
    }
}

/// Vertical flip against a mosaic of height `h`.
#[inline]
pub fn flip_y(y: f64, h: u32) -> f64 {
    h as f64 - y
}
