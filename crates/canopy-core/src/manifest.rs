//! Tile manifest: the single structured record of where every tile sits.
//!
//! The tiler writes it once; every later stage resolves tile identities
//! through it instead of re-deriving offsets from file names.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::{table, TableError, TileId};

/// One manifest row: tile identity -> placement in its source image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub tile: TileId,
    /// Identity of the source raster (file stem).
    pub source: String,
    /// Tile file written by the tiler.
    pub path: String,
    pub origin_x: u32,
    pub origin_y: u32,
    pub width: u32,
    pub height: u32,
    /// Geographic top-left of the tile, for geo-referenced sources only.
    #[serde(default)]
    pub geo_lon: Option<f64>,
    #[serde(default)]
    pub geo_lat: Option<f64>,
}

impl ManifestRecord {
    pub fn origin(&self) -> Point2<f64> {
        Point2::new(self.origin_x as f64, self.origin_y as f64)
    }

    pub fn geo_origin(&self) -> Option<(f64, f64)> {
        self.geo_lon.zip(self.geo_lat)
    }

    /// Exclusive bottom-right corner, `None` on `u32` overflow.
    pub fn far_corner(&self) -> Option<(u32, u32)> {
        Some((
            self.origin_x.checked_add(self.width)?,
            self.origin_y.checked_add(self.height)?,
        ))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    #[error("tile `{0}` appears more than once in the manifest")]
    DuplicateTile(TileId),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// In-memory manifest indexed by tile identity.
#[derive(Clone, Debug, Default)]
pub struct Manifest {
    records: Vec<ManifestRecord>,
    index: HashMap<TileId, usize>,
}

impl Manifest {
    pub fn from_records(records: Vec<ManifestRecord>) -> Result<Self, ManifestError> {
        let mut index = HashMap::with_capacity(records.len());
        for (i, rec) in records.iter().enumerate() {
            if index.insert(rec.tile.clone(), i).is_some() {
                return Err(ManifestError::DuplicateTile(rec.tile.clone()));
            }
        }
        Ok(Self { records, index })
    }

    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        Self::from_records(table::read_rows(path)?)
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), ManifestError> {
        Ok(table::write_rows(path, &self.records)?)
    }

    pub fn get(&self, tile: &TileId) -> Option<&ManifestRecord> {
        self.index.get(tile).map(|&i| &self.records[i])
    }

    pub fn records(&self) -> &[ManifestRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of one source, in manifest order.
    pub fn for_source<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a ManifestRecord> {
        self.records.iter().filter(move |r| r.source == source)
    }

    /// Distinct source identities, in first-seen order.
    pub fn sources(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for rec in &self.records {
            if !out.contains(&rec.source.as_str()) {
                out.push(rec.source.as_str());
            }
        }
        out
    }
}

/// Single-writer sink for manifest records.
///
/// Concurrent producers share it behind a mutex; each record is flushed as
/// one complete CSV row before the lock is released.
pub struct ManifestWriter<W: Write> {
    inner: csv::Writer<W>,
    written: Vec<ManifestRecord>,
}

impl ManifestWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> ManifestWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: csv::Writer::from_writer(writer),
            written: Vec::new(),
        }
    }

    pub fn write(&mut self, record: ManifestRecord) -> Result<(), TableError> {
        self.inner.serialize(&record)?;
        self.inner.flush()?;
        self.written.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.written.len()
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }

    /// Finish writing and hand back the records as an indexed manifest.
    pub fn finish(mut self) -> Result<Manifest, ManifestError> {
        self.inner.flush().map_err(TableError::from)?;
        Manifest::from_records(self.written)
    }
}
