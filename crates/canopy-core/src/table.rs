//! CSV persistence for detection tables.
//!
//! Raw and deduplicated detection tables share one header,
//! `tile,class,confidence,x,y,w,h`, so a deduplicated table is a strict row
//! subset of the raw one.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Detection, TableError, TileDetection};

/// Read every row of a headed CSV file.
pub fn read_rows<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, TableError> {
    let file = File::open(path)?;
    let mut rdr = csv::Reader::from_reader(file);
    let mut rows = Vec::new();
    for row in rdr.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Write rows to a headed CSV file, replacing any existing file.
pub fn write_rows<T: Serialize>(path: impl AsRef<Path>, rows: &[T]) -> Result<(), TableError> {
    let file = File::create(path)?;
    let mut wtr = csv::Writer::from_writer(BufWriter::new(file));
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn read_tile_detections(path: impl AsRef<Path>) -> Result<Vec<TileDetection>, TableError> {
    read_rows(path)
}

pub fn read_detections(path: impl AsRef<Path>) -> Result<Vec<Detection>, TableError> {
    read_rows(path)
}

pub fn write_detections(path: impl AsRef<Path>, rows: &[Detection]) -> Result<(), TableError> {
    write_rows(path, rows)
}

/// Append-only writer for a detection table, tile-local or global.
///
/// Each appended batch is flushed, so the file on disk always ends on a
/// complete row.
pub struct DetectionWriter<W: Write> {
    inner: csv::Writer<W>,
    rows: usize,
}

impl DetectionWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> DetectionWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: csv::Writer::from_writer(writer),
            rows: 0,
        }
    }

    pub fn append<T: Serialize>(&mut self, batch: &[T]) -> Result<(), TableError> {
        for det in batch {
            self.inner.serialize(det)?;
        }
        self.inner.flush()?;
        self.rows += batch.len();
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> Result<W, TableError> {
        self.inner
            .into_inner()
            .map_err(|err| TableError::Io(err.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TileId;

    fn det(tile: &str, x: f64) -> Detection {
        Detection {
            tile: TileId::from(tile),
            class: "Oil Palm".to_owned(),
            confidence: 0.875,
            x,
            y: 100.0,
            width: 31.5,
            height: 29.0,
        }
    }

    #[test]
    fn table_uses_stable_header() {
        let mut writer = DetectionWriter::new(Vec::new());
        writer.append(&[det("scene_tile_0_0", 630.0)]).expect("append");
        assert_eq!(writer.rows_written(), 1);
        let bytes = writer.into_inner().expect("flush");
        let text = String::from_utf8(bytes).expect("utf8");
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("tile,class,confidence,x,y,w,h"));
        assert_eq!(
            lines.next(),
            Some("scene_tile_0_0,Oil Palm,0.875,630.0,100.0,31.5,29.0")
        );
    }

    #[test]
    fn rows_survive_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("detections.csv");
        let rows = vec![det("a", 1.25), det("b", 642.0)];
        write_detections(&path, &rows).expect("write");
        assert_eq!(read_detections(&path).expect("read"), rows);
    }

    #[test]
    fn missing_table_is_reported_as_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = read_detections(dir.path().join("absent.csv")).unwrap_err();
        assert!(err.is_not_found());
    }
}
