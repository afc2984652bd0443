use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use canopy_core::{Manifest, ManifestError, ManifestRecord, ManifestWriter, TableError, TileId};
use image::{imageops, RgbImage};
use log::{info, warn};
use nalgebra::Point2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::metadata::{self, MetadataError};
use crate::source::{load_source, source_id, SourceImage};
use crate::{TileGrid, TileRect};

#[derive(thiserror::Error, Debug)]
pub enum TilerError {
    #[error("tile size must be positive")]
    ZeroTileSize,
    #[error("worker pool size must be positive")]
    ZeroWorkers,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("GeoTIFF tags: {0}")]
    Tiff(#[from] tiff::TiffError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("manifest: {0}")]
    Manifest(#[from] ManifestError),
    #[error("source identity `{0}` is used by more than one input")]
    DuplicateSource(String),
    #[error("worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl From<TableError> for TilerError {
    fn from(err: TableError) -> Self {
        TilerError::Manifest(ManifestError::Table(err))
    }
}

impl TilerError {
    /// Errors that concern the shared manifest rather than one source.
    fn is_run_fatal(&self) -> bool {
        matches!(self, TilerError::Manifest(_) | TilerError::Pool(_))
    }
}

/// Encoding of written tiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    #[default]
    Jpeg,
    Png,
}

impl TileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpg",
            TileFormat::Png => "png",
        }
    }
}

/// Tiling parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilerParams {
    /// Tile edge length in pixels.
    pub tile_size: u32,
    /// Worker pool size shared by all sources.
    pub workers: usize,
    pub format: TileFormat,
    pub jpeg_quality: u8,
}

impl Default for TilerParams {
    fn default() -> Self {
        Self {
            tile_size: 640,
            workers: 6,
            format: TileFormat::Jpeg,
            jpeg_quality: 95,
        }
    }
}

/// One in-memory tile.
#[derive(Clone, Debug)]
pub struct Tile {
    pub rect: TileRect,
    pub image: RgbImage,
}

/// Tile identity: `<source>_tile_<x>_<y>`.
pub fn tile_id(source: &str, rect: &TileRect) -> TileId {
    TileId::new(format!("{source}_tile_{}_{}", rect.x, rect.y))
}

/// Split `image` along `grid` without touching the filesystem.
pub fn tile_image(image: &RgbImage, grid: &TileGrid) -> Vec<Tile> {
    grid.rects()
        .into_iter()
        .map(|rect| Tile {
            rect,
            image: imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image(),
        })
        .collect()
}

/// A source that could not be tiled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of one tiling run.
#[derive(Clone, Debug, Default)]
pub struct TilingReport {
    /// Canonically ordered manifest: by input order, then row, then column.
    pub manifest: Manifest,
    pub failed: Vec<SourceFailure>,
}

/// Partitions source rasters into tiles on a bounded worker pool.
#[derive(Clone, Debug)]
pub struct Tiler {
    params: TilerParams,
}

impl Tiler {
    pub fn new(params: TilerParams) -> Result<Self, TilerError> {
        if params.tile_size == 0 {
            return Err(TilerError::ZeroTileSize);
        }
        if params.workers == 0 {
            return Err(TilerError::ZeroWorkers);
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &TilerParams {
        &self.params
    }

    /// Tile every source into `tile_dir` and write the manifest.
    ///
    /// A source that cannot be read or written fails on its own and is
    /// listed in the report; the remaining sources proceed. Manifest
    /// failures abort the run.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(self, sources),
            fields(n = sources.len(), tile_size = self.params.tile_size)
        )
    )]
    pub fn run(
        &self,
        sources: &[PathBuf],
        tile_dir: &Path,
        manifest_path: &Path,
    ) -> Result<TilingReport, TilerError> {
        fs::create_dir_all(tile_dir)?;
        let writer = Mutex::new(ManifestWriter::create(manifest_path)?);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.workers)
            .build()?;

        let mut seen = HashSet::new();
        let mut failed = Vec::new();
        let mut accepted = Vec::new();
        for path in sources {
            let id = source_id(path);
            if seen.insert(id.clone()) {
                accepted.push(path);
            } else {
                warn!("skipping {}: {}", path.display(), TilerError::DuplicateSource(id.clone()));
                failed.push(SourceFailure {
                    path: path.clone(),
                    error: TilerError::DuplicateSource(id).to_string(),
                });
            }
        }

        let outcomes: Vec<(&PathBuf, Result<usize, TilerError>)> = pool.install(|| {
            accepted
                .par_iter()
                .map(|path| (*path, self.tile_source(path, tile_dir, &writer)))
                .collect()
        });

        for (path, outcome) in outcomes {
            match outcome {
                Ok(n) => info!("{}: {n} tiles", path.display()),
                Err(err) if err.is_run_fatal() => return Err(err),
                Err(err) => {
                    warn!("tiling {} failed: {err}", path.display());
                    failed.push(SourceFailure {
                        path: path.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        let writer = writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut records = writer.finish()?.records().to_vec();
        let order: Vec<String> = sources.iter().map(|p| source_id(p)).collect();
        records.sort_by_key(|r| {
            (
                order.iter().position(|s| *s == r.source).unwrap_or(usize::MAX),
                r.origin_y,
                r.origin_x,
            )
        });
        let manifest = Manifest::from_records(records)?;
        manifest.write_csv(manifest_path)?;

        info!(
            "tiled {} sources into {} tiles ({} failed)",
            sources.len() - failed.len(),
            manifest.len(),
            failed.len()
        );
        Ok(TilingReport { manifest, failed })
    }

    fn tile_source(
        &self,
        path: &Path,
        tile_dir: &Path,
        writer: &Mutex<ManifestWriter<std::io::BufWriter<fs::File>>>,
    ) -> Result<usize, TilerError> {
        let source = load_source(path)?;
        let (w, h) = source.image.dimensions();
        let grid = TileGrid::new(w, h, self.params.tile_size).ok_or(TilerError::ZeroTileSize)?;
        // Geo-referenced sources carry their location in the manifest instead.
        let exif = match source.geo {
            Some(_) => None,
            None => source.exif.as_deref(),
        };

        let outcomes: Vec<Result<ManifestRecord, TilerError>> = grid
            .rects()
            .par_iter()
            .map(|rect| self.write_tile(&source, rect, tile_dir, exif))
            .collect();

        // A source is tiled completely or not at all: on failure, the tiles
        // already on disk are removed and nothing reaches the manifest.
        let mut records = Vec::with_capacity(outcomes.len());
        let mut first_err = None;
        for outcome in outcomes {
            match outcome {
                Ok(record) => records.push(record),
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_err {
            for record in &records {
                if let Err(e) = fs::remove_file(&record.path) {
                    warn!("cannot remove partial tile {}: {e}", record.path);
                }
            }
            return Err(err);
        }

        let n = records.len();
        let mut guard = writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for record in records {
            guard.write(record)?;
        }
        Ok(n)
    }

    fn write_tile(
        &self,
        source: &SourceImage,
        rect: &TileRect,
        tile_dir: &Path,
        exif: Option<&[u8]>,
    ) -> Result<ManifestRecord, TilerError> {
        let tile = tile_id(&source.id, rect);
        let path = tile_dir.join(format!("{tile}.{}", self.params.format.extension()));
        let image =
            imageops::crop_imm(&source.image, rect.x, rect.y, rect.width, rect.height).to_image();
        metadata::save_with_exif(&image, &path, exif, self.params.jpeg_quality)?;

        let geo = source
            .geo
            .map(|t| t.window(rect.x, rect.y).apply(Point2::origin()));
        Ok(ManifestRecord {
            tile,
            source: source.id.clone(),
            path: path.to_string_lossy().into_owned(),
            origin_x: rect.x,
            origin_y: rect.y,
            width: rect.width,
            height: rect.height,
            geo_lon: geo.map(|p| p.x),
            geo_lat: geo.map(|p| p.y),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 7) as u8]))
    }

    #[test]
    fn rejects_degenerate_params() {
        let zero = TilerParams {
            tile_size: 0,
            ..TilerParams::default()
        };
        assert!(matches!(Tiler::new(zero), Err(TilerError::ZeroTileSize)));
        let idle = TilerParams {
            workers: 0,
            ..TilerParams::default()
        };
        assert!(matches!(Tiler::new(idle), Err(TilerError::ZeroWorkers)));
    }

    #[test]
    fn tile_names_follow_origin() {
        let rect = TileRect {
            x: 640,
            y: 1280,
            width: 640,
            height: 100,
        };
        assert_eq!(tile_id("estate", &rect).as_str(), "estate_tile_640_1280");
    }

    #[test]
    fn in_memory_tiles_keep_pixels() {
        let img = gradient(10, 7);
        let tiles = tile_image(&img, &TileGrid::new(10, 7, 4).unwrap());
        assert_eq!(tiles.len(), 6);
        let last = &tiles[5];
        assert_eq!((last.rect.x, last.rect.y), (8, 4));
        assert_eq!(last.image.dimensions(), (2, 3));
        assert_eq!(last.image.get_pixel(1, 2), img.get_pixel(9, 6));
    }

    #[test]
    fn writes_tiles_and_manifest_and_isolates_bad_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = dir.path().join("scene.png");
        gradient(1280, 640).save(&good).expect("save");
        let bad = dir.path().join("corrupt.jpg");
        fs::write(&bad, b"\xFF\xD8 truncated").expect("write");

        let tiler = Tiler::new(TilerParams {
            tile_size: 640,
            workers: 2,
            format: TileFormat::Png,
            jpeg_quality: 95,
        })
        .expect("params");
        let tiles = dir.path().join("tiles");
        let manifest_path = tiles.join("manifest.csv");
        let report = tiler
            .run(&[bad.clone(), good], &tiles, &manifest_path)
            .expect("run");

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, bad);
        let ids: Vec<&str> = report.manifest.records().iter().map(|r| r.tile.as_str()).collect();
        assert_eq!(ids, vec!["scene_tile_0_0", "scene_tile_640_0"]);
        assert!(tiles.join("scene_tile_640_0.png").exists());

        let reloaded = Manifest::load_csv(&manifest_path).expect("reload");
        assert_eq!(reloaded.records(), report.manifest.records());
    }

    #[test]
    fn a_source_failing_midway_leaves_no_trace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scene = dir.path().join("scene.png");
        gradient(1280, 640).save(&scene).expect("save");
        let other = dir.path().join("other.png");
        gradient(100, 100).save(&other).expect("save");

        // A directory where the second tile file should go makes its write fail.
        let tiles = dir.path().join("tiles");
        fs::create_dir_all(tiles.join("scene_tile_640_0.png")).expect("mkdir");

        let tiler = Tiler::new(TilerParams {
            tile_size: 640,
            workers: 2,
            format: TileFormat::Png,
            jpeg_quality: 95,
        })
        .expect("params");
        let manifest_path = tiles.join("manifest.csv");
        let report = tiler
            .run(&[scene.clone(), other], &tiles, &manifest_path)
            .expect("run");

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, scene);
        assert!(report.manifest.records().iter().all(|r| r.source == "other"));
        assert_eq!(report.manifest.len(), 1);
        assert!(!tiles.join("scene_tile_0_0.png").exists());

        let reloaded = Manifest::load_csv(&manifest_path).expect("reload");
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn non_geo_exif_is_copied_into_every_tile() {
        // Little-endian TIFF header with one IFD0 entry (Make).
        let mut block = b"II\x2A\x00".to_vec();
        block.extend_from_slice(&8u32.to_le_bytes());
        block.extend_from_slice(&1u16.to_le_bytes());
        block.extend_from_slice(&0x010Fu16.to_le_bytes());
        block.extend_from_slice(&4u16.to_le_bytes());
        block.extend_from_slice(&1u32.to_le_bytes());
        block.extend_from_slice(&0u32.to_le_bytes());
        block.extend_from_slice(&0u32.to_le_bytes());

        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("drone.jpg");
        metadata::save_with_exif(&gradient(300, 200), &source, Some(&block), 95).expect("save");

        let tiler = Tiler::new(TilerParams {
            tile_size: 128,
            workers: 2,
            format: TileFormat::Jpeg,
            jpeg_quality: 90,
        })
        .expect("params");
        let tiles = dir.path().join("tiles");
        let report = tiler
            .run(&[source], &tiles, &tiles.join("manifest.csv"))
            .expect("run");

        assert!(report.failed.is_empty());
        assert_eq!(report.manifest.len(), 6);
        for record in report.manifest.records() {
            let copied = metadata::read_exif(Path::new(&record.path)).expect("read");
            assert_eq!(copied.as_deref(), Some(block.as_slice()), "{}", record.tile);
        }
    }

    #[test]
    fn duplicate_source_identity_fails_the_second_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("plot.png");
        let b = dir.path().join("plot.tif");
        gradient(50, 50).save(&a).expect("save");
        gradient(50, 50).save(&b).expect("save");

        let tiler = Tiler::new(TilerParams {
            tile_size: 32,
            workers: 1,
            format: TileFormat::Png,
            jpeg_quality: 95,
        })
        .expect("params");
        let tiles = dir.path().join("tiles");
        let report = tiler
            .run(&[a, b.clone()], &tiles, &tiles.join("manifest.csv"))
            .expect("run");
        assert_eq!(report.manifest.len(), 4);
        assert_eq!(report.failed[0].path, b);
    }
}
