//! Stage driver.
//!
//! Stages run in a fixed order and each persists its artifact, so a failed
//! run can be resumed from the failing stage with [`Pipeline::run_from`].
//! Failures scoped to one source, tile or detection are logged and skipped
//! inside a stage; anything else stops the run with a [`PipelineError`]
//! naming the stage.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use canopy_core::{
    table, ClassVocabulary, CoordinateUnifier, Detection, DetectionWriter, Manifest, ManifestError,
    TableError, TileDetection,
};
use canopy_dedup::{DedupError, DedupParams, Deduplicator};
use canopy_geo::{export, ExportError};
use canopy_raster::{
    extent, metadata, MetadataError, MosaicBuilder, MosaicError, Tiler, TilerError,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::detect::{Detector, DetectorError, TileInput};
use crate::report::{MosaicSummary, RunReport};
use crate::{ConfigError, PipelineConfig, RunContext};

/// Pipeline stages in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Tiling,
    Detection,
    Unification,
    Deduplication,
    Mosaic,
    Metadata,
    Export,
    Report,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Tiling,
        Stage::Detection,
        Stage::Unification,
        Stage::Deduplication,
        Stage::Mosaic,
        Stage::Metadata,
        Stage::Export,
        Stage::Report,
    ];

    /// Stable numeric identifier, used as the CLI exit status.
    pub fn code(self) -> u8 {
        match self {
            Stage::Tiling => 1,
            Stage::Detection => 2,
            Stage::Unification => 3,
            Stage::Deduplication => 4,
            Stage::Mosaic => 5,
            Stage::Metadata => 6,
            Stage::Export => 7,
            Stage::Report => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Tiling => "tiling",
            Stage::Detection => "detection",
            Stage::Unification => "unification",
            Stage::Deduplication => "deduplication",
            Stage::Mosaic => "mosaic",
            Stage::Metadata => "metadata",
            Stage::Export => "export",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| format!("unknown stage `{s}`"))
    }
}

/// Failure category, independent of the stage it happened in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Parse,
    ResourceMissing,
    Io,
    Configuration,
}

/// Stage-fatal failure.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("{what} not found at {path}")]
    ResourceMissing { what: &'static str, path: String },
    #[error("no source could be tiled")]
    NoTiles,
    #[error("no detector supplied")]
    NoDetector,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Tiler(#[from] TilerError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Dedup(#[from] DedupError),
    #[error(transparent)]
    Mosaic(#[from] MosaicError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

impl StageError {
    pub fn kind(&self) -> FailureKind {
        match self {
            StageError::ResourceMissing { .. } | StageError::NoTiles => {
                FailureKind::ResourceMissing
            }
            StageError::NoDetector | StageError::Dedup(_) => FailureKind::Configuration,
            StageError::Io(_) | StageError::Table(_) | StageError::Metadata(_) => FailureKind::Io,
            StageError::Manifest(ManifestError::DuplicateTile(_)) => FailureKind::Parse,
            StageError::Manifest(ManifestError::Table(_)) => FailureKind::Io,
            StageError::Tiler(TilerError::ZeroTileSize | TilerError::ZeroWorkers) => {
                FailureKind::Configuration
            }
            StageError::Tiler(_) => FailureKind::Io,
            StageError::Detector(DetectorError::ResourceMissing(_)) => FailureKind::ResourceMissing,
            StageError::Detector(_) => FailureKind::Io,
            StageError::Mosaic(MosaicError::Metadata(_)) => FailureKind::Io,
            StageError::Mosaic(_) => FailureKind::Configuration,
            StageError::Export(ExportError::Io(_) | ExportError::Json(_)) => FailureKind::Io,
            StageError::Export(_) => FailureKind::Configuration,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("{stage} stage failed ({kind:?}): {source}", kind = .source.kind())]
    Stage { stage: Stage, source: StageError },
}

impl PipelineError {
    /// Stage that failed; `None` for configuration errors.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Config(_) => None,
            PipelineError::Stage { stage, .. } => Some(*stage),
        }
    }

    /// Process exit status: the failing stage's code, or
    /// [`CONFIG_EXIT_CODE`](crate::CONFIG_EXIT_CODE).
    pub fn exit_code(&self) -> u8 {
        self.stage().map_or(crate::CONFIG_EXIT_CODE, Stage::code)
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Config(_) => FailureKind::Configuration,
            PipelineError::Stage { source, .. } => source.kind(),
        }
    }
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T, E: Into<StageError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|err| PipelineError::Stage {
            stage,
            source: err.into(),
        })
    }
}

/// Read an upstream table, mapping a missing file to `ResourceMissing`.
fn load_table<T: serde::de::DeserializeOwned>(
    path: &Path,
    what: &'static str,
) -> Result<Vec<T>, StageError> {
    table::read_rows(path).map_err(|err| {
        if err.is_not_found() {
            StageError::ResourceMissing {
                what,
                path: path.display().to_string(),
            }
        } else {
            StageError::Table(err)
        }
    })
}

/// Deduplicated detections grouped by source, in manifest source order.
fn by_source<'a>(
    manifest: &'a Manifest,
    detections: &'a [Detection],
) -> Vec<(&'a str, Vec<Detection>)> {
    let mut groups: Vec<(&str, Vec<Detection>)> =
        manifest.sources().into_iter().map(|s| (s, Vec::new())).collect();
    let slot: HashMap<&str, usize> = groups.iter().enumerate().map(|(i, (s, _))| (*s, i)).collect();
    for det in detections {
        match manifest.get(&det.tile).and_then(|rec| slot.get(rec.source.as_str())) {
            Some(&i) => groups[i].1.push(det.clone()),
            None => warn!("detection on unknown tile `{}` ignored", det.tile),
        }
    }
    groups
}

fn first_seen_classes(detections: &[Detection]) -> ClassVocabulary {
    let mut names: Vec<&str> = Vec::new();
    for det in detections {
        if !names.contains(&det.class.as_str()) {
            names.push(&det.class);
        }
    }
    ClassVocabulary::new(names)
}

/// End-to-end driver over a validated configuration.
#[derive(Clone, Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    ctx: RunContext,
    skip_metadata: bool,
}

impl Pipeline {
    /// Validate `config` and resolve the run context. Nothing runs yet.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let ctx = RunContext::new(&config)?;
        Ok(Self {
            config,
            ctx,
            skip_metadata: false,
        })
    }

    /// Skip the metadata stage for this run regardless of
    /// `propagate_metadata`.
    pub fn with_skip_metadata(mut self, skip: bool) -> Self {
        self.skip_metadata = skip;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Detector replaying `detections_path`; failures belong to the
    /// detection stage.
    pub fn table_detector(&self) -> Result<crate::TableDetector, PipelineError> {
        let path = self
            .config
            .detections_path
            .as_deref()
            .ok_or(StageError::ResourceMissing {
                what: "detection table (detections_path)",
                path: "<unset>".to_owned(),
            })
            .at(Stage::Detection)?;
        crate::TableDetector::load(path, self.ctx.vocabulary.clone()).at(Stage::Detection)
    }

    /// Run every stage.
    pub fn run(&self, detector: &dyn Detector) -> Result<RunReport, PipelineError> {
        self.run_from(Stage::Tiling, Some(detector))
    }

    /// Run from `from` onwards, loading earlier artifacts from disk.
    ///
    /// `detector` is only required when `from` is at or before
    /// [`Stage::Detection`].
    pub fn run_from(
        &self,
        from: Stage,
        detector: Option<&dyn Detector>,
    ) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::new(from, self.config.eps, self.config.convention);
        report.sources = self.ctx.sources.clone();
        report.metadata_source = self.ctx.metadata_source.clone();
        info!("pipeline starting at {from} stage");

        let manifest = if from <= Stage::Tiling {
            self.tile(&mut report).at(Stage::Tiling)?
        } else {
            Manifest::load_csv(&self.ctx.manifest_path)
                .map_err(|err| match err {
                    ManifestError::Table(t) if t.is_not_found() => StageError::ResourceMissing {
                        what: "tile manifest",
                        path: self.ctx.manifest_path.display().to_string(),
                    },
                    other => StageError::Manifest(other),
                })
                .at(from)?
        };
        report.tiles = manifest.len();

        let vocabulary = match (&self.ctx.vocabulary, detector) {
            (Some(v), _) => Some(v.clone()),
            (None, Some(d)) => Some(d.classes().clone()),
            (None, None) => None,
        };

        let raw = if from <= Stage::Detection {
            let detector = detector.ok_or(StageError::NoDetector).at(Stage::Detection)?;
            let vocabulary = vocabulary.clone().unwrap_or_default();
            Some(
                self.detect(&manifest, detector, &vocabulary, &mut report)
                    .at(Stage::Detection)?,
            )
        } else {
            None
        };

        let global = if from <= Stage::Unification {
            let raw = match raw {
                Some(raw) => raw,
                None => load_table(&self.ctx.raw_detections_path, "raw detection table")
                    .at(Stage::Unification)?,
            };
            Some(self.unify(&manifest, &raw, &mut report).at(Stage::Unification)?)
        } else {
            None
        };

        let deduplicated = if from <= Stage::Deduplication {
            let global = match global {
                Some(global) => global,
                None => load_table(&self.ctx.global_detections_path, "global detection table")
                    .at(Stage::Deduplication)?,
            };
            Some(
                self.deduplicate(&manifest, &global, &mut report)
                    .at(Stage::Deduplication)?,
            )
        } else if from <= Stage::Export {
            match load_table::<Detection>(&self.ctx.deduplicated_path, "deduplicated table") {
                Ok(rows) => {
                    report.deduplicated_detections = Some(rows.len());
                    report.count_classes(&rows);
                    Some(rows)
                }
                Err(StageError::ResourceMissing { .. }) if from <= Stage::Metadata => {
                    warn!("no deduplicated table; mosaics are built without markers");
                    None
                }
                Err(err) => {
                    return Err(PipelineError::Stage {
                        stage: from,
                        source: err,
                    })
                }
            }
        } else {
            None
        };

        // Mosaic colors follow the configured or detector vocabulary, else
        // the classes in order of appearance.
        let vocabulary = vocabulary
            .unwrap_or_else(|| first_seen_classes(deduplicated.as_deref().unwrap_or(&[])));

        if from <= Stage::Mosaic {
            self.mosaic(&manifest, deduplicated.as_deref(), &vocabulary, &mut report)
                .at(Stage::Mosaic)?;
        }
        if from <= Stage::Metadata {
            self.propagate_metadata(&manifest, &mut report)
                .at(Stage::Metadata)?;
        }
        if from <= Stage::Export {
            let deduplicated = deduplicated
                .ok_or_else(|| StageError::ResourceMissing {
                    what: "deduplicated table",
                    path: self.ctx.deduplicated_path.display().to_string(),
                })
                .at(Stage::Export)?;
            self.export(&manifest, &deduplicated, &mut report)
                .at(Stage::Export)?;
        }

        fs::create_dir_all(&self.ctx.output_dir).at(Stage::Report)?;
        report.write_json(&self.ctx.report_path).at(Stage::Report)?;
        info!("run report written to {}", self.ctx.report_path.display());
        Ok(report)
    }

    #[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
    fn tile(&self, report: &mut RunReport) -> Result<Manifest, StageError> {
        let tiler = Tiler::new(self.config.tiler_params())?;
        let outcome = tiler.run(&self.ctx.sources, &self.ctx.tile_dir, &self.ctx.manifest_path)?;
        report.failed_sources = outcome.failed;
        if outcome.manifest.is_empty() {
            return Err(StageError::NoTiles);
        }
        Ok(outcome.manifest)
    }

    #[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
    fn detect(
        &self,
        manifest: &Manifest,
        detector: &dyn Detector,
        vocabulary: &ClassVocabulary,
        report: &mut RunReport,
    ) -> Result<Vec<TileDetection>, StageError> {
        if let Some(parent) = self.ctx.raw_detections_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = DetectionWriter::create(&self.ctx.raw_detections_path)?;
        let mut all = Vec::new();

        for record in manifest.records() {
            let pixels = if detector.needs_pixels() {
                match image::open(&record.path) {
                    Ok(img) => Some(img.to_rgb8()),
                    Err(err) => {
                        warn!("skipping tile {}: {err}", record.tile);
                        report.failed_tiles.push(record.tile.clone());
                        continue;
                    }
                }
            } else {
                None
            };
            let input = TileInput {
                record,
                image: pixels.as_ref(),
            };
            let raws = match detector.detect(&input) {
                Ok(raws) => raws,
                Err(err) if err.is_tile_scoped() => {
                    warn!("skipping tile {}: {err}", record.tile);
                    report.failed_tiles.push(record.tile.clone());
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let mut batch = Vec::with_capacity(raws.len());
            for raw in &raws {
                match raw.resolve(&record.tile, vocabulary) {
                    Ok(det) => batch.push(det),
                    Err(err) => {
                        warn!("dropping detection on tile `{}`: {err}", record.tile);
                        report.dropped_detections += 1;
                    }
                }
            }
            writer.append(&batch)?;
            all.extend(batch);
        }

        info!(
            "{} detections on {} tiles ({} skipped)",
            all.len(),
            manifest.len(),
            report.failed_tiles.len()
        );
        report.raw_detections = Some(all.len());
        Ok(all)
    }

    #[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
    fn unify(
        &self,
        manifest: &Manifest,
        raw: &[TileDetection],
        report: &mut RunReport,
    ) -> Result<Vec<Detection>, StageError> {
        let unified = CoordinateUnifier::new(manifest).unify_all(raw);
        report.dropped_detections += unified.dropped.len();
        report.global_detections = Some(unified.detections.len());
        table::write_detections(&self.ctx.global_detections_path, &unified.detections)?;
        Ok(unified.detections)
    }

    #[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
    fn deduplicate(
        &self,
        manifest: &Manifest,
        global: &[Detection],
        report: &mut RunReport,
    ) -> Result<Vec<Detection>, StageError> {
        // Each source has its own pixel frame; never cluster across them.
        let dedup = Deduplicator::new(DedupParams::new(self.config.eps)?);
        let mut kept = Vec::new();
        for (source, detections) in by_source(manifest, global) {
            let result = dedup.run(&detections);
            info!(
                "{source}: {} -> {} detections ({} merged)",
                detections.len(),
                result.detections.len(),
                result.removed()
            );
            kept.extend(result.detections);
        }

        fs::create_dir_all(&self.ctx.output_dir)?;
        table::write_detections(&self.ctx.deduplicated_path, &kept)?;
        report.deduplicated_detections = Some(kept.len());
        report.count_classes(&kept);
        Ok(kept)
    }

    #[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
    fn mosaic(
        &self,
        manifest: &Manifest,
        deduplicated: Option<&[Detection]>,
        vocabulary: &ClassVocabulary,
        report: &mut RunReport,
    ) -> Result<(), StageError> {
        fs::create_dir_all(&self.ctx.output_dir)?;
        let style = self.config.marker_style();
        let builder = MosaicBuilder::new(vocabulary, style.clone());
        let groups = deduplicated.map(|dets| by_source(manifest, dets));

        for source in manifest.sources() {
            let detections = groups.as_ref().map(|groups| {
                groups
                    .iter()
                    .find(|(s, _)| *s == source)
                    .map(|(_, dets)| dets.as_slice())
                    .unwrap_or(&[])
            });
            let mosaic = builder.build(manifest, source, detections)?;
            let path = self.ctx.mosaic_path(source);
            mosaic.save(&path, None, style.jpeg_quality)?;
            info!(
                "{source}: mosaic {}x{} with {} markers -> {}",
                mosaic.image.width(),
                mosaic.image.height(),
                mosaic.marker_count,
                path.display()
            );
            report.mosaics.push(MosaicSummary {
                source: source.to_owned(),
                path,
                width: mosaic.image.width(),
                height: mosaic.image.height(),
                markers: mosaic.marker_count,
                skipped_tiles: mosaic.skipped_tiles,
            });
        }
        Ok(())
    }

    #[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
    fn propagate_metadata(
        &self,
        manifest: &Manifest,
        report: &mut RunReport,
    ) -> Result<(), StageError> {
        if self.skip_metadata || !self.config.propagate_metadata {
            info!("metadata propagation disabled");
            return Ok(());
        }
        let Some(source) = &self.ctx.metadata_source else {
            info!("no metadata source; mosaics carry no geolocation");
            return Ok(());
        };
        let block = match metadata::read_gps_exif(source) {
            Ok(Some(block)) => block,
            Ok(None) => {
                info!("{} has no GPS EXIF; nothing to attach", source.display());
                return Ok(());
            }
            Err(err) => {
                warn!("cannot read EXIF from {}: {err}", source.display());
                return Ok(());
            }
        };

        for name in manifest.sources() {
            let path = self.ctx.mosaic_path(name);
            if !path.exists() {
                return Err(StageError::ResourceMissing {
                    what: "mosaic",
                    path: path.display().to_string(),
                });
            }
            if metadata::attach_to_file(&path, &block)?.supports_exif() {
                info!("attached GPS EXIF to {}", path.display());
                report.metadata_attached.push(path);
            }
        }
        Ok(())
    }

    #[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
    fn export(
        &self,
        manifest: &Manifest,
        deduplicated: &[Detection],
        report: &mut RunReport,
    ) -> Result<(), StageError> {
        fs::create_dir_all(&self.ctx.output_dir)?;
        for (source, detections) in by_source(manifest, deduplicated) {
            let (_, height) = extent(manifest.for_source(source))?;
            let collection = export(&detections, self.config.convention, Some(height))?;
            let path = self.ctx.features_path(source);
            collection.write_json(&path)?;
            info!(
                "{source}: {} features ({}) -> {}",
                collection.len(),
                self.config.convention,
                path.display()
            );
            report.feature_collections.push(path);
        }
        Ok(())
    }
}
