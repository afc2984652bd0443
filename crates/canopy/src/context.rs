use std::path::{Path, PathBuf};

use canopy_core::ClassVocabulary;
use canopy_raster::metadata;
use log::{debug, info};

use crate::{ConfigError, PipelineConfig};

/// Everything the stages share, resolved once before the run starts.
///
/// Stages receive it by reference; nothing is handed over through process
/// state.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub sources: Vec<PathBuf>,
    pub tile_dir: PathBuf,
    pub manifest_path: PathBuf,
    /// Tile-local detector output.
    pub raw_detections_path: PathBuf,
    /// Unified detections in each source's global frame.
    pub global_detections_path: PathBuf,
    pub deduplicated_path: PathBuf,
    pub output_dir: PathBuf,
    pub report_path: PathBuf,
    /// Source whose GPS EXIF goes onto the mosaics.
    pub metadata_source: Option<PathBuf>,
    /// Vocabulary fixed by the configuration, if any.
    pub vocabulary: Option<ClassVocabulary>,
}

impl RunContext {
    pub fn new(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let sources = config.resolve_sources()?;
        let tile_dir = config.work_dir.join("tiles");
        let metadata_source = match &config.metadata_source {
            Some(path) => Some(path.clone()),
            None => first_with_exif(&sources),
        };
        match &metadata_source {
            Some(path) => info!("metadata source: {}", path.display()),
            None => debug!("no source carries EXIF"),
        }

        Ok(Self {
            manifest_path: tile_dir.join("manifest.csv"),
            tile_dir,
            raw_detections_path: config.work_dir.join("detections.csv"),
            global_detections_path: config.work_dir.join("global_detections.csv"),
            deduplicated_path: config.output_dir.join("deduplicated_detections.csv"),
            report_path: config.output_dir.join("run_report.json"),
            output_dir: config.output_dir.clone(),
            sources,
            metadata_source,
            vocabulary: config.vocabulary(),
        })
    }

    pub fn mosaic_path(&self, source: &str) -> PathBuf {
        self.output_dir.join(format!("{source}_mosaic.jpg"))
    }

    pub fn features_path(&self, source: &str) -> PathBuf {
        self.output_dir.join(format!("{source}_detections.geojson"))
    }
}

/// First source, in path order, whose EXIF block can be read.
fn first_with_exif(sources: &[PathBuf]) -> Option<PathBuf> {
    let mut sorted: Vec<&Path> = sources.iter().map(PathBuf::as_path).collect();
    sorted.sort();
    sorted.into_iter().find_map(|path| match metadata::read_exif(path) {
        Ok(Some(_)) => Some(path.to_path_buf()),
        Ok(None) => None,
        Err(err) => {
            debug!("{}: EXIF not readable: {err}", path.display());
            None
        }
    })
}
