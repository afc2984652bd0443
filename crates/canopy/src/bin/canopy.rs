//! canopy CLI: run the tiled detection pipeline or its standalone steps.

use std::path::PathBuf;
use std::process::ExitCode;

use canopy::core::table;
use canopy::dedup::{deduplicate, DedupParams};
use canopy::geo::{export, CoordinateConvention, ExportError};
use canopy::{Pipeline, PipelineConfig, PipelineError, Stage, CONFIG_EXIT_CODE};
use clap::{Args, Parser, Subcommand};
use log::{error, info, LevelFilter};
#[cfg(feature = "tracing")]
use tracing_log::LogTracer;

#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Tile aerial rasters, merge per-tile tree detections, and export them")]
#[command(version)]
struct Cli {
    /// Log level: error, warn, info, debug, trace or off. With the `tracing`
    /// feature, a set `RUST_LOG` takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit one JSON record per finished stage (needs the `tracing` feature).
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline described by a JSON configuration.
    Run(RunArgs),

    /// Deduplicate a global detection table (single source frame).
    Dedup(DedupArgs),

    /// Export a detection table as a GeoJSON point collection.
    Export(ExportArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Pipeline configuration (JSON).
    #[arg(long)]
    config: PathBuf,

    /// First stage to run; earlier artifacts are loaded from disk.
    #[arg(long, default_value_t = Stage::Tiling)]
    from: Stage,

    /// Do not attach GPS EXIF to the mosaics.
    #[arg(long)]
    skip_metadata: bool,
}

#[derive(Debug, Args)]
struct DedupArgs {
    /// Global detection table (CSV).
    #[arg(long)]
    input: PathBuf,

    /// Where to write the deduplicated table (CSV).
    #[arg(long)]
    output: PathBuf,

    /// Linking distance between detection centers, in pixels.
    #[arg(long, allow_negative_numbers = true)]
    eps: f64,
}

#[derive(Debug, Args)]
struct ExportArgs {
    /// Detection table in global pixel coordinates (CSV).
    #[arg(long)]
    input: PathBuf,

    /// Where to write the feature collection (GeoJSON).
    #[arg(long)]
    output: PathBuf,

    /// `top_left` or `bottom_left`.
    #[arg(long)]
    convention: CoordinateConvention,

    /// Mosaic height in pixels, required for `bottom_left`.
    #[arg(long)]
    height: Option<u32>,
}

fn init_logging(level: LevelFilter, json: bool) {
    // With `tracing`, RUST_LOG overrides --log-level.
    #[cfg(feature = "tracing")]
    {
        let _ = LogTracer::init();
        canopy::core::init_tracing(json, level);
    }
    #[cfg(not(feature = "tracing"))]
    {
        if json {
            eprintln!("warning: --json-logs needs the `tracing` feature; using plain logs");
        }
        let _ = canopy::core::init_with_level(level);
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(level) = canopy::core::parse_level(&cli.log_level) else {
        eprintln!("error: unknown log level `{}`", cli.log_level);
        return ExitCode::from(CONFIG_EXIT_CODE);
    };
    init_logging(level, cli.json_logs);

    let status = match cli.command {
        Commands::Run(args) => run_pipeline(&args),
        Commands::Dedup(args) => run_dedup(&args),
        Commands::Export(args) => run_export(&args),
    };
    match status {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

// ── run ───────────────────────────────────────────────────────────────

fn run_pipeline(args: &RunArgs) -> Result<(), u8> {
    let fail = |err: PipelineError| {
        error!("{err}");
        err.exit_code()
    };

    let config = PipelineConfig::load_json(&args.config).map_err(|err| fail(err.into()))?;
    let pipeline = Pipeline::new(config)
        .map_err(fail)?
        .with_skip_metadata(args.skip_metadata);

    let detector = if args.from <= Stage::Detection {
        Some(pipeline.table_detector().map_err(fail)?)
    } else {
        None
    };
    let report = pipeline
        .run_from(args.from, detector.as_ref().map(|d| d as &dyn canopy::Detector))
        .map_err(fail)?;

    info!(
        "done: {} tiles, {} detections after deduplication, {} mosaics",
        report.tiles,
        report.deduplicated_detections.unwrap_or(0),
        report.mosaics.len()
    );
    Ok(())
}

// ── dedup ─────────────────────────────────────────────────────────────

fn run_dedup(args: &DedupArgs) -> Result<(), u8> {
    let code = Stage::Deduplication.code();
    let params = DedupParams::new(args.eps).map_err(|err| {
        error!("{err}");
        CONFIG_EXIT_CODE
    })?;
    let detections = table::read_detections(&args.input).map_err(|err| {
        error!("cannot read {}: {err}", args.input.display());
        code
    })?;

    let result = deduplicate(&detections, params);
    table::write_detections(&args.output, &result.detections).map_err(|err| {
        error!("cannot write {}: {err}", args.output.display());
        code
    })?;
    info!(
        "{} -> {} detections ({} merged)",
        detections.len(),
        result.detections.len(),
        result.removed()
    );
    Ok(())
}

// ── export ────────────────────────────────────────────────────────────

fn run_export(args: &ExportArgs) -> Result<(), u8> {
    let code = Stage::Export.code();
    let detections = table::read_detections(&args.input).map_err(|err| {
        error!("cannot read {}: {err}", args.input.display());
        code
    })?;

    let collection = export(&detections, args.convention, args.height).map_err(|err| {
        error!("{err}");
        match err {
            ExportError::MissingMosaicHeight => CONFIG_EXIT_CODE,
            _ => code,
        }
    })?;
    collection.write_json(&args.output).map_err(|err| {
        error!("cannot write {}: {err}", args.output.display());
        code
    })?;
    info!(
        "{} features ({}) -> {}",
        collection.len(),
        args.convention,
        args.output.display()
    );
    Ok(())
}
