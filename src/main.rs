//! bus-plate - Bus route-number recognition with spoken arrival info
//!
//! Reads the route number off an approaching bus in a video, finds the
//! rider's nearest stop, looks up the route's arrival status and speaks it.

mod capture;
mod config;
mod speech;
mod storage;
mod transit;
mod vision;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::capture::{open_source, FrameSampler};
use crate::config::AppConfig;
use crate::speech::{announce, announcement, build_speaker};
use crate::storage::Database;
use crate::transit::{Resolution, TransitClient, TransitResolver};
use crate::vision::{
    CrnnRecognizer, ModelManager, ModelType, PlateAggregator, PlateLocator, PlateRecognizer,
    RecognitionOutcome, TextExtractor, YoloDetector,
};

/// bus-plate - Bus route-number recognition and arrival announcements
#[derive(Parser, Debug)]
#[command(name = "bus-plate")]
#[command(about = "Reads a bus route number from video and announces its arrival status")]
struct Args {
    /// Video file, capture URL or directory of frames
    #[arg(short, long)]
    video: PathBuf,

    /// Rider longitude
    #[arg(long, allow_negative_numbers = true, value_parser = parse_coordinate)]
    lon: f64,

    /// Rider latitude
    #[arg(long, allow_negative_numbers = true, value_parser = parse_coordinate)]
    lat: f64,

    /// Configuration file (defaults to config.toml in the config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Refresh ETAs with the per-route arrival lookup
    #[arg(long)]
    detailed: bool,

    /// Debug logging
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging, RUST_LOG wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("bus-plate starting...");

    let config = load_or_create_config(args.config.as_deref())?;
    let mut speaker = build_speaker(&config.speech)?;

    let start = Instant::now();
    let outcome = recognize(&args.video, &config)?;
    info!("Recognition section took {:?}", start.elapsed());

    let route = match outcome {
        RecognitionOutcome::Recognized { route, found, .. } => {
            info!("Recognized route {} (all results: {:?})", route, found);
            route
        }
        RecognitionOutcome::NothingDetected { per_batch } => {
            info!("No route number recognized in {} batch(es)", per_batch.len());
            announce(
                speaker.as_mut(),
                &announcement::nothing_recognized(),
                config.speech.playback,
            )?;
            return Ok(());
        }
    };

    let start = Instant::now();
    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let resolution = match build_resolver(&config, args.detailed) {
        Ok(resolver) => runtime.block_on(resolver.resolve(&route, args.lon, args.lat)),
        Err(e) => {
            warn!("Transit lookup unavailable: {:#}", e);
            Resolution::Unavailable { route }
        }
    };
    info!("Transit section took {:?}", start.elapsed());

    announce(
        speaker.as_mut(),
        &announcement::for_resolution(&resolution),
        config.speech.playback,
    )?;

    info!("bus-plate finished");
    Ok(())
}

/// Longitude or latitude given on the command line
fn parse_coordinate(value: &str) -> Result<f64, String> {
    let coordinate: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("not a number: {}", e))?;
    if !coordinate.is_finite() {
        return Err(format!("not a finite coordinate: {}", value));
    }
    Ok(coordinate)
}

/// Open the lookup database and the transit API client
fn build_resolver(config: &AppConfig, detailed: bool) -> Result<TransitResolver> {
    let db = Database::open(&config.database.path)?;
    let client = TransitClient::new(&config.transit)?;
    Ok(TransitResolver::new(db, config.database.clone(), client).with_detailed(detailed))
}

/// Load configuration from `path`, the config directory, or defaults
fn load_or_create_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            let config = config::load_config(&config_path)?;
            info!("Loaded configuration from {:?}", config_path);
            return Ok(config);
        }
    }

    info!("Using default configuration");
    Ok(AppConfig::default())
}

/// Run the recognition pipeline over a video
fn recognize(video: &Path, config: &AppConfig) -> Result<RecognitionOutcome> {
    let detector = YoloDetector::from_config(&config.detector)?;
    let locator = PlateLocator::new(
        detector,
        &config.detector.plate_classes,
        config.detector.padding,
    )?;

    let models = match &config.ocr.models_dir {
        Some(dir) => ModelManager::with_dir(dir.clone())?,
        None => ModelManager::new()?,
    };
    if !models.are_models_ready() {
        info!("OCR models missing from {:?}, downloading", models.models_dir());
    }
    let rec_path = models.ensure_model(ModelType::Recognition)?;
    let dict_path = models.ensure_model(ModelType::Dictionary)?;
    let recognizer = CrnnRecognizer::new(&rec_path, &dict_path, config.ocr.use_gpu)?;
    let extractor = TextExtractor::new(recognizer, &config.ocr);

    let source = open_source(video, config.sampler.sequence_fps)?;
    let mut sampler = FrameSampler::with_params(
        source,
        config.sampler.target_rate,
        config.sampler.batch_size,
    );
    info!(
        "Sampling {}x{} video every {} frame(s)",
        sampler.width(),
        sampler.height(),
        sampler.interval()
    );

    let mut pipeline = PlateRecognizer::new(locator, extractor, PlateAggregator::new());
    Ok(pipeline.run(&mut sampler))
}
