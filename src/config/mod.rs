//! Application Configuration
//!
//! Recognition, lookup and speech settings stored in TOML format. Every
//! section falls back to its defaults, so a config file only needs the keys
//! it overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Frame sampling settings
    pub sampler: SamplerConfig,
    /// Plate detector settings
    pub detector: DetectorConfig,
    /// Text recognition settings
    pub ocr: OcrConfig,
    /// Route and stop lookup database
    pub database: DatabaseConfig,
    /// Transit API settings
    pub transit: TransitConfig,
    /// Spoken announcement settings
    pub speech: SpeechConfig,
}

/// Frame sampling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Samples taken per second of video
    pub target_rate: f64,
    /// Frames per batch
    pub batch_size: usize,
    /// Frame rate assumed for image-sequence directories
    pub sequence_fps: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            target_rate: 5.0,
            batch_size: 15,
            sequence_fps: 30.0,
        }
    }
}

/// Plate detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// ONNX model exported from a YOLO detector
    pub model_path: PathBuf,
    /// Class names in model output order
    pub labels: Vec<String>,
    /// File with one class name per line, overrides `labels`
    pub labels_path: Option<PathBuf>,
    /// Class names that mark a route-number plate
    pub plate_classes: Vec<String>,
    /// Pixels added around each plate box
    pub padding: u32,
    /// Square model input size
    pub input_size: u32,
    /// Minimum class score for a box
    pub confidence_threshold: f32,
    /// IoU above which overlapping boxes are suppressed
    pub iou_threshold: f32,
    /// Try the CUDA execution provider first
    pub use_gpu: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/bus_plate.onnx"),
            labels: ["bus", "front_num", "side_num", "back_num"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            labels_path: None,
            plate_classes: crate::vision::detection::DEFAULT_PLATE_CLASSES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            padding: crate::vision::detection::DEFAULT_PADDING,
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            use_gpu: false,
        }
    }
}

impl DetectorConfig {
    /// Resolve the detector's label table
    ///
    /// Reads `labels_path` when set (blank lines skipped), otherwise returns
    /// the inline `labels`.
    pub fn resolve_labels(&self) -> Result<Vec<String>> {
        let labels: Vec<String> = match &self.labels_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read labels file {:?}", path))?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            None => self.labels.clone(),
        };

        if labels.is_empty() {
            anyhow::bail!("Detector label table is empty");
        }
        Ok(labels)
    }
}

/// Text recognition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Minimum recognizer confidence for a hit
    pub min_confidence: f32,
    /// Fewest digits a route number can have
    pub min_digits: usize,
    /// Most digits a route number can have
    pub max_digits: usize,
    /// Where recognition models are cached (data directory when unset)
    pub models_dir: Option<PathBuf>,
    /// Try the CUDA execution provider first
    pub use_gpu: bool,
    /// Plate conditioning before recognition
    pub preprocess: PlatePreprocessing,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.8,
            min_digits: 2,
            max_digits: 4,
            models_dir: None,
            use_gpu: false,
            preprocess: PlatePreprocessing::default(),
        }
    }
}

/// Plate crop conditioning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatePreprocessing {
    /// CLAHE clip limit, relative to the mean tile bin height
    pub clahe_clip_limit: f32,
    /// CLAHE tiles per axis
    pub clahe_tiles: u32,
    /// Median filter kernel size (odd)
    pub median_kernel: u32,
    /// Foreground components smaller than this are erased
    pub min_component_area: u32,
}

impl Default for PlatePreprocessing {
    fn default() -> Self {
        Self {
            clahe_clip_limit: 2.5,
            clahe_tiles: 6,
            median_kernel: 7,
            min_component_area: 70,
        }
    }
}

/// Lookup database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,
    /// Table mapping route numbers to route ids
    pub bus_table: String,
    /// Route number column of `bus_table`
    pub route_number_column: String,
    /// Route id column of `bus_table`
    pub route_id_column: String,
    /// Table of bus stops
    pub station_table: String,
    /// Stop id column
    pub station_id_column: String,
    /// Stop name column
    pub station_name_column: String,
    /// Stop longitude column
    pub station_x_column: String,
    /// Stop latitude column
    pub station_y_column: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("bus.db"),
            bus_table: "bus".to_string(),
            route_number_column: "bus_id".to_string(),
            route_id_column: "routeid".to_string(),
            station_table: "station".to_string(),
            station_id_column: "node_id".to_string(),
            station_name_column: "station_name".to_string(),
            station_x_column: "x_location".to_string(),
            station_y_column: "y_location".to_string(),
        }
    }
}

/// Transit API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitConfig {
    /// REST endpoint root
    pub base_url: String,
    /// Service key issued by the data portal
    pub service_key: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            base_url: "http://ws.bus.go.kr/api/rest".to_string(),
            service_key: String::new(),
            timeout_secs: 10,
        }
    }
}

/// Spoken announcement settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Google Cloud API key; announcements are only logged without one
    pub api_key: Option<String>,
    /// Synthesis language
    pub language_code: String,
    /// Requested voice gender
    pub voice_gender: String,
    /// Where the synthesized MP3 is written
    pub output_path: PathBuf,
    /// Play the announcement after writing it
    pub playback: bool,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            language_code: "ko-KR".to_string(),
            voice_gender: "NEUTRAL".to_string(),
            output_path: PathBuf::from("announcement.mp3"),
            playback: true,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Invalid config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
