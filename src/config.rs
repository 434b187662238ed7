//! Run configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it changes.
//! The binary layers command-line options on top of whatever is loaded here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::counting::CountingLine;
use crate::detection::VehicleClass;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Consecutive misses before a confirmed track is dropped.
    pub max_age: u32,
    /// Consecutive hits before a track is confirmed.
    pub n_init: u32,
    pub max_iou_distance: f32,
    pub max_cosine_distance: f32,
    /// Appearance samples kept per track, `None` for unbounded.
    pub nn_budget: Option<usize>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_age: 30,
            n_init: 3,
            max_iou_distance: 0.7,
            max_cosine_distance: 0.2,
            nn_budget: Some(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// YOLOv8 network exported to ONNX.
    pub model: PathBuf,
    /// Square network input side in pixels.
    pub input_size: i32,
    /// Candidates below this never leave the model.
    pub min_confidence: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("yolov8m.onnx"),
            input_size: 640,
            min_confidence: 0.25,
            nms_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: PathBuf,
    /// Defaults to `<stem>_processed.mp4` next to the source.
    pub output: Option<PathBuf>,
    pub display: bool,
    /// Counting line row, defaults to half the frame height.
    pub line_position: Option<i32>,
    pub tolerance: i32,
    pub confidence_threshold: f32,
    pub vehicle_classes: Vec<VehicleClass>,
    pub progress_interval: u64,
    pub reid_model: Option<PathBuf>,
    pub detector: DetectorConfig,
    pub tracker: TrackerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            output: None,
            display: true,
            line_position: None,
            tolerance: 10,
            confidence_threshold: 0.4,
            vehicle_classes: VehicleClass::ALL.to_vec(),
            progress_interval: 30,
            reid_model: None,
            detector: DetectorConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;

        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.as_os_str().is_empty() {
            return Err(Error::Config("no input video given".into()));
        }

        if self.tolerance < 0 {
            return Err(Error::Config(format!("tolerance must not be negative, got {}", self.tolerance)));
        }

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Config(format!(
                "confidence threshold must lie in [0, 1], got {}",
                self.confidence_threshold
            )));
        }

        if self.vehicle_classes.is_empty() {
            return Err(Error::Config("at least one vehicle class is required".into()));
        }

        if self.tracker.n_init == 0 {
            return Err(Error::Config("tracker n_init must be at least 1".into()));
        }

        if self.detector.input_size <= 0 {
            return Err(Error::Config(format!(
                "detector input size must be positive, got {}",
                self.detector.input_size
            )));
        }

        Ok(())
    }

    /// Where the annotated video goes.
    pub fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None => processed_path(&self.source),
        }
    }

    /// The counting band for a frame of the given height.
    pub fn counting_line(&self, frame_height: i32) -> CountingLine {
        CountingLine::new(self.line_position.unwrap_or(frame_height / 2), self.tolerance)
    }
}

/// `dir/clip.avi` becomes `dir/clip_processed.mp4`.
pub fn processed_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    input.with_file_name(format!("{}_processed.mp4", stem))
}
