use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::common::error::{LivenessError, Result};

/// Placeholder secret shipped in the example config. Running with it is allowed
/// but logged loudly, since anyone holding the default can mint tokens.
pub const DEFAULT_SECRET: &str = "change-me-in-production";

/// Environment variable that overrides `challenge.secret_key`.
pub const SECRET_ENV_VAR: &str = "SUPLIVENESS_SECRET";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub challenge: ChallengeConfig,
    #[serde(default)]
    pub blink: BlinkConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub face_detector: DetectorConfig,
    #[serde(default)]
    pub profile_detector: DetectorConfig,
    #[serde(default)]
    pub landmarks: LandmarkConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChallengeConfig {
    #[serde(default = "default_secret")]
    pub secret_key: String,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_task_count")]
    pub default_task_count: usize,
}

fn default_secret() -> String { DEFAULT_SECRET.to_string() }
fn default_ttl() -> u64 { 120 }
fn default_task_count() -> usize { 2 }

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            secret_key: default_secret(),
            ttl_seconds: default_ttl(),
            default_task_count: default_task_count(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct BlinkConfig {
    #[serde(default = "default_ear_threshold")]
    pub ear_threshold: f32,
    #[serde(default = "default_consecutive_frames")]
    pub consecutive_frames: u32,
}

fn default_ear_threshold() -> f32 { 0.23 }
fn default_consecutive_frames() -> u32 { 1 }

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            ear_threshold: default_ear_threshold(),
            consecutive_frames: default_consecutive_frames(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_min_frames")]
    pub min_frames: usize,
}

fn default_min_frames() -> usize { 10 }

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { min_frames: default_min_frames() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_face_detector_path")]
    pub face_detector_path: PathBuf,
    #[serde(default = "default_profile_detector_path")]
    pub profile_detector_path: PathBuf,
    #[serde(default = "default_landmark_path")]
    pub landmark_path: PathBuf,
}

fn default_face_detector_path() -> PathBuf { PathBuf::from("models/yolov8n-face.onnx") }
fn default_profile_detector_path() -> PathBuf { PathBuf::from("models/yolov8n-profile.onnx") }
fn default_landmark_path() -> PathBuf { PathBuf::from("models/face_landmark.onnx") }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            face_detector_path: default_face_detector_path(),
            profile_detector_path: default_profile_detector_path(),
            landmark_path: default_landmark_path(),
        }
    }
}

/// How the detector lays out its prediction tensor.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// `[1, 4 + classes, anchors]`, the default YOLOv8 export.
    AttributesFirst,
    /// `[1, anchors, 4 + classes]`.
    AnchorsFirst,
}

/// Units of the box centre/size values emitted by the detector.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateUnits {
    Pixels,
    Normalized,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_input_size")]
    pub input_width: u32,
    #[serde(default = "default_input_size")]
    pub input_height: u32,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_min_box_size")]
    pub min_box_size: f32,
    #[serde(default = "default_layout")]
    pub layout: OutputLayout,
    #[serde(default = "default_units")]
    pub coordinates: CoordinateUnits,
}

fn default_input_size() -> u32 { 640 }
fn default_confidence() -> f32 { 0.5 }
fn default_iou_threshold() -> f32 { 0.45 }
fn default_min_box_size() -> f32 { 30.0 }
fn default_layout() -> OutputLayout { OutputLayout::AttributesFirst }
fn default_units() -> CoordinateUnits { CoordinateUnits::Pixels }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: default_input_size(),
            input_height: default_input_size(),
            confidence: default_confidence(),
            iou_threshold: default_iou_threshold(),
            min_box_size: default_min_box_size(),
            layout: default_layout(),
            coordinates: default_units(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LandmarkConfig {
    #[serde(default = "default_landmark_input")]
    pub input_size: u32,
    /// Fraction of the face box added on every side before cropping.
    #[serde(default = "default_crop_margin")]
    pub crop_margin: f32,
    #[serde(default = "default_min_face_score")]
    pub min_face_score: f32,
    /// Feed the mesh model NHWC instead of NCHW.
    #[serde(default)]
    pub channels_last: bool,
}

fn default_landmark_input() -> u32 { 192 }
fn default_crop_margin() -> f32 { 0.25 }
fn default_min_face_score() -> f32 { 0.5 }

impl Default for LandmarkConfig {
    fn default() -> Self {
        Self {
            input_size: default_landmark_input(),
            crop_margin: default_crop_margin(),
            min_face_score: default_min_face_score(),
            channels_last: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PerformanceConfig {
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_optimization_level() -> u32 { 3 }

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self { optimization_level: default_optimization_level() }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "configs/liveness.toml";
        Self::load_from_path(&PathBuf::from(config_path))
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LivenessError::Config(format!(
                "Config file not found: {}. Please create it from the example.", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Replaces the signing secret with `SUPLIVENESS_SECRET` when it is set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var(SECRET_ENV_VAR) {
            if !secret.is_empty() {
                self.challenge.secret_key = secret;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.challenge.secret_key.is_empty() {
            return Err(LivenessError::Config("Challenge secret key must not be empty".into()));
        }
        if self.challenge.secret_key == DEFAULT_SECRET {
            tracing::warn!("Using the default challenge secret; set {} in production", SECRET_ENV_VAR);
        }

        if self.challenge.ttl_seconds < 1 || self.challenge.ttl_seconds > 3600 {
            return Err(LivenessError::Config(format!(
                "Challenge TTL must be between 1 and 3600 seconds, got {}",
                self.challenge.ttl_seconds
            )));
        }
        if self.challenge.default_task_count < 1 || self.challenge.default_task_count > 3 {
            return Err(LivenessError::Config(format!(
                "Default task count must be between 1 and 3, got {}",
                self.challenge.default_task_count
            )));
        }

        if self.blink.ear_threshold <= 0.0 || self.blink.ear_threshold >= 1.0 {
            return Err(LivenessError::Config(format!(
                "EAR threshold must be between 0.0 and 1.0 (exclusive), got {}",
                self.blink.ear_threshold
            )));
        }
        if self.blink.consecutive_frames < 1 {
            return Err(LivenessError::Config(
                "Consecutive frames required for a blink must be at least 1".into()
            ));
        }

        if self.detection.min_frames < 1 {
            return Err(LivenessError::Config("Minimum frame count must be at least 1".into()));
        }

        for (name, detector) in [("face_detector", &self.face_detector), ("profile_detector", &self.profile_detector)] {
            if detector.input_width == 0 || detector.input_width > 4096 {
                return Err(LivenessError::Config(format!(
                    "{}.input_width must be between 1 and 4096, got {}", name, detector.input_width
                )));
            }
            if detector.input_height == 0 || detector.input_height > 4096 {
                return Err(LivenessError::Config(format!(
                    "{}.input_height must be between 1 and 4096, got {}", name, detector.input_height
                )));
            }
            if !(0.0..=1.0).contains(&detector.confidence) {
                return Err(LivenessError::Config(format!(
                    "{}.confidence must be between 0.0 and 1.0, got {}", name, detector.confidence
                )));
            }
            if !(0.0..=1.0).contains(&detector.iou_threshold) {
                return Err(LivenessError::Config(format!(
                    "{}.iou_threshold must be between 0.0 and 1.0, got {}", name, detector.iou_threshold
                )));
            }
        }

        if self.landmarks.input_size == 0 || self.landmarks.input_size > 1024 {
            return Err(LivenessError::Config(format!(
                "Landmark input size must be between 1 and 1024, got {}",
                self.landmarks.input_size
            )));
        }
        if self.landmarks.crop_margin < 0.0 || self.landmarks.crop_margin > 1.0 {
            return Err(LivenessError::Config(format!(
                "Landmark crop margin must be between 0.0 and 1.0, got {}",
                self.landmarks.crop_margin
            )));
        }

        Ok(())
    }
}
