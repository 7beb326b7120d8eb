use chrono::NaiveTime;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid class_start '{0}': expected HH:MM")]
    InvalidStartTime(String),
}

/// Attendance-session configuration, loaded from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the SQLite attendance database.
    pub db_path: PathBuf,
    /// Path to the enrolled-gallery JSON file (student id → embedding).
    pub gallery_path: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD detector variant, named after its model file (e.g. "det_500m").
    #[serde(default = "default_detection_method")]
    pub detection_method: String,
    /// Class label recorded and shown in the overlay.
    pub class_name: String,
    /// Class start time, "HH:MM" local time.
    pub class_start: String,
    /// Seconds after class start during which attendance may be taken.
    pub max_window_secs: u32,
    /// Consecutive frames a student must be identified in before being
    /// marked present.
    #[serde(default = "default_consec_frames")]
    pub consec_frames: u32,
    /// Cosine similarity below which an identification is "unknown".
    #[serde(default = "default_unknown_floor")]
    pub unknown_floor: f32,
    /// V4L2 device path.
    #[serde(default = "default_camera_device")]
    pub camera_device: String,
    /// Frames to discard at startup for camera AGC/AE stabilization.
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: usize,
    /// Text-to-speech command; null disables speech.
    #[serde(default = "default_speech_command")]
    pub speech_command: Option<String>,
    /// TTS voice/language argument (e.g. "en-us").
    #[serde(default = "default_speech_voice")]
    pub speech_voice: String,
    /// TTS speech rate in words per minute.
    #[serde(default = "default_speech_rate")]
    pub speech_rate: u32,
    /// When set, the confirming frame of each newly marked student is
    /// written here as a PNG.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
}

fn default_detection_method() -> String {
    "det_500m".to_string()
}

fn default_consec_frames() -> u32 {
    3
}

fn default_unknown_floor() -> f32 {
    0.40
}

fn default_camera_device() -> String {
    "/dev/video0".to_string()
}

fn default_warmup_frames() -> usize {
    4
}

fn default_speech_command() -> Option<String> {
    Some("espeak-ng".to_string())
}

fn default_speech_voice() -> String {
    "en-us".to_string()
}

fn default_speech_rate() -> u32 {
    175
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;

        // Fail at startup, not mid-loop.
        config.start_time()?;

        Ok(config)
    }

    /// Parsed class start time.
    pub fn start_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.class_start, "%H:%M")
            .map_err(|_| ConfigError::InvalidStartTime(self.class_start.clone()))
    }

    /// Path to the SCRFD detector model for the configured variant.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(format!("{}.onnx", self.detection_method))
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Config, serde_json::Error> {
        serde_json::from_str(json)
    }

    const MINIMAL: &str = r#"{
        "db_path": "/tmp/rollcall/attendance.db",
        "gallery_path": "/tmp/rollcall/gallery.json",
        "model_dir": "/usr/share/rollcall/models",
        "class_name": "CS101",
        "class_start": "09:00",
        "max_window_secs": 600
    }"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.detection_method, "det_500m");
        assert_eq!(config.consec_frames, 3);
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.warmup_frames, 4);
        assert_eq!(config.speech_command.as_deref(), Some("espeak-ng"));
        assert_eq!(config.speech_rate, 175);
        assert!(config.snapshot_dir.is_none());
    }

    #[test]
    fn start_time_parses() {
        let config = parse(MINIMAL).unwrap();
        let t = config.start_time().unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }

    #[test]
    fn bad_start_time_rejected() {
        let mut config = parse(MINIMAL).unwrap();
        config.class_start = "9 o'clock".to_string();
        assert!(matches!(
            config.start_time(),
            Err(ConfigError::InvalidStartTime(_))
        ));
    }

    #[test]
    fn model_paths_follow_variant() {
        let mut config = parse(MINIMAL).unwrap();
        config.detection_method = "det_10g".to_string();
        assert_eq!(
            config.detector_model_path(),
            "/usr/share/rollcall/models/det_10g.onnx"
        );
        assert_eq!(
            config.embedder_model_path(),
            "/usr/share/rollcall/models/w600k_r50.onnx"
        );
    }

    #[test]
    fn speech_can_be_disabled() {
        let json = MINIMAL.replace(
            "\"max_window_secs\": 600",
            "\"max_window_secs\": 600, \"speech_command\": null",
        );
        let config = parse(&json).unwrap();
        assert!(config.speech_command.is_none());
    }

    #[test]
    fn missing_required_key_fails() {
        let json = r#"{ "db_path": "/tmp/a.db" }"#;
        assert!(parse(json).is_err());
    }
}
