use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rememberme_core::{DistanceMatcher, SimilarityScale};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Built-in defaults, overridden by the TOML file (if any), overridden by
/// `REMEMBERME_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path. Empty selects the most webcam-like device.
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the key sealing reference embeddings.
    pub key_path: PathBuf,
    /// Distance at or below which similarity is 100.
    pub distance_floor: f32,
    /// Distance range over which similarity falls from 100 to 0.
    pub distance_span: f32,
    /// Similarity (0–100, exclusive) a match must exceed.
    pub match_threshold: f32,
    /// Minimum time between processed frames.
    pub frame_interval_ms: u64,
    /// Quiet time after the last transcript fragment before the pending
    /// transcript is condensed into a bullet.
    pub summary_interval_secs: u64,
    /// Transcript characters kept per bullet.
    pub summary_max_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        let scale = SimilarityScale::default();
        Self {
            camera_device: String::new(),
            capture_width: 1280,
            capture_height: 720,
            model_dir: rememberme_core::default_model_dir(),
            db_path: data_dir.join("people.db"),
            key_path: data_dir.join("embedding.key"),
            distance_floor: scale.distance_floor,
            distance_span: scale.distance_span,
            match_threshold: DistanceMatcher::default().threshold,
            frame_interval_ms: 33,
            summary_interval_secs: 30,
            summary_max_chars: rememberme_store::conversation::DEFAULT_SUMMARY_CHARS,
        }
    }
}

impl Config {
    /// Load the config file (if present) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_file_path();
        let mut config = if path.exists() {
            tracing::info!(path = %path.display(), "loading config file");
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(device) = var("REMEMBERME_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        if let Some(dir) = var("REMEMBERME_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(path) = var("REMEMBERME_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(path) = var("REMEMBERME_KEY_PATH") {
            self.key_path = PathBuf::from(path);
        }
        override_parsed(&var, "REMEMBERME_CAPTURE_WIDTH", &mut self.capture_width);
        override_parsed(&var, "REMEMBERME_CAPTURE_HEIGHT", &mut self.capture_height);
        override_parsed(&var, "REMEMBERME_DISTANCE_FLOOR", &mut self.distance_floor);
        override_parsed(&var, "REMEMBERME_DISTANCE_SPAN", &mut self.distance_span);
        override_parsed(&var, "REMEMBERME_MATCH_THRESHOLD", &mut self.match_threshold);
        override_parsed(&var, "REMEMBERME_FRAME_INTERVAL_MS", &mut self.frame_interval_ms);
        override_parsed(&var, "REMEMBERME_SUMMARY_INTERVAL_SECS", &mut self.summary_interval_secs);
        override_parsed(&var, "REMEMBERME_SUMMARY_MAX_CHARS", &mut self.summary_max_chars);
    }

    /// The configured device, or `None` to auto-select.
    pub fn camera_device(&self) -> Option<&str> {
        let device = self.camera_device.trim();
        (!device.is_empty()).then_some(device)
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(rememberme_core::DETECTOR_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> String {
        self.model_dir
            .join(rememberme_core::RECOGNIZER_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    pub fn matcher(&self) -> DistanceMatcher {
        DistanceMatcher {
            scale: SimilarityScale {
                distance_floor: self.distance_floor,
                distance_span: self.distance_span,
            },
            threshold: self.match_threshold,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// At least one second.
    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs.max(1))
    }
}

fn override_parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    let Some(raw) = var(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("rememberme")
}

/// `$REMEMBERME_CONFIG`, else `$XDG_CONFIG_HOME/rememberme/config.toml`.
fn config_file_path() -> PathBuf {
    if let Ok(path) = std::env::var("REMEMBERME_CONFIG") {
        return PathBuf::from(path);
    }
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("rememberme/config.toml")
}
