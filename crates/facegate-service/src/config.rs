//! Service configuration, loaded from `FACEGATE_*` environment variables.

use facegate_core::PipelineConfig;
use std::path::PathBuf;

pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Explicit detector model path, overriding the `model_dir` layout.
    pub detector_model: Option<PathBuf>,
    /// Explicit demographic model path, overriding the `model_dir` layout.
    pub demographics_model: Option<PathBuf>,
    /// Explicit embedder model path, overriding the `model_dir` layout.
    pub embedder_model: Option<PathBuf>,
    /// Path to the SQLite enrollment database.
    pub db_path: PathBuf,
    /// Path to the embedding sealing secret (generated on first use).
    pub secret_path: PathBuf,
    /// Detector confidence threshold.
    pub detection_threshold: f32,
    /// Weighted-similarity threshold for a verification match.
    pub match_threshold: f32,
    /// Intra-op thread count for each inference session.
    pub intra_threads: usize,
    /// Whether to load the optional demographic model.
    pub demographics_enabled: bool,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                PathBuf::from(facegate_core::pipeline::DEFAULT_MODEL_DIR)
            });

        let data_dir = data_dir(
            std::env::var("XDG_DATA_HOME").ok().as_deref(),
            std::env::var("HOME").ok().as_deref(),
        );

        let db_path = std::env::var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("enrollments.db"));
        let secret_path = std::env::var("FACEGATE_SECRET_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("sealing.key"));

        Self {
            model_dir,
            detector_model: std::env::var("FACEGATE_DETECTOR_MODEL").map(PathBuf::from).ok(),
            demographics_model: std::env::var("FACEGATE_GENDERAGE_MODEL").map(PathBuf::from).ok(),
            embedder_model: std::env::var("FACEGATE_EMBEDDER_MODEL").map(PathBuf::from).ok(),
            db_path,
            secret_path,
            detection_threshold: env_f32(
                "FACEGATE_DETECTION_THRESHOLD",
                facegate_core::detector::DEFAULT_CONFIDENCE_THRESHOLD,
            ),
            match_threshold: env_f32(
                "FACEGATE_MATCH_THRESHOLD",
                facegate_core::verify::MATCH_THRESHOLD,
            ),
            intra_threads: env_usize(
                "FACEGATE_INTRA_THREADS",
                facegate_core::pipeline::DEFAULT_INTRA_THREADS,
            ),
            demographics_enabled: std::env::var("FACEGATE_DEMOGRAPHICS")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    /// Model paths and inference settings for the pipeline.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::from_model_dir(&self.model_dir);
        if let Some(path) = &self.detector_model {
            config.detector_model = path.clone();
        }
        if let Some(path) = &self.demographics_model {
            config.demographics_model = Some(path.clone());
        }
        if let Some(path) = &self.embedder_model {
            config.embedder_model = path.clone();
        }
        config.detection_threshold = self.detection_threshold;
        config.intra_threads = self.intra_threads;
        if !self.demographics_enabled {
            config.demographics_model = None;
        }
        config
    }
}

fn data_dir(xdg_data_home: Option<&str>, home: Option<&str>) -> PathBuf {
    xdg_data_home
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            PathBuf::from(home.unwrap_or("/tmp")).join(".local/share")
        })
        .join("facegate")
}

fn env_f32(key: &str, default: f32) -> f32 {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, raw, "not a number, using the default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, raw, "not a number, using the default");
                default
            }
        },
        Err(_) => default,
    }
}
