use crate::core::cluster::Clusterer;
use crate::core::histogram::{FeatureExtractor, HistogramConfig};
use crate::core::similarity::{ColorDistance, SimilarityMetric};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Threshold {0} is outside the similarity range [0, 1]")]
    ThresholdOutOfRange(f64),

    #[error("Worker budget must be at least 1")]
    ZeroWorkers,

    #[error("Lattice steps must be within {min}..={max}, got {steps}")]
    StepsOutOfRange { steps: u16, min: u16, max: u16 },

    #[error("Top-K bin cap must be at least 1")]
    ZeroTopK,

    #[error("Similarity power must be at least 1")]
    ZeroPower,

    #[error("Maximum dimension must be at least 1 pixel")]
    ZeroMaxDimension,

    #[error("Could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Every tunable of one grouping run. Loaded from JSON, overridden by CLI
/// flags, validated once before any work starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupingConfig {
    pub steps: u16,
    pub top_k: usize,
    pub distance: ColorDistance,
    pub power: u32,
    pub threshold: f64,
    pub workers: usize,
    pub max_dimension: Option<u32>,
    pub retain_previews: bool,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        let histogram = HistogramConfig::default();
        Self {
            steps: histogram.steps,
            top_k: histogram.top_k,
            distance: ColorDistance::default(),
            power: 3,
            threshold: 0.95,
            workers: num_cpus::get(),
            max_dimension: Some(256),
            retain_previews: false,
        }
    }
}

impl GroupingConfig {
    /// `<config dir>/imgroup/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("imgroup").join("config.json"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Explicit path first, then the per-user default file if it exists,
    /// then built-in defaults. Nothing is validated here.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.is_file() => {
                log::debug!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.histogram_config().validate()?;

        if self.power == 0 {
            return Err(ConfigError::ZeroPower);
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.threshold));
        }
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.max_dimension == Some(0) {
            return Err(ConfigError::ZeroMaxDimension);
        }
        Ok(())
    }

    pub fn histogram_config(&self) -> HistogramConfig {
        HistogramConfig {
            steps: self.steps,
            top_k: self.top_k,
        }
    }

    pub fn extractor(&self) -> Result<FeatureExtractor, ConfigError> {
        FeatureExtractor::new(self.histogram_config())
    }

    pub fn metric(&self) -> SimilarityMetric {
        SimilarityMetric::new(self.distance, self.power)
    }

    pub fn clusterer(&self) -> Result<Clusterer, ConfigError> {
        Clusterer::new(self.metric(), self.threshold)
    }
}
