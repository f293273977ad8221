//! Group images by the similarity of their color distributions.
//!
//! Images are reduced to sparse soft-binned color histograms, scored pairwise
//! with a normalized color-kernel similarity and partitioned greedily into
//! groups around seed images.

pub mod config;
pub mod core;
pub mod discovery;
pub mod output;

pub use crate::config::{ConfigError, GroupingConfig};
pub use crate::core::cluster::{Clusterer, Group, GroupMember};
pub use crate::core::histogram::{ColorHistogram, FeatureExtractor, FeatureRecord, HistogramConfig};
pub use crate::core::image::{FeatureError, FileDecoder, Image, ImageSource};
pub use crate::core::pipeline::{
    ExtractionFailure, ExtractionPipeline, GroupingOutcome, PipelineError, group_images,
    group_with_source,
};
pub use crate::core::similarity::{ColorDistance, SimilarityMetric};
