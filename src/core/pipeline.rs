use crate::config::{ConfigError, GroupingConfig};
use crate::core::cluster::{ClusterError, Group};
use crate::core::histogram::{FeatureExtractor, FeatureRecord};
use crate::core::image::{FeatureError, FileDecoder, ImageSource};
use indicatif::ProgressBar;
use rayon::prelude::*;
use rayon::{ThreadPoolBuildError, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Extraction cancelled")]
    Cancelled,

    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] ThreadPoolBuildError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Clustering error: {0}")]
    Cluster(#[from] ClusterError),
}

/// A source that was excluded from grouping, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub source_id: String,
    pub reason: String,
}

/// Phase-one result: successful records in submission order plus failures.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub records: Vec<FeatureRecord>,
    pub failures: Vec<ExtractionFailure>,
}

/// Both phases of a run.
#[derive(Debug)]
pub struct GroupingOutcome {
    pub groups: Vec<Group>,
    pub failures: Vec<ExtractionFailure>,
}

enum TaskOutcome {
    Extracted(FeatureRecord),
    Failed(ExtractionFailure),
    Skipped,
}

/// Bounded-parallel feature extraction over a dedicated pool of `workers`
/// threads. A failing or panicking task only loses its own record.
pub struct ExtractionPipeline<S: ImageSource> {
    source: S,
    extractor: FeatureExtractor,
    workers: usize,
    retain_previews: bool,
    cancellation_token: Arc<AtomicBool>,
    progress: Option<ProgressBar>,
}

impl<S: ImageSource> ExtractionPipeline<S> {
    pub fn new(source: S, extractor: FeatureExtractor, workers: usize) -> Result<Self, ConfigError> {
        if workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }

        Ok(Self {
            source,
            extractor,
            workers,
            retain_previews: false,
            cancellation_token: Arc::new(AtomicBool::new(false)),
            progress: None,
        })
    }

    pub fn with_retained_previews(mut self, retain: bool) -> Self {
        self.retain_previews = retain;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    /// Stop dispatching new tasks; tasks already running finish first.
    pub fn cancel(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    /// Extract every source and wait for all tasks to settle. Records come
    /// back in the order of `sources`.
    pub fn run(&self, sources: &[String]) -> Result<ExtractionReport, PipelineError> {
        if self.cancellation_token.load(Ordering::Relaxed) {
            return Err(PipelineError::Cancelled);
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("imgroup-extract-{}", i))
            .build()?;

        let settled = AtomicUsize::new(0);
        let start_time = Instant::now();

        let outcomes: Vec<TaskOutcome> = pool.install(|| {
            sources
                .par_iter()
                .map(|source_id| {
                    let outcome = self.run_task(source_id);
                    let done = settled.fetch_add(1, Ordering::Relaxed) + 1;
                    log::trace!("{}/{} settled: {}", done, sources.len(), source_id);
                    if let Some(pb) = &self.progress {
                        pb.inc(1);
                    }
                    outcome
                })
                .collect()
        });

        if self.cancellation_token.load(Ordering::Relaxed) {
            log::warn!("Extraction cancelled; discarding {} outcome(s)", outcomes.len());
            return Err(PipelineError::Cancelled);
        }

        let mut report = ExtractionReport::default();
        for outcome in outcomes {
            match outcome {
                TaskOutcome::Extracted(record) => report.records.push(record),
                TaskOutcome::Failed(failure) => report.failures.push(failure),
                TaskOutcome::Skipped => {}
            }
        }

        log::info!(
            "Extracted {} of {} source(s) in {:.2?}, {} failed",
            report.records.len(),
            sources.len(),
            start_time.elapsed(),
            report.failures.len()
        );

        Ok(report)
    }

    fn run_task(&self, source_id: &str) -> TaskOutcome {
        if self.cancellation_token.load(Ordering::Relaxed) {
            return TaskOutcome::Skipped;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.extract_one(source_id)));

        let reason = match result {
            Ok(Ok(record)) => return TaskOutcome::Extracted(record),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                format!("Extraction panicked: {}", message)
            }
        };

        log::warn!("Skipping {}: {}", source_id, reason);
        TaskOutcome::Failed(ExtractionFailure {
            source_id: source_id.to_string(),
            reason,
        })
    }

    fn extract_one(&self, source_id: &str) -> Result<FeatureRecord, FeatureError> {
        let image = self.source.load(source_id)?;
        let histogram = self.extractor.extract(&image)?;

        Ok(FeatureRecord {
            source_id: source_id.to_string(),
            histogram,
            preview: self.retain_previews.then_some(image),
        })
    }
}

/// Validate `config`, decode and extract `sources` from disk, then cluster.
pub fn group_images(
    config: &GroupingConfig,
    sources: &[String],
) -> Result<GroupingOutcome, PipelineError> {
    config.validate()?;
    let decoder = FileDecoder::new(config.max_dimension);
    group_with_source(config, decoder, sources, None)
}

/// Same as [`group_images`] with a caller-supplied decode service and an
/// optional bar advanced once per settled extraction task.
pub fn group_with_source<S: ImageSource>(
    config: &GroupingConfig,
    source: S,
    sources: &[String],
    progress: Option<ProgressBar>,
) -> Result<GroupingOutcome, PipelineError> {
    config.validate()?;
    let clusterer = config.clusterer()?;

    let mut pipeline = ExtractionPipeline::new(source, config.extractor()?, config.workers)?
        .with_retained_previews(config.retain_previews);
    if let Some(pb) = progress {
        pipeline = pipeline.with_progress(pb);
    }

    let report = pipeline.run(sources)?;
    let groups = clusterer.cluster(report.records)?;

    Ok(GroupingOutcome {
        groups,
        failures: report.failures,
    })
}
