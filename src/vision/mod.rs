//! Vision Layer
//!
//! Turns sampled video frames into a route number:
//! - plate detection and cropping (`detection`, `yolo`)
//! - plate conditioning and text recognition (`ocr_preprocess`, `ocr`)
//! - per-batch majority vote (`aggregate`)

pub mod aggregate;
pub mod detection;
pub mod models;
pub mod ocr;
pub mod ocr_preprocess;
pub mod preprocess;
pub mod yolo;

use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capture::{FrameBatch, FrameSampler, VideoSource};

pub use aggregate::PlateAggregator;
pub use detection::{Detection, Detector, PlateCrop, PlateLocator};
pub use models::{ModelManager, ModelType, OnnxSession};
pub use ocr::{CrnnRecognizer, OcrCandidate, OcrHit, TextExtractor, TextRecognizer};
pub use yolo::YoloDetector;

/// Recognition errors callers can match on
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// The detector knows none of the configured plate classes
    #[error("detector has none of the plate classes {expected:?} (labels: {available:?})")]
    NoPlateClasses {
        expected: Vec<String>,
        available: Vec<String>,
    },
}

/// Where the recognition pipeline currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Waiting for the next batch
    Sampling,
    /// Finding plates in the batch's frames
    Detecting,
    /// Reading text from plate crops
    Extracting,
    /// Voting over the batch's hits
    Aggregating,
    /// Source exhausted
    Finalized,
}

/// Terminal result of a recognition run
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionOutcome {
    /// At least one batch produced a route number
    Recognized {
        /// First number found
        route: String,
        /// One entry per batch, `None` where the batch had no result
        per_batch: Vec<Option<String>>,
        /// The non-empty entries of `per_batch`, in order
        found: Vec<String>,
    },
    /// No batch produced a route number
    NothingDetected {
        per_batch: Vec<Option<String>>,
    },
}

impl RecognitionOutcome {
    /// Build the outcome from per-batch results
    pub fn from_batches(per_batch: Vec<Option<String>>) -> Self {
        let found: Vec<String> = per_batch.iter().flatten().cloned().collect();
        match found.first() {
            Some(route) => RecognitionOutcome::Recognized {
                route: route.clone(),
                per_batch,
                found,
            },
            None => RecognitionOutcome::NothingDetected { per_batch },
        }
    }

    /// The recognized route number, if any
    pub fn route(&self) -> Option<&str> {
        match self {
            RecognitionOutcome::Recognized { route, .. } => Some(route),
            RecognitionOutcome::NothingDetected { .. } => None,
        }
    }

    /// Per-batch results including empty batches
    pub fn per_batch(&self) -> &[Option<String>] {
        match self {
            RecognitionOutcome::Recognized { per_batch, .. } => per_batch,
            RecognitionOutcome::NothingDetected { per_batch } => per_batch,
        }
    }
}

/// Route-number recognition pipeline
pub struct PlateRecognizer<D: Detector, R: TextRecognizer> {
    locator: PlateLocator<D>,
    extractor: TextExtractor<R>,
    aggregator: PlateAggregator,
    state: PipelineState,
}

impl<D: Detector, R: TextRecognizer> PlateRecognizer<D, R> {
    pub fn new(
        locator: PlateLocator<D>,
        extractor: TextExtractor<R>,
        aggregator: PlateAggregator,
    ) -> Self {
        Self {
            locator,
            extractor,
            aggregator,
            state: PipelineState::Sampling,
        }
    }

    /// Current pipeline state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Voting state, including the numbers emitted so far
    pub fn aggregator(&self) -> &PlateAggregator {
        &self.aggregator
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("Pipeline {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run every batch of the sampler through the pipeline
    ///
    /// The source is released once sampling ends.
    pub fn run<S: VideoSource>(&mut self, sampler: &mut FrameSampler<S>) -> RecognitionOutcome {
        let start = Instant::now();
        let mut per_batch = Vec::new();

        self.transition(PipelineState::Sampling);
        for batch in sampler.by_ref() {
            let result = self.process_batch(&batch);
            info!(
                "Batch {} ({} frames): {}",
                batch.sequence,
                batch.len(),
                result.as_deref().unwrap_or("no result")
            );
            per_batch.push(result);
            self.transition(PipelineState::Sampling);
        }
        sampler.release();

        self.transition(PipelineState::Finalized);
        let outcome = RecognitionOutcome::from_batches(per_batch);
        info!(
            "Recognition finished in {:?}: {} batch(es), route {:?}",
            start.elapsed(),
            outcome.per_batch().len(),
            outcome.route()
        );
        outcome
    }

    /// Detect, read and vote over one batch
    pub fn process_batch(&mut self, batch: &FrameBatch) -> Option<String> {
        self.transition(PipelineState::Detecting);
        let mut crops = Vec::new();
        for frame in &batch.frames {
            match self.locator.locate(frame) {
                Ok(found) => crops.extend(found),
                Err(e) => warn!("Detection failed on frame {}: {:#}", frame.index, e),
            }
        }

        self.transition(PipelineState::Extracting);
        let mut pool = Vec::new();
        for crop in &crops {
            match self.extractor.extract(crop) {
                Ok(hits) => {
                    for hit in &hits {
                        debug!(
                            "Frame {}: read {} ({:.3})",
                            crop.frame_index, hit.text, hit.confidence
                        );
                    }
                    pool.extend(hits);
                }
                Err(e) => warn!("OCR failed on frame {}: {:#}", crop.frame_index, e),
            }
        }

        self.transition(PipelineState::Aggregating);
        let result = self.aggregator.resolve_batch(&pool);
        if let Some(number) = &result {
            self.aggregator.mark_processed(number);
        }
        result
    }
}
