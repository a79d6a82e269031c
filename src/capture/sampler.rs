//! Temporal frame sampling
//!
//! Pulls frames from a [`VideoSource`] at a fixed time interval and groups
//! them into batches, independent of the source's native frame rate.

use tracing::{debug, warn};

use super::frame::Frame;
use super::VideoSource;

/// Default number of samples taken per second of video
pub const DEFAULT_TARGET_RATE: f64 = 5.0;

/// Default number of sampled frames per batch
pub const DEFAULT_BATCH_SIZE: usize = 15;

/// A group of frames sampled at uniform spacing
#[derive(Debug)]
pub struct FrameBatch {
    /// Zero-based batch number within the run
    pub sequence: usize,
    /// Sampled frames in source order
    pub frames: Vec<Frame>,
}

impl FrameBatch {
    /// Number of frames in the batch
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the batch holds no frames
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Frame-skip interval for a native rate and a target sampling rate
///
/// `floor(native_fps / target_rate)`, never less than 1 so sources slower
/// than the target rate are sampled frame by frame.
pub fn sampling_interval(native_fps: f64, target_rate: f64) -> u64 {
    if !native_fps.is_finite() || !target_rate.is_finite() || target_rate <= 0.0 {
        return 1;
    }
    ((native_fps / target_rate).floor() as u64).max(1)
}

/// Lazy, finite, non-restartable sequence of [`FrameBatch`]es
pub struct FrameSampler<S: VideoSource> {
    source: S,
    interval: u64,
    batch_size: usize,
    /// Frames read from the source so far
    position: u64,
    batches_emitted: usize,
    exhausted: bool,
}

impl<S: VideoSource> FrameSampler<S> {
    /// Create a sampler with the default rate and batch size
    pub fn new(source: S) -> Self {
        Self::with_params(source, DEFAULT_TARGET_RATE, DEFAULT_BATCH_SIZE)
    }

    /// Create a sampler with a custom target rate and batch size
    pub fn with_params(source: S, target_rate: f64, batch_size: usize) -> Self {
        let interval = sampling_interval(source.fps(), target_rate);
        debug!(
            "Sampling every {} frame(s) ({} fps source, {} samples/s target), {} frames per batch",
            interval,
            source.fps(),
            target_rate,
            batch_size
        );

        Self {
            source,
            interval,
            batch_size: batch_size.max(1),
            position: 0,
            batches_emitted: 0,
            exhausted: false,
        }
    }

    /// The frame-skip interval in use
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Width of the underlying source
    pub fn width(&self) -> u32 {
        self.source.width()
    }

    /// Height of the underlying source
    pub fn height(&self) -> u32 {
        self.source.height()
    }

    /// Release the underlying source
    pub fn release(&mut self) {
        self.exhausted = true;
        self.source.release();
    }

    /// Get the underlying source back
    pub fn into_inner(self) -> S {
        self.source
    }

    fn emit(&mut self, frames: Vec<Frame>) -> FrameBatch {
        let batch = FrameBatch {
            sequence: self.batches_emitted,
            frames,
        };
        self.batches_emitted += 1;
        batch
    }
}

impl<S: VideoSource> Iterator for FrameSampler<S> {
    type Item = FrameBatch;

    fn next(&mut self) -> Option<FrameBatch> {
        if self.exhausted {
            return None;
        }

        let mut frames = Vec::with_capacity(self.batch_size);

        loop {
            match self.source.read_frame() {
                Ok(Some(frame)) => {
                    // Positions count from 1, so the first kept frame is
                    // the last one of the first interval
                    self.position += 1;
                    if self.position % self.interval != 0 {
                        continue;
                    }

                    frames.push(frame);
                    if frames.len() == self.batch_size {
                        return Some(self.emit(frames));
                    }
                }
                Ok(None) => {
                    debug!("Source exhausted after {} frames", self.position);
                    self.exhausted = true;
                    break;
                }
                Err(e) => {
                    // A frame that cannot be read ends the stream
                    warn!("Stopping sampling at frame {}: {:#}", self.position, e);
                    self.exhausted = true;
                    break;
                }
            }
        }

        if frames.is_empty() {
            None
        } else {
            Some(self.emit(frames))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MemorySource;
    use anyhow::Result;
    use image::RgbImage;

    fn memory_source(count: u64, fps: f64) -> MemorySource {
        let frames = (0..count).map(|i| Frame::new(RgbImage::new(2, 2), i)).collect();
        MemorySource::new(frames, fps, 2, 2)
    }

    #[test]
    fn test_sampling_interval() {
        assert_eq!(sampling_interval(30.0, 5.0), 6);
        assert_eq!(sampling_interval(29.97, 5.0), 5);
        assert_eq!(sampling_interval(24.0, 5.0), 4);
        // Slower than the target rate: sample every frame
        assert_eq!(sampling_interval(3.0, 5.0), 1);
        assert_eq!(sampling_interval(0.0, 5.0), 1);
        assert_eq!(sampling_interval(f64::NAN, 5.0), 1);
        assert_eq!(sampling_interval(30.0, 0.0), 1);
    }

    #[test]
    fn test_accepted_indices_follow_interval() {
        let sampler = FrameSampler::new(memory_source(300, 30.0));
        let interval = sampler.interval();
        assert_eq!(interval, 6);

        let indices: Vec<u64> = sampler
            .flat_map(|batch| batch.frames.into_iter().map(|f| f.index))
            .collect();

        assert_eq!(indices.len(), 50);
        assert!(indices.iter().all(|i| (i + 1) % interval == 0));
        assert_eq!(indices[0], 5);
        assert_eq!(indices[1], 11);
    }

    #[test]
    fn test_positions_count_from_one() {
        let indices: Vec<u64> = FrameSampler::new(memory_source(14, 30.0))
            .flat_map(|batch| batch.frames.into_iter().map(|f| f.index))
            .collect();
        assert_eq!(indices, vec![5, 11]);

        // Shorter than one interval: nothing is sampled
        let mut sampler = FrameSampler::new(memory_source(5, 30.0));
        assert!(sampler.next().is_none());
    }

    #[test]
    fn test_batch_sizing() {
        // 100 frames at 30 fps, interval 6 -> 16 samples -> 15 + 1
        let sampler = FrameSampler::new(memory_source(100, 30.0));
        let sizes: Vec<usize> = sampler.map(|batch| batch.len()).collect();
        assert_eq!(sizes, vec![15, 1]);
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_batch() {
        // 180 frames, interval 6 -> exactly 30 samples -> two full batches
        let sampler = FrameSampler::new(memory_source(180, 30.0));
        let sizes: Vec<usize> = sampler.map(|batch| batch.len()).collect();
        assert_eq!(sizes, vec![15, 15]);
    }

    #[test]
    fn test_batch_sequence_numbers() {
        let sampler = FrameSampler::with_params(memory_source(10, 5.0), 5.0, 4);
        let sequences: Vec<usize> = sampler.map(|batch| batch.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_zero_frame_source_yields_nothing() {
        let mut sampler = FrameSampler::new(memory_source(0, 30.0));
        assert!(sampler.next().is_none());
        assert!(sampler.next().is_none());
    }

    #[test]
    fn test_release_after_iteration() {
        let mut sampler = FrameSampler::new(memory_source(20, 30.0));
        let count = sampler.by_ref().count();
        assert_eq!(count, 1);

        sampler.release();
        sampler.release();
        assert!(sampler.next().is_none());
        assert!(sampler.into_inner().is_released());
    }

    struct FailingSource {
        remaining: u32,
    }

    impl VideoSource for FailingSource {
        fn fps(&self) -> f64 {
            5.0
        }

        fn width(&self) -> u32 {
            2
        }

        fn height(&self) -> u32 {
            2
        }

        fn read_frame(&mut self) -> Result<Option<Frame>> {
            if self.remaining == 0 {
                anyhow::bail!("decode error");
            }
            self.remaining -= 1;
            Ok(Some(Frame::new(RgbImage::new(2, 2), 0)))
        }

        fn release(&mut self) {}
    }

    #[test]
    fn test_read_failure_ends_sampling_quietly() {
        let mut sampler = FrameSampler::new(FailingSource { remaining: 3 });
        let batch = sampler.next().unwrap();
        assert_eq!(batch.len(), 3);
        assert!(sampler.next().is_none());
    }
}
