//! Video Capture Layer
//!
//! Reads frames from recorded video or a directory of still frames and
//! samples them into fixed-size batches for the recognition pipeline.

pub mod frame;
pub mod image_sequence;
pub mod sampler;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

use anyhow::Result;
use std::collections::VecDeque;
use std::path::Path;
use tracing::info;

use frame::Frame;

pub use image_sequence::ImageSequenceSource;
pub use sampler::{FrameBatch, FrameSampler};

/// A source of decoded frames
///
/// `read_frame` returns `Ok(None)` once the stream is exhausted. `release`
/// frees the underlying handle and must be safe to call more than once.
pub trait VideoSource {
    /// Native frame rate in frames per second
    fn fps(&self) -> f64;

    /// Frame width in pixels
    fn width(&self) -> u32;

    /// Frame height in pixels
    fn height(&self) -> u32;

    /// Read the next frame, or `None` at end of stream
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying source
    fn release(&mut self);
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
    fn fps(&self) -> f64 {
        (**self).fps()
    }

    fn width(&self) -> u32 {
        (**self).width()
    }

    fn height(&self) -> u32 {
        (**self).height()
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        (**self).read_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// In-memory frame source, mostly useful for tests and replays
pub struct MemorySource {
    frames: VecDeque<Frame>,
    fps: f64,
    width: u32,
    height: u32,
    released: bool,
}

impl MemorySource {
    /// Create a source over already-decoded frames
    pub fn new(frames: Vec<Frame>, fps: f64, width: u32, height: u32) -> Self {
        Self {
            frames: frames.into(),
            fps,
            width,
            height,
            released: false,
        }
    }

    /// Whether `release` has been called
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl VideoSource for MemorySource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.released {
            return Ok(None);
        }
        Ok(self.frames.pop_front())
    }

    fn release(&mut self) {
        self.frames.clear();
        self.released = true;
    }
}

/// Open a video source from a path
///
/// Directories are read as image sequences at `sequence_fps`; anything else
/// is handed to the FFmpeg decoder when the `ffmpeg` feature is enabled.
pub fn open_source(path: &Path, sequence_fps: f64) -> Result<Box<dyn VideoSource>> {
    if path.is_dir() {
        let source = ImageSequenceSource::open(path, sequence_fps)?;
        info!(
            "Opened image sequence {:?}: {}x{} @ {} fps",
            path,
            source.width(),
            source.height(),
            source.fps()
        );
        return Ok(Box::new(source));
    }

    open_video_file(path)
}

#[cfg(feature = "ffmpeg")]
fn open_video_file(path: &Path) -> Result<Box<dyn VideoSource>> {
    let source = ffmpeg::FfmpegSource::open(path)?;
    info!(
        "Opened video {:?}: {}x{} @ {:.2} fps",
        path,
        source.width(),
        source.height(),
        source.fps()
    );
    Ok(Box::new(source))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video_file(path: &Path) -> Result<Box<dyn VideoSource>> {
    anyhow::bail!(
        "Cannot decode {:?}: video files need the `ffmpeg` feature (or pass a directory of frames)",
        path
    )
}
