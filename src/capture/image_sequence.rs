//! Image-sequence video source
//!
//! Treats a directory of still frames (sorted by file name) as a video
//! recorded at a fixed frame rate.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::frame::Frame;
use super::VideoSource;

const FRAME_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Directory-of-frames video source
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    fps: f64,
    width: u32,
    height: u32,
    released: bool,
}

impl ImageSequenceSource {
    /// Open a directory of frames
    pub fn open(dir: &Path, fps: f64) -> Result<Self> {
        if fps <= 0.0 {
            anyhow::bail!("Image sequence frame rate must be positive, got {}", fps);
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory: {:?}", dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_frame_file(path))
            .collect();
        paths.sort();

        // Dimensions come from the first frame; an empty directory is a
        // zero-frame video.
        let (width, height) = match paths.first() {
            Some(first) => image::image_dimensions(first)
                .with_context(|| format!("Failed to read frame header: {:?}", first))?,
            None => (0, 0),
        };

        debug!("Image sequence {:?}: {} frames", dir, paths.len());

        Ok(Self {
            paths,
            cursor: 0,
            fps,
            width,
            height,
            released: false,
        })
    }

    /// Number of frames in the sequence
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the sequence has no frames
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl VideoSource for ImageSequenceSource {
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
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };

        let image = image::open(path)
            .with_context(|| format!("Failed to decode frame: {:?}", path))?
            .to_rgb8();

        if image.dimensions() != (self.width, self.height) {
            anyhow::bail!(
                "Frame {:?} is {}x{}, expected {}x{}",
                path,
                image.width(),
                image.height(),
                self.width,
                self.height
            );
        }

        let frame = Frame::new(image, self.cursor as u64);
        self.cursor += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.paths.clear();
        self.released = true;
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}
