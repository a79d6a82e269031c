//! Frame data structures for decoded video content

use image::RgbImage;

/// A single decoded video frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixel data, same dimensions as the source
    pub image: RgbImage,
    /// Zero-based position of this frame in the source stream
    pub index: u64,
}

impl Frame {
    /// Create a new frame
    pub fn new(image: RgbImage, index: u64) -> Self {
        Self { image, index }
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
