//! Tensor preparation for ONNX models
//!
//! Handles resizing, normalization and layout conversion for the YOLO plate
//! detector and the PaddleOCR recognition model.

use image::{GrayImage, RgbImage};
use ndarray::{Array3, Array4};

/// Recognition model input configuration
#[derive(Debug, Clone)]
pub struct RecognitionInput {
    /// Target height for the recognition model (PP-OCR uses 48)
    pub target_height: u32,
    /// Maximum width after resizing
    pub max_width: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Default for RecognitionInput {
    fn default() -> Self {
        Self {
            target_height: 48,
            max_width: 320,
            // PaddleOCR maps [0, 255] -> [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

/// Geometry of a letterboxed detector input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Scale applied to the source image
    pub scale: f32,
    /// Horizontal padding added on the left
    pub pad_x: f32,
    /// Vertical padding added on the top
    pub pad_y: f32,
}

impl Letterbox {
    /// Map a point from model input space back to source pixels
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Convert an RGB image to an HWC f32 array in [0, 1]
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        image.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
    })
}

/// Replicate a grayscale image into an HWC f32 array in [0, 1]
pub fn gray_to_rgb_f32(image: &GrayImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, _)| {
        image.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0
    })
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    Array3::from_shape_fn((h, w, 3), |(y, x, c)| (image[[y, x, c]] - mean[c]) / std[c])
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    Array4::from_shape_fn((1, c, h, w), |(_, ch, y, x)| image[[y, x, ch]])
}

/// Bilinear resize of an HWC array to exactly `new_h` x `new_w`
fn resize_bilinear(image: &Array3<f32>, new_h: usize, new_w: usize) -> Array3<f32> {
    let (h, w, c) = image.dim();
    let mut resized = Array3::<f32>::zeros((new_h, new_w, c));
    if h == 0 || w == 0 {
        return resized;
    }

    let scale_y = h as f32 / new_h as f32;
    let scale_x = w as f32 / new_w as f32;

    for y in 0..new_h {
        let src_y = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, (h - 1) as f32);
        let y0 = src_y.floor() as usize;
        let y1 = (y0 + 1).min(h - 1);
        let fy = src_y - y0 as f32;

        for x in 0..new_w {
            let src_x = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, (w - 1) as f32);
            let x0 = src_x.floor() as usize;
            let x1 = (x0 + 1).min(w - 1);
            let fx = src_x - x0 as f32;

            for ch in 0..c {
                let v0 = image[[y0, x0, ch]] * (1.0 - fx) + image[[y0, x1, ch]] * fx;
                let v1 = image[[y1, x0, ch]] * (1.0 - fx) + image[[y1, x1, ch]] * fx;
                resized[[y, x, ch]] = v0 * (1.0 - fy) + v1 * fy;
            }
        }
    }

    resized
}

/// Letterbox an RGB frame into a square detector input
///
/// The image is scaled to fit with its aspect ratio kept and centred on a
/// 114/255 gray canvas, the fill YOLO models are trained with.
pub fn letterbox(image: &RgbImage, target_size: u32) -> (Array4<f32>, Letterbox) {
    let (width, height) = image.dimensions();
    let target = target_size as usize;

    let scale = target_size as f32 / width.max(height).max(1) as f32;
    let new_w = ((width as f32 * scale).round() as usize).clamp(1, target);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, target);
    let pad_x = (target - new_w) / 2;
    let pad_y = (target - new_h) / 2;

    let resized = resize_bilinear(&rgb_to_f32(image), new_h, new_w);

    let mut canvas = Array3::<f32>::from_elem((target, target, 3), 114.0 / 255.0);
    for y in 0..new_h {
        for x in 0..new_w {
            for c in 0..3 {
                canvas[[pad_y + y, pad_x + x, c]] = resized[[y, x, c]];
            }
        }
    }

    (
        hwc_to_nchw(&canvas),
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Resize to fixed height with a width capped at `max_width`
pub fn resize_for_recognition(image: &Array3<f32>, target_height: u32, max_width: u32) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let scale = target_height as f32 / h.max(1) as f32;
    let new_w = ((w as f32 * scale).ceil() as u32).clamp(1, max_width) as usize;
    resize_bilinear(image, target_height as usize, new_w)
}

/// Full preprocessing pipeline for the recognition model
pub fn preprocess_for_recognition(image: &GrayImage, config: &RecognitionInput) -> Array4<f32> {
    // 1. Replicate to three channels
    let rgb = gray_to_rgb_f32(image);

    // 2. Resize to fixed height
    let resized = resize_for_recognition(&rgb, config.target_height, config.max_width);

    // 3. Normalize
    let normalized = normalize(&resized, &config.mean, &config.std);

    // 4. Convert to NCHW tensor
    hwc_to_nchw(&normalized)
}
