//! Plate detection module
//!
//! Runs the object detector over a frame, keeps only route-number plate
//! classes and cuts padded crops out of the frame for OCR.

use anyhow::Result;
use image::RgbImage;
use tracing::{debug, info};

use super::RecognitionError;
use crate::capture::frame::Frame;

/// Detector class names that carry a route number
pub const DEFAULT_PLATE_CLASSES: [&str; 3] = ["front_num", "side_num", "back_num"];

/// Default padding added around each plate box, in pixels
pub const DEFAULT_PADDING: u32 = 5;

/// A single detector output in frame pixel coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Left edge
    pub x1: f32,
    /// Top edge
    pub y1: f32,
    /// Right edge
    pub x2: f32,
    /// Bottom edge
    pub y2: f32,
    /// Index into the detector's label table
    pub class_id: usize,
    /// Detection confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// A pre-trained object detector
pub trait Detector {
    /// Label table; the position of a name is its class id
    fn labels(&self) -> &[String];

    /// Run inference on an RGB frame
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn labels(&self) -> &[String] {
        (**self).labels()
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        (**self).detect(image)
    }
}

/// Integer crop rectangle, `0 <= x1 < x2 <= width` and `0 <= y1 < y2 <= height`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBounds {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl CropBounds {
    /// Crop width
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    /// Crop height
    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

/// A padded plate region cut out of a frame
#[derive(Debug, Clone)]
pub struct PlateCrop {
    /// Cropped pixels
    pub image: RgbImage,
    /// Region in the source frame
    pub bounds: CropBounds,
    /// Detector class of the plate
    pub class_id: usize,
    /// Detector confidence
    pub confidence: f32,
    /// Source frame index
    pub frame_index: u64,
}

/// Expand a detection box by `padding` and clamp it to the frame
///
/// Coordinates are truncated to whole pixels before padding. Returns `None`
/// when the clamped region has zero area.
pub fn padded_bounds(
    detection: &Detection,
    padding: u32,
    width: u32,
    height: u32,
) -> Option<CropBounds> {
    let pad = padding as i64;
    let (w, h) = (width as i64, height as i64);

    let x1 = (detection.x1 as i64 - pad).clamp(0, w);
    let y1 = (detection.y1 as i64 - pad).clamp(0, h);
    let x2 = (detection.x2 as i64 + pad).clamp(0, w);
    let y2 = (detection.y2 as i64 + pad).clamp(0, h);

    if x1 >= x2 || y1 >= y2 {
        return None;
    }

    Some(CropBounds {
        x1: x1 as u32,
        y1: y1 as u32,
        x2: x2 as u32,
        y2: y2 as u32,
    })
}

/// Resolve plate class names against a detector's label table
pub fn resolve_plate_classes(
    labels: &[String],
    plate_classes: &[String],
) -> Result<Vec<usize>, RecognitionError> {
    let ids: Vec<usize> = labels
        .iter()
        .enumerate()
        .filter(|(_, name)| plate_classes.iter().any(|p| p == *name))
        .map(|(id, _)| id)
        .collect();

    if ids.is_empty() {
        return Err(RecognitionError::NoPlateClasses {
            expected: plate_classes.to_vec(),
            available: labels.to_vec(),
        });
    }

    Ok(ids)
}

/// Finds route-number plates in frames
pub struct PlateLocator<D: Detector> {
    detector: D,
    plate_class_ids: Vec<usize>,
    padding: u32,
}

impl<D: Detector> PlateLocator<D> {
    /// Create a locator, resolving plate class ids once
    pub fn new(detector: D, plate_classes: &[String], padding: u32) -> Result<Self, RecognitionError> {
        let plate_class_ids = resolve_plate_classes(detector.labels(), plate_classes)?;

        info!(
            "Plate classes resolved: {:?}",
            plate_class_ids
                .iter()
                .map(|&id| (id, detector.labels()[id].as_str()))
                .collect::<Vec<_>>()
        );

        Ok(Self {
            detector,
            plate_class_ids,
            padding,
        })
    }

    /// Class ids treated as plates
    pub fn plate_class_ids(&self) -> &[usize] {
        &self.plate_class_ids
    }

    /// Detect plates in a frame and return their padded crops
    pub fn locate(&mut self, frame: &Frame) -> Result<Vec<PlateCrop>> {
        let (width, height) = frame.dimensions();
        let detections = self.detector.detect(&frame.image)?;

        let mut crops = Vec::new();
        for detection in detections {
            if !self.plate_class_ids.contains(&detection.class_id) {
                continue;
            }

            let Some(bounds) = padded_bounds(&detection, self.padding, width, height) else {
                debug!("Skipping zero-area plate box in frame {}", frame.index);
                continue;
            };

            let image = image::imageops::crop_imm(
                &frame.image,
                bounds.x1,
                bounds.y1,
                bounds.width(),
                bounds.height(),
            )
            .to_image();

            crops.push(PlateCrop {
                image,
                bounds,
                class_id: detection.class_id,
                confidence: detection.confidence,
                frame_index: frame.index,
            });
        }

        debug!("Frame {}: {} plate crop(s)", frame.index, crops.len());
        Ok(crops)
    }
}
