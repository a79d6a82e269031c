//! Plate image conditioning for OCR
//!
//! Plate crops are small and noisy. Before recognition each crop goes through
//! a fixed chain: grayscale, CLAHE, median blur, 5x5 Gaussian blur, Otsu
//! binarization, 2x2 opening and closing, and removal of connected
//! components too small to be a digit stroke.

use image::{GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::debug;

use crate::config::PlatePreprocessing;

/// Run the full conditioning chain on a plate crop
pub fn condition_plate(crop: &RgbImage, settings: &PlatePreprocessing) -> GrayImage {
    let gray = to_grayscale(crop);
    if gray.width() == 0 || gray.height() == 0 {
        return gray;
    }

    let equalized = apply_clahe(&gray, settings.clahe_clip_limit, settings.clahe_tiles);
    let median_radius = settings.median_kernel / 2;
    let median = imageproc::filter::median_filter(&equalized, median_radius, median_radius);
    let blurred = gaussian_blur_5x5(&median);

    let level = imageproc::contrast::otsu_level(&blurred);
    let binary = binarize(&blurred, level);

    let opened = dilate_2x2(&erode_2x2(&binary));
    let closed = erode_2x2(&dilate_2x2(&opened));

    let (cleaned, removed) = remove_small_components(&closed, settings.min_component_area);

    debug!(
        "Conditioned {}x{} crop: otsu level {}, {} speckle component(s) removed",
        crop.width(),
        crop.height(),
        level,
        removed
    );

    cleaned
}

/// Convert RGB to 8-bit luma with BT.601 weights in 14-bit fixed point
pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(image.width(), image.height());
    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        let luma = (r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + (1 << 13)) >> 14;
        gray.put_pixel(x, y, Luma([luma.min(255) as u8]));
    }
    gray
}

/// Contrast-limited adaptive histogram equalization
///
/// `tiles` x `tiles` grid, per-tile histograms clipped at
/// `clip_limit * tile_area / 256` with the excess spread evenly, and
/// bilinear interpolation between neighbouring tile mappings.
pub fn apply_clahe(image: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    let tiles = tiles.max(1);
    if width == 0 || height == 0 {
        return image.clone();
    }

    let tile_w = width.div_ceil(tiles);
    let tile_h = height.div_ceil(tiles);
    let tile_area = (tile_w * tile_h) as f32;

    let clip = if clip_limit > 0.0 {
        ((clip_limit * tile_area / 256.0) as u32).max(1)
    } else {
        u32::MAX
    };
    let lut_scale = 255.0 / tile_area;

    // One 256-entry mapping per tile, row-major
    let mut luts = vec![[0u8; 256]; (tiles * tiles) as usize];

    for ty in 0..tiles {
        for tx in 0..tiles {
            let mut hist = [0u32; 256];
            for y in ty * tile_h..(ty + 1) * tile_h {
                let sy = reflect_101(y as i64, height);
                for x in tx * tile_w..(tx + 1) * tile_w {
                    let sx = reflect_101(x as i64, width);
                    hist[image.get_pixel(sx, sy).0[0] as usize] += 1;
                }
            }

            clip_histogram(&mut hist, clip);

            let lut = &mut luts[(ty * tiles + tx) as usize];
            let mut sum = 0u32;
            for (value, count) in hist.iter().enumerate() {
                sum += count;
                lut[value] = (sum as f32 * lut_scale).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    let inv_tw = 1.0 / tile_w as f32;
    let inv_th = 1.0 / tile_h as f32;
    let last = tiles as i64 - 1;
    let mut result = GrayImage::new(width, height);

    for y in 0..height {
        let tyf = y as f32 * inv_th - 0.5;
        let ty1 = tyf.floor() as i64;
        let ya = tyf - ty1 as f32;
        let (ty1, ty2) = (ty1.clamp(0, last) as u32, (ty1 + 1).clamp(0, last) as u32);

        for x in 0..width {
            let txf = x as f32 * inv_tw - 0.5;
            let tx1 = txf.floor() as i64;
            let xa = txf - tx1 as f32;
            let (tx1, tx2) = (tx1.clamp(0, last) as u32, (tx1 + 1).clamp(0, last) as u32);

            let v = image.get_pixel(x, y).0[0] as usize;
            let at = |tx: u32, ty: u32| luts[(ty * tiles + tx) as usize][v] as f32;

            let top = at(tx1, ty1) * (1.0 - xa) + at(tx2, ty1) * xa;
            let bottom = at(tx1, ty2) * (1.0 - xa) + at(tx2, ty2) * xa;
            let value = top * (1.0 - ya) + bottom * ya;

            result.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }

    result
}

/// Clip a histogram and redistribute the excess over all bins
fn clip_histogram(hist: &mut [u32; 256], clip: u32) {
    let mut excess = 0u32;
    for count in hist.iter_mut() {
        if *count > clip {
            excess += *count - clip;
            *count = clip;
        }
    }

    let batch = excess / 256;
    let mut residual = excess - batch * 256;
    for count in hist.iter_mut() {
        *count += batch;
    }

    if residual > 0 {
        let step = (256 / residual).max(1) as usize;
        let mut i = 0;
        while i < 256 && residual > 0 {
            hist[i] += 1;
            residual -= 1;
            i += step;
        }
    }
}

/// 5x5 Gaussian blur with the binomial kernel [1 4 6 4 1] / 16 per axis
pub fn gaussian_blur_5x5(image: &GrayImage) -> GrayImage {
    const KERNEL: [u32; 5] = [1, 4, 6, 4, 1];
    let (width, height) = image.dimensions();

    // Horizontal pass keeps full precision (sum of weights = 16)
    let mut horizontal = vec![0u32; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0u32;
            for (k, weight) in KERNEL.iter().enumerate() {
                let sx = reflect_101(x as i64 + k as i64 - 2, width);
                acc += weight * image.get_pixel(sx, y).0[0] as u32;
            }
            horizontal[(y * width + x) as usize] = acc;
        }
    }

    let mut result = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0u32;
            for (k, weight) in KERNEL.iter().enumerate() {
                let sy = reflect_101(y as i64 + k as i64 - 2, height);
                acc += weight * horizontal[(sy * width + x) as usize];
            }
            // Total weight 256, round to nearest
            result.put_pixel(x, y, Luma([((acc + 128) >> 8).min(255) as u8]));
        }
    }

    result
}

/// Global threshold: values above `level` become 255, the rest 0
pub fn binarize(image: &GrayImage, level: u8) -> GrayImage {
    let mut binary = image.clone();
    for pixel in binary.pixels_mut() {
        pixel.0[0] = if pixel.0[0] > level { 255 } else { 0 };
    }
    binary
}

/// Erosion with a 2x2 rectangle anchored at its bottom-right cell
pub fn erode_2x2(image: &GrayImage) -> GrayImage {
    morph_2x2(image, u8::min, u8::MAX)
}

/// Dilation with a 2x2 rectangle anchored at its bottom-right cell
pub fn dilate_2x2(image: &GrayImage) -> GrayImage {
    morph_2x2(image, u8::max, u8::MIN)
}

fn morph_2x2(image: &GrayImage, combine: fn(u8, u8) -> u8, identity: u8) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut result = GrayImage::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let mut value = identity;
            for dy in 0..=1u32 {
                for dx in 0..=1u32 {
                    // Out-of-frame cells do not take part
                    if x >= dx && y >= dy {
                        value = combine(value, image.get_pixel(x - dx, y - dy).0[0]);
                    }
                }
            }
            result.put_pixel(x, y, Luma([value]));
        }
    }

    result
}

/// Zero every 8-connected foreground component smaller than `min_area`
///
/// Returns the cleaned image and the number of components removed.
pub fn remove_small_components(binary: &GrayImage, min_area: u32) -> (GrayImage, usize) {
    let labels = connected_components(binary, Connectivity::Eight, Luma([0u8]));

    let max_label = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize;
    let mut areas = vec![0u32; max_label + 1];
    for pixel in labels.pixels() {
        areas[pixel.0[0] as usize] += 1;
    }

    let removed = areas
        .iter()
        .skip(1)
        .filter(|&&area| area > 0 && area < min_area)
        .count();

    let mut cleaned = binary.clone();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0] as usize;
        if label != 0 && areas[label] < min_area {
            cleaned.put_pixel(x, y, Luma([0]));
        }
    }

    (cleaned, removed)
}

/// Mirror an out-of-range coordinate without repeating the edge pixel
fn reflect_101(pos: i64, len: u32) -> u32 {
    let len = len as i64;
    if len <= 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let mut p = pos.rem_euclid(period);
    if p >= len {
        p = period - p;
    }
    p as u32
}
