//! Photometric enhancement applied before face extraction.
//!
//! Each adjustment blends the input with a degenerate image:
//! `out = degenerate + factor * (input - degenerate)`. A factor of 1.0 is the
//! identity; larger factors push pixels away from the degenerate image.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ImageResult, Rgb, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

pub const CONTRAST_FACTOR: f32 = 1.2;
pub const SHARPNESS_FACTOR: f32 = 1.3;
pub const BRIGHTNESS_FACTOR: f32 = 1.1;
pub const JPEG_QUALITY: u8 = 95;

/// Smoothing kernel whose output is the degenerate image for sharpening.
const SMOOTH_KERNEL: [f32; 9] = [
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    5.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
    1.0 / 13.0,
];

/// Contrast, then sharpness, then brightness.
pub fn enhance(image: &RgbImage) -> RgbImage {
    let image = adjust_contrast(image, CONTRAST_FACTOR);
    let image = adjust_sharpness(&image, SHARPNESS_FACTOR);
    adjust_brightness(&image, BRIGHTNESS_FACTOR)
}

/// Blend against a flat grey at the image's mean luma.
pub fn adjust_contrast(image: &RgbImage, factor: f32) -> RgbImage {
    let mean = mean_luma(image).round();
    map_channels(image, |value| blend(mean, value, factor))
}

/// Blend against a 3×3 smoothed copy. The one-pixel border is left as is.
pub fn adjust_sharpness(image: &RgbImage, factor: f32) -> RgbImage {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return image.clone();
    }

    let smooth: RgbImage = imageops::filter3x3(image, &SMOOTH_KERNEL);
    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
            continue;
        }
        let degenerate = smooth.get_pixel(x, y);
        for (value, base) in pixel.0.iter_mut().zip(degenerate.0) {
            *value = blend(f32::from(base), *value, factor);
        }
    }
    out
}

/// Blend against black.
pub fn adjust_brightness(image: &RgbImage, factor: f32) -> RgbImage {
    map_channels(image, |value| blend(0.0, value, factor))
}

/// Enhance `source` and write the result to `target` as JPEG.
pub fn enhance_file(source: &Path, target: &Path) -> ImageResult<()> {
    let image = image::open(source)?.to_rgb8();
    write_jpeg(&enhance(&image), target)
}

pub fn write_jpeg(image: &RgbImage, path: &Path) -> ImageResult<()> {
    let writer = BufWriter::new(File::create(path)?);
    let mut encoder = JpegEncoder::new_with_quality(writer, JPEG_QUALITY);
    encoder.encode_image(image)
}

/// ITU-R 601-2 luma mean over the whole image.
fn mean_luma(image: &RgbImage) -> f32 {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return 0.0;
    }
    let total: f64 = image
        .pixels()
        .map(|Rgb([r, g, b])| (299.0 * f64::from(*r) + 587.0 * f64::from(*g) + 114.0 * f64::from(*b)) / 1000.0)
        .sum();
    (total / count as f64) as f32
}

fn map_channels(image: &RgbImage, f: impl Fn(u8) -> u8) -> RgbImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for value in pixel.0.iter_mut() {
            *value = f(*value);
        }
    }
    out
}

fn blend(degenerate: f32, value: u8, factor: f32) -> u8 {
    (degenerate + factor * (f32::from(value) - degenerate))
        .round()
        .clamp(0.0, 255.0) as u8
}
