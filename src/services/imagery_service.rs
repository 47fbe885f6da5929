use std::collections::BTreeMap;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgba};

use crate::error::AppError;

/// Upscale applied before OCR; block coordinates are divided back by it.
pub const SCALE_FACTOR: u32 = 3;

const COLOUR_SAMPLE_SIZE: u32 = 64;

const BLURHASH_X: u32 = 4;
const BLURHASH_Y: u32 = 3;
const BLURHASH_SAMPLE_SIZE: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
}

impl Rect {
    pub fn new(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Maps a rectangle from an image scaled up by `factor` back into the
    /// original space. Integer division truncates toward zero.
    pub fn scale_down(self, factor: u32) -> Rect {
        let factor = i64::from(factor.max(1));
        Rect {
            min_x: self.min_x / factor,
            min_y: self.min_y / factor,
            max_x: self.max_x / factor,
            max_y: self.max_y / factor,
        }
    }
}

pub fn greyscale(img: &DynamicImage) -> DynamicImage {
    img.grayscale()
}

pub fn scale_factor(img: &DynamicImage, factor: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    img.resize_exact(width * factor, height * factor, FilterType::Lanczos3)
}

/// Resizes to `width`, keeping the aspect ratio.
pub fn resize_to_width(img: &DynamicImage, width: u32) -> DynamicImage {
    let (src_w, src_h) = img.dimensions();
    if src_w == 0 {
        return img.clone();
    }
    let height = ((f64::from(src_h) * f64::from(width)) / f64::from(src_w)).round() as u32;
    img.resize_exact(width, height.max(1), FilterType::Lanczos3)
}

/// Most common colour after quantising each channel to steps of 16,
/// averaged over the winning bucket, as `#rrggbb`.
pub fn dominant_colour(img: &DynamicImage) -> String {
    let sample = img.thumbnail(COLOUR_SAMPLE_SIZE, COLOUR_SAMPLE_SIZE);

    let mut buckets: BTreeMap<[u8; 3], (u64, [u64; 3])> = BTreeMap::new();
    for (_, _, Rgba([r, g, b, a])) in sample.pixels() {
        if a < 128 {
            continue;
        }
        let entry = buckets.entry([r / 16, g / 16, b / 16]).or_insert((0, [0; 3]));
        entry.0 += 1;
        entry.1[0] += u64::from(r);
        entry.1[1] += u64::from(g);
        entry.1[2] += u64::from(b);
    }

    let mut best: Option<(u64, [u64; 3])> = None;
    for (count, sums) in buckets.into_values() {
        if best.map_or(true, |(c, _)| count > c) {
            best = Some((count, sums));
        }
    }

    match best {
        Some((count, [r, g, b])) => format!("#{:02x}{:02x}{:02x}", r / count, g / count, b / count),
        None => "#000000".to_string(),
    }
}

/// Compact blurred placeholder with 4x3 components, computed on a small
/// reduction of the image.
pub fn blurhash(img: &DynamicImage) -> Result<String, AppError> {
    let sample = img
        .thumbnail(BLURHASH_SAMPLE_SIZE, BLURHASH_SAMPLE_SIZE)
        .to_rgba8();
    let (width, height) = sample.dimensions();
    blurhash::encode(BLURHASH_X, BLURHASH_Y, width, height, sample.as_raw())
        .map_err(|e| AppError::General(format!("blurhash: {e}")))
}

/// 64-bit difference hash: each bit is set when a pixel is brighter than its
/// right-hand neighbour on a 9x8 greyscale reduction.
pub fn perceptual_hash(img: &DynamicImage) -> String {
    let small = img.resize_exact(9, 8, FilterType::Triangle).to_luma8();

    let mut bits: u64 = 0;
    for y in 0..8 {
        for x in 0..8 {
            let left = small.get_pixel(x, y).0[0];
            let right = small.get_pixel(x + 1, y).0[0];
            bits <<= 1;
            if left > right {
                bits |= 1;
            }
        }
    }
    format!("{bits:016x}")
}
