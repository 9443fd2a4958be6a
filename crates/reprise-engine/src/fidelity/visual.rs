use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use std::path::Path;
use tracing::warn;

/// Side of the grayscale thumbnail both screenshots are reduced to before comparison.
const THUMB_SIZE: u32 = 16;

fn thumbnail(image: &DynamicImage) -> GrayImage {
    image
        .resize_exact(THUMB_SIZE, THUMB_SIZE, FilterType::Triangle)
        .to_luma8()
}

/// `1 - mean(|a - b|) / 255` over 16x16 grayscale thumbnails.
pub fn similarity(a: &DynamicImage, b: &DynamicImage) -> f64 {
    let ta = thumbnail(a);
    let tb = thumbnail(b);
    let total: u64 = ta
        .pixels()
        .zip(tb.pixels())
        .map(|(pa, pb)| u64::from(pa.0[0].abs_diff(pb.0[0])))
        .sum();
    let mean = total as f64 / f64::from(THUMB_SIZE * THUMB_SIZE);
    (1.0 - mean / 255.0).clamp(0.0, 1.0)
}

pub fn similarity_bytes(a: &[u8], b: &[u8]) -> Option<f64> {
    let a = image::load_from_memory(a).ok()?;
    let b = image::load_from_memory(b).ok()?;
    Some(similarity(&a, &b))
}

/// Compare two screenshots on disk. Unreadable or undecodable files score 0.
pub fn similarity_files(recorded: &Path, replayed: &Path) -> f64 {
    let open = |path: &Path| match image::open(path) {
        Ok(img) => Some(img),
        Err(e) => {
            warn!("Cannot decode screenshot {}: {}", path.display(), e);
            None
        }
    };
    match (open(recorded), open(replayed)) {
        (Some(a), Some(b)) => similarity(&a, &b),
        _ => 0.0,
    }
}
