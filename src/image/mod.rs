//! Image intelligence: header inspection and aspect-ratio resolution.
//!
//! Dimensions and EXIF orientation are read straight from the encoded bytes,
//! so only the first few kilobytes of an image ever need to be fetched.
//! Parsers never fail loudly: an unrecognised or corrupt header yields `None`
//! and callers fall back to a default aspect ratio.

pub mod aspect_ratio;
mod jpeg;
mod metrics;
mod png;
mod webp;

pub use aspect_ratio::{AspectRatio, AspectRatioCatalog, AspectRatioResolver, ResolveOptions};
pub use metrics::{ImageFormat, ImageMetrics, Orientation};

/// Buffers shorter than this cannot carry any header we understand.
pub const MIN_HEADER_LEN: usize = 24;

/// Number of leading bytes requested when only the header is needed.
pub const DEFAULT_HEADER_BYTES: usize = 64 * 1024;

/// Detect the container format from its magic bytes.
pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(&[0xFF, 0xD8]) {
        Some(ImageFormat::Jpeg)
    } else if bytes.starts_with(&png::SIGNATURE) {
        Some(ImageFormat::Png)
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(ImageFormat::WebP)
    } else {
        None
    }
}

/// Inspect raw image bytes (or a prefix starting at offset 0).
///
/// Returns `None` when the format is not JPEG/PNG/WebP, the buffer is shorter
/// than [`MIN_HEADER_LEN`], or the header is malformed.
pub fn inspect_image(bytes: &[u8]) -> Option<ImageMetrics> {
    if bytes.len() < MIN_HEADER_LEN {
        return None;
    }
    let metrics = match detect_format(bytes)? {
        ImageFormat::Jpeg => jpeg::inspect(bytes),
        ImageFormat::Png => png::inspect(bytes),
        ImageFormat::WebP => webp::inspect(bytes),
    }?;
    metrics.is_valid().then_some(metrics)
}
