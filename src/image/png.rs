use super::metrics::{ImageFormat, ImageMetrics, Orientation};

pub(super) const SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// IHDR always starts at byte 8; width and height are big-endian u32 at 16..24.
pub(super) fn inspect(bytes: &[u8]) -> Option<ImageMetrics> {
    if bytes.len() < 24 || bytes[..8] != SIGNATURE || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
    Some(ImageMetrics::new(ImageFormat::Png, width, height, Orientation::NORMAL))
}
