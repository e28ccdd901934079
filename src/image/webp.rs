use super::metrics::{ImageFormat, ImageMetrics, Orientation};

const MASK_14: u32 = 0x3FFF;

fn u16_le(bytes: &[u8], at: usize) -> Option<u32> {
    let b = bytes.get(at..at + 2)?;
    Some(u32::from(u16::from_le_bytes([b[0], b[1]])))
}

fn u24_le(bytes: &[u8], at: usize) -> Option<u32> {
    let b = bytes.get(at..at + 3)?;
    Some(u32::from(b[0]) | u32::from(b[1]) << 8 | u32::from(b[2]) << 16)
}

fn u32_le(bytes: &[u8], at: usize) -> Option<u32> {
    let b = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Dispatch on the first chunk FourCC at bytes 12..16.
///
/// Every encoded dimension field is stored minus one.
pub(super) fn inspect(bytes: &[u8]) -> Option<ImageMetrics> {
    let (width, height) = match bytes.get(12..16)? {
        b"VP8 " => {
            let w = u16_le(bytes, 26)? & MASK_14;
            let h = u16_le(bytes, 28)? & MASK_14;
            (w + 1, h + 1)
        }
        b"VP8L" => {
            let bits = u32_le(bytes, 21)?;
            ((bits & MASK_14) + 1, ((bits >> 14) & MASK_14) + 1)
        }
        b"VP8X" => (u24_le(bytes, 24)? + 1, u24_le(bytes, 27)? + 1),
        _ => return None,
    };
    Some(ImageMetrics::new(ImageFormat::WebP, width, height, Orientation::NORMAL))
}
