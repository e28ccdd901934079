use super::metrics::{ImageFormat, ImageMetrics, Orientation};

const MARKER_APP1: u8 = 0xE1;
const MARKER_SOS: u8 = 0xDA;
const MARKER_EOI: u8 = 0xD9;
const EXIF_HEADER: &[u8] = b"Exif\0\0";
const TAG_ORIENTATION: u16 = 0x0112;
const IFD_ENTRY_LEN: usize = 12;

/// Start-of-frame markers that carry frame dimensions (C4, C8 and CC are not frames).
fn is_sof(marker: u8) -> bool {
    matches!(marker, 0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF)
}

/// Markers that stand alone without a length field.
fn is_standalone(marker: u8) -> bool {
    matches!(marker, 0x01 | 0xD0..=0xD8)
}

fn be_u16(bytes: &[u8], at: usize) -> Option<u16> {
    let b = bytes.get(at..at + 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

/// Scan marker segments up to the first start-of-frame.
pub(super) fn inspect(bytes: &[u8]) -> Option<ImageMetrics> {
    let mut orientation = Orientation::NORMAL;
    let mut pos = 2;

    while pos + 1 < bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        // Fill bytes: any number of 0xFF may precede a marker.
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if is_standalone(marker) {
            pos += 2;
            continue;
        }
        if marker == MARKER_SOS || marker == MARKER_EOI {
            return None;
        }

        let len = usize::from(be_u16(bytes, pos + 2)?);
        if len < 2 {
            return None;
        }

        if is_sof(marker) {
            let raw_height = be_u16(bytes, pos + 5)?;
            let raw_width = be_u16(bytes, pos + 7)?;
            return Some(ImageMetrics::new(
                ImageFormat::Jpeg,
                u32::from(raw_width),
                u32::from(raw_height),
                orientation,
            ));
        }

        let end = pos + 2 + len;
        if end > bytes.len() {
            return None;
        }
        if marker == MARKER_APP1
            && let Some(found) = exif_orientation(&bytes[pos + 4..end])
        {
            orientation = found;
        }
        pos = end;
    }
    None
}

#[derive(Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn u16(self, bytes: &[u8], at: usize) -> Option<u16> {
        let b = bytes.get(at..at + 2)?;
        Some(match self {
            Self::Little => u16::from_le_bytes([b[0], b[1]]),
            Self::Big => u16::from_be_bytes([b[0], b[1]]),
        })
    }

    fn u32(self, bytes: &[u8], at: usize) -> Option<u32> {
        let b = bytes.get(at..at + 4)?;
        let arr = [b[0], b[1], b[2], b[3]];
        Some(match self {
            Self::Little => u32::from_le_bytes(arr),
            Self::Big => u32::from_be_bytes(arr),
        })
    }
}

/// Read tag 0x0112 from IFD0 of an APP1 payload. `None` when there is no usable Exif block.
fn exif_orientation(segment: &[u8]) -> Option<Orientation> {
    let tiff = segment.strip_prefix(EXIF_HEADER)?;
    let order = match tiff.get(0..2)? {
        b"II" => ByteOrder::Little,
        b"MM" => ByteOrder::Big,
        _ => return None,
    };
    if order.u16(tiff, 2)? != 42 {
        return None;
    }
    let ifd = usize::try_from(order.u32(tiff, 4)?).ok()?;
    let count = usize::from(order.u16(tiff, ifd)?);

    (0..count).find_map(|i| {
        let entry = ifd + 2 + i * IFD_ENTRY_LEN;
        if order.u16(tiff, entry)? != TAG_ORIENTATION {
            return None;
        }
        // SHORT value, left-justified in the 4-byte value field.
        order
            .u16(tiff, entry + 8)
            .map(Orientation::from_exif)
            .or(Some(Orientation::NORMAL))
    })
}
