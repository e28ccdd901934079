use serde::{Deserialize, Serialize};

/// Container formats the inspector understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    #[serde(rename = "webp")]
    WebP,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }
}

/// EXIF orientation code, always within 1..=8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Orientation(u8);

impl Orientation {
    pub const NORMAL: Self = Self(1);

    /// Out-of-range codes collapse to [`Orientation::NORMAL`].
    pub fn from_exif(value: u16) -> Self {
        match value {
            1..=8 => Self(value as u8),
            _ => Self::NORMAL,
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Orientations 5..=8 transpose the image, i.e. it is displayed rotated by 90°.
    pub fn is_rotated(self) -> bool {
        self.0 >= 5
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// Dimensions of an image as displayed and as encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetrics {
    /// Orientation-corrected width.
    pub width: u32,
    /// Orientation-corrected height.
    pub height: u32,
    pub raw_width: u32,
    pub raw_height: u32,
    pub orientation: Orientation,
    pub rotated: bool,
    pub format: ImageFormat,
}

impl ImageMetrics {
    /// Build metrics from encoded dimensions, swapping them for rotated orientations.
    pub fn new(format: ImageFormat, raw_width: u32, raw_height: u32, orientation: Orientation) -> Self {
        let rotated = orientation.is_rotated();
        let (width, height) = if rotated {
            (raw_height, raw_width)
        } else {
            (raw_width, raw_height)
        };
        Self {
            width,
            height,
            raw_width,
            raw_height,
            orientation,
            rotated,
            format,
        }
    }

    /// Both dimensions are non-zero and fit in a signed 32-bit integer.
    pub fn is_valid(&self) -> bool {
        const LIMIT: u32 = 1 << 31;
        self.width > 0 && self.height > 0 && self.width < LIMIT && self.height < LIMIT
    }

    /// Displayed width over displayed height.
    pub fn ratio(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }
}
