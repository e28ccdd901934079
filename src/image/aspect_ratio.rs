//! Aspect-ratio resolution against a supported-ratio catalog.
//!
//! Every path through the resolver ends in a member of the supplied catalog:
//! concrete requests that the catalog knows are passed through, `"original"`
//! is matched against the image's displayed dimensions, and anything else
//! falls back to the catalog default.

use std::sync::Arc;
use std::time::Duration;

use super::{DEFAULT_HEADER_BYTES, ImageFormat, ImageMetrics, detect_format, inspect_image};
use crate::error::EngineError;
use crate::fetch::{ByteFetcher, load_image, load_image_header};
use crate::types::ImageRef;

/// Sentinel asking the resolver to follow the image's own proportions.
pub const ORIGINAL: &str = "original";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Portrait,
    Landscape,
    Square,
}

fn shape_of(width: u32, height: u32) -> Shape {
    match width.cmp(&height) {
        std::cmp::Ordering::Less => Shape::Portrait,
        std::cmp::Ordering::Greater => Shape::Landscape,
        std::cmp::Ordering::Equal => Shape::Square,
    }
}

/// One `W:H` catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
    label: String,
}

impl AspectRatio {
    /// Parse a `"W:H"` string with positive integer terms.
    pub fn parse(s: &str) -> Option<Self> {
        let (w, h) = s.trim().split_once(':')?;
        let width: u32 = w.trim().parse().ok()?;
        let height: u32 = h.trim().parse().ok()?;
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            width,
            height,
            label: format!("{width}:{height}"),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn value(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }

    fn shape(&self) -> Shape {
        shape_of(self.width, self.height)
    }
}

/// Ordered set of supported ratios plus a default that is always a member.
#[derive(Debug, Clone, PartialEq)]
pub struct AspectRatioCatalog {
    ratios: Vec<AspectRatio>,
    default_index: usize,
}

impl AspectRatioCatalog {
    /// Build a catalog. Fails when an entry does not parse, the list is empty,
    /// or the default is not one of the entries.
    pub fn new<I, S>(ratios: I, default: &str) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ratios = ratios
            .into_iter()
            .map(|r| {
                AspectRatio::parse(r.as_ref()).ok_or_else(|| {
                    EngineError::ConfigurationError(format!(
                        "invalid aspect ratio '{}', expected W:H",
                        r.as_ref()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if ratios.is_empty() {
            return Err(EngineError::ConfigurationError(
                "aspect ratio catalog must not be empty".to_string(),
            ));
        }
        let wanted = AspectRatio::parse(default).ok_or_else(|| {
            EngineError::ConfigurationError(format!("invalid default aspect ratio '{default}'"))
        })?;
        let default_index = ratios
            .iter()
            .position(|r| r.label == wanted.label)
            .ok_or_else(|| {
                EngineError::ConfigurationError(format!(
                    "default aspect ratio '{default}' is not part of the catalog"
                ))
            })?;
        Ok(Self {
            ratios,
            default_index,
        })
    }

    fn from_static(ratios: &[(u32, u32)], default_index: usize) -> Self {
        Self {
            ratios: ratios
                .iter()
                .map(|&(width, height)| AspectRatio {
                    width,
                    height,
                    label: format!("{width}:{height}"),
                })
                .collect(),
            default_index,
        }
    }

    /// `1:1, 3:4, 4:3, 9:16, 16:9` with `1:1` as default.
    pub fn standard() -> Self {
        Self::from_static(&[(1, 1), (3, 4), (4, 3), (9, 16), (16, 9)], 0)
    }

    /// Ratios accepted by the Gemini image models, default `1:1`.
    pub fn gemini_image() -> Self {
        Self::from_static(
            &[
                (1, 1),
                (2, 3),
                (3, 2),
                (3, 4),
                (4, 3),
                (4, 5),
                (5, 4),
                (9, 16),
                (16, 9),
                (21, 9),
            ],
            0,
        )
    }

    pub fn default_ratio(&self) -> &str {
        &self.ratios[self.default_index].label
    }

    pub fn ratios(&self) -> &[AspectRatio] {
        &self.ratios
    }

    /// Look up a concrete entry by its `W:H` label.
    pub fn get(&self, requested: &str) -> Option<&AspectRatio> {
        let requested = requested.trim();
        self.ratios.iter().find(|r| r.label == requested)
    }

    pub fn contains(&self, requested: &str) -> bool {
        self.get(requested).is_some()
    }

    /// Entry closest to `width / height`, restricted to entries of the same
    /// shape (portrait/landscape/square) when the catalog has any.
    /// Ties go to the earlier catalog entry.
    pub fn closest(&self, width: u32, height: u32) -> &str {
        if width == 0 || height == 0 {
            return self.default_ratio();
        }
        let actual = f64::from(width) / f64::from(height);
        let shape = shape_of(width, height);
        let same_shape = self.ratios.iter().any(|r| r.shape() == shape);

        let mut best: Option<(&AspectRatio, f64)> = None;
        for candidate in self
            .ratios
            .iter()
            .filter(|r| !same_shape || r.shape() == shape)
        {
            let diff = (candidate.value() - actual).abs();
            match best {
                Some((_, best_diff)) if diff >= best_diff => {}
                _ => best = Some((candidate, diff)),
            }
        }
        best.map_or_else(|| self.default_ratio(), |(r, _)| r.label())
    }
}

/// Knobs for one resolution.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Whether `"original"` (or an absent hint) may inspect the image.
    pub allow_original: bool,
    /// Leading bytes to fetch when the image is a URL.
    pub header_bytes: usize,
    pub fetch_timeout: Duration,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            allow_original: true,
            header_bytes: DEFAULT_HEADER_BYTES,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

fn wants_original(requested: Option<&str>) -> bool {
    requested.is_none_or(|r| r.trim().is_empty() || r.trim().eq_ignore_ascii_case(ORIGINAL))
}

/// Pure resolution once the metrics (if any) are known.
pub fn resolve_with_metrics(
    requested: Option<&str>,
    metrics: Option<&ImageMetrics>,
    catalog: &AspectRatioCatalog,
    allow_original: bool,
) -> String {
    if let Some(r) = requested.and_then(|r| catalog.get(r)) {
        return r.label().to_string();
    }
    if allow_original
        && wants_original(requested)
        && let Some(m) = metrics
        && m.width > 0
        && m.height > 0
    {
        return catalog.closest(m.width, m.height).to_string();
    }
    catalog.default_ratio().to_string()
}

/// Resolves the working aspect ratio of a request, inspecting image headers when asked to.
pub struct AspectRatioResolver {
    fetcher: Arc<dyn ByteFetcher>,
}

impl AspectRatioResolver {
    pub fn new(fetcher: Arc<dyn ByteFetcher>) -> Self {
        Self { fetcher }
    }

    /// Resolve `requested` against `catalog`. Never fails.
    pub async fn resolve(
        &self,
        requested: Option<&str>,
        image: &ImageRef,
        catalog: &AspectRatioCatalog,
        options: &ResolveOptions,
    ) -> String {
        if let Some(r) = requested.and_then(|r| catalog.get(r)) {
            return r.label().to_string();
        }
        if !options.allow_original || !wants_original(requested) {
            return catalog.default_ratio().to_string();
        }

        let metrics = match load_image_header(
            self.fetcher.as_ref(),
            image,
            options.header_bytes,
            options.fetch_timeout,
        )
        .await
        {
            Ok(header) => match inspect_image(&header.bytes) {
                None if !header.complete
                    && detect_format(&header.bytes) == Some(ImageFormat::Jpeg) =>
                {
                    // JPEG metadata can push the frame header past the range.
                    tracing::debug!(
                        fetched = header.bytes.len(),
                        "no JPEG frame header in range, fetching whole image"
                    );
                    self.inspect_full(image, options.fetch_timeout).await
                }
                found => found,
            },
            Err(e) => {
                tracing::warn!(error = %e, "could not fetch image header, using default ratio");
                None
            }
        };
        if metrics.is_none() {
            tracing::debug!("image header not recognised, using default ratio");
        }
        resolve_with_metrics(requested, metrics.as_ref(), catalog, true)
    }

    async fn inspect_full(&self, image: &ImageRef, timeout: Duration) -> Option<ImageMetrics> {
        match load_image(self.fetcher.as_ref(), image, timeout).await {
            Ok(loaded) => inspect_image(&loaded.bytes),
            Err(e) => {
                tracing::warn!(error = %e, "full image fetch failed, using default ratio");
                None
            }
        }
    }
}
