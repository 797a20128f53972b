use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod config;

pub use config::{CacheBudget, CacheSettings, Preferences};

pub type PageIndex = usize;

/// Resolutions closer than this are considered identical.
pub const MAX_RESOLUTION_DEVIATION: f64 = 1e-9;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("page {page} is outside of the document ({page_count} pages)")]
    InvalidPageIndex { page: PageIndex, page_count: usize },
    #[error("rendering page {page} at resolution {resolution} failed: {reason}")]
    RenderFailure {
        page: PageIndex,
        resolution: f64,
        reason: String,
    },
    #[error("result for page {page} at resolution {resolution} no longer matches {expected}")]
    StaleResult {
        page: PageIndex,
        resolution: f64,
        expected: f64,
    },
    #[error("invalid configuration in {path:?}: {reason}")]
    InvalidConfig { path: PathBuf, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Which part of a page gets rendered. Presentations generated with notes
/// on the second screen put slide and notes side by side on one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagePart {
    #[default]
    FullPage,
    LeftHalf,
    RightHalf,
}

impl PagePart {
    pub fn is_half(self) -> bool {
        !matches!(self, PagePart::FullPage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SizeF {
    pub width: f64,
    pub height: f64,
}

impl SizeF {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointF {
    pub x: f64,
    pub y: f64,
}

impl PointF {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: PointF) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Axis aligned rectangle. A rectangle with non-positive width or height is
/// empty and acts as the neutral element of [`RectF::united`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RectF {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl RectF {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_points(points: &[PointF]) -> Self {
        let Some(first) = points.first() else {
            return Self::default();
        };
        points.iter().skip(1).fold(
            Self::new(first.x, first.y, first.x, first.y),
            |rect, p| Self {
                left: rect.left.min(p.x),
                top: rect.top.min(p.y),
                right: rect.right.max(p.x),
                bottom: rect.bottom.max(p.y),
            },
        )
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn margins_added(&self, margin: f64) -> Self {
        Self {
            left: self.left - margin,
            top: self.top - margin,
            right: self.right + margin,
            bottom: self.bottom + margin,
        }
    }

    pub fn contains(&self, point: PointF) -> bool {
        point.x >= self.left && point.x <= self.right && point.y >= self.top && point.y <= self.bottom
    }

    pub fn united(&self, other: &RectF) -> RectF {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RenderImage {
    pub fn is_null(&self) -> bool {
        self.width == 0 || self.height == 0 || self.pixels.is_empty()
    }
}

/// A document rasterizer. Implementations are shared between the cache and
/// its worker threads and must tolerate concurrent calls.
pub trait Renderer: Send + Sync {
    fn page_count(&self) -> usize;
    /// Page size in points, `None` if the page does not exist.
    fn page_size(&self, page: PageIndex) -> Option<SizeF>;
    /// Render `part` of `page` with `resolution` pixels per point.
    fn render_page(&self, page: PageIndex, resolution: f64, part: PagePart) -> Result<RenderImage>;
}
