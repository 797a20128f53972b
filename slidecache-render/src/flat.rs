use anyhow::{ensure, Result};
use image::{Rgba, RgbaImage};
use slidecache_core::{PageIndex, PagePart, RenderImage, Renderer, SizeF};

const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);
const EDGE: Rgba<u8> = Rgba([160, 160, 160, 255]);

/// Renders every page as a blank sheet with a thin outline. Used when no
/// rasterizer is available and for exercising the cache.
pub struct FlatRenderer {
    page_sizes: Vec<SizeF>,
}

impl FlatRenderer {
    pub fn new(page_count: usize, page_size: SizeF) -> Self {
        Self {
            page_sizes: vec![page_size; page_count],
        }
    }

    pub fn with_page_sizes(page_sizes: Vec<SizeF>) -> Self {
        Self { page_sizes }
    }
}

impl Renderer for FlatRenderer {
    fn page_count(&self) -> usize {
        self.page_sizes.len()
    }

    fn page_size(&self, page: PageIndex) -> Option<SizeF> {
        self.page_sizes.get(page).copied()
    }

    fn render_page(&self, page: PageIndex, resolution: f64, part: PagePart) -> Result<RenderImage> {
        let size = self.page_size(page).ok_or_else(|| {
            slidecache_core::Error::InvalidPageIndex {
                page,
                page_count: self.page_count(),
            }
        })?;
        let mut width = (size.width * resolution).round();
        if part.is_half() {
            width = (width / 2.0).round();
        }
        let height = (size.height * resolution).round();
        ensure!(
            width >= 1.0 && height >= 1.0,
            "page {page} is empty at resolution {resolution}"
        );

        let (width, height) = (width as u32, height as u32);
        let image = RgbaImage::from_fn(width, height, |x, y| {
            if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                EDGE
            } else {
                PAPER
            }
        });
        Ok(RenderImage {
            width,
            height,
            pixels: image.into_raw(),
        })
    }
}
