use std::convert::TryFrom;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use slidecache_core::{PageIndex, PagePart, RenderImage, Renderer, SizeF};
use tracing::{debug, instrument, warn};

const LIBRARY_PATH_VAR: &str = "SLIDECACHE_PDFIUM_LIBRARY_PATH";

/// Rasterizes PDF pages through pdfium. Page sizes are read once on open;
/// the document handle itself is shared behind a lock since pdfium is not
/// reentrant.
pub struct PdfiumRenderer {
    path: PathBuf,
    page_sizes: Vec<SizeF>,
    // Must be declared before `pdfium` so it is dropped first.
    document: Mutex<Option<PdfDocument<'static>>>,
    pdfium: Arc<Pdfium>,
}

impl PdfiumRenderer {
    pub fn open(path: &Path) -> Result<Self> {
        let pdfium = Arc::new(bind_pdfium()?);
        let path = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let page_sizes = read_page_sizes(&pdfium, &path)?;
        debug!(path = %path.display(), pages = page_sizes.len(), "opened document");
        Ok(Self {
            path,
            page_sizes,
            document: Mutex::new(None),
            pdfium,
        })
    }

    fn open_document(&self) -> Result<PdfDocument<'static>> {
        let document = self
            .pdfium
            .load_pdf_from_file(&self.path, None)
            .with_context(|| format!("failed to open {:?}", self.path))?;
        // SAFETY: the document borrows the bindings owned by `self.pdfium`.
        // It lives in `self.document`, which drops before `self.pdfium`.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        let document = match guard.take() {
            Some(document) => document,
            None => self.open_document()?,
        };
        let result = f(&document);
        *guard = Some(document);
        result
    }
}

impl Renderer for PdfiumRenderer {
    fn page_count(&self) -> usize {
        self.page_sizes.len()
    }

    fn page_size(&self, page: PageIndex) -> Option<SizeF> {
        self.page_sizes.get(page).copied()
    }

    #[instrument(skip(self))]
    fn render_page(&self, page: PageIndex, resolution: f64, part: PagePart) -> Result<RenderImage> {
        let index = PdfPageIndex::try_from(page)
            .map_err(|_| anyhow!("page {} is out of supported range", page))?;
        let image = self.with_document(|document| {
            let pdf_page = document
                .pages()
                .get(index)
                .with_context(|| format!("page {} out of range", page))?;
            let config = PdfRenderConfig::new().scale_page_by_factor(resolution as f32);
            let bitmap = pdf_page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", page))?;
            Ok(bitmap.as_image())
        })?;

        let image = crop_part(image, part).to_rgba8();
        Ok(RenderImage {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
        })
    }
}

fn crop_part(image: DynamicImage, part: PagePart) -> DynamicImage {
    let half = image.width() / 2;
    match part {
        PagePart::FullPage => image,
        PagePart::LeftHalf => image.crop_imm(0, 0, half, image.height()),
        PagePart::RightHalf => image.crop_imm(half, 0, image.width() - half, image.height()),
    }
}

fn read_page_sizes(pdfium: &Pdfium, path: &Path) -> Result<Vec<SizeF>> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("failed to open {:?}", path))?;
    Ok(document
        .pages()
        .iter()
        .map(|page| SizeF::new(page.width().value as f64, page.height().value as f64))
        .collect())
}

fn bind_pdfium() -> Result<Pdfium> {
    let mut errors = Vec::new();

    if let Ok(path) = std::env::var(LIBRARY_PATH_VAR) {
        if !path.is_empty() {
            match Pdfium::bind_to_library(&path) {
                Ok(bindings) => return Ok(Pdfium::new(bindings)),
                Err(err) => {
                    warn!("failed to load pdfium from {}: {}", path, err);
                    errors.push(format!("{path}: {err}"));
                }
            }
        }
    }

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or install it ({})",
                LIBRARY_PATH_VAR,
                errors.join(", ")
            ))
        }
    }
}
