//! Rasterizer adapter: open a PDF and render one page at a given DPI.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and not
//! async-aware. Every call runs on tokio's blocking pool so the worker
//! threads keep serving other sessions while a broadsheet page rasterises.
//!
//! The adapter is stateless: each call binds pdfium, loads the document from
//! the shared byte buffer and drops it again. No retries happen here.

use crate::error::RenderError;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// PDF points per inch; pdfium renders at scale 1.0 = 72 DPI.
const POINTS_PER_INCH: f32 = 72.0;

/// A loaded document: its bytes and what we learned when opening it.
///
/// Cloning is cheap; the bytes are shared.
#[derive(Clone)]
pub struct PdfHandle {
    bytes: Arc<[u8]>,
    page_count: usize,
    title: Option<String>,
}

impl PdfHandle {
    pub fn new(bytes: impl Into<Arc<[u8]>>, page_count: usize, title: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            page_count,
            title,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Check `page` (1-indexed) against the page count.
    pub fn check_page(&self, page: usize) -> Result<(), RenderError> {
        if page == 0 || page > self.page_count {
            return Err(RenderError::PageOutOfRange {
                page,
                total: self.page_count,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for PdfHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfHandle")
            .field("bytes", &self.bytes.len())
            .field("page_count", &self.page_count)
            .field("title", &self.title)
            .finish()
    }
}

/// The PDF rasterization primitive.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Parse `bytes` into a handle. Fails on anything that is not a readable PDF.
    async fn open(&self, bytes: Vec<u8>) -> Result<PdfHandle, RenderError>;

    /// Render `page` (1-indexed) at `dpi`.
    async fn render(
        &self,
        pdf: &PdfHandle,
        page: usize,
        dpi: u32,
    ) -> Result<DynamicImage, RenderError>;
}

/// Reject buffers that do not start with `%PDF`.
pub fn check_pdf_magic(bytes: &[u8]) -> Result<(), RenderError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(RenderError::NotAPdf {
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

/// [`Rasterizer`] backed by pdfium.
///
/// The library is bound from `PDFIUM_LIB_PATH` when set, otherwise from the
/// system library path.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    max_pixels: u32,
}

impl PdfiumRasterizer {
    pub fn new(max_pixels: u32) -> Self {
        Self { max_pixels }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn open(&self, bytes: Vec<u8>) -> Result<PdfHandle, RenderError> {
        check_pdf_magic(&bytes)?;
        let bytes: Arc<[u8]> = bytes.into();
        let shared = Arc::clone(&bytes);

        let (page_count, title) = tokio::task::spawn_blocking(move || open_blocking(&shared))
            .await
            .map_err(|e| RenderError::CorruptPdf {
                detail: format!("open task panicked: {e}"),
            })??;

        info!("PDF loaded: {} pages", page_count);
        Ok(PdfHandle::new(bytes, page_count, title))
    }

    async fn render(
        &self,
        pdf: &PdfHandle,
        page: usize,
        dpi: u32,
    ) -> Result<DynamicImage, RenderError> {
        if dpi == 0 {
            return Err(RenderError::InvalidDpi { dpi });
        }
        pdf.check_page(page)?;

        let bytes = Arc::clone(&pdf.bytes);
        let max_pixels = self.max_pixels;
        tokio::task::spawn_blocking(move || render_blocking(&bytes, page, dpi, max_pixels))
            .await
            .map_err(|e| RenderError::DecoderFailed {
                page,
                detail: format!("render task panicked: {e}"),
            })?
    }
}

fn bind_pdfium() -> Result<Pdfium, RenderError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| RenderError::PdfiumUnavailable(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn open_blocking(bytes: &[u8]) -> Result<(usize, Option<String>), RenderError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| RenderError::CorruptPdf {
            detail: format!("{e:?}"),
        })?;

    let title = document
        .metadata()
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().trim().to_string())
        .filter(|v| !v.is_empty());

    Ok((document.pages().len() as usize, title))
}

fn render_blocking(
    bytes: &[u8],
    page: usize,
    dpi: u32,
    max_pixels: u32,
) -> Result<DynamicImage, RenderError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| RenderError::CorruptPdf {
            detail: format!("{e:?}"),
        })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    if page == 0 || page > total {
        return Err(RenderError::PageOutOfRange { page, total });
    }

    let pdf_page = pages
        .get((page - 1) as u16)
        .map_err(|e| RenderError::DecoderFailed {
            page,
            detail: format!("{e:?}"),
        })?;

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / POINTS_PER_INCH)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let bitmap = pdf_page
        .render_with_config(&render_config)
        .map_err(|e| RenderError::DecoderFailed {
            page,
            detail: format!("{e:?}"),
        })?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} at {} DPI → {}x{} px",
        page,
        dpi,
        image.width(),
        image.height()
    );
    Ok(image)
}
