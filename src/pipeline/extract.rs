//! Page extractor: re-render the candidate pages at full resolution.

use crate::error::PageError;
use crate::pipeline::render::{PdfHandle, Rasterizer};
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use tracing::{info, warn};

/// Rendered pages plus the pages that could not be rendered.
#[derive(Debug, Default)]
pub struct Extraction {
    /// `(page, image)` in ascending page order.
    pub pages: Vec<(usize, DynamicImage)>,
    pub failures: Vec<PageError>,
}

/// Render every page of `candidates` at `dpi`, at most `concurrency` at a time.
///
/// A page that fails is skipped and reported in [`Extraction::failures`];
/// deciding what an all-failed extraction means is left to the caller.
pub async fn extract_pages(
    rasterizer: &dyn Rasterizer,
    pdf: &PdfHandle,
    candidates: &[usize],
    dpi: u32,
    concurrency: usize,
) -> Extraction {
    let results: Vec<_> = stream::iter(candidates.iter().copied())
        .map(|page| async move { (page, rasterizer.render(pdf, page, dpi).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut extraction = Extraction::default();
    for (page, result) in results {
        match result {
            Ok(img) => extraction.pages.push((page, img)),
            Err(e) => {
                warn!("Page {} skipped: {}", page, e);
                extraction.failures.push(PageError::RenderFailed {
                    page,
                    detail: e.to_string(),
                });
            }
        }
    }
    extraction.pages.sort_by_key(|(page, _)| *page);
    extraction.failures.sort_by_key(PageError::page);

    info!(
        "Rendered {}/{} pages at {} DPI",
        extraction.pages.len(),
        candidates.len(),
        dpi
    );
    extraction
}
