//! Page classifier: find the editorial pages among the first scanned pages.
//!
//! Detection failure is not a pipeline fault. Whatever goes wrong here
//! (thumbnails that will not render, an unreachable model, a reply that is
//! not a page list) ends in an empty [`DetectionResult`], which sends the
//! session to the manual-page fallback.

use crate::config::AnalysisConfig;
use crate::output::DetectionResult;
use crate::pipeline::encode::{encode_page, Detail};
use crate::pipeline::inference::{InferenceGate, InferenceRequest, RequestKind};
use crate::pipeline::parse::parse_detection;
use crate::pipeline::render::{PdfHandle, Rasterizer};
use crate::prompts::{DETECTION_PROMPT, DETECTION_RETRY_PROMPT};
use edgequake_llm::ImageData;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

/// Scan `1..=min(scan_pages, page_count)` and ask the model which are editorial.
pub async fn detect_editorial_pages(
    rasterizer: &dyn Rasterizer,
    gate: &InferenceGate,
    pdf: &PdfHandle,
    config: &AnalysisConfig,
) -> DetectionResult {
    let scanned = config.scan_pages.min(pdf.page_count());
    if scanned == 0 {
        warn!("Document has no pages to scan");
        return DetectionResult::empty();
    }

    let mut thumbnails: Vec<(usize, ImageData)> = stream::iter(1..=scanned)
        .map(|page| async move {
            let encoded = rasterizer
                .render(pdf, page, config.scan_dpi)
                .await
                .map_err(|e| e.to_string())
                .and_then(|img| encode_page(&img, Detail::Low).map_err(|e| e.to_string()));
            (page, encoded)
        })
        .buffer_unordered(config.render_concurrency)
        .filter_map(|(page, encoded)| async move {
            match encoded {
                Ok(data) => Some((page, data)),
                Err(e) => {
                    warn!("Thumbnail for page {} skipped: {}", page, e);
                    None
                }
            }
        })
        .collect()
        .await;

    if thumbnails.is_empty() {
        warn!("No thumbnails rendered; detection is empty");
        return DetectionResult::empty();
    }
    // The prompt tells the model the first image is page 1, so keep page order.
    thumbnails.sort_by_key(|(page, _)| *page);
    let (pages, images): (Vec<usize>, Vec<ImageData>) = thumbnails.into_iter().unzip();
    info!("Scanning {} thumbnails for editorial headings", pages.len());

    let request = |prompt: &str| InferenceRequest {
        kind: RequestKind::Detection,
        prompt: prompt.to_string(),
        images: images.clone(),
        pages: pages.clone(),
        attempt: 0,
    };
    let primary = config.detection_prompt.as_deref().unwrap_or(DETECTION_PROMPT);

    // Image positions map back to page numbers; a gap left by a failed
    // thumbnail must not shift the model's answer onto the wrong page.
    let to_pages = |reply: &str| {
        parse_detection(reply, pages.len()).map(|mut d| {
            d.pages = d.pages.iter().map(|&pos| pages[pos - 1]).collect();
            d
        })
    };

    let mut detection = match gate
        .call_with_retry(request(primary), to_pages, |_| request(DETECTION_RETRY_PROMPT))
        .await
    {
        Ok((detection, _)) => detection,
        Err(e) => {
            warn!("Detection failed after retry: {}", e);
            return DetectionResult::empty();
        }
    };

    if detection.pages.len() > config.max_candidate_pages {
        warn!(
            "Model flagged {} pages; keeping the first {}",
            detection.pages.len(),
            config.max_candidate_pages
        );
        detection.pages = detection
            .pages
            .into_iter()
            .take(config.max_candidate_pages)
            .collect();
    }

    info!(
        "Detected editorial pages {:?}{}",
        detection.pages,
        detection
            .confidence_note
            .as_deref()
            .map(|n| format!(" ({n})"))
            .unwrap_or_default()
    );
    detection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InferenceError, RenderError};
    use crate::pipeline::inference::{InferenceResponse, InferenceService};
    use async_trait::async_trait;
    use image::DynamicImage;
    use std::sync::Arc;

    /// Renders every page except `broken`.
    struct Thumbs {
        broken: Option<usize>,
    }

    #[async_trait]
    impl Rasterizer for Thumbs {
        async fn open(&self, bytes: Vec<u8>) -> Result<PdfHandle, RenderError> {
            Ok(PdfHandle::new(bytes, 12, None))
        }

        async fn render(
            &self,
            _pdf: &PdfHandle,
            page: usize,
            _dpi: u32,
        ) -> Result<DynamicImage, RenderError> {
            if Some(page) == self.broken {
                return Err(RenderError::DecoderFailed {
                    page,
                    detail: "bad stream".into(),
                });
            }
            Ok(DynamicImage::new_rgb8(4, 4))
        }
    }

    struct Fixed(&'static str);

    #[async_trait]
    impl InferenceService for Fixed {
        async fn infer(&self, _request: InferenceRequest) -> Result<InferenceResponse, InferenceError> {
            Ok(InferenceResponse {
                text: self.0.to_string(),
                ..Default::default()
            })
        }
    }

    async fn detect(broken: Option<usize>, reply: &'static str, config: AnalysisConfig) -> DetectionResult {
        let gate = InferenceGate::new(Arc::new(Fixed(reply)), 1, 0);
        let pdf = PdfHandle::new(b"%PDF".to_vec(), 12, None);
        detect_editorial_pages(&Thumbs { broken }, &gate, &pdf, &config).await
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig::builder().retry_backoff_ms(0).build().unwrap()
    }

    #[tokio::test]
    async fn positions_map_to_pages() {
        let d = detect(None, r#"{"pages": [9], "note": "Opinion"}"#, config()).await;
        assert_eq!(d.pages.into_iter().collect::<Vec<_>>(), vec![9]);
        assert_eq!(d.confidence_note.as_deref(), Some("Opinion"));
    }

    #[tokio::test]
    async fn missing_thumbnail_does_not_shift_pages() {
        // Page 2 is missing, so the third image is page 4.
        let d = detect(Some(2), "[3]", config()).await;
        assert_eq!(d.pages.into_iter().collect::<Vec<_>>(), vec![4]);
    }

    #[tokio::test]
    async fn unusable_reply_means_no_pages() {
        let d = detect(None, "I think it's the sports section.", config()).await;
        assert!(d.is_empty());
    }

    #[tokio::test]
    async fn lowest_pages_are_kept_over_the_cap() {
        let config = AnalysisConfig::builder()
            .retry_backoff_ms(0)
            .max_candidate_pages(2)
            .build()
            .unwrap();
        let d = detect(None, "[8, 2, 5]", config).await;
        assert_eq!(d.pages.into_iter().collect::<Vec<_>>(), vec![2, 5]);
    }
}
