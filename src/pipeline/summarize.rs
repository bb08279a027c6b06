//! Summarizer: one model call per rendered page, one brief per article.
//!
//! Pages are independent. Each runs its own call-and-retry cycle and its
//! failure is recorded as a [`PageError`] without touching the others.
//! Results are joined in input order and then sorted by page, so the brief
//! order never depends on which request returned first.

use crate::config::AnalysisConfig;
use crate::error::{InferenceError, PageError};
use crate::output::ArticleBrief;
use crate::pipeline::encode::{encode_page, Detail};
use crate::pipeline::inference::{InferenceGate, InferenceRequest, RequestKind, MAX_RETRIES};
use crate::pipeline::parse::parse_briefs;
use crate::prompts::{brief_prompt, brief_retry_prompt};
use futures::future::join_all;
use image::DynamicImage;
use tracing::{debug, info, warn};

/// Briefs in page order plus the pages that produced none.
#[derive(Debug, Default)]
pub struct Summaries {
    pub briefs: Vec<ArticleBrief>,
    pub failures: Vec<PageError>,
}

/// Summarise every page of `pages`.
///
/// The inference gate bounds concurrency, so all pages are dispatched at once.
pub async fn summarize_pages(
    gate: &InferenceGate,
    pages: &[(usize, DynamicImage)],
    config: &AnalysisConfig,
) -> Summaries {
    let calls = pages.iter().map(|(page, img)| async move {
        (*page, summarize_page(gate, *page, img, config).await)
    });
    let mut results: Vec<(usize, Result<Vec<ArticleBrief>, PageError>)> = join_all(calls).await;
    results.sort_by_key(|(page, _)| *page);

    let mut summaries = Summaries::default();
    for (_, result) in results {
        match result {
            Ok(briefs) => summaries.briefs.extend(briefs),
            Err(e) => summaries.failures.push(e),
        }
    }
    info!(
        "{} briefs from {} pages ({} pages failed)",
        summaries.briefs.len(),
        pages.len(),
        summaries.failures.len()
    );
    summaries
}

/// Summarise one page, retrying once with a corrective prompt.
pub async fn summarize_page(
    gate: &InferenceGate,
    page: usize,
    img: &DynamicImage,
    config: &AnalysisConfig,
) -> Result<Vec<ArticleBrief>, PageError> {
    let image = encode_page(img, Detail::High).map_err(|e| PageError::BriefFailed {
        page,
        retries: 0,
        detail: format!("image encoding failed: {e}"),
    })?;

    let request = |prompt: String| InferenceRequest {
        kind: RequestKind::Brief,
        prompt,
        images: vec![image.clone()],
        pages: vec![page],
        attempt: 0,
    };
    let primary = config
        .brief_prompt
        .clone()
        .unwrap_or_else(|| brief_prompt(config.max_articles_per_page));

    let (mut briefs, retries) = gate
        .call_with_retry(
            request(primary.clone()),
            |reply| parse_briefs(reply, page),
            |err: &InferenceError| request(brief_retry_prompt(&primary, &err.message)),
        )
        .await
        .map_err(|e| PageError::BriefFailed {
            page,
            retries: MAX_RETRIES,
            detail: e.to_string(),
        })?;

    if briefs.len() > config.max_articles_per_page {
        warn!(
            "Page {}: {} articles found, keeping the first {}",
            page,
            briefs.len(),
            config.max_articles_per_page
        );
        briefs.truncate(config.max_articles_per_page);
    }
    debug!("Page {}: {} briefs after {} retries", page, briefs.len(), retries);
    Ok(briefs)
}
