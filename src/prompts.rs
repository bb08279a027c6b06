//! Prompts for the two model calls: page detection and article briefs.
//!
//! Each call site has a primary prompt and a fallback used for its single
//! retry. Detection retries with a *simplified* prompt (fewer instructions,
//! bare array output); the brief call retries with a *corrective* prompt that
//! names what the previous reply was missing.
//!
//! Callers can override the primary prompts through
//! [`crate::config::AnalysisConfig`].

/// Primary detection prompt. The model sees the scanned pages in order.
pub const DETECTION_PROMPT: &str = r#"You are looking at the first pages of a newspaper, one image per page, in order. The first image is page 1.

Identify every page whose section heading is "Editorial", "Opinion" or "Ideas". Match the heading case-insensitively and accept the equivalent word in the newspaper's own language (for example "Éditorial", "Meinung", "Opinión", "संपादकीय").

Reply with ONLY a JSON object, no commentary:
{"pages": [<page numbers, 1-based>], "note": "<one short sentence on what you saw>"}

If no page matches, reply {"pages": [], "note": "<why>"}."#;

/// Simplified detection prompt for the retry.
pub const DETECTION_RETRY_PROMPT: &str = r#"Which of these newspaper pages (numbered from 1, in order) are Editorial, Opinion or Ideas pages?
Return ONLY a JSON array of integers, for example [6, 7]. If none, return []."#;

/// Primary brief prompt, sent with one high-resolution page.
///
/// `{max_articles}` is replaced by [`brief_prompt`] with the per-page cap.
pub const BRIEF_PROMPT: &str = r#"You are an expert policy analyst. Analyse this high-resolution image of a newspaper editorial page.

Identify the distinct articles on the page (at most the {max_articles} most important). For each article write a Decision-Maker's Brief in exactly this Markdown format:

### <Title of the Article>
* **Core Argument:** 2-3 sentences summarising the main point.
* **Key Evidence:** the specific statistics, names or facts the article cites.
* **Policy Implications:** why it matters to a senior government official.

Rules:
- Every article MUST have all three fields, each non-empty.
- Output ONLY the briefs. Do NOT wrap the output in code fences."#;

/// The built-in brief prompt with the article cap filled in.
pub fn brief_prompt(max_articles: usize) -> String {
    BRIEF_PROMPT.replace("{max_articles}", &max_articles.to_string())
}

/// Build the corrective prompt sent when a brief reply was rejected.
///
/// `base` is the prompt of the first attempt (built-in or user-supplied);
/// `problem` is the parser's description of what was missing.
pub fn brief_retry_prompt(base: &str, problem: &str) -> String {
    format!(
        "{base}\n\nYour previous answer was rejected: {problem}.\n\
         Answer again and make sure EVERY article has a non-empty \
         **Core Argument:**, **Key Evidence:** and **Policy Implications:** line."
    )
}
