//! Result types handed back to the transport layer.

use crate::error::PageError;
use crate::session::SessionState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A three-field brief of one newspaper article.
///
/// Created by the summarizer from one high-resolution page and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleBrief {
    /// 1-indexed page the article was read from.
    pub source_page: usize,
    /// Headline as read by the model, when it gave one.
    pub title: Option<String>,
    pub core_argument: String,
    pub key_evidence: String,
    pub policy_implications: String,
}

impl ArticleBrief {
    /// Render as the Markdown brief shown in chat.
    pub fn to_markdown(&self) -> String {
        let title = self.title.as_deref().unwrap_or("Untitled article");
        format!(
            "### {title}\n_Page {}_\n\n* **Core Argument:** {}\n* **Key Evidence:** {}\n* **Policy Implications:** {}\n",
            self.source_page, self.core_argument, self.key_evidence, self.policy_implications
        )
    }
}

/// Render a full reply body: every brief, separated by a rule.
pub fn render_briefs(briefs: &[ArticleBrief]) -> String {
    briefs
        .iter()
        .map(ArticleBrief::to_markdown)
        .collect::<Vec<_>>()
        .join("\n---\n\n")
}

/// Outcome of the page classifier. Transient, never stored on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionResult {
    /// Candidate pages, each within `[1, min(scan_pages, page_count)]`.
    pub pages: BTreeSet<usize>,
    /// Free-text rationale from the model. Not authoritative.
    pub confidence_note: Option<String>,
}

impl DetectionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// What a session command returns to the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReply {
    pub session_id: String,
    pub state: SessionState,
    /// Human-readable status line for the chat.
    pub message: String,
    /// Pages the session is (or was) working on.
    pub candidate_pages: Vec<usize>,
    /// Ordered by `source_page`. Empty unless `state` is `Done`.
    pub briefs: Vec<ArticleBrief>,
    /// Pages that were skipped along the way.
    pub page_failures: Vec<PageError>,
    /// Reason the session failed, when `state` is `Failed`.
    pub failure: Option<String>,
}

impl SessionReply {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief(page: usize, title: Option<&str>) -> ArticleBrief {
        ArticleBrief {
            source_page: page,
            title: title.map(str::to_string),
            core_argument: "Rates should fall.".into(),
            key_evidence: "Inflation at 2.1%.".into(),
            policy_implications: "Expect a cut in March.".into(),
        }
    }

    #[test]
    fn markdown_uses_brief_format() {
        let md = brief(9, Some("The case for cheaper money")).to_markdown();
        assert!(md.starts_with("### The case for cheaper money\n"));
        assert!(md.contains("_Page 9_"));
        assert!(md.contains("* **Core Argument:** Rates should fall."));
        assert!(md.contains("* **Key Evidence:** Inflation at 2.1%."));
        assert!(md.contains("* **Policy Implications:** Expect a cut in March."));
    }

    #[test]
    fn markdown_without_title() {
        assert!(brief(3, None).to_markdown().starts_with("### Untitled article"));
    }

    #[test]
    fn render_briefs_separates_articles() {
        let out = render_briefs(&[brief(1, Some("A")), brief(2, Some("B"))]);
        assert_eq!(out.matches("\n---\n").count(), 1);
        assert!(out.find("### A").unwrap() < out.find("### B").unwrap());
    }

    #[test]
    fn empty_detection() {
        assert!(DetectionResult::empty().is_empty());
    }
}
