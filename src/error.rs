//! Error types for the editorial-brief library.
//!
//! The pipeline distinguishes failures by how far they reach:
//!
//! * [`BriefError`]: **Fatal** for a session or a command: the PDF cannot be
//!   opened, every selected page failed to render, the manual-page wait timed
//!   out. Returned as `Err(BriefError)` from the [`crate::SessionManager`]
//!   commands and carried as the failure reason of a `FAILED` session.
//!
//! * [`PageError`]: **Non-fatal**: one page failed to render or to produce a
//!   brief, the other pages are fine. Stored in the
//!   [`crate::output::SessionReply`] so the user still gets partial results.
//!
//! * [`RenderError`], [`InferenceError`], [`ValidationError`]: the error
//!   contracts of the rasterizer, the inference service and the fallback
//!   resolver respectively. Call sites decide whether they become a
//!   `PageError`, a `BriefError`, or an empty detection.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned by the session commands.
#[derive(Debug, Error)]
pub enum BriefError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Rendering ─────────────────────────────────────────────────────────
    /// The document could not be opened or rendered at all.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// The PDF opened but has no pages.
    #[error("The PDF has no pages; there is nothing to analyse.")]
    EmptyDocument,

    /// Every candidate page failed to render; nothing left to summarise.
    #[error("All {total} selected pages failed to render.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    // ── Session lifecycle ─────────────────────────────────────────────────
    /// No document is active for this chat.
    #[error("No document is being analysed for chat '{chat_id}'. Please send the newspaper PDF again.")]
    NoActiveSession { chat_id: String },

    /// A manual page list arrived while the session was not waiting for one.
    #[error("Session {session_id} is {state}, not waiting for a page list")]
    NotAwaitingPages { session_id: String, state: String },

    /// The state machine was asked for a transition it does not allow.
    #[error("Invalid session transition {from} → {to}")]
    InvalidTransition { from: String, to: String },

    /// The user did not send a page list in time.
    #[error("No page list received within {secs}s; the document was discarded.")]
    SessionTimeout { secs: u64 },

    /// Too many invalid page lists in a row.
    #[error("Gave up after {attempts} invalid page lists. Last problem: {last}")]
    ManualInputExhausted { attempts: u32, last: String },

    /// The session was replaced by a newer document for the same chat.
    #[error("Session {session_id} was cancelled by a newer document")]
    SessionCancelled { session_id: String },

    // ── Inference ─────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures of the rasterizer adapter. Never retried at that layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// The buffer does not start with the `%PDF` magic bytes.
    #[error("File is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt: {detail}")]
    CorruptPdf { detail: String },

    /// Requested page lies outside `[1, total]`.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// DPI must be a positive integer.
    #[error("Invalid render resolution: {dpi} DPI")]
    InvalidDpi { dpi: u32 },

    /// pdfium failed to rasterise or decode the page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    DecoderFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumUnavailable(String),
}

/// Failure reported by the inference service.
///
/// `status` carries the HTTP status when the provider exposed one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Inference failed{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
pub struct InferenceError {
    pub status: Option<u16>,
    pub message: String,
}

impl InferenceError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// A reply the caller could not parse into the expected structure.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    /// True for HTTP 429 or provider messages that mention rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        if self.status == Some(429) {
            return true;
        }
        let msg = self.message.to_lowercase();
        msg.contains("429") || msg.contains("rate limit") || msg.contains("rate_limit")
    }
}

/// A manual page list that cannot be used. Always names the offending token.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No page numbers given. Example: 6 7")]
    Empty,

    #[error("'{token}' is not a page number")]
    NotANumber { token: String },

    #[error("'{token}' is out of range: the document has pages 1 to {total}")]
    OutOfRange { token: String, total: usize },

    #[error("'{token}' is not a valid range: start must be <= end")]
    BadRange { token: String },

    #[error("Too many pages ({count}); at most {max} can be analysed at once")]
    TooMany { count: usize, max: usize },
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::output::SessionReply::page_failures`]; the session
/// carries on with the remaining pages.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// No valid brief after the corrective retry.
    #[error("Page {page}: no valid brief after {retries} retry: {detail}")]
    BriefFailed {
        page: usize,
        retries: u8,
        detail: String,
    },
}

impl PageError {
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. } | PageError::BriefFailed { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_error_display_with_status() {
        let e = InferenceError::new(Some(503), "overloaded");
        assert_eq!(e.to_string(), "Inference failed (HTTP 503): overloaded");
    }

    #[test]
    fn inference_error_display_without_status() {
        let e = InferenceError::malformed("missing Core Argument");
        assert_eq!(e.to_string(), "Inference failed: missing Core Argument");
    }

    #[test]
    fn rate_limit_detection() {
        assert!(InferenceError::new(Some(429), "slow down").is_rate_limited());
        assert!(InferenceError::new(None, "Rate limit exceeded for gemini").is_rate_limited());
        assert!(!InferenceError::new(Some(500), "boom").is_rate_limited());
    }

    #[test]
    fn validation_error_names_token() {
        let e = ValidationError::OutOfRange {
            token: "14".into(),
            total: 12,
        };
        let msg = e.to_string();
        assert!(msg.contains("'14'"), "got: {msg}");
        assert!(msg.contains("1 to 12"), "got: {msg}");
    }

    #[test]
    fn all_pages_failed_display() {
        let e = BriefError::AllPagesFailed {
            total: 2,
            first_error: "bitmap allocation".into(),
        };
        assert!(e.to_string().contains("All 2 selected pages"));
    }

    #[test]
    fn render_error_converts_into_brief_error() {
        let e: BriefError = RenderError::InvalidDpi { dpi: 0 }.into();
        assert!(e.to_string().contains("0 DPI"));
    }

    #[test]
    fn page_error_reports_its_page() {
        let e = PageError::BriefFailed {
            page: 7,
            retries: 1,
            detail: "x".into(),
        };
        assert_eq!(e.page(), 7);
    }
}
