//! # editorial-brief
//!
//! Find the editorial pages of a newspaper PDF and turn every article on them
//! into a three-part Decision-Maker's Brief, using Vision Language Models.
//!
//! ## Why this crate?
//!
//! A daily paper is 20 to 40 pages, and the opinion section moves around.
//! Reading the whole issue through a vision model is slow and expensive;
//! reading the text layer loses the layout that tells one column from the
//! next. This crate scans the first pages as small thumbnails to locate the
//! section, then re-renders only those pages at print resolution and asks
//! the model for one brief per article.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Detect     first 12 pages at 72 DPI → one classification request
//!  │                 └─ nothing found → wait for a user page list
//!  ├─ 3. Extract    candidate pages at 300 DPI (pdfium, spawn_blocking)
//!  ├─ 4. Summarize  one request per page → Core Argument / Key Evidence /
//!  │                 Policy Implications per article
//!  └─ 5. Reply      briefs in page order + skipped pages
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use editorial_brief::{AnalysisConfig, SessionManager, SessionState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let manager = SessionManager::from_config(AnalysisConfig::default())?;
//!     let pdf = std::fs::read("today.pdf")?;
//!
//!     let mut reply = manager.submit_document("chat-1", pdf).await?;
//!     if reply.state == SessionState::AwaitingManualPages {
//!         reply = manager.submit_manual_pages("chat-1", "6 7").await?;
//!     }
//!     println!("{}", editorial_brief::render_briefs(&reply.briefs));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `editorial-brief` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when embedding the library in a bot:
//! ```toml
//! editorial-brief = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod manager;
pub mod observer;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{AnalysisConfig, AnalysisConfigBuilder};
pub use error::{BriefError, InferenceError, PageError, RenderError, ValidationError};
pub use manager::SessionManager;
pub use observer::{NoopObserver, SessionObserver};
pub use output::{render_briefs, ArticleBrief, DetectionResult, SessionReply};
pub use pipeline::inference::{
    InferenceRequest, InferenceResponse, InferenceService, LlmInference, RequestKind,
};
pub use pipeline::input::load_pdf_bytes;
pub use pipeline::render::{PdfHandle, PdfiumRasterizer, Rasterizer};
pub use session::{DocumentSession, SessionId, SessionState};
