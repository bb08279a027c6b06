//! The per-document session and its state machine.
//!
//! ```text
//! IDLE ──▶ DETECTING ──▶ EXTRACTING ──▶ SUMMARIZING ──▶ DONE
//!              │              ▲   │
//!              ▼              │   └──▶ FAILED (all pages failed)
//!     AWAITING_MANUAL_PAGES ──┘
//!              └──▶ FAILED (timeout / attempts exhausted)
//! ```
//!
//! Every transition goes through one method on [`DocumentSession`] that
//! checks the current state, so a session can never skip a stage or enter
//! extraction without candidate pages. `FAILED` is reachable from every
//! non-terminal state through [`DocumentSession::fail`].

use crate::error::{BriefError, PageError};
use crate::output::{ArticleBrief, DetectionResult, SessionReply};
use crate::pipeline::render::PdfHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Lifecycle state of a [`DocumentSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Detecting,
    AwaitingManualPages,
    Extracting,
    Summarizing,
    Done,
    Failed,
}

impl SessionState {
    /// `Done` and `Failed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }

    fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Failed) => !self.is_terminal(),
            (Idle, Detecting)
            | (Detecting, Extracting)
            | (Detecting, AwaitingManualPages)
            | (AwaitingManualPages, Extracting)
            | (Extracting, Summarizing)
            | (Summarizing, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "IDLE",
            SessionState::Detecting => "DETECTING",
            SessionState::AwaitingManualPages => "AWAITING_MANUAL_PAGES",
            SessionState::Extracting => "EXTRACTING",
            SessionState::Summarizing => "SUMMARIZING",
            SessionState::Done => "DONE",
            SessionState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Opaque, unique id of one submitted document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One PDF submitted by one chat context.
#[derive(Debug, Clone)]
pub struct DocumentSession {
    id: SessionId,
    pdf: PdfHandle,
    state: SessionState,
    candidate_pages: Vec<usize>,
    briefs: Vec<ArticleBrief>,
    page_failures: Vec<PageError>,
    last_error: Option<String>,
    manual_attempts: u32,
}

impl DocumentSession {
    pub fn new(pdf: PdfHandle) -> Self {
        Self {
            id: SessionId::new(),
            pdf,
            state: SessionState::Idle,
            candidate_pages: Vec::new(),
            briefs: Vec::new(),
            page_failures: Vec::new(),
            last_error: None,
            manual_attempts: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn pdf(&self) -> &PdfHandle {
        &self.pdf
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn candidate_pages(&self) -> &[usize] {
        &self.candidate_pages
    }

    pub fn briefs(&self) -> &[ArticleBrief] {
        &self.briefs
    }

    pub fn page_failures(&self) -> &[PageError] {
        &self.page_failures
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn manual_attempts(&self) -> u32 {
        self.manual_attempts
    }

    fn advance(&mut self, next: SessionState) -> Result<(), BriefError> {
        if !self.state.can_advance_to(next) {
            return Err(BriefError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!("Session {}: {} → {}", self.id, self.state, next);
        self.state = next;
        if next != SessionState::Failed {
            self.last_error = None;
        }
        Ok(())
    }

    /// `IDLE → DETECTING`.
    pub fn begin_detection(&mut self) -> Result<(), BriefError> {
        self.advance(SessionState::Detecting)
    }

    /// `DETECTING → EXTRACTING` for a non-empty result, otherwise
    /// `DETECTING → AWAITING_MANUAL_PAGES`.
    pub fn apply_detection(&mut self, detection: &DetectionResult) -> Result<(), BriefError> {
        if detection.is_empty() {
            self.advance(SessionState::AwaitingManualPages)?;
            self.last_error = Some("no editorial pages detected".into());
            return Ok(());
        }
        self.advance(SessionState::Extracting)?;
        self.candidate_pages = detection.pages.iter().copied().collect();
        Ok(())
    }

    /// `AWAITING_MANUAL_PAGES → EXTRACTING` with a resolver-validated list.
    pub fn accept_manual_pages(&mut self, pages: Vec<usize>) -> Result<(), BriefError> {
        if pages.is_empty() {
            return Err(BriefError::Internal(
                "refusing to extract an empty page list".into(),
            ));
        }
        self.advance(SessionState::Extracting)?;
        self.candidate_pages = pages;
        Ok(())
    }

    /// Count a rejected manual list. Returns the attempts so far.
    pub fn reject_manual_pages(&mut self, problem: &str) -> u32 {
        self.manual_attempts += 1;
        self.last_error = Some(problem.to_string());
        self.manual_attempts
    }

    /// Record a page skipped during extraction or summarisation.
    pub fn record_page_failure(&mut self, failure: PageError) {
        self.last_error = Some(failure.to_string());
        self.page_failures.push(failure);
    }

    /// `EXTRACTING → SUMMARIZING` when at least one page rendered,
    /// otherwise `EXTRACTING → FAILED`.
    pub fn finish_extraction(&mut self, rendered: usize) -> Result<(), BriefError> {
        if rendered == 0 {
            let first_error = self
                .page_failures
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            let err = BriefError::AllPagesFailed {
                total: self.candidate_pages.len(),
                first_error,
            };
            self.fail(&err)?;
            return Err(err);
        }
        self.advance(SessionState::Summarizing)
    }

    /// `SUMMARIZING → DONE`, regardless of how many pages produced briefs.
    ///
    /// `briefs` must already be in page order.
    pub fn complete(&mut self, briefs: Vec<ArticleBrief>) -> Result<(), BriefError> {
        self.advance(SessionState::Done)?;
        self.briefs.extend(briefs);
        Ok(())
    }

    /// Any non-terminal state `→ FAILED`.
    pub fn fail(&mut self, reason: &BriefError) -> Result<(), BriefError> {
        self.advance(SessionState::Failed)?;
        self.last_error = Some(reason.to_string());
        Ok(())
    }

    /// Snapshot the session as a reply with the given chat message.
    pub fn reply(&self, message: impl Into<String>) -> SessionReply {
        SessionReply {
            session_id: self.id.to_string(),
            state: self.state,
            message: message.into(),
            candidate_pages: self.candidate_pages.clone(),
            briefs: self.briefs.clone(),
            page_failures: self.page_failures.clone(),
            failure: match self.state {
                SessionState::Failed => self.last_error.clone(),
                _ => None,
            },
        }
    }
}
