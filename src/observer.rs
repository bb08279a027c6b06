//! Session notifications for the transport layer.
//!
//! Inject an [`Arc<dyn SessionObserver>`] into the
//! [`crate::SessionManager`] to push status messages to a chat ("Scanning for
//! editorial pages…") while a command is still running. Every method has a
//! no-op default, so an adapter overrides only what it shows.
//!
//! Notifications for a session that has been replaced are never sent: the
//! replaced session's task is aborted before it can emit anything else.
//!
//! # Example
//!
//! ```rust
//! use editorial_brief::{ArticleBrief, SessionObserver};
//!
//! struct Printer;
//!
//! impl SessionObserver for Printer {
//!     fn on_briefs_ready(&self, chat_id: &str, briefs: &[ArticleBrief]) {
//!         println!("{chat_id}: {} briefs", briefs.len());
//!     }
//! }
//! ```

use crate::error::PageError;
use crate::output::ArticleBrief;
use crate::session::SessionState;
use std::sync::Arc;

/// Called by the session manager as a session moves through its states.
///
/// Sessions for different chats run concurrently, so implementations must be
/// `Send + Sync` and synchronise any shared state.
pub trait SessionObserver: Send + Sync {
    /// Every state change, including the ones with a dedicated method below.
    fn on_state_change(&self, chat_id: &str, session_id: &str, state: SessionState) {
        let _ = (chat_id, session_id, state);
    }

    /// The low-resolution scan was sent to the model.
    fn on_detection_started(&self, chat_id: &str, scanned_pages: usize) {
        let _ = (chat_id, scanned_pages);
    }

    /// No editorial page was found.
    fn on_detection_failed(&self, chat_id: &str) {
        let _ = chat_id;
    }

    /// The session waits for a manual page list.
    fn on_awaiting_manual_pages(&self, chat_id: &str, page_count: usize) {
        let _ = (chat_id, page_count);
    }

    /// A page was skipped (render or brief failure).
    fn on_page_failed(&self, chat_id: &str, error: &PageError) {
        let _ = (chat_id, error);
    }

    /// The session finished; `briefs` are in page order.
    fn on_briefs_ready(&self, chat_id: &str, briefs: &[ArticleBrief]) {
        let _ = (chat_id, briefs);
    }

    /// The session ended in `FAILED`.
    fn on_session_failed(&self, chat_id: &str, reason: &str) {
        let _ = (chat_id, reason);
    }
}

/// Observer that ignores every event. The manager's default.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Convenience alias for the type stored in the manager.
pub type SharedObserver = Arc<dyn SessionObserver>;
