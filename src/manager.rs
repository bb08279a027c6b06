//! Session manager: one active [`DocumentSession`] per chat.
//!
//! The manager is the inbound surface a transport adapter (chat bot, CLI)
//! talks to. It owns the chat → session map and runs every session as its
//! own tokio task, so a slow document never blocks another chat.
//!
//! Lifecycle of a map entry:
//!
//! * **create**: [`SessionManager::submit_document`] inserts a fresh session
//!   and spawns its detection run.
//! * **replace**: a second document for the same chat aborts the first run
//!   (`JoinHandle::abort`), dropping its in-flight requests. The first
//!   caller receives [`BriefError::SessionCancelled`] and no result.
//! * **dispose**: a session that reached `DONE` or `FAILED` is removed as
//!   soon as its reply is built.
//!
//! A session waiting for a manual page list stays in the map until a valid
//! list arrives, too many invalid lists arrive, or `manual_pages_timeout`
//! elapses and the timer task fails it.
//!
//! The map lock is a `std::sync::Mutex` and is never held across an await.
//! When both locks are needed the map is locked before the session.

use crate::config::AnalysisConfig;
use crate::error::BriefError;
use crate::observer::{NoopObserver, SessionObserver, SharedObserver};
use crate::output::SessionReply;
use crate::pipeline::classify::detect_editorial_pages;
use crate::pipeline::extract::extract_pages;
use crate::pipeline::fallback::resolve_manual_pages;
use crate::pipeline::inference::{InferenceGate, InferenceService, LlmInference};
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::pipeline::summarize::summarize_pages;
use crate::session::{DocumentSession, SessionId, SessionState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

type SharedSession = Arc<Mutex<DocumentSession>>;
type SessionMap = Arc<Mutex<HashMap<String, Entry>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Entry {
    session_id: SessionId,
    session: SharedSession,
    task: Option<AbortHandle>,
    timer: Option<JoinHandle<()>>,
    deadline: Option<Instant>,
}

impl Entry {
    fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
        if let Some(timer) = &self.timer {
            timer.abort();
        }
    }
}

/// Routes documents and page lists to per-chat sessions.
///
/// Cheap to clone; clones share the same session map and inference gate.
#[derive(Clone)]
pub struct SessionManager {
    config: Arc<AnalysisConfig>,
    rasterizer: Arc<dyn Rasterizer>,
    gate: InferenceGate,
    observer: SharedObserver,
    sessions: SessionMap,
}

impl SessionManager {
    /// Build a manager over explicit rasterizer and inference implementations.
    pub fn new(
        config: AnalysisConfig,
        rasterizer: Arc<dyn Rasterizer>,
        inference: Arc<dyn InferenceService>,
    ) -> Self {
        let gate = InferenceGate::new(
            inference,
            config.inference_concurrency,
            config.retry_backoff_ms,
        );
        Self {
            config: Arc::new(config),
            rasterizer,
            gate,
            observer: Arc::new(NoopObserver),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Build a manager that renders with pdfium and calls the configured
    /// LLM provider.
    pub fn from_config(config: AnalysisConfig) -> Result<Self, BriefError> {
        let inference = LlmInference::from_config(&config)?;
        let rasterizer = PdfiumRasterizer::new(config.max_rendered_pixels);
        Ok(Self::new(config, Arc::new(rasterizer), Arc::new(inference)))
    }

    /// Send session notifications to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Start analysing a new document for `chat_id`.
    ///
    /// Any session already active for the chat is cancelled first. Resolves
    /// when the session is `DONE`, `FAILED` or `AWAITING_MANUAL_PAGES`.
    pub async fn submit_document(
        &self,
        chat_id: &str,
        pdf_bytes: Vec<u8>,
    ) -> Result<SessionReply, BriefError> {
        if self.cancel(chat_id) {
            info!("Chat {}: new document replaces the active session", chat_id);
        }

        let pdf = self.rasterizer.open(pdf_bytes).await?;
        let session = DocumentSession::new(pdf);
        let session_id = session.id();
        info!(
            "Chat {}: session {} opened ({} pages)",
            chat_id,
            session_id,
            session.pdf().page_count()
        );
        let session = Arc::new(Mutex::new(session));
        let run = self.run(chat_id, session_id, session.clone());

        // Spawn and register under one lock so a concurrent submit for the
        // same chat always sees a task it can abort.
        let handle = {
            let mut sessions = lock(&self.sessions);
            let handle = tokio::spawn(run.detect_and_brief());
            let entry = Entry {
                session_id,
                session,
                task: Some(handle.abort_handle()),
                timer: None,
                deadline: None,
            };
            if let Some(previous) = sessions.insert(chat_id.to_string(), entry) {
                previous.abort();
            }
            handle
        };
        self.await_run(chat_id, session_id, handle).await
    }

    /// Feed a user-typed page list to the session waiting for one.
    ///
    /// An invalid list keeps the session waiting and the reply names the bad
    /// token, until `max_manual_attempts` lists have been rejected.
    pub async fn submit_manual_pages(
        &self,
        chat_id: &str,
        page_list: &str,
    ) -> Result<SessionReply, BriefError> {
        let (run, deadline) = {
            let sessions = lock(&self.sessions);
            let entry = sessions
                .get(chat_id)
                .ok_or_else(|| BriefError::NoActiveSession {
                    chat_id: chat_id.to_string(),
                })?;
            (
                self.run(chat_id, entry.session_id, entry.session.clone()),
                entry.deadline,
            )
        };

        if deadline.is_some_and(|d| Instant::now() >= d) {
            if let Some(reply) = run.expire() {
                return Ok(reply);
            }
        }

        let max_attempts = self.config.max_manual_attempts;
        let (outcome, page_count) = {
            let mut session = lock(&run.session);
            match session.state() {
                SessionState::AwaitingManualPages => {}
                state if state.is_terminal() => {
                    return Err(BriefError::NoActiveSession {
                        chat_id: chat_id.to_string(),
                    })
                }
                state => {
                    return Err(BriefError::NotAwaitingPages {
                        session_id: run.session_id.to_string(),
                        state: state.to_string(),
                    })
                }
            }
            let page_count = session.pdf().page_count();
            let outcome = match resolve_manual_pages(
                page_list,
                page_count,
                self.config.max_candidate_pages,
            ) {
                Ok(pages) => {
                    session.accept_manual_pages(pages.clone())?;
                    Ok(pages)
                }
                Err(e) => {
                    let attempts = session.reject_manual_pages(&e.to_string());
                    Err((e, attempts))
                }
            };
            (outcome, page_count)
        };

        let pages = match outcome {
            Ok(pages) => pages,
            Err((e, attempts)) if attempts >= max_attempts => {
                warn!(
                    "Chat {}: page list rejected ({}), no attempts left",
                    chat_id, e
                );
                let err = BriefError::ManualInputExhausted {
                    attempts,
                    last: e.to_string(),
                };
                return Ok(run.fail_and_dispose(&err));
            }
            Err((e, attempts)) => {
                info!(
                    "Chat {}: page list rejected ({}), attempt {}/{}",
                    chat_id, e, attempts, max_attempts
                );
                let message = format!(
                    "{e}. Please send the page numbers again (1-{page_count}), e.g. \"6 7\". \
                     {} attempt(s) left.",
                    max_attempts - attempts
                );
                return Ok(lock(&run.session).reply(message));
            }
        };

        info!("Chat {}: manual pages {:?} accepted", chat_id, pages);

        let session_id = run.session_id;
        let handle = {
            let mut sessions = lock(&self.sessions);
            let entry = sessions
                .get_mut(chat_id)
                .filter(|e| e.session_id == session_id)
                .ok_or_else(|| BriefError::SessionCancelled {
                    session_id: session_id.to_string(),
                })?;
            entry.deadline = None;
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            // Announced from the task, so a run aborted before it starts stays silent.
            let handle = tokio::spawn(async move {
                run.notify(SessionState::Extracting);
                run.extract_and_brief().await
            });
            entry.task = Some(handle.abort_handle());
            handle
        };
        self.await_run(chat_id, session_id, handle).await
    }

    /// State of the session active for `chat_id`, if any.
    pub fn state(&self, chat_id: &str) -> Option<SessionState> {
        let sessions = lock(&self.sessions);
        let entry = sessions.get(chat_id)?;
        let state = lock(&entry.session).state();
        Some(state)
    }

    /// Drop the session active for `chat_id`, aborting its task.
    ///
    /// Returns `false` when the chat had no session.
    pub fn cancel(&self, chat_id: &str) -> bool {
        let removed = lock(&self.sessions).remove(chat_id);
        match removed {
            Some(entry) => {
                info!("Chat {}: session {} cancelled", chat_id, entry.session_id);
                entry.abort();
                true
            }
            None => false,
        }
    }

    /// Number of chats with an active session.
    pub fn active_sessions(&self) -> usize {
        lock(&self.sessions).len()
    }

    fn run(&self, chat_id: &str, session_id: SessionId, session: SharedSession) -> Run {
        Run {
            chat_id: chat_id.to_string(),
            session_id,
            session,
            config: self.config.clone(),
            rasterizer: self.rasterizer.clone(),
            gate: self.gate.clone(),
            observer: self.observer.clone(),
            sessions: self.sessions.clone(),
        }
    }

    async fn await_run(
        &self,
        chat_id: &str,
        session_id: SessionId,
        handle: JoinHandle<SessionReply>,
    ) -> Result<SessionReply, BriefError> {
        match handle.await {
            Ok(reply) => Ok(reply),
            Err(e) if e.is_cancelled() => {
                debug!("Session {}: run was cancelled", session_id);
                Err(BriefError::SessionCancelled {
                    session_id: session_id.to_string(),
                })
            }
            Err(e) => {
                let mut sessions = lock(&self.sessions);
                if sessions
                    .get(chat_id)
                    .is_some_and(|entry| entry.session_id == session_id)
                {
                    sessions.remove(chat_id);
                }
                Err(BriefError::Internal(format!(
                    "session {session_id} task failed: {e}"
                )))
            }
        }
    }
}

/// Everything one session task needs, detached from the manager.
#[derive(Clone)]
struct Run {
    chat_id: String,
    session_id: SessionId,
    session: SharedSession,
    config: Arc<AnalysisConfig>,
    rasterizer: Arc<dyn Rasterizer>,
    gate: InferenceGate,
    observer: SharedObserver,
    sessions: SessionMap,
}

impl Run {
    fn notify(&self, state: SessionState) {
        self.observer
            .on_state_change(&self.chat_id, &self.session_id.to_string(), state);
    }

    /// `IDLE → DETECTING → …` until the session finishes or needs a page list.
    async fn detect_and_brief(self) -> SessionReply {
        let pdf = {
            let mut session = lock(&self.session);
            if let Err(e) = session.begin_detection() {
                return session.reply(e.to_string());
            }
            session.pdf().clone()
        };
        self.notify(SessionState::Detecting);
        if pdf.page_count() == 0 {
            return self.fail_and_dispose(&BriefError::EmptyDocument);
        }
        let scanned = self.config.scan_pages.min(pdf.page_count());
        self.observer.on_detection_started(&self.chat_id, scanned);
        info!(
            "Session {}: scanning the first {} pages",
            self.session_id, scanned
        );

        let detection =
            detect_editorial_pages(self.rasterizer.as_ref(), &self.gate, &pdf, &self.config).await;

        let applied = lock(&self.session).apply_detection(&detection);
        if let Err(e) = applied {
            return self.fail_and_dispose(&e);
        }

        if detection.is_empty() {
            info!(
                "Session {}: no editorial page found, waiting for a page list",
                self.session_id
            );
            self.notify(SessionState::AwaitingManualPages);
            self.observer.on_detection_failed(&self.chat_id);
            self.observer
                .on_awaiting_manual_pages(&self.chat_id, pdf.page_count());
            self.arm_timeout();
            let message = format!(
                "I could not find the editorial pages automatically. \
                 Please send the page numbers to analyse (1-{}), e.g. \"6 7\".",
                pdf.page_count()
            );
            return lock(&self.session).reply(message);
        }

        self.notify(SessionState::Extracting);
        self.extract_and_brief().await
    }

    /// `EXTRACTING → SUMMARIZING → DONE`, or `FAILED` when no page renders.
    async fn extract_and_brief(self) -> SessionReply {
        let (pdf, candidates) = {
            let session = lock(&self.session);
            (session.pdf().clone(), session.candidate_pages().to_vec())
        };
        info!(
            "Session {}: rendering pages {:?} at {} DPI",
            self.session_id, candidates, self.config.extract_dpi
        );

        let extraction = extract_pages(
            self.rasterizer.as_ref(),
            &pdf,
            &candidates,
            self.config.extract_dpi,
            self.config.render_concurrency,
        )
        .await;
        for failure in &extraction.failures {
            self.observer.on_page_failed(&self.chat_id, failure);
        }
        let finished = {
            let mut session = lock(&self.session);
            for failure in extraction.failures {
                session.record_page_failure(failure);
            }
            session.finish_extraction(extraction.pages.len())
        };
        if let Err(e) = finished {
            return self.fail_and_dispose(&e);
        }

        self.notify(SessionState::Summarizing);
        let summaries = summarize_pages(&self.gate, &extraction.pages, &self.config).await;
        for failure in &summaries.failures {
            self.observer.on_page_failed(&self.chat_id, failure);
        }
        let completed = {
            let mut session = lock(&self.session);
            for failure in summaries.failures {
                session.record_page_failure(failure);
            }
            session.complete(summaries.briefs)
        };
        if let Err(e) = completed {
            return self.fail_and_dispose(&e);
        }

        self.notify(SessionState::Done);
        let reply = {
            let session = lock(&self.session);
            session.reply(done_message(&session))
        };
        self.dispose();
        info!(
            "Session {}: done, {} briefs",
            self.session_id,
            reply.briefs.len()
        );
        self.observer.on_briefs_ready(&self.chat_id, &reply.briefs);
        reply
    }

    /// Start the manual-page deadline for this session.
    fn arm_timeout(&self) {
        let timeout = self.config.manual_pages_timeout;
        let mut sessions = lock(&self.sessions);
        let Some(entry) = sessions
            .get_mut(&self.chat_id)
            .filter(|e| e.session_id == self.session_id)
        else {
            return;
        };
        entry.deadline = Some(Instant::now() + timeout);
        let run = self.clone();
        let timer = tokio::spawn(async move {
            sleep(timeout).await;
            if run.expire().is_some() {
                info!(
                    "Session {}: no page list within {:?}",
                    run.session_id, timeout
                );
            }
        });
        if let Some(previous) = entry.timer.replace(timer) {
            previous.abort();
        }
    }

    /// Fail the session if it is still waiting for a page list.
    fn expire(&self) -> Option<SessionReply> {
        let err = BriefError::SessionTimeout {
            secs: self.config.manual_pages_timeout.as_secs(),
        };
        let reply = {
            let mut sessions = lock(&self.sessions);
            let entry = sessions
                .get_mut(&self.chat_id)
                .filter(|e| e.session_id == self.session_id)?;
            if lock(&entry.session).state() != SessionState::AwaitingManualPages {
                return None;
            }
            // Detach, not abort: this may be running on the timer task.
            entry.timer = None;
            self.fail_in(&mut sessions, &err)
        };
        self.announce_failure(&err);
        Some(reply)
    }

    fn fail_and_dispose(&self, err: &BriefError) -> SessionReply {
        let reply = {
            let mut sessions = lock(&self.sessions);
            self.fail_in(&mut sessions, err)
        };
        self.announce_failure(err);
        reply
    }

    /// Move the session to `FAILED` and drop its map entry. The caller holds
    /// the map lock.
    fn fail_in(&self, sessions: &mut HashMap<String, Entry>, err: &BriefError) -> SessionReply {
        let reply = {
            let mut session = lock(&self.session);
            if !session.state().is_terminal() {
                if let Err(e) = session.fail(err) {
                    warn!("Session {}: {}", self.session_id, e);
                }
            }
            session.reply(err.to_string())
        };
        if let Some(timer) = self.take_entry(sessions).and_then(|e| e.timer) {
            timer.abort();
        }
        reply
    }

    fn announce_failure(&self, err: &BriefError) {
        warn!("Session {}: failed: {}", self.session_id, err);
        self.notify(SessionState::Failed);
        self.observer
            .on_session_failed(&self.chat_id, &err.to_string());
    }

    fn dispose(&self) {
        let mut sessions = lock(&self.sessions);
        if let Some(timer) = self.take_entry(&mut sessions).and_then(|e| e.timer) {
            timer.abort();
        }
    }

    /// Remove the chat's entry only if it still belongs to this session.
    fn take_entry(&self, sessions: &mut HashMap<String, Entry>) -> Option<Entry> {
        if sessions
            .get(&self.chat_id)
            .is_some_and(|e| e.session_id == self.session_id)
        {
            sessions.remove(&self.chat_id)
        } else {
            None
        }
    }
}

fn done_message(session: &DocumentSession) -> String {
    let pages = session.candidate_pages();
    let mut message = match session.briefs().len() {
        0 => format!("No brief could be produced for pages {pages:?}."),
        1 => format!("1 brief from pages {pages:?}."),
        n => format!("{n} briefs from pages {pages:?}."),
    };
    let skipped: Vec<usize> = session.page_failures().iter().map(|f| f.page()).collect();
    if !skipped.is_empty() {
        message.push_str(&format!(" Skipped pages: {skipped:?}."));
    }
    message
}
