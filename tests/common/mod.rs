//! In-process test doubles for the rasterizer and the inference service.
//!
//! The fake "newspaper" knows which of its pages are editorial; the fake
//! model answers detection requests from the page numbers attached to the
//! request and writes one canned brief per page.

#![allow(dead_code)]

use async_trait::async_trait;
use editorial_brief::{
    AnalysisConfig, InferenceError, InferenceRequest, InferenceResponse, InferenceService,
    PdfHandle, Rasterizer, RenderError, RequestKind, SessionObserver, SessionState,
};
use image::DynamicImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn pdf() -> Vec<u8> {
    b"%PDF-1.7\n% test newspaper\n".to_vec()
}

pub fn config() -> AnalysisConfig {
    AnalysisConfig::builder()
        .retry_backoff_ms(0)
        .build()
        .expect("valid test config")
}

// ── Rasterizer ───────────────────────────────────────────────────────────────

type FailRule = Box<dyn Fn(usize, u32) -> bool + Send + Sync>;

/// Renders blank images; `fail(page, dpi)` decides which renders error out.
pub struct FakeRasterizer {
    page_count: usize,
    fail: FailRule,
    renders: Mutex<Vec<(usize, u32)>>,
}

impl FakeRasterizer {
    pub fn new(page_count: usize) -> Arc<Self> {
        Self::failing(page_count, |_, _| false)
    }

    pub fn failing(
        page_count: usize,
        fail: impl Fn(usize, u32) -> bool + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            page_count,
            fail: Box::new(fail),
            renders: Mutex::new(Vec::new()),
        })
    }

    /// Successful renders as `(page, dpi)`, in completion order.
    pub fn renders(&self) -> Vec<(usize, u32)> {
        self.renders.lock().unwrap().clone()
    }
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn open(&self, bytes: Vec<u8>) -> Result<PdfHandle, RenderError> {
        editorial_brief::pipeline::render::check_pdf_magic(&bytes)?;
        Ok(PdfHandle::new(bytes, self.page_count, Some("The Daily Test".into())))
    }

    async fn render(
        &self,
        pdf: &PdfHandle,
        page: usize,
        dpi: u32,
    ) -> Result<DynamicImage, RenderError> {
        pdf.check_page(page)?;
        if (self.fail)(page, dpi) {
            return Err(RenderError::DecoderFailed {
                page,
                detail: "damaged content stream".into(),
            });
        }
        self.renders.lock().unwrap().push((page, dpi));
        Ok(DynamicImage::new_rgb8(16, 16))
    }
}

// ── Inference ────────────────────────────────────────────────────────────────

/// Scripted vision model.
pub struct FakeModel {
    editorial: Vec<usize>,
    detection_override: Option<String>,
    brief_delays: HashMap<usize, Duration>,
    unreadable: Vec<usize>,
    hold_first_brief: AtomicBool,
    calls: Mutex<Vec<(RequestKind, Vec<usize>, u8)>>,
}

impl FakeModel {
    /// A model that sees `editorial` as the editorial pages.
    pub fn new(editorial: &[usize]) -> Self {
        Self {
            editorial: editorial.to_vec(),
            detection_override: None,
            brief_delays: HashMap::new(),
            unreadable: Vec::new(),
            hold_first_brief: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer every detection request with `reply` verbatim.
    pub fn detection_reply(mut self, reply: &str) -> Self {
        self.detection_override = Some(reply.to_string());
        self
    }

    /// Delay the brief for `page`.
    pub fn slow_page(mut self, page: usize, delay: Duration) -> Self {
        self.brief_delays.insert(page, delay);
        self
    }

    /// Reply to briefs for `page` with text that has no brief in it.
    pub fn unreadable_page(mut self, page: usize) -> Self {
        self.unreadable.push(page);
        self
    }

    /// The first brief request never completes.
    pub fn hold_first_brief(self) -> Self {
        self.hold_first_brief.store(true, Ordering::SeqCst);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<(RequestKind, Vec<usize>, u8)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, kind: RequestKind) -> Vec<(Vec<usize>, u8)> {
        self.calls()
            .into_iter()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, pages, attempt)| (pages, attempt))
            .collect()
    }

    fn detect(&self, pages: &[usize]) -> String {
        if let Some(ref reply) = self.detection_override {
            return reply.clone();
        }
        let positions: Vec<usize> = pages
            .iter()
            .enumerate()
            .filter(|(_, page)| self.editorial.contains(page))
            .map(|(i, _)| i + 1)
            .collect();
        format!("```json\n{{\"pages\": {positions:?}, \"note\": \"Opinion heading\"}}\n```")
    }

    fn brief(page: usize) -> String {
        format!(
            "### Article on page {page}\n\
             * **Core Argument:** The council should fund page {page} reforms.\n\
             * **Key Data/Evidence:** Spending fell 12% since 2019.\n\
             * **Policy Implications:** Ring-fence the maintenance budget.\n"
        )
    }
}

#[async_trait]
impl InferenceService for FakeModel {
    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.kind, request.pages.clone(), request.attempt));

        let text = match request.kind {
            RequestKind::Detection => self.detect(&request.pages),
            RequestKind::Brief => {
                let page = request.pages[0];
                if self.hold_first_brief.swap(false, Ordering::SeqCst) {
                    std::future::pending::<()>().await;
                }
                if let Some(delay) = self.brief_delays.get(&page) {
                    tokio::time::sleep(*delay).await;
                }
                if self.unreadable.contains(&page) {
                    "Sorry, the scan is too blurry to read.".to_string()
                } else {
                    Self::brief(page)
                }
            }
        };
        Ok(InferenceResponse {
            text,
            input_tokens: 1000,
            output_tokens: 200,
        })
    }
}

// ── Observer ─────────────────────────────────────────────────────────────────

/// Records every state change as `(session_id, state)`.
#[derive(Default)]
pub struct Recorder {
    pub states: Mutex<Vec<(String, SessionState)>>,
    pub failures: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn sessions_in(&self, state: SessionState) -> Vec<String> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| *s == state)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl SessionObserver for Recorder {
    fn on_state_change(&self, _chat_id: &str, session_id: &str, state: SessionState) {
        self.states
            .lock()
            .unwrap()
            .push((session_id.to_string(), state));
    }

    fn on_session_failed(&self, _chat_id: &str, reason: &str) {
        self.failures.lock().unwrap().push(reason.to_string());
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
