//! The inference service contract and its edgequake-llm implementation.
//!
//! Two call sites talk to the model: the page classifier and the
//! summarizer. Both go through [`InferenceGate`], which owns the two
//! policies for the shared, rate-limited service:
//!
//! * **Bounded concurrency.** One semaphore caps in-flight requests across
//!   every session of a [`crate::SessionManager`].
//! * **One retry.** [`InferenceGate::call_with_retry`] makes at most two
//!   attempts. The second attempt uses a caller-built prompt (simplified or
//!   corrective) and waits `retry_backoff_ms` first, four times longer when
//!   the service signalled a rate limit.

use crate::config::AnalysisConfig;
use crate::error::{BriefError, InferenceError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// At most one retry per external call.
pub const MAX_RETRIES: u8 = 1;

/// Which call site a request comes from. Used for logging and by test doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Detection,
    Brief,
}

/// One multimodal request: a prompt and one or more page images.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub kind: RequestKind,
    pub prompt: String,
    pub images: Vec<ImageData>,
    /// 1-indexed pages the images were rendered from, in image order.
    pub pages: Vec<usize>,
    /// 0 for the first attempt, 1 for the retry.
    pub attempt: u8,
}

/// The model's text reply.
#[derive(Debug, Clone, Default)]
pub struct InferenceResponse {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// The multimodal inference service, treated as a black box.
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse, InferenceError>;
}

/// [`InferenceService`] over an edgequake-llm vision provider.
pub struct LlmInference {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout: Duration,
}

impl LlmInference {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &AnalysisConfig) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(config.temperature),
                max_tokens: Some(config.max_tokens),
                ..Default::default()
            },
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve the provider from the config and environment.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, BriefError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl InferenceService for LlmInference {
    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let messages = vec![ChatMessage::user_with_images(
            request.prompt.as_str(),
            request.images,
        )];

        let response = timeout(self.timeout, self.provider.chat(&messages, Some(&self.options)))
            .await
            .map_err(|_| {
                InferenceError::new(
                    Some(408),
                    format!("no reply within {}s", self.timeout.as_secs()),
                )
            })?
            .map_err(|e| InferenceError::new(None, e.to_string()))?;

        debug!(
            "{:?} reply for pages {:?}: {} input tokens, {} output tokens",
            request.kind, request.pages, response.prompt_tokens, response.completion_tokens
        );

        Ok(InferenceResponse {
            text: response.content,
            input_tokens: response.prompt_tokens as usize,
            output_tokens: response.completion_tokens as usize,
        })
    }
}

/// Shared access point to the inference service.
#[derive(Clone)]
pub struct InferenceGate {
    service: Arc<dyn InferenceService>,
    permits: Arc<Semaphore>,
    backoff_ms: u64,
}

impl InferenceGate {
    pub fn new(service: Arc<dyn InferenceService>, concurrency: usize, backoff_ms: u64) -> Self {
        Self {
            service,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            backoff_ms,
        }
    }

    /// Send one request, waiting for a free slot first.
    pub async fn call(&self, request: InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| InferenceError::new(None, "inference gate closed"))?;
        self.service.infer(request).await
    }

    /// Send `first`; if the call fails or `parse` rejects the reply, wait and
    /// send the request built by `retry` from the failure.
    ///
    /// Returns the parsed value and the number of retries used.
    pub async fn call_with_retry<T, P, R>(
        &self,
        first: InferenceRequest,
        parse: P,
        retry: R,
    ) -> Result<(T, u8), InferenceError>
    where
        P: Fn(&str) -> Result<T, InferenceError>,
        R: FnOnce(&InferenceError) -> InferenceRequest,
    {
        let kind = first.kind;
        let pages = first.pages.clone();

        let err = match self.call(first).await.and_then(|r| parse(&r.text)) {
            Ok(value) => return Ok((value, 0)),
            Err(e) => e,
        };

        let backoff = self.backoff_for(&err);
        warn!(
            "{:?} for pages {:?}: attempt 1 failed: {}; retrying in {}ms",
            kind, pages, err, backoff
        );
        sleep(Duration::from_millis(backoff)).await;

        let mut request = retry(&err);
        request.attempt = MAX_RETRIES;
        self.call(request)
            .await
            .and_then(|r| parse(&r.text))
            .map(|value| (value, MAX_RETRIES))
    }

    fn backoff_for(&self, err: &InferenceError) -> u64 {
        if err.is_rate_limited() {
            self.backoff_ms.saturating_mul(4)
        } else {
            self.backoff_ms
        }
    }
}

fn default_model_for(provider: &str) -> &'static str {
    match provider {
        "anthropic" => "claude-sonnet-4-20250514",
        "gemini" => "gemini-2.0-flash",
        "ollama" => "llava",
        _ => "gpt-4.1-mini",
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, BriefError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        BriefError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. a pre-built provider in `config.provider`;
/// 2. `config.provider_name` (+ `config.model`);
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` both set;
/// 4. `GEMINI_API_KEY`, then `OPENAI_API_KEY`, then full auto-detection.
pub fn resolve_provider(config: &AnalysisConfig) -> Result<Arc<dyn LLMProvider>, BriefError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config
            .model
            .as_deref()
            .unwrap_or_else(|| default_model_for(name));
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    for (var, provider) in [("GEMINI_API_KEY", "gemini"), ("OPENAI_API_KEY", "openai")] {
        if std::env::var(var).is_ok_and(|k| !k.is_empty()) {
            let model = config
                .model
                .as_deref()
                .unwrap_or_else(|| default_model_for(provider));
            return create_vision_provider(provider, model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| BriefError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
