//! Model interaction: send one extraction unit and parse what comes back.
//!
//! [`ExtractionClient::extract`] is the only place with network I/O. It makes
//! exactly one attempt per unit and never propagates a failure upward: a
//! transport error, a timeout, or a response that is not JSON becomes a
//! failed [`ExtractionResult`] and the batch carries on.
//!
//! The wire call sits behind [`CompletionBackend`]. [`ProviderBackend`]
//! adapts any `edgequake_llm` provider; tests plug in scripted backends.

use crate::config::ExtractionConfig;
use crate::error::UnitError;
use crate::output::{ExtractionResult, Origin};
use crate::pipeline::encode::to_base64;
use crate::pipeline::parse::parse_response;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// What a unit carries to the model besides its prompt.
#[derive(Debug, Clone)]
pub enum UnitPayload {
    /// A rendered page; read from disk at call time.
    PageImage(PathBuf),
    /// A serialised table, already embedded in the prompt text.
    Table,
}

/// The input to a single model call.
#[derive(Debug, Clone)]
pub struct ExtractionUnit {
    pub origin: Origin,
    pub prompt: String,
    pub payload: UnitPayload,
}

/// One fully-prepared request, as handed to a backend.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub prompt: &'a str,
    /// Base64 PNG of the page, for image units.
    pub image_base64: Option<&'a str>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Raw model answer.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A chat-completion endpoint able to take a prompt plus an optional image.
///
/// An `Err` is a transport failure (network, provider, auth); the string is
/// kept as the unit's error detail.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<Completion, String>;
}

/// [`CompletionBackend`] over an `edgequake_llm` provider.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl CompletionBackend for ProviderBackend {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<Completion, String> {
        // A single user turn: the instructions and, for pages, the image.
        let images = request
            .image_base64
            .map(|b64| vec![ImageData::new(b64.to_string(), "image/png").with_detail("high")])
            .unwrap_or_default();
        let message = ChatMessage::user_with_images(request.prompt, images);
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&[message], Some(&options))
            .await
            .map_err(|e| format!("{}", e))?;

        Ok(Completion {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Sends units to the model and turns answers into [`ExtractionResult`]s.
#[derive(Clone)]
pub struct ExtractionClient {
    backend: Arc<dyn CompletionBackend>,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
}

impl ExtractionClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: &ExtractionConfig) -> Self {
        Self {
            backend,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Run one unit. Always returns a result; never retries.
    pub async fn extract(&self, unit: &ExtractionUnit) -> ExtractionResult {
        let start = Instant::now();
        let key = unit.origin.key();

        let image_b64 = match &unit.payload {
            UnitPayload::PageImage(path) => match tokio::fs::read(path).await {
                Ok(png) => Some(to_base64(&png)),
                Err(e) => {
                    warn!("{}: cannot read page image {}: {}", key, path.display(), e);
                    let mut result = ExtractionResult::failure(
                        unit.origin,
                        UnitError::ArtifactUnavailable {
                            origin: unit.origin,
                            detail: e.to_string(),
                        },
                    );
                    result.image_path = Some(path.clone());
                    return result;
                }
            },
            UnitPayload::Table => None,
        };

        let request = ModelRequest {
            prompt: &unit.prompt,
            image_base64: image_b64.as_deref(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let outcome = match tokio::time::timeout(self.timeout, self.backend.complete(request)).await
        {
            Ok(r) => r,
            Err(_) => Err(format!("timed out after {}s", self.timeout.as_secs())),
        };

        let mut result = match outcome {
            Ok(completion) => {
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    key,
                    completion.input_tokens,
                    completion.output_tokens,
                    start.elapsed()
                );
                let mut r = match parse_response(unit.origin, &completion.content) {
                    Ok((fields, audit)) => {
                        if !audit.is_clean() {
                            warn!(
                                "{}: response breaks the field contract ({} null, {} numeric strings)",
                                key,
                                audit.null_fields.len(),
                                audit.numeric_strings.len()
                            );
                        }
                        ExtractionResult::success(unit.origin, fields, audit)
                    }
                    Err(e) => {
                        warn!("{}: {}", key, e);
                        ExtractionResult::failure(unit.origin, e)
                    }
                };
                r.input_tokens = completion.input_tokens;
                r.output_tokens = completion.output_tokens;
                r
            }
            Err(detail) => {
                warn!("{}: model call failed: {}", key, detail);
                ExtractionResult::failure(
                    unit.origin,
                    UnitError::Transport {
                        origin: unit.origin,
                        detail,
                    },
                )
            }
        };

        if let UnitPayload::PageImage(path) = &unit.payload {
            result.image_path = Some(path.clone());
        }
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Canned {
        reply: Result<String, String>,
        seen: Mutex<Vec<(String, bool)>>,
    }

    impl Canned {
        fn new(reply: Result<&str, &str>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string).map_err(str::to_string),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for Canned {
        async fn complete(&self, request: ModelRequest<'_>) -> Result<Completion, String> {
            self.seen
                .lock()
                .unwrap()
                .push((request.prompt.to_string(), request.image_base64.is_some()));
            self.reply.clone().map(|content| Completion {
                content,
                input_tokens: 10,
                output_tokens: 5,
            })
        }
    }

    struct Stalled;

    #[async_trait]
    impl CompletionBackend for Stalled {
        async fn complete(&self, _request: ModelRequest<'_>) -> Result<Completion, String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Completion::default())
        }
    }

    fn table_unit() -> ExtractionUnit {
        ExtractionUnit {
            origin: Origin::File { file: 2 },
            prompt: "extract".into(),
            payload: UnitPayload::Table,
        }
    }

    fn client(backend: Arc<dyn CompletionBackend>) -> ExtractionClient {
        ExtractionClient::new(backend, &ExtractionConfig::default())
    }

    #[tokio::test]
    async fn parses_json_and_keeps_numbers() {
        let backend = Canned::new(Ok(r#"{"refund": 1234, "memo": ""}"#));
        let result = client(backend.clone()).extract(&table_unit()).await;

        assert!(result.is_success());
        let fields = result.fields.unwrap();
        assert_eq!(fields.get("refund").and_then(|v| v.as_f64()), Some(1234.0));
        assert_eq!(fields.get("memo").and_then(|v| v.as_str()), Some(""));
        assert_eq!(result.input_tokens, 10);
        assert_eq!(backend.seen.lock().unwrap()[0], ("extract".to_string(), false));
    }

    #[tokio::test]
    async fn malformed_json_is_parse_error() {
        let result = client(Canned::new(Ok("not json"))).extract(&table_unit()).await;
        assert!(result.fields.is_none());
        assert!(matches!(
            result.error,
            Some(UnitError::ResponseParse { origin: Origin::File { file: 2 }, .. })
        ));
    }

    #[tokio::test]
    async fn transport_failure_is_captured() {
        let result = client(Canned::new(Err("503 overloaded"))).extract(&table_unit()).await;
        match result.error {
            Some(UnitError::Transport { detail, .. }) => assert_eq!(detail, "503 overloaded"),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_is_transport_error() {
        let config = ExtractionConfig::builder().api_timeout_secs(1).build().unwrap();
        let client = ExtractionClient::new(Arc::new(Stalled), &config);
        let result = client.extract(&table_unit()).await;
        match result.error {
            Some(UnitError::Transport { detail, .. }) => assert!(detail.contains("timed out")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_page_image_fails_the_unit() {
        let unit = ExtractionUnit {
            origin: Origin::Page { file: 1, page: 2 },
            prompt: "extract".into(),
            payload: UnitPayload::PageImage(PathBuf::from("/no/such/page.png")),
        };
        let backend = Canned::new(Ok("{}"));
        let result = client(backend.clone()).extract(&unit).await;
        assert!(matches!(result.error, Some(UnitError::ArtifactUnavailable { .. })));
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn page_image_is_sent_base64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        std::fs::write(&path, b"\x89PNG fake").unwrap();
        let unit = ExtractionUnit {
            origin: Origin::Page { file: 1, page: 1 },
            prompt: "extract".into(),
            payload: UnitPayload::PageImage(path.clone()),
        };
        let backend = Canned::new(Ok("{}"));
        let result = client(backend.clone()).extract(&unit).await;
        assert!(result.is_success());
        assert_eq!(result.image_path, Some(path));
        assert!(backend.seen.lock().unwrap()[0].1);
    }
}
