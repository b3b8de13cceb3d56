//! Configuration types for batch extraction.
//!
//! All run behaviour is controlled through one immutable [`ExtractionConfig`],
//! built via its [`ExtractionConfigBuilder`] and handed to the pipeline at
//! batch start. Nothing is read from ambient state during the run except the
//! provider API keys, which the provider factory takes from the environment.

use crate::error::ExtractError;
use crate::pipeline::llm::CompletionBackend;
use crate::progress::ProgressCallback;
use crate::prompts::{FULL_FIELD_PROMPT, TAX_SUMMARY_PROMPT};
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Model used when neither the config nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for one extraction batch.
///
/// # Example
/// ```rust
/// use edgequake_fin2json::{ExtractionConfig, PageScope, Task};
///
/// let config = ExtractionConfig::builder()
///     .task(Task::TaxSummary)
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// assert_eq!(config.effective_page_scope(), PageScope::FirstOnly);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Which of the two fixed task prompts to apply to page images.
    pub task: Task,

    /// Page scope for paginated documents. `None` uses the task default.
    pub page_scope: Option<PageScope>,

    /// Overrides the task prompt for page images. The fidelity rules from
    /// [`crate::prompts::FIDELITY_RULES`] are appended regardless.
    pub system_prompt: Option<String>,

    /// LLM model identifier, e.g. "gpt-4o". If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed completion backend. Takes precedence over `provider`.
    pub backend: Option<Arc<dyn CompletionBackend>>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per unit. Default: 4096.
    pub max_tokens: usize,

    /// Longest edge of a rendered page in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Units in flight at once. Default: 1 (strictly sequential).
    ///
    /// Output order follows unit order whatever this is set to.
    pub concurrency: usize,

    /// Per-call model timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Parent directory for the per-run artifact directory.
    /// Default: the system temp directory.
    pub work_dir: Option<PathBuf>,

    /// Keep rendered PNG bytes in each [`crate::output::UnitReport`].
    pub retain_page_images: bool,

    /// Optional per-unit progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            task: Task::default(),
            page_scope: None,
            system_prompt: None,
            model: None,
            provider_name: None,
            provider: None,
            backend: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_rendered_pixels: 2000,
            concurrency: 1,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            work_dir: None,
            retain_page_images: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("task", &self.task)
            .field("page_scope", &self.page_scope)
            .field("system_prompt", &self.system_prompt.as_ref().map(|p| p.len()))
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("backend", &self.backend.as_ref().map(|_| "<dyn CompletionBackend>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("concurrency", &self.concurrency)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("work_dir", &self.work_dir)
            .field("retain_page_images", &self.retain_page_images)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Page scope after applying the task default.
    pub fn effective_page_scope(&self) -> PageScope {
        self.page_scope.unwrap_or_else(|| self.task.default_page_scope())
    }

    /// Task text used for page images, before the fidelity rules.
    pub fn page_task_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or_else(|| self.task.prompt())
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn task(mut self, task: Task) -> Self {
        self.config.task = task;
        self
    }

    pub fn page_scope(mut self, scope: PageScope) -> Self {
        self.config.page_scope = Some(scope);
        self
    }

    pub fn first_page_only(mut self, v: bool) -> Self {
        self.config.page_scope = Some(if v { PageScope::FirstOnly } else { PageScope::All });
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn CompletionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn retain_page_images(mut self, v: bool) -> Self {
        self.config.retain_page_images = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if let Some(ref p) = c.system_prompt {
            if p.trim().is_empty() {
                return Err(ExtractError::InvalidConfig(
                    "System prompt override is empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// The two fixed extraction tasks.
///
/// | Task | Prompt | Default page scope |
/// |------|--------|--------------------|
/// | `FullFieldExtraction` | every non-PII field on each page | all pages |
/// | `TaxSummary` | fixed federal/state summary schema | first page |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Task {
    /// Extract every visible field from tax source documents. (default)
    #[default]
    FullFieldExtraction,
    /// Extract the fixed federal/state tax-summary schema from a projection.
    TaxSummary,
}

impl Task {
    pub fn prompt(&self) -> &'static str {
        match self {
            Task::FullFieldExtraction => FULL_FIELD_PROMPT,
            Task::TaxSummary => TAX_SUMMARY_PROMPT,
        }
    }

    pub fn default_page_scope(&self) -> PageScope {
        match self {
            Task::FullFieldExtraction => PageScope::All,
            Task::TaxSummary => PageScope::FirstOnly,
        }
    }
}

/// Which pages of a paginated document become units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageScope {
    /// Every page, in order. (default)
    #[default]
    All,
    /// Only page 1.
    FirstOnly,
}

impl PageScope {
    /// Expand the scope into 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        match self {
            PageScope::All => (0..total_pages).collect(),
            PageScope::FirstOnly => (0..total_pages.min(1)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.task, Task::FullFieldExtraction);
        assert_eq!(c.effective_page_scope(), PageScope::All);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.max_tokens, 4096);
        assert_eq!(c.page_task_prompt(), FULL_FIELD_PROMPT);
    }

    #[test]
    fn summary_task_defaults_to_first_page() {
        let c = ExtractionConfig::builder().task(Task::TaxSummary).build().unwrap();
        assert_eq!(c.effective_page_scope(), PageScope::FirstOnly);
        assert_eq!(c.page_task_prompt(), TAX_SUMMARY_PROMPT);

        let c = ExtractionConfig::builder()
            .task(Task::TaxSummary)
            .first_page_only(false)
            .build()
            .unwrap();
        assert_eq!(c.effective_page_scope(), PageScope::All);
    }

    #[test]
    fn page_scope_indices() {
        assert_eq!(PageScope::All.to_indices(3), vec![0, 1, 2]);
        assert_eq!(PageScope::FirstOnly.to_indices(3), vec![0]);
        assert_eq!(PageScope::FirstOnly.to_indices(0), Vec::<usize>::new());
        assert_eq!(PageScope::All.to_indices(0), Vec::<usize>::new());
    }

    #[test]
    fn builder_clamps_and_validates() {
        let c = ExtractionConfig::builder()
            .temperature(5.0)
            .concurrency(0)
            .max_rendered_pixels(10)
            .build()
            .unwrap();
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.max_rendered_pixels, 100);

        assert!(ExtractionConfig::builder().max_tokens(0).build().is_err());
        assert!(ExtractionConfig::builder().system_prompt("  ").build().is_err());
    }

    #[test]
    fn system_prompt_override_replaces_task_text() {
        let c = ExtractionConfig::builder()
            .system_prompt("Only extract box 1.")
            .build()
            .unwrap();
        assert_eq!(c.page_task_prompt(), "Only extract box 1.");
    }
}
