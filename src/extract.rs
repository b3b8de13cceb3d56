//! Batch extraction entry points.
//!
//! A run happens in two phases. First every document is decomposed into
//! units (rendered pages, serialised tables) inside one [`ArtifactDir`].
//! Then the units go to the model in submission order. Splitting the phases
//! means the unit total is known before the first call, so progress is a
//! plain `completed / total` that only grows.
//!
//! Everything written during a run lives in the artifact directory, which is
//! owned by [`Pipeline::run`] and dropped on every return path.

use crate::config::ExtractionConfig;
use crate::document::{load_input, Document, DocumentKind};
use crate::error::{ExtractError, UnitError};
use crate::output::{
    BatchOutput, BatchStats, DocumentFailure, ExtractionResult, Origin, UnitReport,
};
use crate::pipeline::aggregate::{aggregate, assign_keys};
use crate::pipeline::llm::{CompletionBackend, ExtractionClient, ExtractionUnit, ProviderBackend, UnitPayload};
use crate::pipeline::render::{PageRenderer, PdfiumBackend, RasterBackend};
use crate::pipeline::tabular::{normalize, CalamineReader, WorkbookReader};
use crate::pipeline::workspace::ArtifactDir;
use crate::prompts::{page_prompt, tabular_prompt};
use edgequake_llm::{LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A unit waiting for the model, or a slot already resolved as failed.
enum Planned {
    Unit(ExtractionUnit),
    Failed(ExtractionResult),
}

impl Planned {
    fn origin(&self) -> Origin {
        match self {
            Planned::Unit(u) => u.origin,
            Planned::Failed(r) => r.origin,
        }
    }
}

/// The orchestrator: decomposes documents, runs units, compiles the output.
///
/// Built once per configuration and reusable across batches; each
/// [`Pipeline::run`] gets its own artifact directory.
pub struct Pipeline {
    config: ExtractionConfig,
    client: ExtractionClient,
    renderer: PageRenderer,
    reader: Arc<dyn WorkbookReader>,
}

impl Pipeline {
    /// Production wiring: pdfium, calamine and the resolved model backend.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        let backend = resolve_backend(config)?;
        Ok(Self::with_parts(
            config,
            backend,
            Arc::new(PdfiumBackend),
            Arc::new(CalamineReader),
        ))
    }

    /// Wire the pipeline from explicit parts.
    pub fn with_parts(
        config: &ExtractionConfig,
        backend: Arc<dyn CompletionBackend>,
        raster: Arc<dyn RasterBackend>,
        reader: Arc<dyn WorkbookReader>,
    ) -> Self {
        Self {
            client: ExtractionClient::new(backend, config),
            renderer: PageRenderer::new(raster, config.max_rendered_pixels),
            reader,
            config: config.clone(),
        }
    }

    /// Run one batch.
    ///
    /// # Returns
    /// `Ok(BatchOutput)` even if every unit failed; check
    /// `output.stats.failed_units` and `output.document_failures`.
    ///
    /// # Errors
    /// Only fatal errors: an empty batch, or working storage that cannot be
    /// created, written or removed.
    pub async fn run(&self, documents: &[Document]) -> Result<BatchOutput, ExtractError> {
        let total_start = Instant::now();
        if documents.is_empty() {
            return Err(ExtractError::EmptyBatch);
        }
        info!("Starting batch: {} documents", documents.len());

        let artifacts = ArtifactDir::create(self.config.work_dir.as_deref())?;
        let cb = self.config.progress_callback.as_ref();

        // ── Step 1: Decompose every document into units ──────────────────
        let decompose_start = Instant::now();
        let mut plan: Vec<Planned> = Vec::new();
        let mut document_failures = Vec::new();

        for (i, doc) in documents.iter().enumerate() {
            let file = i + 1;
            match self.decompose(file, doc, &artifacts).await? {
                Ok(units) => {
                    debug!("File {} ({}): {} units", file, doc.name, units.len());
                    plan.extend(units.into_iter().map(Planned::Unit));
                }
                Err(e) => {
                    warn!("{}", e);
                    if let Some(cb) = cb {
                        cb.on_document_error(file, &e.to_string());
                    }
                    // A spreadsheet is a unit in its own right and keeps its key.
                    if doc.kind == DocumentKind::Tabular {
                        plan.push(Planned::Failed(ExtractionResult::failure(
                            Origin::File { file },
                            e.clone(),
                        )));
                    }
                    document_failures.push(DocumentFailure {
                        file,
                        name: doc.name.clone(),
                        error: e,
                    });
                }
            }
        }
        let decompose_duration_ms = decompose_start.elapsed().as_millis() as u64;
        let total_units = plan.len();
        info!(
            "Decomposed {} documents into {} units in {}ms",
            documents.len(),
            total_units,
            decompose_duration_ms
        );

        if let Some(cb) = cb {
            cb.on_batch_start(total_units);
        }

        // Keys depend only on the plan, so progress events can use them too.
        let origins: Vec<Origin> = plan.iter().map(Planned::origin).collect();
        let keys = assign_keys(&origins);

        // ── Step 2: Extract, in unit order ───────────────────────────────
        let llm_start = Instant::now();
        let results = self.extract_units(&plan, &keys).await;
        let llm_duration_ms = llm_start.elapsed().as_millis() as u64;

        // ── Step 3: Per-unit reports ─────────────────────────────────────
        let mut units = Vec::with_capacity(results.len());
        for (key, r) in keys.into_iter().zip(&results) {
            units.push(self.report(key, r).await);
        }

        // ── Step 4: Compile and count ────────────────────────────────────
        let compiled = aggregate(&results);
        let succeeded = results.iter().filter(|r| r.is_success()).count();

        if let Some(cb) = cb {
            cb.on_batch_complete(total_units, succeeded);
        }

        // ── Step 5: Cleanup ──────────────────────────────────────────────
        artifacts.close()?;

        let stats = BatchStats {
            total_documents: documents.len(),
            failed_documents: document_failures.len(),
            total_units,
            succeeded_units: succeeded,
            failed_units: total_units - succeeded,
            total_input_tokens: results.iter().map(|r| r.input_tokens as u64).sum(),
            total_output_tokens: results.iter().map(|r| r.output_tokens as u64).sum(),
            total_duration_ms: total_start.elapsed().as_millis() as u64,
            decompose_duration_ms,
            llm_duration_ms,
        };

        info!(
            "Batch complete: {}/{} units, {} document failures, {}ms total",
            succeeded, total_units, stats.failed_documents, stats.total_duration_ms
        );

        Ok(BatchOutput {
            compiled,
            units,
            document_failures,
            stats,
        })
    }

    /// Turn one document into units.
    ///
    /// The outer `Result` is fatal; the inner one is a per-document
    /// [`UnitError::DocumentFormat`].
    async fn decompose(
        &self,
        file: usize,
        doc: &Document,
        artifacts: &ArtifactDir,
    ) -> Result<Result<Vec<ExtractionUnit>, UnitError>, ExtractError> {
        let copy = artifacts
            .write_document_copy(file, doc.temp_extension(), &doc.bytes)
            .await?;

        match doc.kind {
            DocumentKind::Paginated => {
                let scope = self.config.effective_page_scope();
                let pages = match self.renderer.render(file, &copy, scope, artifacts).await? {
                    Ok(pages) => pages,
                    Err(e) => return Ok(Err(e)),
                };
                if pages.is_empty() {
                    warn!("File {} ({}): no pages to extract", file, doc.name);
                }
                let prompt = page_prompt(self.config.page_task_prompt());
                Ok(Ok(pages
                    .into_iter()
                    .map(|p| ExtractionUnit {
                        origin: Origin::Page { file, page: p.page },
                        prompt: prompt.clone(),
                        payload: UnitPayload::PageImage(p.path),
                    })
                    .collect()))
            }
            DocumentKind::Tabular => {
                let reader = Arc::clone(&self.reader);
                let table = tokio::task::spawn_blocking(move || reader.read_table(&copy))
                    .await
                    .map_err(|e| ExtractError::Internal(format!("Spreadsheet task panicked: {}", e)))?;
                let table = match table {
                    Ok(t) => t,
                    Err(detail) => return Ok(Err(UnitError::DocumentFormat { file, detail })),
                };
                debug!(
                    "File {}: {} columns, {} rows",
                    file,
                    table.columns.len(),
                    table.rows.len()
                );
                Ok(Ok(vec![ExtractionUnit {
                    origin: Origin::File { file },
                    prompt: tabular_prompt(&normalize(&table)),
                    payload: UnitPayload::Table,
                }]))
            }
        }
    }

    /// Send every planned unit to the model, `concurrency` at a time.
    ///
    /// `buffered` yields in input order, so results (and the progress
    /// events fired here) follow unit order whatever finishes first.
    async fn extract_units(&self, plan: &[Planned], keys: &[String]) -> Vec<ExtractionResult> {
        let total = plan.len();
        let cb = self.config.progress_callback.as_ref();

        // Built eagerly so the stream holds plain futures, not a borrowing closure.
        let pending: Vec<_> = plan
            .iter()
            .enumerate()
            .map(|(i, planned)| self.run_planned(i, planned, &keys[i], total))
            .collect();
        let mut in_order = stream::iter(pending).buffered(self.config.concurrency.max(1));

        let mut results = Vec::with_capacity(total);
        while let Some(result) = in_order.next().await {
            let fraction = (results.len() + 1) as f64 / total as f64;
            if let Some(cb) = cb {
                let key = &keys[results.len()];
                match &result.error {
                    None => cb.on_unit_complete(key, fraction),
                    Some(e) => cb.on_unit_error(key, fraction, &e.to_string()),
                }
            }
            results.push(result);
        }
        results
    }

    /// One slot of the plan: call the model, or hand back the known failure.
    async fn run_planned(
        &self,
        i: usize,
        planned: &Planned,
        key: &str,
        total: usize,
    ) -> ExtractionResult {
        match planned {
            Planned::Unit(unit) => {
                if let Some(cb) = self.config.progress_callback.as_ref() {
                    cb.on_unit_start(key, i + 1, total);
                }
                self.client.extract(unit).await
            }
            Planned::Failed(r) => r.clone(),
        }
    }

    async fn report(&self, key: String, r: &ExtractionResult) -> UnitReport {
        let image_png = match (&r.image_path, self.config.retain_page_images) {
            (Some(path), true) => match tokio::fs::read(path).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    debug!("{}: page image not retained: {}", key, e);
                    None
                }
            },
            _ => None,
        };
        UnitReport {
            key,
            origin: r.origin,
            fields: r.fields.clone(),
            error: r.error.as_ref().map(|e| e.to_string()),
            error_kind: r.error.as_ref().map(|e| e.kind().to_string()),
            audit: r.audit.clone(),
            image_path: r.image_path.clone(),
            image_png,
            input_tokens: r.input_tokens,
            output_tokens: r.output_tokens,
            duration_ms: r.duration_ms,
        }
    }
}

/// Extract a batch of in-memory documents.
///
/// This is the primary entry point for the library.
///
/// # Example
/// ```rust,no_run
/// use edgequake_fin2json::{extract, Document, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let docs = vec![Document::pdf("w2.pdf", std::fs::read("w2.pdf")?)];
/// let output = extract(&docs, &ExtractionConfig::default()).await?;
/// println!("{}", output.compiled.to_json_pretty()?);
/// # Ok(())
/// # }
/// ```
pub async fn extract(
    documents: &[Document],
    config: &ExtractionConfig,
) -> Result<BatchOutput, ExtractError> {
    Pipeline::from_config(config)?.run(documents).await
}

/// Load local paths or HTTP(S) URLs, then extract them as one batch.
///
/// An input that cannot be loaded is fatal, before any model call is made.
pub async fn extract_inputs<S: AsRef<str>>(
    inputs: &[S],
    config: &ExtractionConfig,
) -> Result<BatchOutput, ExtractError> {
    let mut documents = Vec::with_capacity(inputs.len());
    for input in inputs {
        documents.push(load_input(input.as_ref(), config.download_timeout_secs).await?);
    }
    extract(&documents, config).await
}

/// Extract a batch and write the compiled JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    documents: &[Document],
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<BatchStats, ExtractError> {
    let output = extract(documents, config).await?;
    write_compiled(&output, output_path.as_ref()).await?;
    Ok(output.stats)
}

/// Atomically write `output.compiled` as two-space-indented JSON.
pub async fn write_compiled(output: &BatchOutput, path: &Path) -> Result<(), ExtractError> {
    let write_err = |e: std::io::Error| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let json = output
        .compiled
        .to_json_pretty()
        .map_err(|e| ExtractError::Internal(format!("JSON serialisation failed: {}", e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    documents: &[Document],
    config: &ExtractionConfig,
) -> Result<BatchOutput, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(documents, config))
}

// ── Backend resolution ───────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the completion backend, from most-specific to least-specific:
///
/// 1. `config.backend` as-is.
/// 2. `config.provider`, wrapped in a [`ProviderBackend`].
/// 3. `config.provider_name` + `config.model` (default [`crate::config::DEFAULT_MODEL`]).
/// 4. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set.
/// 5. OpenAI, when `OPENAI_API_KEY` is set.
/// 6. [`ProviderFactory::from_env`] auto-detection.
pub fn resolve_backend(config: &ExtractionConfig) -> Result<Arc<dyn CompletionBackend>, ExtractError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(ProviderBackend::new(provider)))
}

fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, ExtractError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config
        .model
        .as_deref()
        .unwrap_or(crate::config::DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        info!("Using provider '{}' with model '{}'", name, model);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            info!("Using provider '{}' with model '{}' from environment", prov, env_model);
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            info!("Using provider 'openai' with model '{}'", model);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
