//! # edgequake-fin2json
//!
//! Extract structured JSON from tax and financial documents (PDFs and
//! spreadsheets) using Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Tax forms pack dozens of small labelled boxes into one page, and a
//! text-layer extractor loses which number sat next to which label. This
//! crate rasterises each page and lets a VLM read it as a person would,
//! returning every visible field as JSON. Spreadsheets are sent as a text
//! table. Numbers come back exactly as the model emitted them: the prompt
//! carries the sign, blank-field and number-type rules, and the parser
//! never rewrites values.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Documents (PDF / xlsx / xls / ods)
//!  │
//!  ├─ 1. Workspace  scoped artifact directory, removed on every exit path
//!  ├─ 2. Render     PDF pages → PNG via pdfium (spawn_blocking)
//!  ├─ 3. Tabular    first worksheet → pipe table via calamine
//!  ├─ 4. VLM        one call per unit, prompt + page image or table text
//!  ├─ 5. Parse      strict JSON parse, report-only field audit
//!  └─ 6. Compile    pdf_page_<n> / excel_file_<n> → fields or null
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_fin2json::{extract_inputs, ExtractionConfig, Task};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::builder().task(Task::FullFieldExtraction).build()?;
//!     let output = extract_inputs(&["1099-INT.pdf", "ledger.xlsx"], &config).await?;
//!     println!("{}", output.compiled.to_json_pretty()?);
//!     eprintln!("{}/{} units extracted",
//!         output.stats.succeeded_units,
//!         output.stats.total_units);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `fin2json` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-fin2json = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod value;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageScope, Task, DEFAULT_MODEL};
pub use document::{load_input, Document, DocumentKind};
pub use error::{ExtractError, UnitError};
pub use extract::{extract, extract_inputs, extract_sync, extract_to_file, write_compiled, Pipeline};
pub use output::{
    BatchOutput, BatchStats, CompiledOutput, DocumentFailure, ExtractionResult, FieldAudit,
    Origin, UnitReport,
};
pub use pipeline::llm::{Completion, CompletionBackend, ModelRequest};
pub use pipeline::render::{RasterBackend, RenderedPdf};
pub use pipeline::tabular::{Table, WorkbookReader};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use value::FieldValue;
