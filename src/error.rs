//! Error types for the edgequake-fin2json library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`] — **Fatal**: the batch cannot proceed at all (working
//!   storage could not be created, provider not configured, unreadable input
//!   path). Returned as `Err(ExtractError)` from the top-level `extract*`
//!   functions.
//!
//! * [`UnitError`] — **Non-fatal**: one document could not be decomposed, or
//!   one unit's model call failed or returned something that is not JSON. It
//!   is stored inside [`crate::output::ExtractionResult`] and the batch moves
//!   on to the next unit.

use crate::output::Origin;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-fin2json library.
///
/// Unit-level failures use [`UnitError`] and are stored in
/// [`crate::output::ExtractionResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input is neither a PDF nor a supported spreadsheet.
    #[error("Unsupported document '{input}': expected .pdf, .xlsx, .xls, .xlsm, .xlsb or .ods")]
    UnsupportedDocument { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The batch contained no documents.
    #[error("Nothing to extract: the batch is empty")]
    EmptyBatch,

    // ── Working storage ───────────────────────────────────────────────────
    /// The per-run artifact directory could not be created or written.
    #[error("Failed to prepare working storage under '{path}': {source}")]
    WorkspaceSetup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the compiled JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single document or unit.
///
/// The compiled output still carries a key (with a `null` value) for every
/// unit that failed this way.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum UnitError {
    /// The document could not be decomposed into pages or rows.
    #[error("File {file}: cannot be decomposed: {detail}")]
    DocumentFormat { file: usize, detail: String },

    /// The model-service call could not complete (network, provider, timeout).
    #[error("{}: model call failed: {detail}", origin.key())]
    Transport { origin: Origin, detail: String },

    /// The model answered, but the answer is not valid JSON.
    #[error("{}: response is not valid JSON ({detail} at line {line}, column {column})", origin.key())]
    ResponseParse {
        origin: Origin,
        detail: String,
        line: usize,
        column: usize,
    },

    /// A rendered page artifact could not be read back for transmission.
    #[error("{}: page image unavailable: {detail}", origin.key())]
    ArtifactUnavailable { origin: Origin, detail: String },
}

impl UnitError {
    /// Short label for the error class, used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            UnitError::DocumentFormat { .. } => "DocumentFormatError",
            UnitError::Transport { .. } => "TransportError",
            UnitError::ResponseParse { .. } => "ResponseParseError",
            UnitError::ArtifactUnavailable { .. } => "ArtifactUnavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parse_display_names_origin() {
        let e = UnitError::ResponseParse {
            origin: Origin::Page { file: 1, page: 3 },
            detail: "expected value".into(),
            line: 1,
            column: 1,
        };
        let msg = e.to_string();
        assert!(msg.contains("pdf_page_3"), "got: {msg}");
        assert!(msg.contains("expected value"), "got: {msg}");
        assert_eq!(e.kind(), "ResponseParseError");
    }

    #[test]
    fn transport_display_for_spreadsheet() {
        let e = UnitError::Transport {
            origin: Origin::File { file: 2 },
            detail: "connection reset".into(),
        };
        assert!(e.to_string().contains("excel_file_2"));
        assert!(e.to_string().contains("connection reset"));
    }

    #[test]
    fn document_format_display() {
        let e = UnitError::DocumentFormat {
            file: 4,
            detail: "missing %PDF header".into(),
        };
        assert!(e.to_string().contains("File 4"));
        assert_eq!(e.kind(), "DocumentFormatError");
    }

    #[test]
    fn workspace_setup_display() {
        let e = ExtractError::WorkspaceSetup {
            path: PathBuf::from("/nope"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(e.to_string().contains("/nope"));
    }
}
