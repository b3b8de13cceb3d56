//! Uploaded documents and input resolution.
//!
//! A [`Document`] is one artifact in a batch: its position, its declared
//! kind, and its raw bytes. Library callers that already hold bytes (an
//! upload handler, a database blob) build documents directly; the CLI goes
//! through [`load_input`], which accepts local paths and HTTP(S) URLs.

use crate::error::ExtractError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How a document is decomposed into units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// PDF: one unit per retained page.
    Paginated,
    /// Spreadsheet: one unit per file.
    Tabular,
}

impl DocumentKind {
    /// Classify by declared MIME type. Anything that is not a PDF is
    /// treated as a spreadsheet.
    pub fn from_mime(mime: &str) -> Self {
        if mime.trim().eq_ignore_ascii_case("application/pdf") {
            DocumentKind::Paginated
        } else {
            DocumentKind::Tabular
        }
    }

    /// Classify by file extension. `None` for unsupported extensions.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Paginated),
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => Some(DocumentKind::Tabular),
            _ => None,
        }
    }
}

/// One uploaded artifact.
#[derive(Debug, Clone)]
pub struct Document {
    /// Display name (usually the original file name).
    pub name: String,
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, kind: DocumentKind, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            kind,
            bytes,
        }
    }

    pub fn pdf(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(name, DocumentKind::Paginated, bytes)
    }

    pub fn spreadsheet(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(name, DocumentKind::Tabular, bytes)
    }

    /// Extension used for the temporary copy in working storage.
    pub(crate) fn temp_extension(&self) -> &str {
        match self.kind {
            DocumentKind::Paginated => "pdf",
            DocumentKind::Tabular => Path::new(&self.name)
                .extension()
                .and_then(|e| e.to_str())
                .filter(|e| {
                    DocumentKind::from_path(Path::new(&format!("x.{e}")))
                        == Some(DocumentKind::Tabular)
                })
                .unwrap_or("xlsx"),
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a local path or URL into a [`Document`].
pub async fn load_input(input: &str, timeout_secs: u64) -> Result<Document, ExtractError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        load_local(input).await
    }
}

async fn load_local(path_str: &str) -> Result<Document, ExtractError> {
    let path = PathBuf::from(path_str);
    let kind = DocumentKind::from_path(&path).ok_or_else(|| ExtractError::UnsupportedDocument {
        input: path_str.to_string(),
    })?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ExtractError::PermissionDenied { path: path.clone() },
        _ => ExtractError::FileNotFound { path: path.clone() },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_str.to_string());
    debug!("Loaded {} ({} bytes, {:?})", name, bytes.len(), kind);

    Ok(Document::new(name, kind, bytes))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Document, ExtractError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ExtractError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").to_string());

    let name = filename_from_url(url);
    let kind = DocumentKind::from_path(Path::new(&name))
        .or_else(|| content_type.as_deref().map(DocumentKind::from_mime))
        .ok_or_else(|| ExtractError::UnsupportedDocument {
            input: url.to_string(),
        })?;

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} ({} bytes)", name, bytes.len());
    Ok(Document::new(name, kind, bytes.to_vec()))
}

/// Last path segment of the URL, or a generic name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/w2.pdf"));
        assert!(is_url("http://example.com/w2.pdf"));
        assert!(!is_url("/tmp/w2.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn classify_by_mime() {
        assert_eq!(DocumentKind::from_mime("application/pdf"), DocumentKind::Paginated);
        assert_eq!(
            DocumentKind::from_mime(
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            ),
            DocumentKind::Tabular
        );
        assert_eq!(DocumentKind::from_mime("application/vnd.ms-excel"), DocumentKind::Tabular);
    }

    #[test]
    fn classify_by_extension() {
        assert_eq!(
            DocumentKind::from_path(Path::new("1099-INT.PDF")),
            Some(DocumentKind::Paginated)
        );
        assert_eq!(
            DocumentKind::from_path(Path::new("ledger.xls")),
            Some(DocumentKind::Tabular)
        );
        assert_eq!(DocumentKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(DocumentKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn filename_from_url_uses_last_segment() {
        assert_eq!(filename_from_url("https://x.test/a/b/form.pdf"), "form.pdf");
        assert_eq!(filename_from_url("https://x.test/a/b/"), "downloaded");
    }

    #[test]
    fn temp_extension_follows_kind() {
        assert_eq!(Document::pdf("scan", vec![]).temp_extension(), "pdf");
        assert_eq!(Document::spreadsheet("old.xls", vec![]).temp_extension(), "xls");
        assert_eq!(Document::spreadsheet("upload", vec![]).temp_extension(), "xlsx");
    }

    #[tokio::test]
    async fn load_local_missing_file() {
        let err = load_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, ExtractError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn load_local_rejects_unknown_extension() {
        let err = load_input("/tmp/readme.md", 5).await.unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedDocument { .. }));
    }

    #[tokio::test]
    async fn load_local_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("return.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();
        let doc = load_input(path.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(doc.name, "return.pdf");
        assert_eq!(doc.kind, DocumentKind::Paginated);
        assert_eq!(doc.bytes, b"%PDF-1.7");
    }
}
