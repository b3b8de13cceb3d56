//! Output types returned by the extraction pipeline.

use crate::error::UnitError;
use crate::value::FieldValue;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::path::PathBuf;

/// Where a result came from.
///
/// `file` is the 1-based position of the document in the submitted batch;
/// `page` is the 1-based page number within a paginated document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    Page { file: usize, page: usize },
    File { file: usize },
}

impl Origin {
    /// The stable compiled-output key for this origin.
    pub fn key(&self) -> String {
        match self {
            Origin::Page { page, .. } => format!("pdf_page_{page}"),
            Origin::File { file } => format!("excel_file_{file}"),
        }
    }

    /// Key for the pages of any PDF after the first one in a batch.
    pub(crate) fn qualified_key(&self) -> String {
        match self {
            Origin::Page { file, page } => format!("pdf_file_{file}_page_{page}"),
            Origin::File { file } => format!("excel_file_{file}"),
        }
    }
}

/// Contract violations found in a parsed response.
///
/// The audit never changes the extracted values; it only reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAudit {
    /// Paths whose value is JSON `null` (blank fields must be `""`).
    pub null_fields: Vec<String>,
    /// Paths whose value is a string that looks like a number.
    pub numeric_strings: Vec<String>,
}

impl FieldAudit {
    pub fn is_clean(&self) -> bool {
        self.null_fields.is_empty() && self.numeric_strings.is_empty()
    }
}

/// Outcome of one extraction unit.
///
/// Exactly one of `fields` / `error` is set.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub origin: Origin,
    pub fields: Option<FieldValue>,
    pub error: Option<UnitError>,
    pub audit: FieldAudit,
    /// Rendered page image backing this unit, while the run's artifacts live.
    pub image_path: Option<PathBuf>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

impl ExtractionResult {
    pub fn success(origin: Origin, fields: FieldValue, audit: FieldAudit) -> Self {
        Self {
            origin,
            fields: Some(fields),
            error: None,
            audit,
            image_path: None,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
        }
    }

    pub fn failure(origin: Origin, error: UnitError) -> Self {
        Self {
            origin,
            fields: None,
            error: Some(error),
            audit: FieldAudit::default(),
            image_path: None,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The merged result of a batch: origin key → extracted mapping or `null`.
///
/// Keys are in arrival order and unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledOutput {
    entries: Vec<(String, Option<FieldValue>)>,
}

impl CompiledOutput {
    pub(crate) fn push(&mut self, key: String, value: Option<FieldValue>) {
        self.entries.push((key, value));
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// `None` if the key is absent, `Some(None)` if the unit failed.
    pub fn get(&self, key: &str) -> Option<Option<&FieldValue>> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&FieldValue>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical export form: two-space indented JSON.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for CompiledOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Per-unit view for display: the page image (if any) next to its data.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub key: String,
    pub origin: Origin,
    pub fields: Option<FieldValue>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub audit: FieldAudit,
    /// Path of the rendered page while the batch was running. The file is
    /// removed during cleanup, so the path is never serialised; use
    /// `image_png` to display the page afterwards.
    #[serde(skip)]
    pub image_path: Option<PathBuf>,
    /// PNG bytes of the rendered page, when `retain_page_images` is set.
    #[serde(skip)]
    pub image_png: Option<Vec<u8>>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

/// A document that could not be decomposed into units.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentFailure {
    pub file: usize,
    pub name: String,
    pub error: UnitError,
}

/// Aggregate statistics for a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_documents: usize,
    pub failed_documents: usize,
    pub total_units: usize,
    pub succeeded_units: usize,
    pub failed_units: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
    pub decompose_duration_ms: u64,
    pub llm_duration_ms: u64,
}

/// Everything a batch run produces.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutput {
    pub compiled: CompiledOutput,
    pub units: Vec<UnitReport>,
    pub document_failures: Vec<DocumentFailure>,
    pub stats: BatchStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn origin_keys() {
        assert_eq!(Origin::Page { file: 1, page: 3 }.key(), "pdf_page_3");
        assert_eq!(Origin::File { file: 2 }.key(), "excel_file_2");
        assert_eq!(
            Origin::Page { file: 2, page: 1 }.qualified_key(),
            "pdf_file_2_page_1"
        );
    }

    #[test]
    fn compiled_output_serialises_nulls_in_order() {
        let mut out = CompiledOutput::default();
        out.push("pdf_page_1".into(), Some(FieldValue::from(json!({"a": 1}))));
        out.push("pdf_page_2".into(), None);
        let text = out.to_json_pretty().unwrap();
        assert_eq!(
            text,
            "{\n  \"pdf_page_1\": {\n    \"a\": 1\n  },\n  \"pdf_page_2\": null\n}"
        );
        assert_eq!(out.get("pdf_page_2"), Some(None));
        assert_eq!(out.get("pdf_page_9"), None);
    }

    #[test]
    fn unit_report_json_omits_artifact_paths() {
        let report = UnitReport {
            key: "pdf_page_1".into(),
            origin: Origin::Page { file: 1, page: 1 },
            fields: Some(FieldValue::from(json!({"box_1": 12.5}))),
            error: None,
            error_kind: None,
            audit: FieldAudit::default(),
            image_path: Some(PathBuf::from("/tmp/run/page-1.png")),
            image_png: Some(vec![0x89, b'P', b'N', b'G']),
            input_tokens: 1,
            output_tokens: 1,
            duration_ms: 5,
        };
        let v = serde_json::to_value(&report).unwrap();
        assert!(v.get("image_path").is_none());
        assert!(v.get("image_png").is_none());
        assert_eq!(v["fields"]["box_1"], json!(12.5));
    }

    #[test]
    fn origin_serialises_tagged() {
        let v = serde_json::to_value(Origin::Page { file: 1, page: 2 }).unwrap();
        assert_eq!(v, json!({"kind": "page", "file": 1, "page": 2}));
    }
}
