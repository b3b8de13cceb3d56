//! Result aggregation: per-unit results → one [`CompiledOutput`].
//!
//! Keys come from the origin (`pdf_page_<n>`, `excel_file_<n>`) and are
//! inserted in the order results were produced. A failed unit still gets
//! its key, with a `null` value, so the key set is a full record of what
//! was attempted.
//!
//! Page numbers restart in every PDF, so two PDFs in one batch both have a
//! page 1. The first PDF with pages owns the plain `pdf_page_<n>` keys; every
//! page of any later PDF is keyed `pdf_file_<f>_page_<n>`. The choice is made
//! per document, never per page, so one PDF's pages always share a form.

use crate::output::{CompiledOutput, ExtractionResult, Origin};
use tracing::debug;

/// Compiled-output key for each origin, in order. Keys are unique.
pub fn assign_keys(origins: &[Origin]) -> Vec<String> {
    let owner = origins.iter().find_map(|o| match o {
        Origin::Page { file, .. } => Some(*file),
        Origin::File { .. } => None,
    });
    origins
        .iter()
        .map(|origin| match origin {
            Origin::Page { file, .. } if Some(*file) != owner => {
                let key = origin.qualified_key();
                debug!("File {} shares page numbers with file {:?}; using {}", file, owner, key);
                key
            }
            _ => origin.key(),
        })
        .collect()
}

/// Merge results into the compiled mapping.
pub fn aggregate(results: &[ExtractionResult]) -> CompiledOutput {
    let origins: Vec<Origin> = results.iter().map(|r| r.origin).collect();
    let mut out = CompiledOutput::default();
    for (key, result) in assign_keys(&origins).into_iter().zip(results) {
        out.push(key, result.fields.clone());
    }
    out
}
