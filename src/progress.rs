//! Progress-callback trait for per-unit extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through a batch.
//!
//! Every document is decomposed before the first model call, so the total
//! unit count is known when [`ExtractionProgressCallback::on_batch_start`]
//! fires and the reported fraction `completed / total` only ever grows.
//!
//! # Example
//!
//! ```rust
//! use edgequake_fin2json::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl ExtractionProgressCallback for Printer {
//!     fn on_unit_complete(&self, key: &str, fraction: f64) {
//!         eprintln!("{key} done ({:.0}%)", fraction * 100.0);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(Printer) as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline as it processes each unit.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. With `concurrency > 1` the start events of
/// different units may interleave; completion events are still reported in
/// unit order.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once, after decomposition, before any model call.
    fn on_batch_start(&self, total_units: usize) {
        let _ = total_units;
    }

    /// Called just before the model request for a unit is sent.
    ///
    /// `index` is 1-based.
    fn on_unit_start(&self, key: &str, index: usize, total_units: usize) {
        let _ = (key, index, total_units);
    }

    /// Called when a unit produced parsed JSON.
    ///
    /// `fraction` is `completed_units / total_units` including this unit.
    fn on_unit_complete(&self, key: &str, fraction: f64) {
        let _ = (key, fraction);
    }

    /// Called when a unit failed (transport or parse error).
    fn on_unit_error(&self, key: &str, fraction: f64, error: &str) {
        let _ = (key, fraction, error);
    }

    /// Called when a whole document could not be decomposed.
    fn on_document_error(&self, file: usize, error: &str) {
        let _ = (file, error);
    }

    /// Called once after every unit has been attempted.
    fn on_batch_complete(&self, total_units: usize, success_count: usize) {
        let _ = (total_units, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
