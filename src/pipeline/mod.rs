//! Pipeline stages for document-to-JSON extraction.
//!
//! Each submodule implements one step. The orchestrator in
//! [`crate::extract`] wires them together for a batch.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌─▶ render (pdfium) ──▶ encode (png/base64) ─┐
//! workspace ─┤                                            ├─▶ llm ──▶ parse ──▶ aggregate
//!            └─▶ tabular (calamine) ──────────────────────┘
//! ```
//!
//! 1. [`workspace`] — scoped artifact directory; removed on every exit path
//! 2. [`render`]    — rasterise the selected pages of a PDF into PNG files;
//!    runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`tabular`]   — read the first worksheet and serialise it as text
//! 4. [`encode`]    — PNG-encode pages and base64-wrap them for the request
//! 5. [`llm`]       — one model call per unit; the only stage with network I/O
//! 6. [`parse`]     — strict JSON parse plus a report-only field audit
//! 7. [`aggregate`] — merge per-unit results into the keyed compiled output

pub mod aggregate;
pub mod encode;
pub mod llm;
pub mod parse;
pub mod render;
pub mod tabular;
pub mod workspace;
