//! PDF rasterisation: turn a paginated document into PNG page artifacts.
//!
//! pdfium keeps thread-local state and blocks for the whole render, so the
//! backend runs inside `tokio::task::spawn_blocking`. Output size is capped
//! by `max_rendered_pixels` on the longest edge rather than by DPI: a
//! letter-size form at the default 2000 px keeps box labels legible, and an
//! oversized page cannot blow up memory.
//!
//! The rasteriser itself sits behind [`RasterBackend`]. Everything around it
//! is shared by every backend: the `%PDF` magic check, page scope, PNG
//! artifacts with unique names, and removal of partial output on failure.

use crate::config::PageScope;
use crate::error::{ExtractError, UnitError};
use crate::pipeline::encode::encode_png;
use crate::pipeline::workspace::ArtifactDir;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pages rendered from one PDF, plus the document's total page count.
#[derive(Debug, Clone)]
pub struct RenderedPdf {
    pub page_count: usize,
    /// 0-indexed page number and image, for the pages selected by scope.
    pub pages: Vec<(usize, DynamicImage)>,
}

/// A rasterisation engine.
///
/// Called once per PDF from `spawn_blocking`: the backend opens the document
/// a single time, reads its page count and renders the pages `scope`
/// selects. Errors are plain strings; the caller wraps them as
/// [`UnitError::DocumentFormat`].
pub trait RasterBackend: Send + Sync {
    fn render_pages(
        &self,
        pdf_path: &Path,
        scope: PageScope,
        max_pixels: u32,
    ) -> Result<RenderedPdf, String>;
}

/// [`RasterBackend`] backed by the pdfium library.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumBackend;

impl PdfiumBackend {
    /// Bind the pdfium shared library: `PDFIUM_LIB_PATH` if set, then the
    /// system library path, then the working directory.
    fn bind() -> Result<Pdfium, String> {
        let bindings = match std::env::var("PDFIUM_LIB_PATH") {
            Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path)
                .map_err(|e| format!("cannot load pdfium from {path}: {e:?}"))?,
            _ => Pdfium::bind_to_system_library()
                .or_else(|_| {
                    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                })
                .map_err(|e| format!("pdfium library not found (set PDFIUM_LIB_PATH): {e:?}"))?,
        };
        Ok(Pdfium::new(bindings))
    }

    fn open<'a>(pdfium: &'a Pdfium, pdf_path: &Path) -> Result<PdfDocument<'a>, String> {
        pdfium.load_pdf_from_file(pdf_path, None).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                "document is password-protected".to_string()
            } else {
                format!("corrupt PDF: {err_str}")
            }
        })
    }
}

impl RasterBackend for PdfiumBackend {
    fn render_pages(
        &self,
        pdf_path: &Path,
        scope: PageScope,
        max_pixels: u32,
    ) -> Result<RenderedPdf, String> {
        let pdfium = Self::bind()?;
        let document = Self::open(&pdfium, pdf_path)?;
        let pages = document.pages();
        let page_count = pages.len() as usize;
        let indices = scope.to_indices(page_count);
        info!("PDF loaded: {} pages, rendering {}", page_count, indices.len());

        let render_config = PdfRenderConfig::new()
            .set_target_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let mut rendered = Vec::with_capacity(indices.len());
        for idx in indices {
            let page = pages
                .get(idx as u16)
                .map_err(|e| format!("page {}: {:?}", idx + 1, e))?;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| format!("page {}: rasterisation failed: {:?}", idx + 1, e))?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            rendered.push((idx, image));
        }
        Ok(RenderedPdf {
            page_count,
            pages: rendered,
        })
    }
}

/// One rendered page, materialised as a PNG file in the artifact directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based position of the owning document in the batch.
    pub file: usize,
    /// 1-based page number.
    pub page: usize,
    pub path: PathBuf,
}

/// Decomposes PDFs into [`PageImage`] artifacts.
#[derive(Clone)]
pub struct PageRenderer {
    backend: Arc<dyn RasterBackend>,
    max_pixels: u32,
}

impl PageRenderer {
    pub fn new(backend: Arc<dyn RasterBackend>, max_pixels: u32) -> Self {
        Self {
            backend,
            max_pixels,
        }
    }

    /// Render the pages of `pdf_path` selected by `scope` into `artifacts`.
    ///
    /// Returns pages in ascending order. The outer `Result` is fatal
    /// (task panicked); the inner one is a per-document failure, in which
    /// case any PNGs written for this document have already been removed.
    pub async fn render(
        &self,
        file: usize,
        pdf_path: &Path,
        scope: PageScope,
        artifacts: &ArtifactDir,
    ) -> Result<Result<Vec<PageImage>, UnitError>, ExtractError> {
        if let Err(detail) = check_pdf_magic(pdf_path).await {
            return Ok(Err(UnitError::DocumentFormat { file, detail }));
        }

        let backend = Arc::clone(&self.backend);
        let path = pdf_path.to_path_buf();
        let max_pixels = self.max_pixels;
        let rendered = tokio::task::spawn_blocking(move || {
            backend.render_pages(&path, scope, max_pixels)
        })
        .await
        .map_err(|e| ExtractError::Internal(format!("Render task panicked: {}", e)))?;

        let mut rendered = match rendered {
            Ok(r) => {
                debug!("File {}: {} of {} pages rendered", file, r.pages.len(), r.page_count);
                r.pages
            }
            Err(detail) => return Ok(Err(UnitError::DocumentFormat { file, detail })),
        };
        rendered.sort_by_key(|(idx, _)| *idx);

        let mut pages = Vec::with_capacity(rendered.len());
        for (idx, image) in rendered {
            match write_page(artifacts, &image).await {
                Ok(path) => pages.push(PageImage {
                    file,
                    page: idx + 1,
                    path,
                }),
                Err(detail) => {
                    warn!("File {}: discarding {} rendered pages", file, pages.len());
                    discard(&pages).await;
                    return Ok(Err(UnitError::DocumentFormat {
                        file,
                        detail: format!("page {}: {}", idx + 1, detail),
                    }));
                }
            }
        }
        Ok(Ok(pages))
    }
}

/// Reject files that do not start with `%PDF` before handing them to pdfium.
async fn check_pdf_magic(path: &Path) -> Result<(), String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("cannot read document copy: {e}"))?;
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let shown: Vec<u8> = bytes.iter().take(4).copied().collect();
        return Err(format!("not a PDF (first bytes: {shown:?})"));
    }
    Ok(())
}

async fn write_page(artifacts: &ArtifactDir, image: &DynamicImage) -> Result<PathBuf, String> {
    let png = encode_png(image).map_err(|e| format!("PNG encoding failed: {e}"))?;
    let path = artifacts.unique_path("page", "png");
    tokio::fs::write(&path, &png)
        .await
        .map_err(|e| format!("cannot write page artifact: {e}"))?;
    Ok(path)
}

async fn discard(pages: &[PageImage]) {
    for p in pages {
        if let Err(e) = tokio::fs::remove_file(&p.path).await {
            debug!("Could not remove {}: {}", p.path.display(), e);
        }
    }
}
