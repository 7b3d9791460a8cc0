//! Page rasterisation via pdfium.
//!
//! pdfium wraps a C++ library with thread-local state that must not be
//! touched from async contexts, so each render runs its own
//! `spawn_blocking` task and opens the document fresh. Re-opening per page
//! is deliberate: pages are processed one at a time with a model round-trip
//! in between, so holding the document open buys nothing.

use crate::config::PageImageFormat;
use crate::error::Pdf2MdError;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::debug;

/// Rasterise one page (0-based index) to `output_path` at the given DPI.
pub async fn render_page_to_file(
    pdf_path: &Path,
    page_index: usize,
    dpi: u32,
    format: PageImageFormat,
    output_path: &Path,
) -> Result<(), Pdf2MdError> {
    let pdf_path = pdf_path.to_path_buf();
    let output_path = output_path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        render_page_blocking(&pdf_path, page_index, dpi, format, &output_path)
    })
    .await
    .map_err(|e| Pdf2MdError::Internal(format!("render task panicked: {e}")))?
}

fn render_page_blocking(
    pdf_path: &Path,
    page_index: usize,
    dpi: u32,
    format: PageImageFormat,
    output_path: &Path,
) -> Result<(), Pdf2MdError> {
    let pdfium = Pdfium::default();

    let document =
        pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| Pdf2MdError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: format!("{e:?}"),
            })?;

    let page = document
        .pages()
        .get(page_index as u16)
        .map_err(|e| Pdf2MdError::RasterisationFailed {
            page: page_index + 1,
            detail: format!("{e:?}"),
        })?;

    // PDF user space is 72 points per inch; scale to the requested DPI.
    let width_px = (page.width().value / 72.0 * dpi as f32).round() as i32;
    let height_px = (page.height().value / 72.0 * dpi as f32).round() as i32;

    let render_config = PdfRenderConfig::new()
        .set_target_width(width_px)
        .set_maximum_height(height_px);

    let bitmap =
        page.render_with_config(&render_config)
            .map_err(|e| Pdf2MdError::RasterisationFailed {
                page: page_index + 1,
                detail: format!("{e:?}"),
            })?;

    let image = bitmap.as_image();
    debug!(
        page = page_index + 1,
        width = image.width(),
        height = image.height(),
        "rendered page"
    );

    image
        .save_with_format(output_path, format.image_format())
        .map_err(|e| Pdf2MdError::OutputWriteFailed {
            path: output_path.to_path_buf(),
            source: std::io::Error::other(e),
        })
}
