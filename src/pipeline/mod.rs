//! Per-page PDF processing stages.
//!
//! Two independent views of the same page feed the conversation:
//!
//! 1. [`render`] — rasterise the page with pdfium into `page_NNNN.png`;
//!    this screenshot is what the model actually reads.
//! 2. [`extract`] — pull the embedded image objects out of the PDF with
//!    lopdf, de-duplicated by object id, as `image_xref<id>.<ext>`; these
//!    are the figures the model is asked to reference by path.
//!
//! Both stages are blocking CPU/IO work and run under `spawn_blocking`.

pub mod extract;
pub mod render;
