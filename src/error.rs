//! Error types for the vlm2md library.
//!
//! Two distinct error types reflect two distinct failure surfaces:
//!
//! * [`GatewayError`] — anything that goes wrong between us and the
//!   model-serving endpoint (transport, HTTP status, malformed stream).
//!   Returned as a typed error rather than a sentinel string embedded in
//!   the conversation, so the orchestrator can decide whether a page is
//!   worth retrying or skipping.
//!
//! * [`Pdf2MdError`] — everything else: bad input file, rasterisation
//!   failure, unwritable output. Gateway errors convert into it via `From`
//!   when they reach the top-level conversion call.
//!
//! A page-level gateway failure is non-fatal: the converter logs it, counts
//! the page as failed, and moves on, so one bad page never aborts the run.

use std::path::PathBuf;
use thiserror::Error;

/// Failures at the model-gateway boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The HTTP request could not be sent or completed.
    #[error("request to '{url}' failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with a non-success status.
    #[error("model endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The streamed response body broke off mid-transfer.
    #[error("response stream interrupted: {source}")]
    Stream {
        #[source]
        source: reqwest::Error,
    },

    /// A stream chunk could not be parsed as a completion delta.
    #[error("malformed stream chunk: {detail}")]
    Protocol { detail: String },

    /// The engine's `/models` listing came back empty.
    #[error("engine '{engine}' lists no models")]
    NoModels { engine: String },

    /// The configured model index does not exist on this engine.
    #[error("model index {index} out of range: engine offers {available} models")]
    ModelIndexOutOfRange { index: usize, available: usize },
}

/// Fatal errors returned by the vlm2md library.
#[derive(Debug, Error)]
pub enum Pdf2MdError {
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("file is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium returned an error while rasterising a specific page.
    #[error("rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Embedded-image extraction failed for a specific page.
    #[error("image extraction failed for page {page}: {detail}")]
    ImageExtractionFailed { page: usize, detail: String },

    /// Could not create or write an output file.
    #[error("failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The model gateway failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Requested engine name is not registered.
    #[error("unknown engine '{name}'\nRegistered engines: {known}")]
    UnknownEngine { name: String, known: String },

    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}
