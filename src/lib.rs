//! # vlm2md
//!
//! Convert PDF documents to Markdown with a vision-language model, without
//! losing the embedded figures.
//!
//! ## Why this crate?
//!
//! Rasterise-and-transcribe tools read each page as a screenshot, which
//! handles multi-column layouts and tables well — but the model only
//! *describes* figures, it cannot emit their pixels. This crate closes the
//! gap: alongside rendering each page it extracts the page's embedded
//! image objects to disk, hands the model their file paths, and then
//! reconciles the reply against that list. A dropped figure triggers one
//! corrective turn; a figure the model still refuses to place gets a
//! mechanical `![missing image](path)` link appended, so no embedded image
//! is ever silently lost from the output.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF, one page at a time
//!  │
//!  ├─ 1. Render     rasterise page via pdfium → page_NNNN.png
//!  ├─ 2. Extract    embedded images via lopdf → image_xref<id>.<ext>
//!  ├─ 3. First pass screenshot + path list → streamed VLM reply
//!  ├─ 4. Reconcile  ```markdown blocks vs. expected image links
//!  ├─ 5. Correct    at most one follow-up turn, then synthetic links
//!  └─ 6. Finalize   append to result.txt, reset the conversation
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vlm2md::{ConversionConfig, EngineRegistry, ModelGateway, PageConverter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // "local" targets VLM2MD_BASE_URL (default http://localhost:8000/v1);
//!     // "openai" is registered when OPENAI_API_KEY is set.
//!     let registry = EngineRegistry::from_env();
//!     let gateway = ModelGateway::connect(registry.get("local")?.clone()).await?;
//!
//!     let converter = PageConverter::new(Arc::new(gateway), ConversionConfig::default());
//!     let stats = converter
//!         .convert("document.pdf".as_ref(), "out".as_ref(), 1, -1)
//!         .await?;
//!     eprintln!("{} pages converted, {} failed", stats.pages_processed, stats.pages_failed);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `vlm2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! vlm2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod agent;
pub mod config;
pub mod convert;
pub mod error;
pub mod gateway;
pub mod markdown;
pub mod message;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use agent::{ConversationAgent, ImageAwareAgent, ImageToken};
pub use config::{
    ConversionConfig, ConversionConfigBuilder, EngineConfig, EngineRegistry, PageImageFormat,
};
pub use convert::{
    clamp_page_range, ConversionStats, PageConverter, PageTranscription, MAX_CORRECTIVE_PASSES,
};
pub use error::{GatewayError, Pdf2MdError};
pub use gateway::{ChatBackend, ModelGateway};
pub use message::{ContentPart, Conversation, Message, MessageContent, Role};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
