//! Progress-callback trait for per-page conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the converter works through the page range. The page loop is
//! strictly sequential, so events always arrive in page order, but the trait
//! is still `Send + Sync` so callers can hand the same callback to a
//! progress bar living on another thread.

use std::sync::Arc;

/// Called by the converter as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before any page is rendered, with the clamped page count.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page's first model request is sent.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when the first-pass reply omitted expected images and a
    /// corrective follow-up turn is being issued.
    fn on_corrective_pass(&self, page_num: usize, missing: usize) {
        let _ = (page_num, missing);
    }

    /// Called when a page's Markdown has been appended to the result file.
    ///
    /// `synthetic_links` is the number of image links that had to be
    /// appended mechanically because the model never produced them.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, synthetic_links: usize) {
        let _ = (page_num, total_pages, synthetic_links);
    }

    /// Called when a page failed (gateway error) and was skipped.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after all pages have been attempted.
    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
