//! Conversion orchestration: the per-page state machine.
//!
//! Each page goes through RENDER → EXTRACT → FIRST_PASS → RECONCILE,
//! with at most [`MAX_CORRECTIVE_PASSES`] follow-up turns when the model's
//! reply omits expected images, then FINALIZE: the page's Markdown is
//! appended to `result.txt` and the conversation is reset so the next page
//! starts from a clean system prompt.
//!
//! A gateway failure on the first pass skips the page and keeps the run
//! alive; a failure on the corrective pass falls back to the first-pass
//! text with synthetic links appended, since that text is already complete
//! enough to keep.

use crate::agent::ImageAwareAgent;
use crate::config::ConversionConfig;
use crate::error::{GatewayError, Pdf2MdError};
use crate::gateway::ChatBackend;
use crate::markdown::{extract_markdown_blocks, missing_images};
use crate::pipeline::{extract, render};
use crate::progress::{ConversionProgressCallback, NoopProgressCallback};
use crate::prompts;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How many corrective turns a page may get after a reconciliation
/// shortfall. One pass recovers the common case (the model ignored a path
/// it was given); beyond that the synthetic-link fallback is both cheaper
/// and more predictable than repeated retries.
pub const MAX_CORRECTIVE_PASSES: u32 = 1;

/// Outcome of one run of [`PageConverter::convert`].
#[derive(Debug, Default, Clone)]
pub struct ConversionStats {
    /// Pages whose Markdown reached `result.txt`.
    pub pages_processed: usize,
    /// Pages skipped after a gateway failure.
    pub pages_failed: usize,
    /// Rendered page screenshots, in page order.
    pub rendered_pages: Vec<String>,
    /// Image links appended mechanically across all pages.
    pub synthetic_links: usize,
    /// Corrective turns issued across all pages.
    pub corrective_passes: usize,
}

/// Result of transcribing a single page.
#[derive(Debug)]
pub struct PageTranscription {
    /// The Markdown that will be appended to `result.txt`.
    pub markdown: String,
    /// Image links appended mechanically because the model never produced
    /// them.
    pub synthetic_links: usize,
    /// Corrective turns issued for this page.
    pub corrective_passes: u32,
}

/// Clamp a requested 1-based page range against the document's page count.
///
/// An `end_page` beyond the document, or negative, means "to the end".
/// `start_page` below 1 clamps to 1. The returned range may be empty
/// (start > end), which converts zero pages.
pub fn clamp_page_range(start_page: i64, end_page: i64, page_count: usize) -> (usize, usize) {
    let count = page_count as i64;
    let end = if end_page < 0 || end_page > count {
        count
    } else {
        end_page
    };
    let start = start_page.max(1);
    (start as usize, end.max(0) as usize)
}

/// Drives the whole PDF through the per-page pipeline.
pub struct PageConverter {
    backend: Arc<dyn ChatBackend>,
    config: ConversionConfig,
}

impl PageConverter {
    pub fn new(backend: Arc<dyn ChatBackend>, config: ConversionConfig) -> Self {
        PageConverter { backend, config }
    }

    /// Convert pages `start_page..=end_page` (1-based, clamped) of
    /// `pdf_path`, writing screenshots, extracted images, and the
    /// cumulative `result.txt` into `output_folder`.
    pub async fn convert(
        &self,
        pdf_path: &Path,
        output_folder: &Path,
        start_page: i64,
        end_page: i64,
    ) -> Result<ConversionStats, Pdf2MdError> {
        check_pdf_magic(pdf_path)?;
        std::fs::create_dir_all(output_folder).map_err(|source| {
            Pdf2MdError::OutputWriteFailed {
                path: output_folder.to_path_buf(),
                source,
            }
        })?;

        let doc_path = pdf_path.to_path_buf();
        let doc = tokio::task::spawn_blocking(move || extract::load_document(&doc_path))
            .await
            .map_err(|e| Pdf2MdError::Internal(format!("document load task panicked: {e}")))??;
        let doc = Arc::new(doc);

        let page_count = extract::page_count(&doc);
        let (start, end) = clamp_page_range(start_page, end_page, page_count);
        let pages_total = if start > end { 0 } else { end - start + 1 };
        info!(
            document = %pdf_path.display(),
            page_count,
            start,
            end,
            "starting conversion"
        );

        let noop = NoopProgressCallback;
        let progress: &dyn ConversionProgressCallback = match &self.config.progress_callback {
            Some(cb) => cb.as_ref(),
            None => &noop,
        };
        progress.on_conversion_start(pages_total);

        let system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(prompts::DEFAULT_SYSTEM_PROMPT);
        let mut agent = ImageAwareAgent::new(
            Arc::clone(&self.backend),
            system_prompt,
            self.config.temperature,
        );

        let mut stats = ConversionStats::default();
        let ext = self.config.page_image_format.extension();

        for page_number in start..=end {
            progress.on_page_start(page_number, pages_total);

            let rendered = output_folder.join(format!("page_{page_number:04}.{ext}"));
            render::render_page_to_file(
                pdf_path,
                page_number - 1,
                self.config.dpi,
                self.config.page_image_format,
                &rendered,
            )
            .await?;
            let rendered = rendered.display().to_string();

            let extracted =
                extract::extract_page_images(Arc::clone(&doc), page_number as u32, output_folder)
                    .await?;
            debug!(page = page_number, images = extracted.len(), "page prepared");

            match transcribe_page(&mut agent, &rendered, &extracted, progress, page_number).await {
                Ok(page) => {
                    append_result(output_folder, &page.markdown)?;
                    stats.pages_processed += 1;
                    stats.synthetic_links += page.synthetic_links;
                    stats.corrective_passes += page.corrective_passes as usize;
                    progress.on_page_complete(page_number, pages_total, page.synthetic_links);
                }
                Err(e) => {
                    warn!(page = page_number, error = %e, "page skipped after gateway failure");
                    stats.pages_failed += 1;
                    progress.on_page_error(page_number, pages_total, &e.to_string());
                }
            }
            stats.rendered_pages.push(rendered);

            // Every page starts its own conversation.
            agent.reset();
        }

        progress.on_conversion_complete(pages_total, stats.pages_processed);
        info!(
            processed = stats.pages_processed,
            failed = stats.pages_failed,
            synthetic_links = stats.synthetic_links,
            "conversion finished"
        );
        Ok(stats)
    }
}

/// Transcribe one page: first pass, reconciliation, and at most
/// [`MAX_CORRECTIVE_PASSES`] follow-ups, falling back to synthetic links.
///
/// Takes the rendered screenshot path and the extracted image paths, so it
/// can be exercised without a PDF or a rasteriser.
pub async fn transcribe_page(
    agent: &mut ImageAwareAgent,
    rendered_path: &str,
    extracted: &[String],
    progress: &dyn ConversionProgressCallback,
    page_number: usize,
) -> Result<PageTranscription, GatewayError> {
    let instruction = prompts::page_instruction(extracted);
    let reply = agent.run(rendered_path, &instruction).await?;

    let candidate = extract_markdown_blocks(&reply).concat();
    let mut missing = missing_images(extracted, &candidate);
    if missing.is_empty() {
        return Ok(PageTranscription {
            markdown: candidate,
            synthetic_links: 0,
            corrective_passes: 0,
        });
    }

    // Keep a complete fallback before retrying: first-pass text plus a
    // mechanical link for every path the model dropped.
    let mut fallback = candidate;
    for path in &missing {
        fallback.push_str(&format!("\n![missing image]({path})"));
    }
    let synthetic_links = missing.len();

    let mut passes = 0;
    while passes < MAX_CORRECTIVE_PASSES {
        passes += 1;
        progress.on_corrective_pass(page_number, missing.len());
        debug!(page = page_number, missing = ?missing, "issuing corrective turn");

        match agent
            .continue_run(&prompts::corrective_instruction(&missing))
            .await
        {
            Ok(retry_reply) => {
                let retry_text = extract_markdown_blocks(&retry_reply).concat();
                let still_missing = missing_images(extracted, &retry_text);
                if still_missing.is_empty() {
                    return Ok(PageTranscription {
                        markdown: retry_text,
                        synthetic_links: 0,
                        corrective_passes: passes,
                    });
                }
                missing = still_missing;
            }
            Err(e) => {
                // The fallback is already complete; losing the retry is
                // not worth losing the page.
                warn!(page = page_number, error = %e, "corrective turn failed, using fallback");
                break;
            }
        }
    }

    Ok(PageTranscription {
        markdown: fallback,
        synthetic_links,
        corrective_passes: passes,
    })
}

/// Verify the file exists and starts with the PDF magic bytes.
fn check_pdf_magic(pdf_path: &Path) -> Result<(), Pdf2MdError> {
    let mut file = std::fs::File::open(pdf_path).map_err(|_| Pdf2MdError::FileNotFound {
        path: pdf_path.to_path_buf(),
    })?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)
        .map_err(|_| Pdf2MdError::NotAPdf {
            path: pdf_path.to_path_buf(),
            magic: [0; 4],
        })?;
    if &magic != b"%PDF" {
        return Err(Pdf2MdError::NotAPdf {
            path: pdf_path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Append one page's Markdown to `result.txt`, opening and closing the
/// file within the call. No separator between pages.
fn append_result(output_folder: &Path, markdown: &str) -> Result<(), Pdf2MdError> {
    let path = output_folder.join("result.txt");
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| Pdf2MdError::OutputWriteFailed {
            path: path.clone(),
            source,
        })?;
    file.write_all(markdown.as_bytes())
        .map_err(|source| Pdf2MdError::OutputWriteFailed { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, ()>>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<&str, ()>>) -> Arc<Self> {
            Arc::new(ScriptedBackend {
                replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
            })
        }

        fn exhausted(&self) -> bool {
            self.replies.lock().unwrap().is_empty()
        }
    }

    #[async_trait::async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn chat(
            &self,
            _messages: &[Message],
            _temperature: f32,
        ) -> Result<String, GatewayError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted backend exhausted")
                .map_err(|_| GatewayError::Status {
                    status: 503,
                    body: "scripted failure".into(),
                })
        }
    }

    fn agent(backend: Arc<ScriptedBackend>) -> ImageAwareAgent {
        ImageAwareAgent::new(backend, prompts::DEFAULT_SYSTEM_PROMPT, 0.2)
    }

    #[test]
    fn range_clamps_end_beyond_document() {
        assert_eq!(clamp_page_range(1, 50, 10), (1, 10));
    }

    #[test]
    fn range_clamps_negative_end_to_document() {
        assert_eq!(clamp_page_range(3, -1, 10), (3, 10));
    }

    #[test]
    fn range_clamps_start_below_one() {
        assert_eq!(clamp_page_range(0, 2, 10), (1, 2));
        assert_eq!(clamp_page_range(-5, 2, 10), (1, 2));
    }

    #[test]
    fn range_passes_through_in_bounds_values() {
        assert_eq!(clamp_page_range(2, 5, 10), (2, 5));
    }

    #[test]
    fn range_on_empty_document_is_empty() {
        let (start, end) = clamp_page_range(1, 2, 0);
        assert!(start > end);
    }

    #[tokio::test]
    async fn clean_first_pass_needs_no_corrective_turn() {
        let backend = ScriptedBackend::new(vec![Ok(
            "```markdown\n# Page\n![fig](out/image_xref5.png)\n```",
        )]);
        let mut agent = agent(Arc::clone(&backend));
        let extracted = vec!["out/image_xref5.png".to_string()];

        let page = transcribe_page(&mut agent, "out/page_0001.png", &extracted, &NoopProgressCallback, 1)
            .await
            .unwrap();

        assert_eq!(page.corrective_passes, 0);
        assert_eq!(page.synthetic_links, 0);
        assert!(page.markdown.contains("![fig](out/image_xref5.png)"));
        assert!(backend.exhausted());
    }

    #[tokio::test]
    async fn corrective_pass_recovers_a_dropped_image() {
        let backend = ScriptedBackend::new(vec![
            Ok("```markdown\n# Page without figure\n```"),
            Ok("```markdown\n# Page\n![fig](out/image_xref5.png)\n```"),
        ]);
        let mut agent = agent(Arc::clone(&backend));
        let extracted = vec!["out/image_xref5.png".to_string()];

        let page = transcribe_page(&mut agent, "out/page_0001.png", &extracted, &NoopProgressCallback, 1)
            .await
            .unwrap();

        assert_eq!(page.corrective_passes, 1);
        assert_eq!(page.synthetic_links, 0);
        assert!(page.markdown.contains("![fig](out/image_xref5.png)"));
    }

    #[tokio::test]
    async fn stubborn_model_gets_synthetic_links() {
        let backend = ScriptedBackend::new(vec![
            Ok("```markdown\n# First\n```"),
            Ok("```markdown\n# Retry, still no figure\n```"),
        ]);
        let mut agent = agent(backend);
        let extracted = vec![
            "out/image_xref5.png".to_string(),
            "out/image_xref9.jpg".to_string(),
        ];

        let page = transcribe_page(&mut agent, "out/page_0001.png", &extracted, &NoopProgressCallback, 1)
            .await
            .unwrap();

        assert_eq!(page.corrective_passes, 1);
        assert_eq!(page.synthetic_links, 2);
        // Fallback keeps the first-pass text and appends mechanical links.
        assert!(page.markdown.contains("# First"));
        assert!(page
            .markdown
            .contains("![missing image](out/image_xref5.png)"));
        assert!(page
            .markdown
            .contains("![missing image](out/image_xref9.jpg)"));
    }

    #[tokio::test]
    async fn first_pass_gateway_failure_fails_the_page() {
        let backend = ScriptedBackend::new(vec![Err(())]);
        let mut agent = agent(backend);

        let result =
            transcribe_page(&mut agent, "out/page_0001.png", &[], &NoopProgressCallback, 1).await;
        assert!(result.is_err());
        // The failed turn must not linger in the history.
        assert_eq!(agent.conversation().len(), 1);
    }

    #[tokio::test]
    async fn corrective_failure_falls_back_to_synthetic_links() {
        let backend = ScriptedBackend::new(vec![Ok("```markdown\n# First\n```"), Err(())]);
        let mut agent = agent(backend);
        let extracted = vec!["out/image_xref5.png".to_string()];

        let page = transcribe_page(&mut agent, "out/page_0001.png", &extracted, &NoopProgressCallback, 1)
            .await
            .unwrap();

        assert!(page
            .markdown
            .contains("![missing image](out/image_xref5.png)"));
        assert_eq!(page.synthetic_links, 1);
    }

    #[tokio::test]
    async fn reply_without_fenced_block_yields_synthetic_links_only() {
        let backend = ScriptedBackend::new(vec![
            Ok("I cannot transcribe this page."),
            Ok("Still refusing."),
        ]);
        let mut agent = agent(backend);
        let extracted = vec!["out/image_xref2.png".to_string()];

        let page = transcribe_page(&mut agent, "out/page_0001.png", &extracted, &NoopProgressCallback, 1)
            .await
            .unwrap();

        assert_eq!(page.markdown, "\n![missing image](out/image_xref2.png)");
    }

    #[test]
    fn result_file_is_appended_without_separator() {
        let dir = tempfile::tempdir().unwrap();
        append_result(dir.path(), "first").unwrap();
        append_result(dir.path(), "second").unwrap();
        let content = std::fs::read_to_string(dir.path().join("result.txt")).unwrap();
        assert_eq!(content, "firstsecond");
    }

    #[test]
    fn magic_check_rejects_non_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"not a pdf at all").unwrap();
        let err = check_pdf_magic(&path).unwrap_err();
        assert!(matches!(err, Pdf2MdError::NotAPdf { .. }));
    }

    #[test]
    fn magic_check_accepts_pdf_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("real.pdf");
        std::fs::write(&path, b"%PDF-1.7\n...").unwrap();
        assert!(check_pdf_magic(&path).is_ok());
    }

    #[test]
    fn missing_file_is_reported_as_not_found() {
        let err = check_pdf_magic(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, Pdf2MdError::FileNotFound { .. }));
    }
}
