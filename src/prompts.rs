//! Prompt text for the transcription conversation.
//!
//! The per-page instruction and the corrective follow-up hand the model
//! *literal* file paths and expect the same strings back as image-link
//! targets. Reconciliation compares them verbatim, so nothing here should
//! ever paraphrase or normalise a path.

/// System prompt installed once per conversation.
///
/// Instructs the model to transcribe the attached page screenshot line by
/// line, keep the original layout, and wrap the result in a fenced
/// ```` ```markdown ```` block so the extractor can find it.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are given a screenshot of one page of a document. Read it line by line \
and transcribe everything on it: headings, body text, tables of contents, \
tables, and captions, preserving the original layout and ordering. Output \
the transcription as Markdown inside a fenced code block that starts with \
```markdown and ends with ```. Pay attention to the following:
1. Do not omit, summarise, or reorder any content; transcribe the page as it is.
2. Reproduce tables using Markdown table syntax.
3. Where the page shows a figure or picture, and you were given file paths \
for the images extracted from this page, insert a Markdown image link \
(![description](path)) with one of those exact paths at the figure's \
position. Use each given path exactly as written.
4. Emit nothing outside the fenced block.";

/// First-pass instruction accompanying the rendered page image.
///
/// Lists the image files extracted from the page so the model can place
/// them where the figures appear in the screenshot.
pub fn page_instruction(extracted_paths: &[String]) -> String {
    if extracted_paths.is_empty() {
        return "Transcribe this document screenshot to Markdown. The page \
                contains no extracted images."
            .to_string();
    }
    format!(
        "These are the file paths of the images extracted from this page of \
         the document: {}. Transcribe the screenshot to Markdown and replace \
         each figure with a Markdown image link using the matching path, \
         exactly as given.",
        bracket_list(extracted_paths)
    )
}

/// Follow-up turn issued when the first reply omitted expected images.
pub fn corrective_instruction(missing_paths: &[String]) -> String {
    format!(
        "You did not reference all of the image paths extracted from the \
         PDF; these are missing: {}. Look at the document screenshot again \
         and produce the Markdown with every given path used as an image \
         link, exactly as written.",
        bracket_list(missing_paths)
    )
}

/// Render paths as `['a', 'b']` so each one stands out as a literal string.
fn bracket_list(paths: &[String]) -> String {
    let quoted: Vec<String> = paths.iter().map(|p| format!("'{p}'")).collect();
    format!("[{}]", quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_instruction_quotes_every_path() {
        let paths = vec!["out/image_xref7.png".to_string(), "out/image_xref9.jpg".to_string()];
        let text = page_instruction(&paths);
        assert!(text.contains("'out/image_xref7.png'"));
        assert!(text.contains("'out/image_xref9.jpg'"));
    }

    #[test]
    fn page_instruction_without_images_mentions_none() {
        let text = page_instruction(&[]);
        assert!(text.contains("no extracted images"));
    }

    #[test]
    fn corrective_instruction_names_the_missing_paths() {
        let missing = vec!["out/image_xref3.png".to_string()];
        let text = corrective_instruction(&missing);
        assert!(text.contains("['out/image_xref3.png']"));
        assert!(text.contains("missing"));
    }
}
