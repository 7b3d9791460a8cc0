//! Markdown post-processing: fenced-block extraction and image reconciliation.
//!
//! Both routines are deliberately hand-rolled scanners rather than regexes so
//! their matching rules are explicit:
//!
//! * A *markdown block* is everything between a literal ```` ```markdown ````
//!   opener and the next ```` ``` ```` closer, non-greedy, markers excluded.
//!   An unterminated opener yields nothing.
//!
//! * An *image link* is `![alt](target)` where neither the alt text nor the
//!   target may span a line break, the alt ends at the first `](` and the
//!   target ends at the first `)`. There is no escaping: a filename that
//!   itself contains `)` will be truncated at that paren. Targets are
//!   compared by exact string equality, with no path normalisation —
//!   `./a.png` and `a.png` are different targets on purpose, because the
//!   instruction text hands the model literal paths and anything else it
//!   writes back is a deviation worth correcting.

use std::collections::HashSet;

const FENCE_OPEN: &str = "```markdown";
const FENCE_CLOSE: &str = "```";

/// Extract the contents of every fenced `markdown` block, in source order.
///
/// Returns an empty Vec when the text has no such block; that is an
/// expected outcome (the reply simply contained no Markdown), not an error.
pub fn extract_markdown_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut pos = 0;

    while let Some(open) = text[pos..].find(FENCE_OPEN) {
        let content_start = pos + open + FENCE_OPEN.len();
        match text[content_start..].find(FENCE_CLOSE) {
            Some(close) => {
                blocks.push(text[content_start..content_start + close].to_string());
                pos = content_start + close + FENCE_CLOSE.len();
            }
            // Unterminated fence: no block to capture.
            None => break,
        }
    }

    blocks
}

/// Collect every image-link target `![alt](target)` out of a Markdown string.
pub fn image_link_targets(markdown: &str) -> Vec<&str> {
    let mut targets = Vec::new();
    let bytes = markdown.as_bytes();
    let mut pos = 0;

    while let Some(bang) = markdown[pos..].find("![") {
        let alt_start = pos + bang + 2;

        // Alt text runs to the first "](" on the same line.
        let Some(bridge) = find_in_line(markdown, alt_start, "](") else {
            pos += bang + 2;
            continue;
        };

        let target_start = bridge + 2;
        let Some(close) = find_in_line(markdown, target_start, ")") else {
            pos += bang + 2;
            continue;
        };

        targets.push(&markdown[target_start..close]);
        pos = close + 1;
        debug_assert!(pos <= bytes.len());
    }

    targets
}

/// Find `needle` at or after `from`, but not past the end of that line.
fn find_in_line(haystack: &str, from: usize, needle: &str) -> Option<usize> {
    let rest = &haystack[from..];
    let line_end = rest.find('\n').unwrap_or(rest.len());
    rest[..line_end].find(needle).map(|i| from + i)
}

/// Return every expected path that is not referenced as an image-link target.
///
/// Order-preserving over `expected`; exact string comparison. Recomputed
/// fresh on every call, never cached.
pub fn missing_images<S: AsRef<str>>(expected: &[S], markdown: &str) -> Vec<String> {
    let referenced: HashSet<&str> = image_link_targets(markdown).into_iter().collect();

    expected
        .iter()
        .map(|p| p.as_ref())
        .filter(|p| !referenced.contains(p))
        .map(|p| p.to_string())
        .collect()
}
