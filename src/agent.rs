//! Conversation agents: plain chat turns and image-aware multimodal turns.
//!
//! [`ConversationAgent`] owns one [`Conversation`] and talks to an
//! `Arc<dyn ChatBackend>`. [`ImageAwareAgent`] wraps it with the path
//! scanner: image-file paths found in the outgoing text are lifted out,
//! base64-encoded, and attached as `image_url` parts so the text the model
//! sees never contains a local filesystem path it might echo back.

use crate::error::GatewayError;
use crate::gateway::ChatBackend;
use crate::message::{ContentPart, Conversation, Message};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// Image-file extensions the path scanner recognises (case-insensitive).
const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"];

/// A path token located in outgoing text, with offsets into the original
/// string. Consumed while building the multimodal turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageToken {
    /// The matched path, exactly as it appeared.
    pub path: String,
    /// Byte offset of the match start in the original text.
    pub start: usize,
    /// Byte offset one past the match end in the original text.
    pub end: usize,
    /// What the match was replaced with in the cleaned text.
    pub placeholder: &'static str,
}

/// Scan `text` for image-file paths and replace each with a single space.
///
/// A match runs from the start of the unconsumed part of a
/// whitespace-delimited run to the *last* position in that run where a
/// known extension ends cleanly (next character is neither a word
/// character nor a dot); the rest of the run is then rescanned. Greedy
/// matching means `shot.png.bak` yields nothing (the extension is
/// followed by a dot) while `a.pngb.png` matches as one token ending at
/// the final `.png`.
///
/// Returns the cleaned text and the tokens in source order. No matches
/// returns the text unchanged with an empty Vec.
pub fn extract_image_tokens(text: &str) -> (String, Vec<ImageToken>) {
    let bytes = text.as_bytes();
    let mut tokens: Vec<ImageToken> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let run_end = bytes[i..]
            .iter()
            .position(|b| b.is_ascii_whitespace())
            .map(|off| i + off)
            .unwrap_or(bytes.len());

        let mut cursor = i;
        while let Some(end) = last_extension_end(text, cursor, run_end) {
            tokens.push(ImageToken {
                path: text[cursor..end].to_string(),
                start: cursor,
                end,
                placeholder: " ",
            });
            cursor = end;
        }
        i = run_end;
    }

    if tokens.is_empty() {
        return (text.to_string(), tokens);
    }

    let mut cleaned = String::with_capacity(text.len());
    let mut copied_to = 0;
    for token in &tokens {
        cleaned.push_str(&text[copied_to..token.start]);
        cleaned.push_str(token.placeholder);
        copied_to = token.end;
    }
    cleaned.push_str(&text[copied_to..]);

    (cleaned, tokens)
}

/// Latest offset in `[cursor+1, run_end)` where a recognised `.ext` ends
/// with a clean boundary, or None. At least one character must precede the
/// dot within the match.
fn last_extension_end(text: &str, cursor: usize, run_end: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut best = None;
    let mut p = cursor + 1;
    while p < run_end {
        if bytes[p] == b'.' {
            if let Some(ext_len) = extension_at(text, p) {
                best = Some(p + 1 + ext_len);
            }
        }
        p += 1;
    }
    best
}

/// If the byte at `dot` starts `.ext` for a known extension with a clean
/// boundary after it, return the extension length. The boundary is a word
/// character or another dot in the Unicode sense, so `a.pngé` is not a
/// match while `a.png»` is.
fn extension_at(text: &str, dot: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    for ext in IMAGE_EXTENSIONS {
        let end = dot + 1 + ext.len();
        if end <= bytes.len() && bytes[dot + 1..end].eq_ignore_ascii_case(ext.as_bytes()) {
            // `end` sits right after ASCII extension bytes, so it is a
            // char boundary.
            let clean = match text[end..].chars().next() {
                None => true,
                Some(c) => c != '.' && c != '_' && !c.is_alphanumeric(),
            };
            if clean {
                return Some(ext.len());
            }
        }
    }
    None
}

/// One model conversation: system prompt, alternating turns, fixed
/// decoding temperature.
pub struct ConversationAgent {
    backend: Arc<dyn ChatBackend>,
    conversation: Conversation,
    temperature: f32,
}

impl ConversationAgent {
    pub fn new(backend: Arc<dyn ChatBackend>, system_prompt: &str, temperature: f32) -> Self {
        ConversationAgent {
            backend,
            conversation: Conversation::new(system_prompt),
            temperature,
        }
    }

    /// Append a user turn, call the backend, append the assistant reply.
    ///
    /// On gateway error the user turn is rolled back so the history never
    /// carries a question with no answer.
    pub async fn run_message(&mut self, message: Message) -> Result<String, GatewayError> {
        self.conversation.push(message);
        match self
            .backend
            .chat(self.conversation.messages(), self.temperature)
            .await
        {
            Ok(reply) => {
                self.conversation.push(Message::assistant(reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                self.conversation.pop_turn();
                Err(e)
            }
        }
    }

    pub async fn run(&mut self, text: &str) -> Result<String, GatewayError> {
        self.run_message(Message::user(text)).await
    }

    /// A plain-text follow-up turn in the same conversation.
    pub async fn continue_run(&mut self, text: &str) -> Result<String, GatewayError> {
        self.run_message(Message::user(text)).await
    }

    /// Truncate the history back to the single system message.
    pub fn reset(&mut self) {
        self.conversation.reset();
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }
}

/// Agent whose outgoing text may reference local image files.
pub struct ImageAwareAgent {
    inner: ConversationAgent,
}

impl ImageAwareAgent {
    pub fn new(backend: Arc<dyn ChatBackend>, system_prompt: &str, temperature: f32) -> Self {
        ImageAwareAgent {
            inner: ConversationAgent::new(backend, system_prompt, temperature),
        }
    }

    /// Send `raw_text` (with any image paths attached as parts) followed by
    /// `instruction`.
    ///
    /// With no path tokens this degenerates to a plain text turn carrying
    /// only the instruction. Files that cannot be read are logged and
    /// omitted rather than failing the turn; the model just sees one fewer
    /// attachment.
    pub async fn run(&mut self, raw_text: &str, instruction: &str) -> Result<String, GatewayError> {
        let (cleaned, tokens) = extract_image_tokens(raw_text);
        if tokens.is_empty() {
            return self.inner.run(instruction).await;
        }

        let mut parts = vec![ContentPart::text(format!("{cleaned}{instruction}"))];
        for token in &tokens {
            match tokio::fs::read(&token.path).await {
                Ok(data) => {
                    debug!(path = %token.path, bytes = data.len(), "attaching image");
                    parts.push(ContentPart::image_base64(BASE64.encode(&data)));
                }
                Err(e) => {
                    warn!(path = %token.path, error = %e, "cannot read image, omitting attachment");
                }
            }
        }

        self.inner.run_message(Message::user_with_parts(parts)).await
    }

    pub async fn continue_run(&mut self, text: &str) -> Result<String, GatewayError> {
        self.inner.continue_run(text).await
    }

    pub fn reset(&mut self) {
        self.inner.reset();
    }

    pub fn conversation(&self) -> &Conversation {
        self.inner.conversation()
    }
}
