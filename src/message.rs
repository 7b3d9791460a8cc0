//! Chat message data model and conversation state.
//!
//! The wire shape mirrors the OpenAI chat-completion request format: a list
//! of role-tagged messages whose content is either a plain string or an
//! ordered list of parts tagged `text` / `image_url`. Image parts carry a
//! `data:image/jpeg;base64,…` URI regardless of the file's true format —
//! endpoints sniff the payload bytes, so the MIME label is advisory only.
//!
//! A [`Conversation`] is append-only and owned by exactly one agent. The
//! first message is always the system prompt, set once at construction;
//! [`Conversation::reset`] truncates back to it and never duplicates it.

use serde::Serialize;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Image payload of an `image_url` content part.
#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One element of a multimodal user turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Wrap base64-encoded image bytes in a data URI part.
    pub fn image_base64(b64: impl AsRef<str>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:image/jpeg;base64,{}", b64.as_ref()),
            },
        }
    }
}

/// Message body: a bare string or an ordered sequence of parts.
///
/// Untagged so plain-text messages serialise as `"content": "…"` and
/// multimodal ones as `"content": [{…}, …]`, matching what chat-completion
/// endpoints expect.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A role-tagged chat message.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// A user turn carrying text plus image attachments.
    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        Message {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }
}

/// Ordered, append-only message history owned by one agent.
///
/// Invariant: `messages[0]` is the system message for the whole lifetime of
/// the conversation. Mutation happens only through [`push`](Self::push),
/// [`pop_turn`](Self::pop_turn) and [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Create a conversation seeded with exactly one system message.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Conversation {
            messages: vec![Message::system(system_prompt)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Remove the most recent message, refusing to touch the system message.
    ///
    /// Used to roll back a user turn when the gateway call fails, so the
    /// history never carries a question with no answer.
    pub fn pop_turn(&mut self) -> Option<Message> {
        if self.messages.len() > 1 {
            self.messages.pop()
        } else {
            None
        }
    }

    /// Truncate back to the single system message.
    pub fn reset(&mut self) {
        self.messages.truncate(1);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        // Never true: the system message is permanent.
        self.messages.is_empty()
    }
}
