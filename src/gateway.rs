//! Model gateway: one chat-completion endpoint behind a synchronous-looking
//! call.
//!
//! The gateway always requests a streamed response (`stream: true` with
//! usage accounting enabled) and reassembles the full reply from the
//! incremental `data:` lines before returning, so callers see a single
//! text result per turn. Some serving stacks interleave a separate
//! `reasoning_content` delta channel with the ordinary `content` channel;
//! both are concatenated into the reply in arrival order.
//!
//! No timeout or cancellation is layered on top of the transport here: a
//! hang in the underlying connection hangs the turn. That is an accepted
//! limitation of the tool's offline, single-document use case.

use crate::config::EngineConfig;
use crate::error::GatewayError;
use crate::message::Message;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// The seam between agents and the network.
///
/// Agents hold an `Arc<dyn ChatBackend>`; production code passes a
/// [`ModelGateway`], tests pass a scripted stand-in.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send the full conversation and return the assembled reply text.
    async fn chat(&self, messages: &[Message], temperature: f32) -> Result<String, GatewayError>;
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Option<Vec<StreamChoice>>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

/// Token accounting reported by the final usage chunk of a stream.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

// ── Gateway ──────────────────────────────────────────────────────────────

/// A chat-completion endpoint plus the model list it advertises.
pub struct ModelGateway {
    client: reqwest::Client,
    engine: EngineConfig,
    models: Vec<String>,
    model_index: usize,
}

impl ModelGateway {
    /// Connect to an engine and resolve its model list.
    pub async fn connect(engine: EngineConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::new();
        let models = load_model_list(&client, &engine).await?;
        debug!(engine = %engine.name, models = models.len(), "gateway connected");

        Ok(ModelGateway {
            client,
            engine,
            models,
            model_index: 0,
        })
    }

    /// Switch to a different engine, re-resolving its model list.
    ///
    /// The model index is reset to 0: indices are positions in one engine's
    /// listing and carry no meaning on another.
    pub async fn change_engine(&mut self, engine: EngineConfig) -> Result<(), GatewayError> {
        let models = load_model_list(&self.client, &engine).await?;
        debug!(engine = %engine.name, models = models.len(), "engine switched");
        self.engine = engine;
        self.models = models;
        self.model_index = 0;
        Ok(())
    }

    /// Select which entry of the model list subsequent calls use.
    pub fn set_model_index(&mut self, index: usize) {
        self.model_index = index;
    }

    /// Model ids advertised by the current engine.
    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn engine_name(&self) -> &str {
        &self.engine.name
    }

    fn current_model(&self) -> Result<&str, GatewayError> {
        self.models
            .get(self.model_index)
            .map(String::as_str)
            .ok_or(GatewayError::ModelIndexOutOfRange {
                index: self.model_index,
                available: self.models.len(),
            })
    }

    async fn stream_chat(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> Result<String, GatewayError> {
        let model = self.current_model()?;
        let url = format!("{}/chat/completions", self.engine.base_url);
        let request = ChatRequest {
            model,
            messages,
            temperature,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        trace!(%url, model, turns = messages.len(), "sending chat request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.engine.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|source| GatewayError::Http {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut reply = String::new();
        let mut buf: Vec<u8> = Vec::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|source| GatewayError::Stream { source })?;
            buf.extend_from_slice(&bytes);

            // Drain complete lines; a partial line (possibly mid-codepoint)
            // stays in the buffer until the next network chunk.
            while let Some(newline) = buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buf.drain(..=newline).collect();
                let line = std::str::from_utf8(&line[..line.len() - 1]).map_err(|e| {
                    GatewayError::Protocol {
                        detail: format!("non-UTF-8 stream line: {e}"),
                    }
                })?;
                if handle_sse_line(line.trim_end_matches('\r'), &mut reply)? {
                    return Ok(reply);
                }
            }
        }

        // Stream closed without a [DONE] marker; everything assembled so
        // far is still the best available answer.
        warn!("stream ended without terminator; returning partial assembly");
        Ok(reply)
    }
}

#[async_trait]
impl ChatBackend for ModelGateway {
    async fn chat(&self, messages: &[Message], temperature: f32) -> Result<String, GatewayError> {
        self.stream_chat(messages, temperature).await
    }
}

/// Fetch `GET {base_url}/models` and return the advertised model ids.
async fn load_model_list(
    client: &reqwest::Client,
    engine: &EngineConfig,
) -> Result<Vec<String>, GatewayError> {
    let url = format!("{}/models", engine.base_url);

    let response = client
        .get(&url)
        .bearer_auth(&engine.api_key)
        .send()
        .await
        .map_err(|source| GatewayError::Http {
            url: url.clone(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let listing: ModelList = response
        .json()
        .await
        .map_err(|source| GatewayError::Http { url, source })?;

    let models: Vec<String> = listing.data.into_iter().map(|m| m.id).collect();
    if models.is_empty() {
        return Err(GatewayError::NoModels {
            engine: engine.name.clone(),
        });
    }
    Ok(models)
}

/// Process one SSE line, appending any delta text to `reply`.
///
/// Returns `Ok(true)` when the `[DONE]` terminator was seen.
fn handle_sse_line(line: &str, reply: &mut String) -> Result<bool, GatewayError> {
    let line = line.trim();
    // Blank keep-alives and ":" comment lines are part of the protocol.
    if line.is_empty() || line.starts_with(':') {
        return Ok(false);
    }

    // Other SSE fields (`event:`, `id:`, `retry:`) are legal; only `data:`
    // lines carry completion chunks.
    let Some(payload) = line.strip_prefix("data:") else {
        trace!(line, "ignoring non-data stream line");
        return Ok(false);
    };
    let payload = payload.trim_start();

    if payload == "[DONE]" {
        return Ok(true);
    }

    let chunk: StreamChunk =
        serde_json::from_str(payload).map_err(|e| GatewayError::Protocol {
            detail: format!("bad chunk JSON: {e}"),
        })?;

    match chunk.choices.as_deref() {
        Some([choice, ..]) => {
            if let Some(content) = choice.delta.content.as_deref() {
                if !content.is_empty() {
                    reply.push_str(content);
                    return Ok(false);
                }
            }
            if let Some(reasoning) = choice.delta.reasoning_content.as_deref() {
                if !reasoning.is_empty() {
                    reply.push_str(reasoning);
                }
            }
        }
        // The usage chunk arrives with `choices: null` after the last delta.
        _ => {
            if let Some(usage) = chunk.usage {
                debug!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "stream usage"
                );
            }
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_deltas_are_assembled_in_order() {
        let mut reply = String::new();
        for payload in [
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
        ] {
            assert!(!handle_sse_line(payload, &mut reply).unwrap());
        }
        assert_eq!(reply, "Hello");
    }

    #[test]
    fn reasoning_channel_is_concatenated_when_content_is_absent() {
        let mut reply = String::new();
        handle_sse_line(
            r#"data: {"choices":[{"delta":{"reasoning_content":"thinking… "}}]}"#,
            &mut reply,
        )
        .unwrap();
        handle_sse_line(
            r#"data: {"choices":[{"delta":{"content":"answer"}}]}"#,
            &mut reply,
        )
        .unwrap();
        assert_eq!(reply, "thinking… answer");
    }

    #[test]
    fn usage_chunk_with_null_choices_is_accepted() {
        let mut reply = String::new();
        let done = handle_sse_line(
            r#"data: {"choices":null,"usage":{"prompt_tokens":10,"completion_tokens":4}}"#,
            &mut reply,
        )
        .unwrap();
        assert!(!done);
        assert!(reply.is_empty());
    }

    #[test]
    fn done_marker_terminates_the_stream() {
        let mut reply = String::new();
        assert!(handle_sse_line("data: [DONE]", &mut reply).unwrap());
    }

    #[test]
    fn keepalive_and_comment_lines_are_skipped() {
        let mut reply = String::new();
        assert!(!handle_sse_line("", &mut reply).unwrap());
        assert!(!handle_sse_line(": keep-alive", &mut reply).unwrap());
        assert!(reply.is_empty());
    }

    #[test]
    fn other_sse_fields_are_ignored() {
        let mut reply = String::new();
        assert!(!handle_sse_line("event: ping", &mut reply).unwrap());
        assert!(!handle_sse_line("id: 42", &mut reply).unwrap());
        assert!(!handle_sse_line("retry: 3000", &mut reply).unwrap());
        assert!(reply.is_empty());
    }

    #[test]
    fn malformed_chunk_json_is_a_protocol_error() {
        let mut reply = String::new();
        let err = handle_sse_line("data: {not json", &mut reply).unwrap_err();
        assert!(matches!(err, GatewayError::Protocol { .. }));
    }

    #[test]
    fn model_listing_deserialises() {
        let listing: ModelList = serde_json::from_str(
            r#"{"object":"list","data":[{"id":"qwen-vl","object":"model"},{"id":"other"}]}"#,
        )
        .unwrap();
        let ids: Vec<String> = listing.data.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["qwen-vl", "other"]);
    }
}
