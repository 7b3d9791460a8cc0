//! Integration tests for the per-page conversion flow, driven by a
//! scripted backend so no model endpoint (or rasteriser) is needed.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};
use vlm2md::{
    ChatBackend, ContentPart, ConversionConfig, GatewayError, ImageAwareAgent, Message,
    MessageContent, NoopProgressCallback, Role,
};

/// Replays a fixed list of replies and records every request it saw.
struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String, ()>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedBackend {
    fn new(replies: Vec<Result<&str, ()>>) -> Arc<Self> {
        Arc::new(ScriptedBackend {
            replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> Vec<Message> {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn chat(&self, messages: &[Message], _temperature: f32) -> Result<String, GatewayError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted backend exhausted")
            .map_err(|_| GatewayError::Status {
                status: 503,
                body: "backend unavailable".into(),
            })
    }
}

fn write_stub_image(dir: &std::path::Path, name: &str) -> String {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(b"stub image bytes").unwrap();
    path.display().to_string()
}

/// A page whose model drops one figure: the corrective turn recovers it
/// and its link ends up in result.txt.
#[tokio::test]
async fn dropped_image_is_recovered_into_result_file() {
    let dir = tempfile::tempdir().unwrap();
    let rendered = write_stub_image(dir.path(), "page_0001.png");
    let extracted = vec![write_stub_image(dir.path(), "image_xref7.png")];

    let first = "```markdown\n# Quarterly Report\n\nRevenue grew 12%.\n```";
    let retry = format!(
        "```markdown\n# Quarterly Report\n\nRevenue grew 12%.\n\n![chart]({})\n```",
        extracted[0]
    );
    let backend = ScriptedBackend::new(vec![Ok(first), Ok(&retry)]);

    let mut agent = ImageAwareAgent::new(
        Arc::clone(&backend) as Arc<dyn ChatBackend>,
        vlm2md::prompts::DEFAULT_SYSTEM_PROMPT,
        0.2,
    );
    let page = vlm2md::convert::transcribe_page(
        &mut agent,
        &rendered,
        &extracted,
        &NoopProgressCallback,
        1,
    )
    .await
    .unwrap();

    assert_eq!(page.corrective_passes, 1);
    assert_eq!(page.synthetic_links, 0);
    assert!(page.markdown.contains(&format!("![chart]({})", extracted[0])));

    // Both turns went out, and the corrective turn extended the same
    // conversation rather than starting a new one.
    assert_eq!(backend.request_count(), 2);
    assert!(backend.request(1).len() > backend.request(0).len());

    // Finalize as the converter would: append to result.txt. The recovered
    // link survives into the cumulative output.
    let result_path = dir.path().join("result.txt");
    let mut result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&result_path)
        .unwrap();
    result.write_all(page.markdown.as_bytes()).unwrap();
    drop(result);
    let content = std::fs::read_to_string(&result_path).unwrap();
    assert!(content.contains(&format!("![chart]({})", extracted[0])));
}

/// A model that never places the figure still cannot lose it: the page's
/// final Markdown carries a synthetic link.
#[tokio::test]
async fn stubborn_model_cannot_lose_an_image() {
    let dir = tempfile::tempdir().unwrap();
    let rendered = write_stub_image(dir.path(), "page_0001.png");
    let extracted = vec![write_stub_image(dir.path(), "image_xref3.jpg")];

    let backend = ScriptedBackend::new(vec![
        Ok("```markdown\nSome text, no figure.\n```"),
        Ok("```markdown\nStill no figure.\n```"),
    ]);
    let mut agent = ImageAwareAgent::new(
        Arc::clone(&backend) as Arc<dyn ChatBackend>,
        vlm2md::prompts::DEFAULT_SYSTEM_PROMPT,
        0.2,
    );

    let page = vlm2md::convert::transcribe_page(
        &mut agent,
        &rendered,
        &extracted,
        &NoopProgressCallback,
        1,
    )
    .await
    .unwrap();

    assert_eq!(page.synthetic_links, 1);
    assert!(page
        .markdown
        .contains(&format!("![missing image]({})", extracted[0])));
    // The fallback keeps the first-pass transcription.
    assert!(page.markdown.contains("Some text, no figure."));
}

/// The first-pass request is multimodal: the screenshot rides along as a
/// base64 data URI and the instruction names every extracted path.
#[tokio::test]
async fn first_pass_request_carries_screenshot_and_path_list() {
    let dir = tempfile::tempdir().unwrap();
    let rendered = write_stub_image(dir.path(), "page_0001.png");
    let extracted = vec![write_stub_image(dir.path(), "image_xref5.png")];

    let reply = format!("```markdown\n![fig]({})\n```", extracted[0]);
    let backend = ScriptedBackend::new(vec![Ok(&reply)]);
    let mut agent = ImageAwareAgent::new(
        Arc::clone(&backend) as Arc<dyn ChatBackend>,
        vlm2md::prompts::DEFAULT_SYSTEM_PROMPT,
        0.2,
    );

    vlm2md::convert::transcribe_page(
        &mut agent,
        &rendered,
        &extracted,
        &NoopProgressCallback,
        1,
    )
    .await
    .unwrap();

    let request = backend.request(0);
    assert_eq!(request[0].role, Role::System);
    assert_eq!(request[1].role, Role::User);

    let MessageContent::Parts(parts) = &request[1].content else {
        panic!("first pass should be a multimodal turn");
    };
    let ContentPart::Text { text } = &parts[0] else {
        panic!("first part should be the instruction text");
    };
    assert!(text.contains(&extracted[0]));
    // The screenshot path itself is scanned out of the text and attached.
    assert!(!text.contains(&rendered));
    let ContentPart::ImageUrl { image_url } = &parts[1] else {
        panic!("second part should be the screenshot attachment");
    };
    assert!(image_url.url.starts_with("data:image/jpeg;base64,"));
}

/// A gateway failure on the first pass surfaces as an error and leaves the
/// conversation clean for the next page.
#[tokio::test]
async fn gateway_failure_leaves_conversation_clean() {
    let dir = tempfile::tempdir().unwrap();
    let rendered = write_stub_image(dir.path(), "page_0001.png");

    let backend = ScriptedBackend::new(vec![Err(())]);
    let mut agent = ImageAwareAgent::new(
        Arc::clone(&backend) as Arc<dyn ChatBackend>,
        vlm2md::prompts::DEFAULT_SYSTEM_PROMPT,
        0.2,
    );

    let result = vlm2md::convert::transcribe_page(
        &mut agent,
        &rendered,
        &[],
        &NoopProgressCallback,
        1,
    )
    .await;
    assert!(result.is_err());
    assert_eq!(agent.conversation().len(), 1);
}

/// Two pages processed back to back share nothing: the reset between them
/// drops the history back to the system prompt.
#[tokio::test]
async fn pages_do_not_share_conversation_state() {
    let dir = tempfile::tempdir().unwrap();
    let page1 = write_stub_image(dir.path(), "page_0001.png");
    let page2 = write_stub_image(dir.path(), "page_0002.png");

    let backend = ScriptedBackend::new(vec![
        Ok("```markdown\npage one\n```"),
        Ok("```markdown\npage two\n```"),
    ]);
    let mut agent = ImageAwareAgent::new(
        Arc::clone(&backend) as Arc<dyn ChatBackend>,
        vlm2md::prompts::DEFAULT_SYSTEM_PROMPT,
        0.2,
    );

    vlm2md::convert::transcribe_page(&mut agent, &page1, &[], &NoopProgressCallback, 1)
        .await
        .unwrap();
    agent.reset();
    vlm2md::convert::transcribe_page(&mut agent, &page2, &[], &NoopProgressCallback, 2)
        .await
        .unwrap();

    // The second request starts from a fresh history: system + one turn.
    assert_eq!(backend.request(1).len(), 2);
}

/// Default configuration mirrors the documented conversion knobs.
#[test]
fn default_config_matches_documented_values() {
    let config = ConversionConfig::default();
    assert_eq!(config.dpi, 300);
    assert_eq!(config.temperature, 0.2);
    assert_eq!(config.model_index, 0);
    assert_eq!(config.page_image_format.extension(), "png");
}
