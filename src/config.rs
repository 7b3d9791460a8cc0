//! Configuration types for PDF-to-Markdown conversion.
//!
//! Two concerns live here:
//!
//! * [`EngineConfig`] / [`EngineRegistry`] — which chat-completion endpoint
//!   to talk to. The registry is an explicit object built once at startup
//!   and handed to the gateway constructor; there is no ambient global
//!   lookup table, so two conversions in one process can target different
//!   engines without stepping on each other.
//!
//! * [`ConversionConfig`] — every knob of the page loop, built via
//!   [`ConversionConfigBuilder`]. The builder lets callers set only what
//!   they care about and rely on documented defaults for the rest.

use crate::error::Pdf2MdError;
use crate::progress::ProgressCallback;
use std::fmt;

/// Default endpoint for the built-in `local` engine (vLLM / Ollama style).
pub const DEFAULT_LOCAL_BASE_URL: &str = "http://localhost:8000/v1";

/// Endpoint URL + credential pair for one named engine.
#[derive(Clone)]
pub struct EngineConfig {
    /// Registry key, e.g. "local" or "openai".
    pub name: String,
    /// Base URL up to and including the API version segment, no trailing
    /// slash: `{base_url}/chat/completions` and `{base_url}/models` are
    /// derived from it.
    pub base_url: String,
    /// Bearer credential sent on every request. May be a dummy value for
    /// unauthenticated local servers.
    pub api_key: String,
}

impl EngineConfig {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        EngineConfig {
            name: name.into(),
            base_url,
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Named collection of engine configurations.
///
/// Constructed once at startup, typically via [`EngineRegistry::from_env`],
/// then queried by name when building the gateway.
#[derive(Debug, Clone, Default)]
pub struct EngineRegistry {
    engines: Vec<EngineConfig>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the process environment.
    ///
    /// Registers:
    /// * `local` — `VLM2MD_BASE_URL` (default `http://localhost:8000/v1`)
    ///   with `VLM2MD_API_KEY` (default `"none"`).
    /// * `openai` — only when `OPENAI_API_KEY` is set.
    pub fn from_env() -> Self {
        let mut registry = Self::new();

        let base = std::env::var("VLM2MD_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_LOCAL_BASE_URL.to_string());
        let key = std::env::var("VLM2MD_API_KEY").unwrap_or_else(|_| "none".to_string());
        registry.register(EngineConfig::new("local", base, key));

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                registry.register(EngineConfig::new(
                    "openai",
                    "https://api.openai.com/v1",
                    key,
                ));
            }
        }

        registry
    }

    /// Add or replace an engine under its name.
    pub fn register(&mut self, engine: EngineConfig) {
        if let Some(existing) = self.engines.iter_mut().find(|e| e.name == engine.name) {
            *existing = engine;
        } else {
            self.engines.push(engine);
        }
    }

    /// Look up an engine by name, or fail with the list of known names.
    pub fn get(&self, name: &str) -> Result<&EngineConfig, Pdf2MdError> {
        self.engines
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Pdf2MdError::UnknownEngine {
                name: name.to_string(),
                known: self
                    .engines
                    .iter()
                    .map(|e| e.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.engines.iter().map(|e| e.name.as_str())
    }
}

/// Configuration for a PDF-to-Markdown conversion.
///
/// Built via [`ConversionConfig::builder()`] or [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use vlm2md::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .dpi(150)
///     .temperature(0.0)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–600.
    /// Default: 300.
    ///
    /// 300 DPI keeps small-font scholarly text legible to the model; drop to
    /// 150 when upload size matters more than fine print.
    pub dpi: u32,

    /// File format for rendered page images. Default: "png".
    ///
    /// PNG is lossless; JPEG artefacts on rendered text measurably hurt the
    /// model's transcription accuracy.
    pub page_image_format: PageImageFormat,

    /// Sampling temperature for every gateway call. Default: 0.2.
    ///
    /// Low temperature keeps the model faithful to what is on the page,
    /// which is exactly what transcription wants.
    pub temperature: f32,

    /// Which entry of the engine's model list to use. Default: 0.
    ///
    /// Recorded here for the caller constructing the gateway; apply it
    /// with [`crate::gateway::ModelGateway::set_model_index`].
    pub model_index: usize,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Per-page progress events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            page_image_format: PageImageFormat::Png,
            temperature: 0.2,
            model_index: 0,
            system_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("dpi", &self.dpi)
            .field("page_image_format", &self.page_image_format)
            .field("temperature", &self.temperature)
            .field("model_index", &self.model_index)
            .field("system_prompt", &self.system_prompt.as_ref().map(|_| "<custom>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn callback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn page_image_format(mut self, format: PageImageFormat) -> Self {
        self.config.page_image_format = format;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn model_index(mut self, idx: usize) -> Self {
        self.config.model_index = idx;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2MdError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(Pdf2MdError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if !(0.0..=2.0).contains(&c.temperature) {
            return Err(Pdf2MdError::InvalidConfig(format!(
                "temperature must be 0.0–2.0, got {}",
                c.temperature
            )));
        }
        Ok(self.config)
    }
}

/// On-disk format for rasterised page images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageImageFormat {
    /// Lossless, the default.
    #[default]
    Png,
    Jpeg,
}

impl PageImageFormat {
    /// File extension without the dot, as used in `page_NNNN.<ext>`.
    pub fn extension(&self) -> &'static str {
        match self {
            PageImageFormat::Png => "png",
            PageImageFormat::Jpeg => "jpg",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            PageImageFormat::Png => image::ImageFormat::Png,
            PageImageFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}
