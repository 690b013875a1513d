//! OCR fallback for pages without a text layer.
//!
//! [`OcrEngine`] is the seam; [`VisionOcr`] implements it with a vision LLM:
//! each page is PNG-encoded, sent with the transcription prompt from
//! [`crate::prompts`], and retried with exponential backoff
//! (see [`crate::config::retry_backoff`]) on failure.

use crate::config::{retry_backoff, OcrConfig};
use crate::error::{ExtractionError, Pdf2SheetError};
use crate::prompts::OCR_SYSTEM_PROMPT;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Confidence reported for vision-model transcriptions, which carry no
/// per-token scores.
pub const VISION_OCR_CONFIDENCE: f32 = 0.6;

/// Text recognised on one page.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrPage {
    pub text: String,
    /// In `[0, 1]`.
    pub confidence: f32,
}

/// Recognises text on a rendered page.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// `page_num` is 1-indexed and only used for logging and errors.
    async fn recognize(&self, page_num: usize, image: &DynamicImage) -> Result<OcrPage, ExtractionError>;
}

/// Encode a rendered page for the vision API as a base64, 8-bit grayscale
/// PNG.
pub fn encode_page(page_num: usize, img: &DynamicImage) -> Result<ImageData, ExtractionError> {
    let gray = DynamicImage::ImageLuma8(img.to_luma8());
    let mut png = Vec::new();
    gray.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| ExtractionError::Rasterisation {
            page: page_num,
            detail: format!("PNG encoding failed: {e}"),
        })?;
    debug!(
        "OCR page {}: {}x{} grayscale PNG, {} bytes",
        page_num,
        gray.width(),
        gray.height(),
        png.len()
    );
    Ok(ImageData::new(STANDARD.encode(&png), "image/png").with_detail("high"))
}

/// Vision-LLM OCR engine.
pub struct VisionOcr {
    provider: Arc<dyn LLMProvider>,
    config: OcrConfig,
}

impl VisionOcr {
    pub fn new(provider: Arc<dyn LLMProvider>, config: OcrConfig) -> Self {
        Self { provider, config }
    }

    /// Resolve the provider from config, then environment, as the CLI does.
    ///
    /// Priority:
    /// 1. `config.provider` (pre-built)
    /// 2. `config.provider_name` + `config.model`
    /// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` env vars
    /// 4. `ProviderFactory::from_env()` auto-detection
    pub fn from_config(config: &OcrConfig) -> Result<Self, Pdf2SheetError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config.clone()))
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
            ..Default::default()
        }
    }
}

fn resolve_provider(config: &OcrConfig) -> Result<Arc<dyn LLMProvider>, Pdf2SheetError> {
    if let Some(ref p) = config.provider {
        return Ok(Arc::clone(p));
    }

    let default_model = "gpt-4.1-nano";

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(default_model);
        return ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            Pdf2SheetError::InvalidConfig(format!("OCR provider '{name}' is not configured: {e}"))
        });
    }

    if let Ok(name) = std::env::var("EDGEQUAKE_LLM_PROVIDER") {
        let model = config
            .model
            .clone()
            .or_else(|| std::env::var("EDGEQUAKE_MODEL").ok())
            .unwrap_or_else(|| default_model.to_string());
        info!("OCR provider from env: {} / {}", name, model);
        return ProviderFactory::create_llm_provider(&name, &model).map_err(|e| {
            Pdf2SheetError::InvalidConfig(format!("OCR provider '{name}' is not configured: {e}"))
        });
    }

    let (llm, _embedding) = ProviderFactory::from_env().map_err(|e| {
        Pdf2SheetError::InvalidConfig(format!(
            "no OCR provider configured ({e}); set OPENAI_API_KEY, ANTHROPIC_API_KEY or GEMINI_API_KEY"
        ))
    })?;
    Ok(llm)
}

#[async_trait]
impl OcrEngine for VisionOcr {
    async fn recognize(&self, page_num: usize, image: &DynamicImage) -> Result<OcrPage, ExtractionError> {
        let start = Instant::now();
        let image_data = encode_page(page_num, image)?;

        let system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(OCR_SYSTEM_PROMPT);
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user_with_images("", vec![image_data]),
        ];
        let options = self.options();

        let mut last_err: Option<String> = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = retry_backoff(self.config.retry_backoff_ms, attempt);
                warn!(
                    "OCR page {}: retry {}/{} after {:?}",
                    page_num, attempt, self.config.max_retries, backoff
                );
                sleep(backoff).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "OCR page {}: {} input tokens, {} output tokens, {:?}",
                        page_num,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(OcrPage {
                        text: response.content,
                        confidence: VISION_OCR_CONFIDENCE,
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    warn!("OCR page {}: attempt {} failed: {}", page_num, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(ExtractionError::Ocr {
            page: page_num,
            detail: last_err.unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}
