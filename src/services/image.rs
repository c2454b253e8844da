use crate::core::state::{GeneratedImage, StructuredPrompt};
use crate::services::prompt::SynthBounds;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    pub provider: String, // "gemini" or "openai"
    pub gemini: Option<GeminiImageConfig>,
    pub openai: Option<OpenAIImageConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiImageConfig {
    pub api_key: String,
    #[serde(default = "default_gemini_image_model")]
    pub model: String,
    pub aspect_ratio: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIImageConfig {
    pub api_key: String,
    #[serde(default = "default_openai_image_model")]
    pub model: String,
    #[serde(default = "default_openai_size")]
    pub size: String,
    pub base_url: Option<String>,
}

fn default_gemini_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}
fn default_openai_image_model() -> String {
    "gpt-image-1".to_string()
}
fn default_openai_size() -> String {
    "1024x1024".to_string()
}

/// Structured prompt to one rendered picture.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait ImageSynthesizer: SynthBounds {
    async fn synthesize_image(&self, prompt: &StructuredPrompt) -> Result<GeneratedImage>;
}

pub fn create_image_synthesizer(config: &ImageConfig) -> Result<Box<dyn ImageSynthesizer>> {
    match config.provider.as_str() {
        "gemini" => {
            let cfg = config.gemini.as_ref().context("Gemini image config missing")?;
            Ok(Box::new(GeminiImageClient::new(cfg.clone())))
        }
        "openai" => {
            let cfg = config.openai.as_ref().context("OpenAI image config missing")?;
            Ok(Box::new(OpenAIImageClient::new(cfg.clone())))
        }
        _ => Err(anyhow!("Unknown image provider: {}", config.provider)),
    }
}

/// Text handed to the image model: instruction plus the prompt document.
pub fn render_image_prompt(prompt: &StructuredPrompt) -> String {
    format!(
        "Draw a single illustration of the character described below. Keep the character's \
         appearance exactly as specified so it matches other images of {}.\n\n{}",
        prompt.identity.character_id,
        prompt.to_pretty_json()
    )
}

// --- Gemini ---

struct GeminiImageClient {
    config: GeminiImageConfig,
    client: reqwest::Client,
}

impl GeminiImageClient {
    fn new(config: GeminiImageConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn payload(&self, prompt: &StructuredPrompt) -> Value {
        let mut generation_config = json!({ "responseModalities": ["IMAGE"] });
        if let Some(ratio) = self.config.aspect_ratio.as_deref() {
            generation_config["imageConfig"] = json!({ "aspectRatio": ratio });
        }
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": render_image_prompt(prompt) }],
            }],
            "generationConfig": generation_config,
        })
    }
}

/// Pulls the first inline image out of a `generateContent` response.
fn extract_gemini_image(payload: &Value) -> Result<GeneratedImage> {
    if let Some(message) = payload.pointer("/error/message").and_then(Value::as_str) {
        bail!("Gemini API returned error: {}", message);
    }

    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for candidate in &candidates {
        let parts = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) else {
                continue;
            };
            let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64
                .decode(data.as_bytes())
                .context("Gemini image base64 decode failed")?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(GeneratedImage { bytes, mime_type });
        }
    }

    let reason = candidates
        .first()
        .and_then(|c| c.get("finishReason"))
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN");
    Err(anyhow!("Gemini returned no image. Finish reason: {}", reason))
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl ImageSynthesizer for GeminiImageClient {
    async fn synthesize_image(&self, prompt: &StructuredPrompt) -> Result<GeneratedImage> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.config.model, self.config.api_key
        );

        let resp = self
            .client
            .post(&url)
            .json(&self.payload(prompt))
            .send()
            .await
            .context("Gemini image request failed")?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini image API error: {}", error_text));
        }

        let payload: Value = resp.json().await.context("Failed to parse Gemini image response")?;
        extract_gemini_image(&payload)
    }
}

// --- OpenAI ---

struct OpenAIImageClient {
    config: OpenAIImageConfig,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIImageClient {
    fn new(config: OpenAIImageConfig) -> Self {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/')
            .to_string();
        Self {
            config,
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ImagesGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'static str>,
}

/// `gpt-image-*` models always answer with base64 and reject the field;
/// older models default to URLs unless asked for `b64_json`.
fn response_format(model: &str) -> Option<&'static str> {
    if model.starts_with("gpt-image") {
        None
    } else {
        Some("b64_json")
    }
}

#[derive(Deserialize)]
struct ImagesGenerateResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

fn extract_openai_image(response: ImagesGenerateResponse) -> Result<GeneratedImage> {
    let b64 = response
        .data
        .into_iter()
        .find_map(|d| d.b64_json)
        .context("OpenAI returned no image data")?;
    let bytes = BASE64
        .decode(b64.as_bytes())
        .context("OpenAI image base64 decode failed")?;
    Ok(GeneratedImage {
        bytes,
        mime_type: Some("image/png".to_string()),
    })
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl ImageSynthesizer for OpenAIImageClient {
    async fn synthesize_image(&self, prompt: &StructuredPrompt) -> Result<GeneratedImage> {
        let url = format!("{}/images/generations", self.base_url);
        let text = render_image_prompt(prompt);
        let body = ImagesGenerateRequest {
            model: &self.config.model,
            prompt: &text,
            n: 1,
            size: &self.config.size,
            response_format: response_format(&self.config.model),
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("Request to /images/generations failed")?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI image API error: {}", error_text));
        }

        let parsed: ImagesGenerateResponse = resp
            .json()
            .await
            .context("Failed to parse /images/generations JSON")?;
        extract_openai_image(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Appearance, CharacterIdentity, SceneDetails};

    fn prompt() -> StructuredPrompt {
        StructuredPrompt {
            identity: CharacterIdentity {
                character_id: "hero_01".to_string(),
                appearance: Appearance {
                    gender: "female".to_string(),
                    hair: "short red".to_string(),
                    eyes: "green".to_string(),
                    clothing: "leather jacket".to_string(),
                    age: "30s".to_string(),
                },
            },
            scene: SceneDetails {
                context: "beach".to_string(),
                action: "walking".to_string(),
            },
            style: "watercolor".to_string(),
        }
    }

    #[test]
    fn test_extract_gemini_inline_image() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(b"PNGDATA") } }
                ]},
                "finishReason": "STOP"
            }]
        });
        let image = extract_gemini_image(&payload).unwrap();
        assert_eq!(image.bytes, b"PNGDATA");
        assert_eq!(image.mime_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_extract_gemini_no_image() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "I can't draw that" }] },
                "finishReason": "IMAGE_SAFETY"
            }]
        });
        let err = extract_gemini_image(&payload).unwrap_err();
        assert!(err.to_string().contains("IMAGE_SAFETY"));

        let err = extract_gemini_image(&json!({ "error": { "message": "quota" } })).unwrap_err();
        assert!(err.to_string().contains("quota"));
    }

    #[test]
    fn test_gemini_payload_requests_image_modality() {
        let client = GeminiImageClient::new(GeminiImageConfig {
            api_key: "k".to_string(),
            model: default_gemini_image_model(),
            aspect_ratio: Some("3:4".to_string()),
        });
        let payload = client.payload(&prompt());
        assert_eq!(payload["generationConfig"]["responseModalities"][0], "IMAGE");
        assert_eq!(payload["generationConfig"]["imageConfig"]["aspectRatio"], "3:4");
        let text = payload["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(text.contains("\"character_id\": \"hero_01\""));
    }

    #[test]
    fn test_extract_openai_image() {
        let response: ImagesGenerateResponse = serde_json::from_value(json!({
            "created": 1,
            "data": [{ "b64_json": BASE64.encode(b"IMG") }]
        }))
        .unwrap();
        assert_eq!(extract_openai_image(response).unwrap().bytes, b"IMG");

        let empty: ImagesGenerateResponse = serde_json::from_value(json!({ "data": [] })).unwrap();
        assert!(extract_openai_image(empty).is_err());
    }

    #[test]
    fn test_unknown_provider() {
        let config = ImageConfig {
            provider: "paint".to_string(),
            gemini: None,
            openai: None,
        };
        assert!(create_image_synthesizer(&config).is_err());
    }

    #[test]
    fn test_openai_request_asks_for_base64_only_when_needed() {
        let request = |model: &'static str| ImagesGenerateRequest {
            model,
            prompt: "a knight",
            n: 1,
            size: "1024x1024",
            response_format: response_format(model),
        };

        let dalle = serde_json::to_value(request("dall-e-3")).unwrap();
        assert_eq!(dalle["response_format"], "b64_json");

        let gpt_image = serde_json::to_value(request("gpt-image-1")).unwrap();
        assert!(gpt_image.get("response_format").is_none());
        assert_eq!(gpt_image["model"], "gpt-image-1");
    }
}
