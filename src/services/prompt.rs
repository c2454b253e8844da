use crate::core::state::{CharacterIdentity, StructuredPrompt};
use crate::services::llm::LlmClient;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

#[cfg(target_arch = "wasm32")]
pub trait SynthBounds {}
#[cfg(target_arch = "wasm32")]
impl<T> SynthBounds for T {}

#[cfg(not(target_arch = "wasm32"))]
pub trait SynthBounds: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync> SynthBounds for T {}

/// Scene text (plus an optional pinned identity) to structured prompt.
///
/// With an identity, implementations must return it unchanged and only fill
/// `scene` and `style`.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait PromptSynthesizer: SynthBounds {
    async fn synthesize_prompt(
        &self,
        scene: &str,
        identity: Option<&CharacterIdentity>,
    ) -> Result<StructuredPrompt>;
}

const SYSTEM_PROMPT: &str = "You are a character designer for an illustrated story. \
Reply with exactly one JSON object of the shape \
{\"character_id\": \"...\", \"appearance\": {\"gender\": \"...\", \"hair\": \"...\", \"eyes\": \"...\", \"clothing\": \"...\", \"age\": \"...\"}, \
\"scene\": {\"context\": \"...\", \"action\": \"...\"}, \"style\": \"...\"}. \
Every field is a non-empty string. Do not add commentary.";

pub struct LlmPromptSynthesizer {
    llm: Box<dyn LlmClient>,
    style_hint: String,
}

impl LlmPromptSynthesizer {
    pub fn new(llm: Box<dyn LlmClient>, style_hint: impl Into<String>) -> Self {
        Self {
            llm,
            style_hint: style_hint.into(),
        }
    }

    fn user_prompt(&self, scene: &str, identity: Option<&CharacterIdentity>) -> Result<String> {
        let character_block = match identity {
            Some(identity) => format!(
                "The character is already fixed. Copy this character_id and appearance into your answer exactly as given:\n{}\n\
                 Only describe the scene and style for the new description.",
                serde_json::to_string_pretty(identity)?
            ),
            None => "Invent a memorable main character that fits the description. \
                     Use a short snake_case character_id such as \"hero_01\"."
                .to_string(),
        };

        Ok(format!(
            "{}\n\nPreferred style: {}\n\nScene description:\n{}",
            character_block, self.style_hint, scene
        ))
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl PromptSynthesizer for LlmPromptSynthesizer {
    async fn synthesize_prompt(
        &self,
        scene: &str,
        identity: Option<&CharacterIdentity>,
    ) -> Result<StructuredPrompt> {
        let user = self.user_prompt(scene, identity)?;
        let response = self.llm.chat(SYSTEM_PROMPT, &user).await?;
        let mut prompt = parse_structured_prompt(&response)?;

        if let Some(identity) = identity {
            if prompt.identity != *identity {
                log::warn!(
                    "Model altered pinned character {}; restoring it",
                    identity.character_id
                );
                prompt.identity = identity.clone();
            }
        }

        Ok(prompt)
    }
}

/// Parses model or user text into a complete structured prompt.
pub fn parse_structured_prompt(text: &str) -> Result<StructuredPrompt> {
    let clean_json = strip_code_blocks(text);
    let prompt: StructuredPrompt = serde_json::from_str(&clean_json)
        .context(format!("Failed to parse structured prompt JSON: {}", clean_json))?;

    let missing = prompt.missing_fields();
    if !missing.is_empty() {
        return Err(anyhow!(
            "Structured prompt is incomplete, empty fields: {}",
            missing.join(", ")
        ));
    }
    Ok(prompt)
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    const HERO: &str = r#"{
        "character_id": "hero_01",
        "appearance": {"gender": "female", "hair": "short red", "eyes": "green", "clothing": "leather jacket", "age": "30s"},
        "scene": {"context": "beach at dusk", "action": "walking"},
        "style": "watercolor"
    }"#;

    #[derive(Debug)]
    struct ScriptedLlm {
        reply: String,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.reply.clone())
        }
    }

    fn synthesizer(reply: &str) -> LlmPromptSynthesizer {
        LlmPromptSynthesizer::new(
            Box::new(ScriptedLlm { reply: reply.to_string() }),
            "ink",
        )
    }

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_blocks("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_blocks("  {}  "), "{}");
    }

    #[test]
    fn test_parse_fenced_prompt() {
        let prompt = parse_structured_prompt(&format!("```json\n{}\n```", HERO)).unwrap();
        assert_eq!(prompt.identity.character_id, "hero_01");
        assert_eq!(prompt.scene.context, "beach at dusk");
    }

    #[test]
    fn test_parse_rejects_missing_and_blank_fields() {
        assert!(parse_structured_prompt(r#"{"character_id": "x", "style": "y"}"#).is_err());

        let blank = HERO.replace("\"watercolor\"", "\"\"");
        let err = parse_structured_prompt(&blank).unwrap_err();
        assert!(err.to_string().contains("style"));
    }

    #[tokio::test]
    async fn test_first_call_has_no_identity() {
        let synth = synthesizer(HERO);
        let prompt = synth.synthesize_prompt("a hero walks on the beach", None).await.unwrap();
        assert_eq!(prompt.identity.character_id, "hero_01");
    }

    #[tokio::test]
    async fn test_pinned_identity_is_restored() {
        let synth = synthesizer(&HERO.replace("short red", "long blond"));
        let pinned = parse_structured_prompt(HERO).unwrap().identity;

        let prompt = synth
            .synthesize_prompt("a hero sits by a fire", Some(&pinned))
            .await
            .unwrap();
        assert_eq!(prompt.identity, pinned);
        assert_eq!(prompt.identity.appearance.hair, "short red");
    }

    #[test]
    fn test_pinned_identity_embedded_in_request() {
        let synth = synthesizer(HERO);
        let pinned = parse_structured_prompt(HERO).unwrap().identity;

        let llm_prompt = synth.user_prompt("by the fire", Some(&pinned)).unwrap();
        assert!(llm_prompt.contains("\"character_id\": \"hero_01\""));
        assert!(llm_prompt.contains("Preferred style: ink"));
        assert!(llm_prompt.ends_with("by the fire"));
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_error() {
        let synth = synthesizer("Sure! Here is your character.");
        assert!(synth.synthesize_prompt("x", None).await.is_err());
    }
}
