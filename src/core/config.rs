use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::image::ImageConfig;
use crate::services::llm::LlmConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_input")]
    pub input_file: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    /// Skip the interactive review after a run.
    #[serde(default)]
    pub unattended: bool,

    /// Style hint handed to the prompt model.
    #[serde(default = "default_style")]
    pub style: String,

    pub llm: LlmConfig,

    pub image: ImageConfig,
}

fn default_input() -> String {
    "scenes.json".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_style() -> String {
    "consistent character illustration, soft cinematic lighting".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let yaml = r#"
llm:
  provider: gemini
  gemini:
    api_key: key
    model: gemini-2.5-flash
image:
  provider: gemini
  gemini:
    api_key: key
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.input_file, "scenes.json");
        assert_eq!(config.output_folder, "output");
        assert!(!config.unattended);
        assert!(!config.style.is_empty());
        assert_eq!(config.llm.provider, "gemini");
        assert_eq!(config.image.gemini.as_ref().unwrap().model, "gemini-2.5-flash-image");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("config.yml")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(
            &path,
            "input_file: batch.json\nunattended: true\nllm:\n  provider: ollama\n  ollama:\n    base_url: http://localhost:11434/\n    model: llama3\nimage:\n  provider: openai\n  openai:\n    api_key: sk\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.input_file, "batch.json");
        assert!(config.unattended);
        assert_eq!(config.image.openai.as_ref().unwrap().model, "gpt-image-1");
    }
}
