use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct Appearance {
    pub gender: String,
    pub hair: String,
    pub eyes: String,
    pub clothing: String,
    pub age: String,
}

/// Identifying attributes shared by every item of a batch once pinned.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct CharacterIdentity {
    pub character_id: String,
    pub appearance: Appearance,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct SceneDetails {
    pub context: String,
    pub action: String,
}

/// Full description consumed by the image model.
///
/// Serializes flat, i.e. `{character_id, appearance, scene, style}`.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct StructuredPrompt {
    #[serde(flatten)]
    pub identity: CharacterIdentity,
    pub scene: SceneDetails,
    pub style: String,
}

impl StructuredPrompt {
    /// Names of required fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let a = &self.identity.appearance;
        [
            ("character_id", self.identity.character_id.as_str()),
            ("appearance.gender", a.gender.as_str()),
            ("appearance.hair", a.hair.as_str()),
            ("appearance.eyes", a.eyes.as_str()),
            ("appearance.clothing", a.clothing.as_str()),
            ("appearance.age", a.age.as_str()),
            ("scene.context", self.scene.context.as_str()),
            ("scene.action", self.scene.action.as_str()),
            ("style", self.style.as_str()),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect()
    }

    pub fn to_pretty_json(&self) -> String {
        // Plain string fields only, serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ItemStatus {
    #[default]
    Pending,
    Analyzing,
    Generating,
    Complete,
    Error,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Complete | ItemStatus::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Analyzing => "analyzing",
            ItemStatus::Generating => "generating",
            ItemStatus::Complete => "complete",
            ItemStatus::Error => "error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl GeneratedImage {
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_deref() {
            Some("image/jpeg") | Some("image/jpg") => "jpg",
            Some("image/webp") => "webp",
            _ => "png",
        }
    }
}

/// One unit of work in a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SceneItem {
    pub id: usize,
    pub scene_text: String,
    pub prompt: Option<StructuredPrompt>,
    pub image: Option<GeneratedImage>,
    pub status: ItemStatus,
    pub error: Option<String>,
}

impl SceneItem {
    pub fn new(id: usize, scene_text: impl Into<String>) -> Self {
        Self {
            id,
            scene_text: scene_text.into(),
            prompt: None,
            image: None,
            status: ItemStatus::Pending,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StructuredPrompt {
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
                context: "beach at dusk".to_string(),
                action: "walking".to_string(),
            },
            style: "watercolor".to_string(),
        }
    }

    #[test]
    fn test_prompt_serializes_flat() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["character_id"], "hero_01");
        assert_eq!(value["appearance"]["hair"], "short red");
        assert_eq!(value["scene"]["action"], "walking");
        assert!(value.get("identity").is_none());
    }

    #[test]
    fn test_missing_fields() {
        let mut prompt = sample();
        assert!(prompt.missing_fields().is_empty());

        prompt.style = "  ".to_string();
        prompt.identity.appearance.eyes.clear();
        assert_eq!(prompt.missing_fields(), vec!["appearance.eyes", "style"]);
    }

    #[test]
    fn test_image_extension() {
        let mut image = GeneratedImage { bytes: vec![1], mime_type: None };
        assert_eq!(image.extension(), "png");
        image.mime_type = Some("image/jpeg".to_string());
        assert_eq!(image.extension(), "jpg");
    }
}
