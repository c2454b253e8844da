use crate::core::io::Storage;
use crate::core::state::{CharacterIdentity, ItemStatus, SceneItem};
use crate::services::pipeline::BatchSnapshot;
use anyhow::Result;
use serde::Serialize;
use std::path::Path;

/// Artifact stem for an item: `{character}_{position:03}`, position 1-based.
///
/// The pinned character names the file; without one the item's own
/// character is used, then `scene`.
pub fn artifact_stem(identity: Option<&CharacterIdentity>, item: &SceneItem) -> String {
    let character = identity
        .map(|i| i.character_id.as_str())
        .or_else(|| item.prompt.as_ref().map(|p| p.identity.character_id.as_str()))
        .map(sanitize)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "scene".to_string());
    format!("{}_{:03}", character, item.id + 1)
}

/// File name for the item's image, `None` unless the item is `Complete`.
pub fn image_file_name(identity: Option<&CharacterIdentity>, item: &SceneItem) -> Option<String> {
    if item.status != ItemStatus::Complete {
        return None;
    }
    let image = item.image.as_ref()?;
    Some(format!("{}.{}", artifact_stem(identity, item), image.extension()))
}

fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[derive(Serialize, Debug)]
pub struct Manifest<'a> {
    pub character: Option<&'a CharacterIdentity>,
    pub items: Vec<ManifestEntry<'a>>,
}

#[derive(Serialize, Debug)]
pub struct ManifestEntry<'a> {
    pub position: usize,
    pub scene: &'a str,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

pub fn build_manifest(snapshot: &BatchSnapshot) -> Manifest<'_> {
    let identity = snapshot.identity.as_ref();
    Manifest {
        character: identity,
        items: snapshot
            .items
            .iter()
            .map(|item| ManifestEntry {
                position: item.id + 1,
                scene: &item.scene_text,
                status: item.status,
                error: item.error.as_deref(),
                image: image_file_name(identity, item),
            })
            .collect(),
    }
}

/// Writes every rendered image with its prompt sidecar, then `manifest.json`.
/// Returns the number of images written.
pub async fn export_batch(
    snapshot: &BatchSnapshot,
    output_folder: &str,
    storage: &dyn Storage,
) -> Result<usize> {
    let identity = snapshot.identity.as_ref();
    let mut written = 0;

    for item in &snapshot.items {
        let (Some(image), Some(file_name)) = (&item.image, image_file_name(identity, item)) else {
            continue;
        };
        let image_path = Path::new(output_folder).join(&file_name);
        storage.write(&image_path.to_string_lossy(), &image.bytes).await?;

        if let Some(prompt) = &item.prompt {
            let sidecar = Path::new(output_folder)
                .join(format!("{}.json", artifact_stem(identity, item)));
            storage
                .write(&sidecar.to_string_lossy(), prompt.to_pretty_json().as_bytes())
                .await?;
        }
        log::debug!("Exported {}", file_name);
        written += 1;
    }

    let manifest = serde_json::to_string_pretty(&build_manifest(snapshot))?;
    let manifest_path = Path::new(output_folder).join("manifest.json");
    storage.write(&manifest_path.to_string_lossy(), manifest.as_bytes()).await?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Appearance, GeneratedImage, SceneDetails, StructuredPrompt};

    fn identity(id: &str) -> CharacterIdentity {
        CharacterIdentity {
            character_id: id.to_string(),
            appearance: Appearance::default(),
        }
    }

    fn rendered(id: usize, character: &str, mime: &str) -> SceneItem {
        let mut item = SceneItem::new(id, format!("scene {}", id));
        item.prompt = Some(StructuredPrompt {
            identity: identity(character),
            scene: SceneDetails::default(),
            style: "ink".to_string(),
        });
        item.image = Some(GeneratedImage {
            bytes: vec![id as u8],
            mime_type: Some(mime.to_string()),
        });
        item.status = ItemStatus::Complete;
        item
    }

    #[test]
    fn test_file_names_use_pinned_character_and_position() {
        let pinned = identity("hero_01");
        let item = rendered(0, "someone_else", "image/png");
        assert_eq!(image_file_name(Some(&pinned), &item).unwrap(), "hero_01_001.png");

        let item = rendered(11, "x", "image/jpeg");
        assert_eq!(image_file_name(Some(&pinned), &item).unwrap(), "hero_01_012.jpg");
    }

    #[test]
    fn test_file_name_fallbacks() {
        let item = rendered(2, "Lady Grey/II", "image/png");
        assert_eq!(image_file_name(None, &item).unwrap(), "Lady_Grey_II_003.png");

        let bare = SceneItem::new(4, "nothing yet");
        assert_eq!(artifact_stem(None, &bare), "scene_005");
        assert!(image_file_name(None, &bare).is_none());
    }

    #[test]
    fn test_manifest_lists_every_item() {
        let mut failed = SceneItem::new(1, "bad");
        failed.status = ItemStatus::Error;
        failed.error = Some("no image payload".to_string());
        let snapshot = BatchSnapshot {
            items: vec![rendered(0, "hero_01", "image/png"), failed],
            identity: Some(identity("hero_01")),
            processed: 2,
            running: false,
        };

        let value = serde_json::to_value(build_manifest(&snapshot)).unwrap();
        assert_eq!(value["character"]["character_id"], "hero_01");
        assert_eq!(value["items"][0]["image"], "hero_01_001.png");
        assert_eq!(value["items"][1]["status"], "Error");
        assert_eq!(value["items"][1]["error"], "no image payload");
        assert!(value["items"][1].get("image").is_none());
    }

    #[test]
    fn test_only_complete_items_get_file_names() {
        let pinned = identity("hero_01");
        let mut item = rendered(0, "hero_01", "image/png");
        item.status = ItemStatus::Error;
        item.error = Some("render failed".to_string());
        assert!(image_file_name(Some(&pinned), &item).is_none());

        item.status = ItemStatus::Generating;
        assert!(image_file_name(Some(&pinned), &item).is_none());
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[tokio::test]
    async fn test_export_writes_images_sidecars_and_manifest() {
        use crate::core::io::NativeStorage;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_str().unwrap();
        let snapshot = BatchSnapshot {
            items: vec![
                rendered(0, "hero_01", "image/png"),
                SceneItem::new(1, "still pending"),
                rendered(2, "hero_01", "image/webp"),
            ],
            identity: Some(identity("hero_01")),
            processed: 2,
            running: false,
        };

        let storage = NativeStorage::new();
        let written = export_batch(&snapshot, out, &storage).await.unwrap();
        assert_eq!(written, 2);

        assert_eq!(std::fs::read(dir.path().join("hero_01_001.png")).unwrap(), vec![0]);
        assert!(dir.path().join("hero_01_003.webp").exists());
        let sidecar = std::fs::read_to_string(dir.path().join("hero_01_001.json")).unwrap();
        assert!(sidecar.contains("\"character_id\": \"hero_01\""));
        assert!(!dir.path().join("hero_01_002.json").exists());
        assert!(dir.path().join("manifest.json").exists());
    }
}
