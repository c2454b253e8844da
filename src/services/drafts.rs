use crate::core::state::SceneItem;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Draft {
    /// Stored prompt the draft was started from.
    base: String,
    text: String,
}

/// Unsaved prompt edits, keyed by item id.
///
/// A draft survives re-renders and pipeline events until the item's stored
/// prompt changes underneath it, at which point it restarts from the new
/// prompt.
#[derive(Debug, Default)]
pub struct PromptDrafts {
    entries: HashMap<usize, Draft>,
}

impl PromptDrafts {
    /// Current editor text for the item.
    pub fn text_for(&mut self, item: &SceneItem) -> String {
        let base = item
            .prompt
            .as_ref()
            .map(|p| p.to_pretty_json())
            .unwrap_or_default();
        let draft = self.entries.entry(item.id).or_insert_with(|| Draft {
            base: base.clone(),
            text: base.clone(),
        });
        if draft.base != base {
            draft.text = base.clone();
            draft.base = base;
        }
        draft.text.clone()
    }

    pub fn edit(&mut self, id: usize, text: String) {
        if let Some(draft) = self.entries.get_mut(&id) {
            draft.text = text;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Appearance, CharacterIdentity, SceneDetails, StructuredPrompt};

    fn with_context(context: &str) -> SceneItem {
        let mut item = SceneItem::new(0, "beach");
        item.prompt = Some(StructuredPrompt {
            identity: CharacterIdentity {
                character_id: "hero_01".to_string(),
                appearance: Appearance::default(),
            },
            scene: SceneDetails {
                context: context.to_string(),
                action: "standing".to_string(),
            },
            style: "ink".to_string(),
        });
        item
    }

    #[test]
    fn test_edits_survive_rerenders() {
        let mut drafts = PromptDrafts::default();
        let item = with_context("beach");
        assert!(drafts.text_for(&item).contains("\"context\": \"beach\""));

        drafts.edit(0, "half typed {".to_string());
        // Same stored prompt, e.g. another item's event triggered a re-render.
        assert_eq!(drafts.text_for(&item), "half typed {");
        assert_eq!(drafts.text_for(&item.clone()), "half typed {");
    }

    #[test]
    fn test_draft_restarts_when_prompt_changes() {
        let mut drafts = PromptDrafts::default();
        let bare = SceneItem::new(0, "beach");
        assert_eq!(drafts.text_for(&bare), "");

        let analyzed = with_context("beach");
        assert!(drafts.text_for(&analyzed).contains("beach"));
        drafts.edit(0, "scratch".to_string());

        let regenerated = with_context("dunes");
        assert!(drafts.text_for(&regenerated).contains("dunes"));
    }

    #[test]
    fn test_clear_and_unknown_ids() {
        let mut drafts = PromptDrafts::default();
        let item = with_context("beach");
        drafts.edit(0, "ignored before first read".to_string());
        assert!(drafts.text_for(&item).contains("beach"));

        drafts.edit(0, "scratch".to_string());
        drafts.clear();
        assert!(drafts.text_for(&item).contains("beach"));
    }
}
