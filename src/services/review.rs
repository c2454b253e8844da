use crate::core::error::PipelineError;
use crate::core::state::{ItemStatus, SceneItem};
use crate::services::pipeline::BatchPipeline;
use anyhow::Result;
use inquire::{Confirm, Editor, Select};

const DONE: &str = "Done";

fn describe(item: &SceneItem) -> String {
    let mut line = format!(
        "#{} [{}] {}",
        item.id + 1,
        item.status.label(),
        item.scene_text.chars().take(60).collect::<String>()
    );
    if let Some(err) = &item.error {
        line.push_str(&format!(" ({})", err.chars().take(60).collect::<String>()));
    }
    line
}

/// Lets the user edit analyzed items' prompts and re-render them one by one.
/// Returns whether anything was regenerated.
pub async fn run_review(pipeline: &BatchPipeline) -> Result<bool> {
    let mut changed = false;

    loop {
        let snapshot = pipeline.snapshot();
        let editable: Vec<&SceneItem> = snapshot.items.iter().filter(|i| i.prompt.is_some()).collect();
        if editable.is_empty() {
            println!("No analyzed scenes to review.");
            return Ok(changed);
        }

        let mut options: Vec<String> = editable.iter().map(|i| describe(i)).collect();
        options.push(DONE.to_string());

        let choice = Select::new("Select a scene to edit and regenerate:", options)
            .with_page_size(15)
            .raw_prompt()?;
        let Some(item) = editable.get(choice.index) else {
            return Ok(changed);
        };

        let Some(prompt) = &item.prompt else {
            continue;
        };
        let edited = Editor::new("Edit the structured prompt:")
            .with_predefined_text(&prompt.to_pretty_json())
            .with_file_extension(".json")
            .prompt()?;

        if edited.trim() == prompt.to_pretty_json().trim()
            && item.status == ItemStatus::Complete
            && !Confirm::new("Prompt unchanged. Regenerate anyway?")
                .with_default(false)
                .prompt()?
        {
            continue;
        }

        println!("Regenerating scene #{}...", item.id + 1);
        match pipeline.regenerate(item.id, &edited).await {
            Ok(()) => {
                println!("Scene #{} regenerated.", item.id + 1);
                changed = true;
            }
            Err(e @ PipelineError::Edit(_)) => println!("{}", e),
            Err(e @ PipelineError::Synthesis(_)) => {
                println!("{}", e);
                changed = true;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
