#[cfg(not(target_arch = "wasm32"))]
mod cli {
    use anyhow::Result;
    use indicatif::{ProgressBar, ProgressStyle};
    use scenebatch::core::config::Config;
    use scenebatch::core::io::{NativeStorage, Storage};
    use scenebatch::core::state::ItemStatus;
    use scenebatch::services::export::export_batch;
    use scenebatch::services::image::create_image_synthesizer;
    use scenebatch::services::llm::create_llm;
    use scenebatch::services::pipeline::{BatchPipeline, PipelineEvent, PipelineObserver};
    use scenebatch::services::prompt::LlmPromptSynthesizer;
    use scenebatch::services::review::run_review;
    use std::sync::Arc;

    struct ProgressReporter {
        bar: ProgressBar,
    }

    impl PipelineObserver for ProgressReporter {
        fn on_event(&self, event: &PipelineEvent) {
            match event {
                PipelineEvent::RunStarted { total } => {
                    self.bar.set_length(*total as u64);
                    self.bar.set_position(0);
                }
                PipelineEvent::ItemStarted { index, status } => {
                    self.bar.set_message(format!("#{} {}", index + 1, status.label()));
                }
                PipelineEvent::IdentityPinned(identity) => {
                    self.bar.println(format!("Character pinned: {}", identity.character_id));
                }
                PipelineEvent::ItemFinished { index, status, processed } => {
                    if *status == ItemStatus::Error {
                        self.bar.println(format!("Scene #{} failed", index + 1));
                    }
                    self.bar.set_position(*processed as u64);
                }
                PipelineEvent::RunFinished(_) => self.bar.finish_with_message("Batch complete"),
                PipelineEvent::RunAbandoned => self.bar.abandon_with_message("Batch abandoned"),
            }
        }
    }

    pub async fn run() -> Result<()> {
        let config = match Config::load() {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config: {:#}", e);
                eprintln!("Please ensure 'config.yml' exists with valid llm and image settings.");
                return Err(e);
            }
        };
        config.ensure_directories()?;

        let storage = NativeStorage::new();
        let raw = storage.read_to_string(&config.input_file).await?;

        let llm = create_llm(&config.llm)?;
        let prompts = LlmPromptSynthesizer::new(llm, config.style.clone());
        let images = create_image_synthesizer(&config.image)?;

        let bar = ProgressBar::new(0);
        bar.set_style(ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"));

        let pipeline = BatchPipeline::new(Arc::new(prompts), Arc::from(images))
            .with_observer(Arc::new(ProgressReporter { bar }));

        let count = pipeline.load(&raw)?;
        println!("Loaded {} scenes from {}", count, config.input_file);

        let summary = pipeline.run().await?;
        println!(
            "{} of {} scenes complete, {} failed.",
            summary.completed, summary.total, summary.failed
        );

        for item in pipeline.snapshot().items.iter().filter(|i| i.status == ItemStatus::Error) {
            println!(
                "  #{}: {}",
                item.id + 1,
                item.error.as_deref().unwrap_or("unknown error")
            );
        }

        let written = export_batch(&pipeline.snapshot(), &config.output_folder, &storage).await?;
        println!("Exported {} images to {}", written, config.output_folder);

        if !config.unattended && run_review(&pipeline).await? {
            let written = export_batch(&pipeline.snapshot(), &config.output_folder, &storage).await?;
            println!("Re-exported {} images to {}", written, config.output_folder);
        }

        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    cli::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
