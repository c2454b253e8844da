use crate::core::error::PipelineError;
use crate::core::state::{CharacterIdentity, ItemStatus, SceneItem, StructuredPrompt};
use crate::services::image::ImageSynthesizer;
use crate::services::parser::parse_batch;
use crate::services::prompt::{parse_structured_prompt, PromptSynthesizer, SynthBounds};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mutable batch state. Only the pipeline touches it, and never across an await.
#[derive(Debug, Default)]
struct BatchContext {
    items: Vec<SceneItem>,
    identity: Option<CharacterIdentity>,
    processed: usize,
    generation: u64,
    running: bool,
}

impl BatchContext {
    fn replace(&mut self, items: Vec<SceneItem>) {
        self.items = items;
        self.identity = None;
        self.processed = 0;
        self.generation += 1;
        self.running = false;
    }
}

/// Read-only copy of the batch for observers and front ends.
#[derive(Debug, Clone, Default)]
pub struct BatchSnapshot {
    pub items: Vec<SceneItem>,
    pub identity: Option<CharacterIdentity>,
    pub processed: usize,
    pub running: bool,
}

impl BatchSnapshot {
    pub fn total(&self) -> usize {
        self.items.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// The batch was reset or replaced while the run was in flight.
    pub abandoned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    RunStarted { total: usize },
    ItemStarted { index: usize, status: ItemStatus },
    IdentityPinned(CharacterIdentity),
    ItemFinished { index: usize, status: ItemStatus, processed: usize },
    RunFinished(RunSummary),
    RunAbandoned,
}

pub trait PipelineObserver: SynthBounds {
    fn on_event(&self, event: &PipelineEvent);
}

/// Clears the in-flight flag when a run ends or its future is dropped,
/// unless the batch it belonged to has been replaced meanwhile.
struct RunGuard<'a> {
    context: &'a Mutex<BatchContext>,
    generation: u64,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut ctx = self.context.lock().unwrap_or_else(PoisonError::into_inner);
        if ctx.generation == self.generation {
            ctx.running = false;
        }
    }
}

enum Step<T> {
    Continue(T),
    Stale,
}

/// Drives scene items through prompt and image synthesis, one at a time.
///
/// Cloning yields another handle onto the same batch, so a front end can keep
/// one for `reset`/`snapshot` while another is busy in `run`.
#[derive(Clone)]
pub struct BatchPipeline {
    prompts: Arc<dyn PromptSynthesizer>,
    images: Arc<dyn ImageSynthesizer>,
    observer: Option<Arc<dyn PipelineObserver>>,
    context: Arc<Mutex<BatchContext>>,
}

impl BatchPipeline {
    pub fn new(prompts: Arc<dyn PromptSynthesizer>, images: Arc<dyn ImageSynthesizer>) -> Self {
        Self {
            prompts,
            images,
            observer: None,
            context: Arc::new(Mutex::new(BatchContext::default())),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn lock(&self) -> MutexGuard<'_, BatchContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }

    /// Parses a batch document and replaces the current batch with it.
    /// On a validation error the current batch is left as it was.
    pub fn load(&self, raw: &str) -> Result<usize, PipelineError> {
        let items = parse_batch(raw)?;
        Ok(self.load_items(items))
    }

    pub fn load_items(&self, items: Vec<SceneItem>) -> usize {
        let count = items.len();
        self.lock().replace(items);
        log::info!("Loaded batch of {} scenes", count);
        count
    }

    /// Drops the batch, the pinned identity and progress. Any run still in
    /// flight stops touching state once its current call resolves.
    pub fn reset(&self) {
        self.lock().replace(Vec::new());
        log::info!("Batch reset");
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        let ctx = self.lock();
        BatchSnapshot {
            items: ctx.items.clone(),
            identity: ctx.identity.clone(),
            processed: ctx.processed,
            running: ctx.running,
        }
    }

    pub fn identity(&self) -> Option<CharacterIdentity> {
        self.lock().identity.clone()
    }

    /// Runs every pending item in order. Item 0's prompt pins the identity.
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let (generation, total) = {
            let mut ctx = self.lock();
            if ctx.running {
                return Err(PipelineError::Busy);
            }
            ctx.running = true;
            (ctx.generation, ctx.items.len())
        };
        let _guard = RunGuard {
            context: &self.context,
            generation,
        };

        log::info!("Starting batch run over {} scenes", total);
        self.emit(PipelineEvent::RunStarted { total });

        for index in 0..total {
            match self.process_item(generation, index).await {
                Step::Continue(()) => {}
                Step::Stale => {
                    log::info!("Batch replaced during run; abandoning at item {}", index);
                    self.emit(PipelineEvent::RunAbandoned);
                    return Ok(RunSummary {
                        total,
                        abandoned: true,
                        ..Default::default()
                    });
                }
            }
        }

        let summary = {
            let ctx = self.lock();
            RunSummary {
                total,
                completed: count_status(&ctx.items, ItemStatus::Complete),
                failed: count_status(&ctx.items, ItemStatus::Error),
                abandoned: false,
            }
        };
        log::info!(
            "Batch run finished: {} complete, {} failed",
            summary.completed,
            summary.failed
        );
        self.emit(PipelineEvent::RunFinished(summary));
        Ok(summary)
    }

    async fn process_item(&self, generation: u64, index: usize) -> Step<()> {
        let (scene, identity) = {
            let mut ctx = self.lock();
            if ctx.generation != generation {
                return Step::Stale;
            }
            let identity = ctx.identity.clone();
            let item = &mut ctx.items[index];
            if item.status != ItemStatus::Pending {
                return Step::Continue(());
            }
            item.status = ItemStatus::Analyzing;
            (item.scene_text.clone(), identity)
        };
        self.emit(PipelineEvent::ItemStarted {
            index,
            status: ItemStatus::Analyzing,
        });
        log::debug!("Analyzing scene {}: {}", index, scene);

        let analyzed = self
            .prompts
            .synthesize_prompt(&scene, identity.as_ref())
            .await;

        let prompt = match self.after_analysis(generation, index, analyzed) {
            Step::Continue(Some(prompt)) => prompt,
            Step::Continue(None) => return Step::Continue(()),
            Step::Stale => return Step::Stale,
        };

        let rendered = self.images.synthesize_image(&prompt).await;

        let (status, processed) = {
            let mut ctx = self.lock();
            if ctx.generation != generation {
                return Step::Stale;
            }
            let item = &mut ctx.items[index];
            match rendered {
                Ok(image) => {
                    item.image = Some(image);
                    item.status = ItemStatus::Complete;
                }
                Err(e) => {
                    log::warn!("Image synthesis failed for scene {}: {:#}", index, e);
                    item.error = Some(format!("{:#}", e));
                    item.status = ItemStatus::Error;
                }
            }
            let status = item.status;
            ctx.processed += 1;
            (status, ctx.processed)
        };
        self.emit(PipelineEvent::ItemFinished {
            index,
            status,
            processed,
        });
        Step::Continue(())
    }

    /// Records the prompt outcome. Yields the prompt to render, or `None`
    /// when the item ended in error.
    fn after_analysis(
        &self,
        generation: u64,
        index: usize,
        analyzed: anyhow::Result<StructuredPrompt>,
    ) -> Step<Option<StructuredPrompt>> {
        let mut pinned = None;
        let outcome = {
            let mut ctx = self.lock();
            if ctx.generation != generation {
                return Step::Stale;
            }
            match analyzed {
                Ok(prompt) => {
                    if index == 0 && ctx.identity.is_none() {
                        log::info!("Pinned character {}", prompt.identity.character_id);
                        ctx.identity = Some(prompt.identity.clone());
                        pinned = Some(prompt.identity.clone());
                    }
                    let item = &mut ctx.items[index];
                    item.prompt = Some(prompt.clone());
                    item.status = ItemStatus::Generating;
                    Ok(prompt)
                }
                Err(e) => {
                    log::warn!("Prompt synthesis failed for scene {}: {:#}", index, e);
                    let item = &mut ctx.items[index];
                    item.error = Some(format!("{:#}", e));
                    item.status = ItemStatus::Error;
                    ctx.processed += 1;
                    Err(ctx.processed)
                }
            }
        };

        match outcome {
            Ok(prompt) => {
                if let Some(identity) = pinned {
                    self.emit(PipelineEvent::IdentityPinned(identity));
                }
                self.emit(PipelineEvent::ItemStarted {
                    index,
                    status: ItemStatus::Generating,
                });
                Step::Continue(Some(prompt))
            }
            Err(processed) => {
                self.emit(PipelineEvent::ItemFinished {
                    index,
                    status: ItemStatus::Error,
                    processed,
                });
                Step::Continue(None)
            }
        }
    }

    /// Re-renders one already analyzed item from user-edited prompt text.
    ///
    /// Skips prompt synthesis, leaves the pinned identity and every other item
    /// alone. If the edit does not parse, the item is untouched.
    pub async fn regenerate(&self, index: usize, edited: &str) -> Result<(), PipelineError> {
        let prompt =
            parse_structured_prompt(edited).map_err(|e| PipelineError::Edit(format!("{:#}", e)))?;

        let generation = {
            let mut ctx = self.lock();
            if ctx.running {
                return Err(PipelineError::Busy);
            }
            let item = ctx
                .items
                .get_mut(index)
                .ok_or(PipelineError::NoSuchItem(index))?;
            if item.prompt.is_none() {
                return Err(PipelineError::NotSynthesized(index));
            }
            item.prompt = Some(prompt.clone());
            item.status = ItemStatus::Generating;
            item.error = None;
            ctx.running = true;
            ctx.generation
        };
        let _guard = RunGuard {
            context: &self.context,
            generation,
        };
        self.emit(PipelineEvent::ItemStarted {
            index,
            status: ItemStatus::Generating,
        });

        let rendered = self.images.synthesize_image(&prompt).await;

        let (result, status, processed) = {
            let mut ctx = self.lock();
            if ctx.generation != generation {
                log::info!("Batch replaced while regenerating item {}; result dropped", index);
                return Ok(());
            }
            let item = &mut ctx.items[index];
            let result = match rendered {
                Ok(image) => {
                    item.image = Some(image);
                    item.status = ItemStatus::Complete;
                    Ok(())
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    log::warn!("Regeneration failed for scene {}: {}", index, message);
                    // The old image no longer matches the stored prompt.
                    item.image = None;
                    item.error = Some(message.clone());
                    item.status = ItemStatus::Error;
                    Err(PipelineError::Synthesis(message))
                }
            };
            let status = item.status;
            (result, status, ctx.processed)
        };
        self.emit(PipelineEvent::ItemFinished {
            index,
            status,
            processed,
        });
        result
    }
}

fn count_status(items: &[SceneItem], status: ItemStatus) -> usize {
    items.iter().filter(|i| i.status == status).count()
}
