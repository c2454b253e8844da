use crate::core::state::{ItemStatus, SceneItem};
use crate::services::drafts::PromptDrafts;
use crate::services::export::image_file_name;
use crate::services::image::{create_image_synthesizer, GeminiImageConfig, ImageConfig};
use crate::services::llm::{create_llm, GeminiConfig, LlmConfig};
use crate::services::pipeline::{BatchPipeline, BatchSnapshot, PipelineEvent, PipelineObserver};
use crate::services::prompt::LlmPromptSynthesizer;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use leptos::*;
use std::sync::Arc;

const DEFAULT_STYLE: &str = "consistent character illustration, soft cinematic lighting";

/// Bumps a counter on every pipeline event so views re-read the snapshot.
struct Refresh(WriteSignal<u64>);

impl PipelineObserver for Refresh {
    fn on_event(&self, event: &PipelineEvent) {
        log::debug!("{:?}", event);
        self.0.update(|n| *n += 1);
    }
}

fn build_pipeline(api_key: &str, refresh: WriteSignal<u64>) -> anyhow::Result<BatchPipeline> {
    let llm = create_llm(&LlmConfig {
        provider: "gemini".to_string(),
        gemini: Some(GeminiConfig {
            api_key: api_key.to_string(),
            model: "gemini-2.5-flash".to_string(),
        }),
        ollama: None,
        openai: None,
    })?;
    let images = create_image_synthesizer(&ImageConfig {
        provider: "gemini".to_string(),
        gemini: Some(GeminiImageConfig {
            api_key: api_key.to_string(),
            model: "gemini-2.5-flash-image".to_string(),
            aspect_ratio: None,
        }),
        openai: None,
    })?;
    let prompts = LlmPromptSynthesizer::new(llm, DEFAULT_STYLE);
    Ok(BatchPipeline::new(Arc::new(prompts), Arc::from(images))
        .with_observer(Arc::new(Refresh(refresh))))
}

#[component]
pub fn App() -> impl IntoView {
    let (api_key, set_api_key) = create_signal(String::new());
    let (batch_text, set_batch_text) = create_signal(String::new());
    let (message, set_message) = create_signal(None::<String>);
    let (tick, set_tick) = create_signal(0u64);
    let pipeline = store_value(None::<BatchPipeline>);
    let drafts = store_value(PromptDrafts::default());

    let snapshot = move || {
        tick.get();
        pipeline.with_value(|p| p.as_ref().map(BatchPipeline::snapshot).unwrap_or_default())
    };

    let on_load = move |_| {
        let key = api_key.get_untracked();
        if key.trim().is_empty() {
            set_message.set(Some("Enter a Gemini API key first.".to_string()));
            return;
        }
        if pipeline.with_value(Option::is_none) {
            match build_pipeline(key.trim(), set_tick) {
                Ok(p) => pipeline.set_value(Some(p)),
                Err(e) => {
                    set_message.set(Some(format!("{:#}", e)));
                    return;
                }
            }
        }
        let result = pipeline.with_value(|p| p.as_ref().map(|p| p.load(&batch_text.get_untracked())));
        match result {
            Some(Ok(count)) => {
                drafts.update_value(PromptDrafts::clear);
                set_message.set(Some(format!("Loaded {} scenes.", count)));
            }
            Some(Err(e)) => set_message.set(Some(e.to_string())),
            None => {}
        }
        set_tick.update(|n| *n += 1);
    };

    let on_run = move |_| {
        let Some(p) = pipeline.get_value() else {
            return;
        };
        spawn_local(async move {
            match p.run().await {
                Ok(summary) if summary.abandoned => {}
                Ok(summary) => set_message.set(Some(format!(
                    "Finished: {} complete, {} failed.",
                    summary.completed, summary.failed
                ))),
                Err(e) => set_message.set(Some(e.to_string())),
            }
        });
    };

    let on_reset = move |_| {
        pipeline.with_value(|p| {
            if let Some(p) = p {
                p.reset();
            }
        });
        drafts.update_value(PromptDrafts::clear);
        set_batch_text.set(String::new());
        set_message.set(None);
        set_tick.update(|n| *n += 1);
    };

    view! {
        <div class="app-container">
            <h1>"Scene Batch"</h1>
            <input
                type="password"
                placeholder="Gemini API key"
                prop:value=api_key
                on:input=move |ev| set_api_key.set(event_target_value(&ev))
            />
            <textarea
                rows="8"
                placeholder=r#"["a hero walks on the beach", {"scene": "a hero sits by a fire"}]"#
                prop:value=batch_text
                on:input=move |ev| set_batch_text.set(event_target_value(&ev))
            ></textarea>
            <div>
                <button on:click=on_load>"Load batch"</button>
                <button on:click=on_run disabled=move || snapshot().running || snapshot().items.is_empty()>
                    "Generate"
                </button>
                <button on:click=on_reset>"Reset"</button>
            </div>
            {move || message.get().map(|m| view! { <p class="message">{m}</p> })}
            <BatchView
                snapshot=Signal::derive(snapshot)
                pipeline=pipeline
                drafts=drafts
                set_message=set_message
            />
        </div>
    }
}

#[component]
fn BatchView(
    snapshot: Signal<BatchSnapshot>,
    pipeline: StoredValue<Option<BatchPipeline>>,
    drafts: StoredValue<PromptDrafts>,
    set_message: WriteSignal<Option<String>>,
) -> impl IntoView {
    view! {
        <div>
            {move || {
                let snap = snapshot.get();
                (!snap.items.is_empty()).then(|| view! {
                    <p>"Progress: " {snap.processed} " / " {snap.total()}</p>
                })
            }}
            {move || snapshot.get().identity.map(|id| view! {
                <p>"Character: " <strong>{id.character_id}</strong></p>
            })}
            {move || {
                let snap = snapshot.get();
                snap.items
                    .iter()
                    .map(|item| {
                        let file_name = image_file_name(snap.identity.as_ref(), item);
                        view! {
                            <SceneCard
                                item=item.clone()
                                file_name=file_name
                                pipeline=pipeline
                                drafts=drafts
                                set_message=set_message
                            />
                        }
                    })
                    .collect_view()
            }}
        </div>
    }
}

#[component]
fn SceneCard(
    item: SceneItem,
    file_name: Option<String>,
    pipeline: StoredValue<Option<BatchPipeline>>,
    drafts: StoredValue<PromptDrafts>,
    set_message: WriteSignal<Option<String>>,
) -> impl IntoView {
    let index = item.id;
    // Cards are rebuilt on every pipeline event; the edit lives in `drafts`.
    let initial = drafts
        .try_update_value(|d| d.text_for(&item))
        .unwrap_or_default();
    let (draft, set_draft) = create_signal(initial);
    let busy = matches!(item.status, ItemStatus::Analyzing | ItemStatus::Generating);

    let on_regenerate = move |_| {
        let Some(p) = pipeline.get_value() else {
            return;
        };
        let edited = draft.get_untracked();
        spawn_local(async move {
            if let Err(e) = p.regenerate(index, &edited).await {
                set_message.set(Some(e.to_string()));
            }
        });
    };

    let image_url = item.image.as_ref().map(|image| {
        format!(
            "data:{};base64,{}",
            image.mime_type.as_deref().unwrap_or("image/png"),
            BASE64.encode(&image.bytes)
        )
    });

    view! {
        <div class="scene-card">
            <h3>"#" {index + 1} " [" {item.status.label()} "]"</h3>
            <p>{item.scene_text.clone()}</p>
            {item.error.clone().map(|e| view! { <p class="error">{e}</p> })}
            {image_url.map(|url| view! {
                <div>
                    <img src=url.clone() width="256"/>
                    <a href=url download=file_name.unwrap_or_default()>"Download"</a>
                </div>
            })}
            {item.prompt.is_some().then(|| view! {
                <div>
                    <textarea
                        rows="12"
                        prop:value=draft
                        on:input=move |ev| {
                            let text = event_target_value(&ev);
                            drafts.update_value(|d| d.edit(index, text.clone()));
                            set_draft.set(text);
                        }
                    ></textarea>
                    <button on:click=on_regenerate disabled=busy>"Regenerate"</button>
                </div>
            })}
        </div>
    }
}
