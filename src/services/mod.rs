pub mod drafts;
pub mod export;
pub mod image;
pub mod llm;
pub mod parser;
pub mod pipeline;
pub mod prompt;
#[cfg(not(target_arch = "wasm32"))]
pub mod review;
