/// Errors surfaced to whoever drives the pipeline.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Bad batch input; blocks the whole batch.
    #[error("invalid batch{}: {reason}. Expected a non-empty JSON list whose entries are non-empty strings or objects with a \"scene\", \"prompt\", \"description\" or \"text\" string", at_index(.index))]
    Validation { index: Option<usize>, reason: String },

    /// A collaborator call failed or returned unusable data. Scoped to one item.
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// User-edited prompt text is not a well-formed structured prompt.
    #[error("edited prompt rejected: {0}")]
    Edit(String),

    #[error("no item at index {0}")]
    NoSuchItem(usize),

    #[error("item {0} has no prompt yet; run the batch first")]
    NotSynthesized(usize),

    #[error("a batch run is already in progress")]
    Busy,
}

impl PipelineError {
    pub fn validation(index: Option<usize>, reason: impl Into<String>) -> Self {
        PipelineError::Validation {
            index,
            reason: reason.into(),
        }
    }
}

fn at_index(index: &Option<usize>) -> String {
    index.map(|i| format!(" at index {i}")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_names_index_and_shapes() {
        let msg = PipelineError::validation(Some(3), "entry has no usable description").to_string();
        assert!(msg.starts_with("invalid batch at index 3: entry has no usable description"));
        assert!(msg.contains("\"description\""));

        let msg = PipelineError::validation(None, "list is empty").to_string();
        assert!(msg.starts_with("invalid batch: list is empty"));
    }
}
