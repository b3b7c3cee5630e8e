use serde::{Deserialize, Serialize};

/// ========================================
/// Completion request wire types
/// ========================================

/// How the compiler asked the model to lay out its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplyFormat {
    /// `### n. Label` heading per entry, body underneath.
    #[default]
    Delimited,
    /// One JSON object keyed by label.
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub system: String,
    pub user: String,
}

/// One entry of a batched prompt: the raw content the model writes from, the
/// label it is addressed by in the reply, and the placeholder it ends up in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptEntry {
    pub label: String,
    pub heading: String,
    pub content: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

/// Built once per completion call and consumed by exactly one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBatch {
    pub entries: Vec<PromptEntry>,
    pub appendix: String,
    pub format: ReplyFormat,
}

impl PromptBatch {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Stage name used for logging and saved exchange artifacts.
    pub stage: String,
    pub instruction: Instruction,
    pub format: ReplyFormat,
}
