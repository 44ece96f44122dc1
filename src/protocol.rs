//! Wire types exchanged with the worker process.
//!
//! The worker reads exactly one [`Request`] document from stdin and answers
//! with one or more [`ResponseMessage`] documents on stdout.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Speaker of a prior conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One prior turn of the conversation, oldest first in a history list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

impl HistoryTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Provider settings forwarded to the worker untouched.
///
/// Known keys are typed; anything else the host supplies is kept in `extra`
/// and serialized alongside them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_speed_text_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_text_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_multimodal_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Tool definition sent with a `save_tool` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolData {
    pub name: String,
    pub code: String,
    pub description: String,
}

/// Chat payload. Unlike the other requests it carries no `type` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<HistoryTurn>,
    pub config: WorkerConfig,
}

/// Auxiliary one-shot requests, tagged by `type` on the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandRequest {
    FetchModels {
        config: WorkerConfig,
    },
    GetTools {
        config: WorkerConfig,
    },
    SaveTool {
        config: WorkerConfig,
        tool_data: ToolData,
    },
    ClearTempTools {
        config: WorkerConfig,
    },
}

/// A single request written to a worker's stdin
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Request {
    Chat(ChatRequest),
    Command(CommandRequest),
}

impl Request {
    pub fn chat(message: impl Into<String>, history: Vec<HistoryTurn>, config: WorkerConfig) -> Self {
        Self::Chat(ChatRequest {
            message: message.into(),
            history,
            config,
        })
    }

    pub fn fetch_models(config: WorkerConfig) -> Self {
        Self::Command(CommandRequest::FetchModels { config })
    }

    pub fn get_tools(config: WorkerConfig) -> Self {
        Self::Command(CommandRequest::GetTools { config })
    }

    pub fn save_tool(
        name: impl Into<String>,
        code: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::Command(CommandRequest::SaveTool {
            config: WorkerConfig::default(),
            tool_data: ToolData {
                name: name.into(),
                code: code.into(),
                description: description.into(),
            },
        })
    }

    pub fn clear_temp_tools() -> Self {
        Self::Command(CommandRequest::ClearTempTools {
            config: WorkerConfig::default(),
        })
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat",
            Self::Command(CommandRequest::FetchModels { .. }) => "fetch_models",
            Self::Command(CommandRequest::GetTools { .. }) => "get_tools",
            Self::Command(CommandRequest::SaveTool { .. }) => "save_tool",
            Self::Command(CommandRequest::ClearTempTools { .. }) => "clear_temp_tools",
        }
    }

    /// Serialize to the single JSON document the worker expects on stdin
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Entry of a `tools` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// One document produced by the worker.
///
/// Variant order matters: a document carrying `error` is an error even if
/// other keys are present.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ResponseMessage {
    Error { error: String },
    Chunk { chunk: String },
    Models { models: Vec<String> },
    Tools { tools: Vec<ToolInfo> },
    Result(Value),
}

impl ResponseMessage {
    /// Parse one line (streaming) or the whole output (single-result)
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text.trim())
    }

    /// Classify an already parsed document
    pub fn from_value(value: &Value) -> serde_json::Result<Self> {
        Self::deserialize(value)
    }

    /// Name of the discriminating field, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Error { .. } => "error",
            Self::Chunk { .. } => "chunk",
            Self::Models { .. } => "models",
            Self::Tools { .. } => "tools",
            Self::Result(_) => "result",
        }
    }
}
