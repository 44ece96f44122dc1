use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{HistoryTurn, WorkerConfig};

/// Command sent by the host, one JSON document per line
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum HostCommand {
    StartChat {
        message: String,
        #[serde(default)]
        history: Vec<HistoryTurn>,
        #[serde(default)]
        config: WorkerConfig,
    },
    StopChat,
    FetchModels {
        id: u64,
        #[serde(default)]
        config: WorkerConfig,
    },
    GetTools {
        id: u64,
        #[serde(default)]
        config: WorkerConfig,
    },
    SaveTool {
        id: u64,
        name: String,
        code: String,
        description: String,
    },
    ClearTempTools {
        id: u64,
    },
}

impl HostCommand {
    /// Wire name of the command, safe to log (no config values)
    pub fn name(&self) -> &'static str {
        match self {
            HostCommand::StartChat { .. } => "start-chat",
            HostCommand::StopChat => "stop-chat",
            HostCommand::FetchModels { .. } => "fetch-models",
            HostCommand::GetTools { .. } => "get-tools",
            HostCommand::SaveTool { .. } => "save-tool",
            HostCommand::ClearTempTools { .. } => "clear-temp-tools",
        }
    }
}

/// Reply to a request/response command, matched to it by `id`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostResponse {
    /// Id of the command this answers; `None` when the command was unreadable
    pub id: Option<u64>,
    /// Whether the command succeeded
    pub success: bool,
    /// Result data on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id: Some(id),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }
}
