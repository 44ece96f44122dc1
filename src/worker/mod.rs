// Worker process plumbing: launching, reading, and one-shot requests

pub mod buffer;
pub mod channel;
pub mod command;

pub use buffer::LineBuffer;
pub use channel::{
    ChannelEvent, ChannelId, ChannelState, EventSender, ReadMode, Termination, WorkerChannel,
};
pub use command::{Layout, WorkerCommand, WorkerSettings};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::protocol::{Request, ResponseMessage, ToolInfo, WorkerConfig};

/// Launches workers and runs single-result requests against them.
///
/// Cheap to clone; clones share the channel id sequence.
#[derive(Debug, Clone)]
pub struct Worker {
    command: Arc<WorkerCommand>,
    next_id: Arc<AtomicU64>,
}

impl Worker {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command: Arc::new(command),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_channel_id(&self) -> ChannelId {
        ChannelId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Open a channel with this worker's command
    pub fn open(&self, request: &Request, mode: ReadMode, events: EventSender) -> Result<WorkerChannel> {
        WorkerChannel::open(self.next_channel_id(), &self.command, request, mode, events)
    }

    pub async fn fetch_models(&self, config: WorkerConfig) -> Result<Vec<String>> {
        let (raw, reply) = self.request(Request::fetch_models(config)).await?;
        match reply {
            ResponseMessage::Models { models } => Ok(models),
            _ => Err(BridgeError::UnexpectedReply {
                expected: "models",
                raw,
            }),
        }
    }

    pub async fn get_tools(&self, config: WorkerConfig) -> Result<Vec<ToolInfo>> {
        let (raw, reply) = self.request(Request::get_tools(config)).await?;
        match reply {
            ResponseMessage::Tools { tools } => Ok(tools),
            _ => Err(BridgeError::UnexpectedReply {
                expected: "tools",
                raw,
            }),
        }
    }

    /// Returns the worker's whole reply document
    pub async fn save_tool(&self, name: &str, code: &str, description: &str) -> Result<Value> {
        self.document(Request::save_tool(name, code, description)).await
    }

    /// Returns the worker's whole reply document
    pub async fn clear_temp_tools(&self) -> Result<Value> {
        self.document(Request::clear_temp_tools()).await
    }

    async fn document(&self, request: Request) -> Result<Value> {
        let raw = self.run_single(&request).await?;
        let value = parse_document(&raw)?;
        match ResponseMessage::from_value(&value) {
            Ok(ResponseMessage::Error { error }) => Err(BridgeError::Worker(error)),
            _ => Ok(value),
        }
    }

    /// Run a request and classify its terminal document, failing on `error`
    async fn request(&self, request: Request) -> Result<(String, ResponseMessage)> {
        let raw = self.run_single(&request).await?;
        let value = parse_document(&raw)?;
        let reply = ResponseMessage::from_value(&value).map_err(|source| {
            BridgeError::MalformedOutput {
                raw: raw.clone(),
                source,
            }
        })?;
        match reply {
            ResponseMessage::Error { error } => Err(BridgeError::Worker(error)),
            reply => Ok((raw, reply)),
        }
    }

    /// Open a single-result channel and wait for its terminal event
    async fn run_single(&self, request: &Request) -> Result<String> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = self.open(request, ReadMode::SingleResult, tx)?;

        while let Some((_, event)) = rx.recv().await {
            if let ChannelEvent::Terminated(termination) = event {
                debug!(
                    target: "wand_bridge::worker",
                    channel = %channel.id(),
                    request = request.kind(),
                    success = termination.is_success(),
                    "single-result request finished"
                );
                return termination.into_output();
            }
        }

        // The driver always reports a termination before dropping its sender
        Err(BridgeError::Terminated)
    }
}

fn parse_document(raw: &str) -> Result<Value> {
    serde_json::from_str(raw.trim()).map_err(|source| BridgeError::MalformedOutput {
        raw: raw.to_string(),
        source,
    })
}
