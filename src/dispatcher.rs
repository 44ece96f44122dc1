//! Single entry point for the host.
//!
//! The [`Dispatcher`] owns the "current" streaming chat and hands out owned
//! futures for the auxiliary one-shot requests. Chat output is pulled with
//! [`Dispatcher::next_event`], typically from the host's `select!` loop.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::error::Result;
use crate::protocol::{HistoryTurn, Request, ToolInfo, WorkerConfig};
use crate::worker::{ChannelEvent, ChannelId, ReadMode, Worker, WorkerChannel, WorkerCommand};

const DISPATCH_TARGET: &str = "wand_bridge::dispatcher";

/// Chat events delivered to the host, in the order they happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ChatEvent {
    #[serde(rename = "chat-chunk")]
    Chunk { text: String },
    #[serde(rename = "chat-error")]
    Error { message: String },
    #[serde(rename = "chat-done")]
    Done,
}

/// Routes host requests to worker channels.
///
/// At most one streaming chat is current. Starting another one kills the old
/// worker first, and anything the old worker still reports is discarded.
pub struct Dispatcher {
    worker: Worker,
    current: Option<WorkerChannel>,
    events_tx: mpsc::UnboundedSender<(ChannelId, ChannelEvent)>,
    events_rx: mpsc::UnboundedReceiver<(ChannelId, ChannelEvent)>,
    pending: VecDeque<ChatEvent>,
}

impl Dispatcher {
    pub fn new(command: WorkerCommand) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            worker: Worker::new(command),
            current: None,
            events_tx,
            events_rx,
            pending: VecDeque::new(),
        }
    }

    /// Whether a chat is currently streaming
    pub fn is_chatting(&self) -> bool {
        self.current.is_some()
    }

    /// Whether a chat is streaming or chat events are still queued
    pub fn is_busy(&self) -> bool {
        self.current.is_some() || !self.pending.is_empty()
    }

    /// Start a streaming chat, superseding any chat already running
    pub async fn start_chat(
        &mut self,
        message: impl Into<String>,
        history: Vec<HistoryTurn>,
        config: WorkerConfig,
    ) {
        if let Some(mut previous) = self.current.take() {
            info!(target: DISPATCH_TARGET, channel = %previous.id(), "superseding running chat");
            previous.terminate().await;
        }

        let request = Request::chat(message, history, config);
        match self
            .worker
            .open(&request, ReadMode::Streaming, self.events_tx.clone())
        {
            Ok(channel) => {
                debug!(target: DISPATCH_TARGET, channel = %channel.id(), "chat started");
                self.current = Some(channel);
            }
            Err(e) => {
                self.pending.push_back(ChatEvent::Error {
                    message: e.to_string(),
                });
                self.pending.push_back(ChatEvent::Done);
            }
        }
    }

    /// Cancel the current chat. Emits a single `Done` and no error; does
    /// nothing when no chat is running.
    pub async fn stop_chat(&mut self) {
        let Some(mut channel) = self.current.take() else {
            trace!(target: DISPATCH_TARGET, "stop requested with no chat running");
            return;
        };

        info!(target: DISPATCH_TARGET, channel = %channel.id(), "stopping chat");
        channel.terminate().await;
        self.pending.push_back(ChatEvent::Done);
    }

    /// Next chat event for the host. Cancel safe.
    ///
    /// Returns `None` only if the internal event channel has closed, which
    /// cannot happen while the dispatcher is alive.
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            let (id, event) = self.events_rx.recv().await?;
            if let Some(event) = self.on_channel_event(id, event) {
                return Some(event);
            }
        }
    }

    fn on_channel_event(&mut self, id: ChannelId, event: ChannelEvent) -> Option<ChatEvent> {
        let is_current = self.current.as_ref().is_some_and(|c| c.id() == id);
        if !is_current {
            trace!(target: DISPATCH_TARGET, channel = %id, ?event, "discarding event from stale channel");
            return None;
        }

        match event {
            ChannelEvent::Chunk(text) => Some(ChatEvent::Chunk { text }),
            ChannelEvent::Error(message) => Some(ChatEvent::Error { message }),
            ChannelEvent::Terminated(termination) => {
                self.current = None;
                debug!(target: DISPATCH_TARGET, channel = %id, "chat finished");
                match termination.failure() {
                    Some(e) => {
                        self.pending.push_back(ChatEvent::Done);
                        Some(ChatEvent::Error {
                            message: e.to_string(),
                        })
                    }
                    None => Some(ChatEvent::Done),
                }
            }
        }
    }

    pub fn fetch_models(
        &self,
        config: WorkerConfig,
    ) -> impl Future<Output = Result<Vec<String>>> + Send + use<> {
        let worker = self.worker.clone();
        async move { worker.fetch_models(config).await }
    }

    pub fn get_tools(
        &self,
        config: WorkerConfig,
    ) -> impl Future<Output = Result<Vec<ToolInfo>>> + Send + use<> {
        let worker = self.worker.clone();
        async move { worker.get_tools(config).await }
    }

    pub fn save_tool(
        &self,
        name: String,
        code: String,
        description: String,
    ) -> impl Future<Output = Result<Value>> + Send + use<> {
        let worker = self.worker.clone();
        async move { worker.save_tool(&name, &code, &description).await }
    }

    pub fn clear_temp_tools(&self) -> impl Future<Output = Result<Value>> + Send + use<> {
        let worker = self.worker.clone();
        async move { worker.clear_temp_tools().await }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Kill the current chat when the dispatcher goes away
        if let Some(channel) = &mut self.current {
            channel.kill();
        }
    }
}
