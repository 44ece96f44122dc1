use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::protocol::{HostCommand, HostResponse};
use crate::dispatcher::Dispatcher;

/// Serves the host protocol over a reader/writer pair.
///
/// Commands are read one JSON document per line. Chat events and replies are
/// written the same way, in the order they become available.
pub struct HostServer<W> {
    dispatcher: Dispatcher,
    writer: W,
    replies_tx: mpsc::UnboundedSender<HostResponse>,
    replies_rx: mpsc::UnboundedReceiver<HostResponse>,
    outstanding: usize,
}

impl<W: AsyncWrite + Unpin> HostServer<W> {
    pub fn new(dispatcher: Dispatcher, writer: W) -> Self {
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        Self {
            dispatcher,
            writer,
            replies_tx,
            replies_rx,
            outstanding: 0,
        }
    }

    /// Run until `reader` closes and every outstanding reply and chat event
    /// has been written. Closing the input stops the active chat.
    pub async fn run<R: AsyncRead + Unpin>(mut self, reader: R) -> Result<()> {
        let mut lines = BufReader::new(reader).lines();
        let mut input_open = true;

        loop {
            if !input_open && self.outstanding == 0 && !self.dispatcher.is_busy() {
                break;
            }

            tokio::select! {
                line = lines.next_line(), if input_open => match line.context("Failed to read host command")? {
                    Some(line) => self.handle_line(&line).await?,
                    None => {
                        info!("host input closed, shutting down");
                        input_open = false;
                        self.dispatcher.stop_chat().await;
                    }
                },

                Some(event) = self.dispatcher.next_event() => self.write_line(&event).await?,

                Some(reply) = self.replies_rx.recv() => {
                    self.outstanding -= 1;
                    self.write_line(&reply).await?;
                }

                else => break,
            }
        }

        self.writer.flush().await?;
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }

        let command = match serde_json::from_str::<HostCommand>(line) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "rejecting malformed host command");
                let reply = HostResponse::err(None, format!("invalid command: {e}"));
                return self.write_line(&reply).await;
            }
        };

        debug!(command = command.name(), "host command");
        match command {
            HostCommand::StartChat {
                message,
                history,
                config,
            } => self.dispatcher.start_chat(message, history, config).await,
            HostCommand::StopChat => self.dispatcher.stop_chat().await,
            HostCommand::FetchModels { id, config } => {
                let call = self.dispatcher.fetch_models(config);
                self.spawn_reply(id, async move { call.await.map(|models| json!(models)) });
            }
            HostCommand::GetTools { id, config } => {
                let call = self.dispatcher.get_tools(config);
                self.spawn_reply(id, async move { call.await.map(|tools| json!(tools)) });
            }
            HostCommand::SaveTool {
                id,
                name,
                code,
                description,
            } => {
                let call = self.dispatcher.save_tool(name, code, description);
                self.spawn_reply(id, call);
            }
            HostCommand::ClearTempTools { id } => {
                let call = self.dispatcher.clear_temp_tools();
                self.spawn_reply(id, call);
            }
        }
        Ok(())
    }

    /// Run a one-shot request in the background and queue its reply
    fn spawn_reply<F>(&mut self, id: u64, call: F)
    where
        F: Future<Output = crate::error::Result<serde_json::Value>> + Send + 'static,
    {
        self.outstanding += 1;
        let replies = self.replies_tx.clone();
        tokio::spawn(async move {
            let reply = match call.await {
                Ok(result) => HostResponse::ok(id, result),
                Err(e) => HostResponse::err(Some(id), e.to_string()),
            };
            let _ = replies.send(reply);
        });
    }

    async fn write_line<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let mut json = serde_json::to_string(message)?;
        json.push('\n');

        self.writer
            .write_all(json.as_bytes())
            .await
            .context("Failed to write to host")?;
        self.writer.flush().await?;
        Ok(())
    }
}
