#![allow(dead_code)]

use std::time::Duration;

use tokio::sync::mpsc;
use wand_bridge::dispatcher::{ChatEvent, Dispatcher};
use wand_bridge::worker::{ChannelEvent, ChannelId, Termination, WorkerCommand};

/// Upper bound for anything a fake worker does
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait before deciding nothing else is coming
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

/// Helper to build a fake worker from a shell script
pub fn sh_worker(script: &str) -> WorkerCommand {
    WorkerCommand::new("sh").arg("-c").arg(script)
}

/// Helper to build a dispatcher around a fake worker
pub fn sh_dispatcher(script: &str) -> Dispatcher {
    Dispatcher::new(sh_worker(script))
}

/// Collect channel events up to and including the termination
pub async fn collect_until_terminated(
    rx: &mut mpsc::UnboundedReceiver<(ChannelId, ChannelEvent)>,
) -> (Vec<ChannelEvent>, Termination) {
    let collect = async {
        let mut events = Vec::new();
        while let Some((_, event)) = rx.recv().await {
            match event {
                ChannelEvent::Terminated(termination) => return (events, termination),
                other => events.push(other),
            }
        }
        panic!("event channel closed before termination");
    };
    tokio::time::timeout(TEST_TIMEOUT, collect)
        .await
        .expect("worker channel did not terminate in time")
}

/// Collect chat events up to and including `Done`
pub async fn collect_chat(dispatcher: &mut Dispatcher) -> Vec<ChatEvent> {
    let collect = async {
        let mut events = Vec::new();
        while let Some(event) = dispatcher.next_event().await {
            let done = event == ChatEvent::Done;
            events.push(event);
            if done {
                break;
            }
        }
        events
    };
    tokio::time::timeout(TEST_TIMEOUT, collect)
        .await
        .expect("chat did not finish in time")
}

/// Assert that the dispatcher produces no further chat events
pub async fn assert_quiet(dispatcher: &mut Dispatcher) {
    if let Ok(event) = tokio::time::timeout(QUIET_PERIOD, dispatcher.next_event()).await {
        panic!("expected no more chat events, got {:?}", event);
    }
}

pub fn chunk(text: &str) -> ChatEvent {
    ChatEvent::Chunk {
        text: text.to_string(),
    }
}
