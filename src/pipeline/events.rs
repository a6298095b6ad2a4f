//! Feedback from the pipeline to its owner

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::io;
use std::thread;
use tokio::sync::oneshot;

use crate::session::listener::{SessionId, StreamFormat};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    ListenerJoined { id: SessionId, format: StreamFormat },
    ListenerLeft { id: SessionId, format: StreamFormat },
    /// Removed by the duplicator or after repeated encoder failures
    ListenerEvicted { id: SessionId, format: StreamFormat },
    /// A stage failed while running; the pipeline has halted
    Fatal { message: String },
}

/// Non-blocking event publisher. Events are dropped when nobody drains
/// the receiver fast enough.
#[derive(Clone)]
pub struct EventSender {
    tx: Option<Sender<PipelineEvent>>,
}

impl EventSender {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.tx {
            if let Err(TrySendError::Full(event)) = tx.try_send(event) {
                tracing::trace!("Event queue full, dropping {:?}", event);
            }
        }
    }
}

/// Bounded event channel
pub fn event_channel(capacity: usize) -> (EventSender, Receiver<PipelineEvent>) {
    let (tx, rx) = bounded(capacity);
    (EventSender { tx: Some(tx) }, rx)
}

/// Log every event on a dedicated thread.
///
/// The returned receiver resolves with the message of the first `Fatal`
/// event, so the owner can stop instead of serving a halted pipeline.
pub fn watch_events(events: Receiver<PipelineEvent>) -> io::Result<oneshot::Receiver<String>> {
    let (fatal_tx, fatal_rx) = oneshot::channel();
    thread::Builder::new()
        .name("events".to_string())
        .spawn(move || {
            let mut fatal_tx = Some(fatal_tx);
            for event in events.iter() {
                match event {
                    PipelineEvent::ListenerJoined { id, format } => {
                        tracing::info!("Streaming started: {} ({})", id, format)
                    }
                    PipelineEvent::ListenerLeft { id, format } => {
                        tracing::info!("Streaming ended: {} ({})", id, format)
                    }
                    PipelineEvent::ListenerEvicted { id, format } => {
                        tracing::warn!("Listener {} dropped from {}: too slow", id, format)
                    }
                    PipelineEvent::Fatal { message } => {
                        tracing::error!("Pipeline halted: {}", message);
                        if let Some(tx) = fatal_tx.take() {
                            let _ = tx.send(message);
                        }
                    }
                }
            }
        })?;
    Ok(fatal_rx)
}
