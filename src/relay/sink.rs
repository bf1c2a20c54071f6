use async_trait::async_trait;
use axum::response::sse::Event;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::models::{Chunk, StreamOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Chunk(Chunk),
    Terminal(StreamOutcome),
}

impl RelayEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayEvent::Terminal(_))
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum WriteError {
    #[error("client connection closed")]
    Closed,
    #[error("terminal event already sent")]
    Terminated,
}

/// Downstream half of a relay session.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&mut self, event: RelayEvent) -> Result<(), WriteError>;

    /// Resolves once the client side has gone away. Must stay pending otherwise.
    async fn closed(&self);
}

#[derive(Serialize)]
struct ChunkPayload<'a> {
    chunk: &'a str,
    done: bool,
}

#[derive(Serialize)]
struct DonePayload<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    error: &'a str,
}

/// Renders a relay event as an SSE record. Disconnects have no wire form.
pub fn render(event: &RelayEvent) -> Option<Event> {
    match event {
        RelayEvent::Chunk(chunk) => Some(json_event(
            Event::default(),
            &ChunkPayload {
                chunk: &chunk.text,
                done: chunk.done,
            },
        )),
        RelayEvent::Terminal(StreamOutcome::Completed { full_text }) => Some(json_event(
            Event::default().event("done"),
            &DonePayload { text: full_text },
        )),
        RelayEvent::Terminal(
            StreamOutcome::BackendError { message } | StreamOutcome::MalformedUpstream { message },
        ) => Some(json_event(
            Event::default().event("error"),
            &ErrorPayload { error: message },
        )),
        RelayEvent::Terminal(StreamOutcome::ClientDisconnected) => None,
    }
}

fn json_event<T: Serialize>(event: Event, payload: &T) -> Event {
    match serde_json::to_string(payload) {
        Ok(serialized) => event.data(serialized),
        Err(error) => {
            let fallback = serde_json::json!({
                "error": format!("serialization error: {error}"),
            });
            event.data(fallback.to_string())
        }
    }
}

/// Sink that feeds an axum `Sse` body through a bounded channel.
///
/// The channel bound is the backpressure: `emit` waits while the client is slow to read.
pub struct SseSink {
    tx: mpsc::Sender<Event>,
    terminated: bool,
}

impl SseSink {
    pub fn channel(capacity: usize) -> (Self, ReceiverStream<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                terminated: false,
            },
            ReceiverStream::new(rx),
        )
    }
}

#[async_trait]
impl EventSink for SseSink {
    async fn emit(&mut self, event: RelayEvent) -> Result<(), WriteError> {
        if self.terminated {
            return Err(WriteError::Terminated);
        }
        if event.is_terminal() {
            self.terminated = true;
        }

        let Some(rendered) = render(&event) else {
            return Ok(());
        };
        self.tx.send(rendered).await.map_err(|_| WriteError::Closed)
    }

    async fn closed(&self) {
        self.tx.closed().await;
    }
}
