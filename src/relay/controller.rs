use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    backend::{BackendError, GenerationBackend},
    config::DEFAULT_MAX_PENDING_BYTES,
    metrics::AppMetrics,
    models::{Completion, GenerationRequest, StreamOutcome},
    relay::{
        decoder::{decode, decode_body, Decoded},
        framer::{FramedRecord, LineFramer},
        sink::{EventSink, RelayEvent},
    },
};

/// Drives relay sessions against a single backend.
///
/// Every call to [`RelayController::run`] ends with exactly one terminal event on the sink,
/// and the backend stream is dropped before that event is written.
pub struct RelayController {
    backend: Arc<dyn GenerationBackend>,
    metrics: Arc<AppMetrics>,
    max_pending_bytes: usize,
}

/// Per-session state. Lives only as long as one `run` call.
#[derive(Default)]
struct RelaySession {
    framer: LineFramer,
    text: String,
    decoded_records: usize,
    malformed_records: usize,
}

enum Absorbed {
    Continue,
    Finished(StreamOutcome),
}

enum Next<T> {
    Disconnected,
    Fragment(Option<T>),
}

impl RelayController {
    pub fn new(backend: Arc<dyn GenerationBackend>, metrics: Arc<AppMetrics>) -> Self {
        Self {
            backend,
            metrics,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
        }
    }

    /// Caps the bytes an unterminated record may occupy before the session is abandoned.
    pub fn with_max_pending_bytes(mut self, limit: usize) -> Self {
        self.max_pending_bytes = limit;
        self
    }

    pub async fn run<S>(&self, request: GenerationRequest, sink: &mut S) -> StreamOutcome
    where
        S: EventSink + ?Sized,
    {
        let span = info_span!(
            "relay_session",
            request_id = %request.request_id,
            model = %request.model
        );
        async {
            let outcome = self.pump(&request, sink).await;
            self.metrics.observe_stream_outcome(&outcome);
            match &outcome {
                StreamOutcome::Completed { full_text } => {
                    info!(outcome = outcome.label(), chars = full_text.len(), "relay finished")
                }
                StreamOutcome::ClientDisconnected => {
                    info!(outcome = outcome.label(), "client went away, backend released")
                }
                StreamOutcome::BackendError { message }
                | StreamOutcome::MalformedUpstream { message } => {
                    warn!(outcome = outcome.label(), error = %message, "relay failed")
                }
            }

            if let Err(error) = sink.emit(RelayEvent::Terminal(outcome.clone())).await {
                debug!(error = %error, "terminal event not delivered");
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Single-shot generation sharing the streaming decoder.
    pub async fn complete(&self, request: &GenerationRequest) -> Result<Completion, BackendError> {
        let body = self.backend.generate(request).await.map_err(|error| {
            self.metrics.observe_backend_error(error.stage());
            error
        })?;

        decode_body(&body).map_err(|error| {
            self.metrics.observe_malformed_record();
            BackendError::InvalidResponse(error.to_string())
        })
    }

    async fn pump<S>(&self, request: &GenerationRequest, sink: &mut S) -> StreamOutcome
    where
        S: EventSink + ?Sized,
    {
        let opened = tokio::select! {
            biased;
            _ = sink.closed() => return StreamOutcome::ClientDisconnected,
            opened = self.backend.open_stream(request) => opened,
        };
        let mut fragments = match opened {
            Ok(fragments) => fragments,
            Err(error) => {
                self.metrics.observe_backend_error(error.stage());
                return StreamOutcome::BackendError {
                    message: error.to_string(),
                };
            }
        };

        let mut session = RelaySession::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => Next::Disconnected,
                next = fragments.next() => Next::Fragment(next),
            };

            match next {
                Next::Disconnected => return StreamOutcome::ClientDisconnected,
                Next::Fragment(Some(Ok(bytes))) => {
                    for record in session.framer.feed(&bytes) {
                        if let Absorbed::Finished(outcome) =
                            self.absorb(&mut session, &record, sink).await
                        {
                            return outcome;
                        }
                    }
                    let pending = session.framer.pending();
                    if pending > self.max_pending_bytes {
                        self.metrics.observe_malformed_record();
                        return StreamOutcome::MalformedUpstream {
                            message: format!(
                                "backend record exceeded {} bytes without a newline",
                                self.max_pending_bytes
                            ),
                        };
                    }
                }
                Next::Fragment(Some(Err(error))) => {
                    self.metrics.observe_backend_error(error.stage());
                    return StreamOutcome::BackendError {
                        message: error.to_string(),
                    };
                }
                Next::Fragment(None) => {
                    let discarded = session.framer.finish();
                    if discarded > 0 {
                        debug!(discarded, "dropping unterminated trailing record");
                    }
                    return session.close_without_done();
                }
            }
        }
    }

    async fn absorb<S>(
        &self,
        session: &mut RelaySession,
        record: &FramedRecord,
        sink: &mut S,
    ) -> Absorbed
    where
        S: EventSink + ?Sized,
    {
        let chunk = match decode(record) {
            Ok(Decoded::Chunk(chunk)) => chunk,
            Ok(Decoded::Skip) => return Absorbed::Continue,
            Err(error) => {
                session.malformed_records += 1;
                self.metrics.observe_malformed_record();
                warn!(error = %error, "skipping malformed backend record");
                return Absorbed::Continue;
            }
        };

        session.decoded_records += 1;
        session.text.push_str(&chunk.text);
        let done = chunk.done;

        // An empty closing record carries nothing the terminal `done` event does not.
        if !(done && chunk.text.is_empty())
            && sink.emit(RelayEvent::Chunk(chunk)).await.is_err()
        {
            return Absorbed::Finished(StreamOutcome::ClientDisconnected);
        }

        if done {
            return Absorbed::Finished(StreamOutcome::Completed {
                full_text: std::mem::take(&mut session.text),
            });
        }
        Absorbed::Continue
    }
}

impl RelaySession {
    fn close_without_done(&mut self) -> StreamOutcome {
        if self.decoded_records == 0 && self.malformed_records > 0 {
            return StreamOutcome::MalformedUpstream {
                message: format!(
                    "backend sent {} undecodable records and no output",
                    self.malformed_records
                ),
            };
        }

        StreamOutcome::Completed {
            full_text: std::mem::take(&mut self.text),
        }
    }
}
