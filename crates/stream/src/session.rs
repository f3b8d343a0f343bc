use std::ops::ControlFlow;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;

use crate::error::{StreamError, StreamResult};
use crate::frame::StreamFrame;
use crate::message::{AssembledMessage, BoxError, MessageCommitter, MessageId, Role};
use crate::observer::StreamObserver;
use crate::payload::delta_with_fallback;
use crate::sink::IncrementalSink;
use crate::splitter::FrameSplitter;
use crate::transport::TransportReader;

/// Lifecycle of one streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Streaming,
    Finalized,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    /// First byte of the response body arrived.
    FirstByte,
    /// Terminator frame or clean end-of-stream, after a successful commit.
    Finish,
    /// Transport error or failed commit.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRejection {
    Terminal {
        state: SessionState,
        attempted: SessionTransition,
    },
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Failed)
    }

    /// Applies one transition; terminal states reject everything.
    pub fn apply(&self, transition: SessionTransition) -> Result<Self, TransitionRejection> {
        match (*self, transition) {
            (Self::Finalized | Self::Failed, attempted) => Err(TransitionRejection::Terminal {
                state: *self,
                attempted,
            }),
            (Self::Idle | Self::Streaming, SessionTransition::FirstByte) => Ok(Self::Streaming),
            (Self::Idle | Self::Streaming, SessionTransition::Finish) => Ok(Self::Finalized),
            (Self::Idle | Self::Streaming, SessionTransition::Fail) => Ok(Self::Failed),
        }
    }
}

/// Assembler bound to one conversation or collaboration context.
///
/// The committer decides where finalized messages go; every session started
/// from the same assembler shares it.
#[derive(Clone)]
pub struct StreamAssembler {
    committer: Arc<dyn MessageCommitter>,
}

impl StreamAssembler {
    pub fn new(committer: Arc<dyn MessageCommitter>) -> Self {
        Self { committer }
    }

    pub fn begin(&self, message_id: MessageId) -> StreamSession {
        StreamSession {
            state: SessionState::Idle,
            sink: IncrementalSink::new(message_id, Role::Assistant),
            splitter: FrameSplitter::new(),
            committer: Arc::clone(&self.committer),
        }
    }
}

/// One assistant message being assembled from one response body.
pub struct StreamSession {
    state: SessionState,
    sink: IncrementalSink,
    splitter: FrameSplitter,
    committer: Arc<dyn MessageCommitter>,
}

impl StreamSession {
    pub fn message_id(&self) -> MessageId {
        self.sink.message_id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn content(&self) -> &str {
        self.sink.content()
    }

    /// Drives the transport to completion and finalizes the message.
    ///
    /// The transport is owned for the duration of the call and released on
    /// every exit path, including when the returned future is dropped.
    pub async fn run<S, E, O>(
        &mut self,
        mut transport: TransportReader<S>,
        observer: &mut O,
    ) -> StreamResult<AssembledMessage>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Into<BoxError>,
        O: StreamObserver + ?Sized,
    {
        if self.state.is_terminal() {
            return self.reject(SessionTransition::FirstByte, "run-terminal-session");
        }

        loop {
            let fragment = match transport.next_fragment().await {
                Ok(fragment) => fragment,
                Err(error) => {
                    tracing::warn!(
                        message_id = %self.message_id(),
                        streamed_len = self.content().len(),
                        error = %error,
                        "stream transport failed"
                    );
                    self.transition(SessionTransition::Fail);
                    return Err(error);
                }
            };

            if transport.bytes_read() > 0 && self.state == SessionState::Idle {
                self.transition(SessionTransition::FirstByte);
                tracing::debug!(message_id = %self.message_id(), "stream session started");
            }

            let (lines, end_of_stream) = match fragment {
                Some(text) => (self.splitter.push(&text), false),
                None => (self.splitter.finish().into_iter().collect(), true),
            };

            if self.process_lines(lines, observer).is_break() {
                tracing::debug!(message_id = %self.message_id(), "terminator frame received");
                transport.release();
                break;
            }

            if end_of_stream {
                tracing::debug!(message_id = %self.message_id(), "transport reached end-of-stream");
                break;
            }
        }

        self.finalize(observer).await
    }

    /// Commits the assembled message; calling it again after success is a no-op.
    pub async fn finalize<O>(&mut self, observer: &mut O) -> StreamResult<AssembledMessage>
    where
        O: StreamObserver + ?Sized,
    {
        if self.state == SessionState::Finalized {
            return Ok(self.sink.message().clone());
        }
        if self.state == SessionState::Failed {
            return self.reject(SessionTransition::Finish, "finalize-failed-session");
        }

        match self.sink.finalize(self.committer.as_ref(), observer).await {
            Ok(_) => {
                self.transition(SessionTransition::Finish);
                tracing::info!(
                    message_id = %self.message_id(),
                    content_len = self.content().len(),
                    "stream session finalized"
                );
                Ok(self.sink.message().clone())
            }
            Err(error) => {
                self.transition(SessionTransition::Fail);
                tracing::error!(
                    message_id = %self.message_id(),
                    error = %error,
                    "failed to persist finalized message"
                );
                Err(error)
            }
        }
    }

    fn process_lines<O>(&mut self, lines: Vec<String>, observer: &mut O) -> ControlFlow<()>
    where
        O: StreamObserver + ?Sized,
    {
        for line in lines {
            match StreamFrame::classify(&line) {
                StreamFrame::Blank | StreamFrame::Comment => {}
                StreamFrame::Terminator => return ControlFlow::Break(()),
                StreamFrame::Data(payload) => {
                    if let Some(delta) = delta_with_fallback(&payload) {
                        self.sink.push_delta(&delta, observer);
                    }
                }
            }
        }

        ControlFlow::Continue(())
    }

    fn transition(&mut self, transition: SessionTransition) {
        match self.state.apply(transition) {
            Ok(next) => self.state = next,
            Err(rejection) => tracing::warn!(
                message_id = %self.message_id(),
                rejection = ?rejection,
                "ignoring stream session transition"
            ),
        }
    }

    fn reject<T>(&self, attempted: SessionTransition, stage: &'static str) -> StreamResult<T> {
        let rejection = match self.state.apply(attempted) {
            Err(rejection) => rejection,
            Ok(_) => TransitionRejection::Terminal {
                state: self.state,
                attempted,
            },
        };

        Err(StreamError::InvalidTransition {
            stage,
            message_id: self.message_id(),
            rejection,
        })
    }
}
