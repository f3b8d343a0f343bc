#![deny(unsafe_code)]

//! Streaming response assembler for AI chat surfaces.
//!
//! The proxy answers a chat request with a line-oriented event stream
//! (`data: {...}` frames, `:` keepalives, `data: [DONE]`). This crate turns the
//! raw response body into one growing assistant message:
//!
//! transport reader -> frame splitter -> event filter -> payload decoder -> incremental sink
//!
//! [`StreamAssembler`] is instantiated once per conversation or collaboration
//! context and hands out one [`StreamSession`] per assistant message.

pub mod decoder;
pub mod error;
pub mod frame;
pub mod message;
pub mod observer;
pub mod payload;
pub mod session;
pub mod sink;
pub mod splitter;
pub mod transport;

pub use decoder::Utf8Decoder;
pub use error::{DecodeError, StreamError, StreamResult};
pub use frame::{DATA_PREFIX, DONE_SENTINEL, StreamFrame};
pub use message::{
    AssembledMessage, BoxError, BoxFuture, MessageCommitter, MessageId, Role,
    unix_timestamp_seconds,
};
pub use observer::StreamObserver;
pub use payload::{DeltaChunk, decode_payload, delta_with_fallback};
pub use session::{
    SessionState, SessionTransition, StreamAssembler, StreamSession, TransitionRejection,
};
pub use sink::{FinalizeOutcome, IncrementalSink};
pub use splitter::FrameSplitter;
pub use transport::TransportReader;
