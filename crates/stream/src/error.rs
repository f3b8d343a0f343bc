use snafu::Snafu;

use crate::message::{BoxError, MessageId};
use crate::session::TransitionRejection;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StreamError {
    #[snafu(display("transport failed on `{stage}`, {source}"))]
    Transport {
        stage: &'static str,
        source: BoxError,
    },
    #[snafu(display("failed to persist message {message_id} on `{stage}`, {source}"))]
    Persistence {
        stage: &'static str,
        message_id: MessageId,
        source: BoxError,
    },
    #[snafu(display("stream session for message {message_id} rejected {rejection:?}"))]
    InvalidTransition {
        stage: &'static str,
        message_id: MessageId,
        rejection: TransitionRejection,
    },
}

/// Non-fatal failure to decode a single data frame.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DecodeError {
    #[snafu(display("data frame is not valid JSON on `{stage}`, {source}"))]
    MalformedPayload {
        stage: &'static str,
        source: serde_json::Error,
    },
}

pub type StreamResult<T> = Result<T, StreamError>;
