use serde::Deserialize;
use snafu::ResultExt;

use crate::error::{DecodeError, MalformedPayloadSnafu};

/// Incremental completion chunk: `{ choices: [{ delta: { content?: string } }] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeltaChunk {
    #[serde(default)]
    pub choices: Option<Vec<DeltaChoice>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeltaChoice {
    #[serde(default)]
    pub delta: Option<Delta>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

impl DeltaChunk {
    /// Content of the first choice, if present and non-empty.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .as_deref()?
            .first()?
            .delta
            .as_ref()?
            .content
            .as_deref()
            .filter(|content| !content.is_empty())
    }
}

/// Decodes one data payload into its delta text.
///
/// Valid JSON of an unexpected shape yields `Ok(None)`; only malformed JSON is
/// an error.
pub fn decode_payload(payload: &str) -> Result<Option<String>, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(payload).context(MalformedPayloadSnafu {
        stage: "decode-payload-json",
    })?;

    match serde_json::from_value::<DeltaChunk>(value) {
        Ok(chunk) => Ok(chunk.content().map(str::to_string)),
        Err(error) => {
            tracing::trace!(error = %error, "data frame has no delta chunk shape");
            Ok(None)
        }
    }
}

/// Decodes a payload, degrading to the raw payload text when it is malformed.
pub fn delta_with_fallback(payload: &str) -> Option<String> {
    match decode_payload(payload) {
        Ok(delta) => delta,
        Err(error) => {
            tracing::debug!(
                error = %error,
                payload_len = payload.len(),
                "appending undecodable data frame as literal text"
            );
            if payload.is_empty() {
                None
            } else {
                Some(payload.to_string())
            }
        }
    }
}
