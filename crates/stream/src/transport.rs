use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::decoder::Utf8Decoder;
use crate::error::{StreamError, StreamResult};
use crate::message::BoxError;

/// Owns the response body and yields decoded text fragments.
///
/// The byte stream is released as soon as it ends, fails, or the reader is
/// dropped, so an abandoned session never keeps the connection open.
pub struct TransportReader<S> {
    stream: Option<S>,
    decoder: Utf8Decoder,
    bytes_read: u64,
}

impl<S, E> TransportReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BoxError>,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            decoder: Utf8Decoder::new(),
            bytes_read: 0,
        }
    }

    /// Reads until a non-empty fragment is decoded; `Ok(None)` means end-of-stream.
    pub async fn next_fragment(&mut self) -> StreamResult<Option<String>> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };

            match stream.next().await {
                Some(Ok(chunk)) => {
                    self.bytes_read = self.bytes_read.saturating_add(chunk.len() as u64);
                    let text = self.decoder.decode(&chunk);
                    if !text.is_empty() {
                        return Ok(Some(text));
                    }
                }
                Some(Err(source)) => {
                    self.stream = None;
                    return Err(StreamError::Transport {
                        stage: "transport-read",
                        source: source.into(),
                    });
                }
                None => {
                    self.stream = None;
                    let tail = self.decoder.finish();
                    return Ok(if tail.is_empty() { None } else { Some(tail) });
                }
            }
        }
    }
}

impl<S> TransportReader<S> {
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Drops the underlying byte stream without reading further.
    pub fn release(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!(bytes_read = self.bytes_read, "released transport before end-of-stream");
        }
    }
}

impl<S> Drop for TransportReader<S> {
    fn drop(&mut self) {
        self.release();
    }
}
