#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use codesphere_llm::{BoxFuture, ByteStream, ChatProxy, ChatRequest, ProxyError, ProxyResult};
use futures::{StreamExt, stream};
use serde_json::json;

/// Canned answer for one proxy call.
pub enum Reply {
    Body(Vec<Bytes>),
    /// Body chunks followed by a connection reset.
    FailAfter(Vec<Bytes>),
    /// Body chunks, then the stream never ends.
    Hang(Vec<Bytes>),
    Reject(u16),
}

/// Proxy that replays scripted replies in order and records every request.
pub struct ScriptedProxy {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProxy {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl ChatProxy for ScriptedProxy {
    fn id(&self) -> &str {
        "scripted"
    }

    fn open_stream<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, ProxyResult<ByteStream>> {
        Box::pin(async move {
            self.requests.lock().expect("requests lock").push(request);
            let reply = self
                .replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or_else(|| Reply::Body(vec![done()]));

            match reply {
                Reply::Body(chunks) => Ok(stream::iter(chunks.into_iter().map(Ok)).boxed()),
                Reply::FailAfter(chunks) => {
                    let reset = ProxyError::Body {
                        stage: "scripted-body",
                        source: Box::new(std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            "connection reset by peer",
                        )),
                    };
                    Ok(stream::iter(chunks.into_iter().map(Ok).chain(Some(Err(reset)))).boxed())
                }
                Reply::Hang(chunks) => Ok(stream::iter(chunks.into_iter().map(Ok))
                    .chain(stream::pending())
                    .boxed()),
                Reply::Reject(status) => Err(ProxyError::UnexpectedStatus {
                    stage: "scripted-status",
                    status,
                    body: "upstream unavailable".to_string(),
                }),
            }
        })
    }
}

/// One `data:` line carrying a completion delta.
pub fn delta(content: &str) -> Bytes {
    let chunk = json!({ "choices": [{ "delta": { "content": content } }] });
    Bytes::from(format!("data: {chunk}\n"))
}

pub fn done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n")
}

pub fn raw(text: &'static str) -> Bytes {
    Bytes::from_static(text.as_bytes())
}

/// A full reply: one delta per piece, then the terminator.
pub fn reply(pieces: &[&str]) -> Reply {
    let mut chunks = pieces.iter().map(|piece| delta(piece)).collect::<Vec<_>>();
    chunks.push(done());
    Reply::Body(chunks)
}
