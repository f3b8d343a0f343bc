use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;
use snafu::Snafu;

/// Endpoints of the serverless proxy functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub chat_url: String,
    pub collaboration_url: String,
    pub api_key: String,
}

impl ProxyConfig {
    pub fn new(
        chat_url: impl Into<String>,
        collaboration_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            chat_url: chat_url.into().trim().to_string(),
            collaboration_url: collaboration_url.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
        }
    }
}

/// Speaker role on the proxy wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyMessage {
    pub role: Role,
    pub content: String,
}

impl ProxyMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Which proxy function serves the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProxyRoute {
    #[default]
    Chat,
    Collaboration,
}

/// Outbound request: the full prior history, newest message last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    #[serde(skip)]
    pub route: ProxyRoute,
    pub messages: Vec<ProxyMessage>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ProxyMessage>) -> Self {
        Self {
            route: ProxyRoute::Chat,
            messages,
        }
    }

    pub fn with_route(mut self, route: ProxyRoute) -> Self {
        self.route = route;
        self
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ByteStream = BoxStream<'static, Result<Bytes, ProxyError>>;
pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProxyError {
    #[snafu(display("proxy endpoint '{url}' is invalid: {details}"))]
    InvalidEndpoint {
        stage: &'static str,
        url: String,
        details: String,
    },
    #[snafu(display("chat request has no messages"))]
    EmptyMessageSet { stage: &'static str },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("proxy request failed on `{stage}`, {source}"))]
    Request {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("proxy returned status {status}: {body}"))]
    UnexpectedStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("proxy response body failed on `{stage}`, {source}"))]
    Body {
        stage: &'static str,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// AI proxy collaborator that answers chat requests with an event-stream body.
pub trait ChatProxy: Send + Sync {
    fn id(&self) -> &str;

    /// Sends the request and resolves once the response headers are in.
    ///
    /// A non-success status resolves to an error before any body byte is read.
    fn open_stream<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, ProxyResult<ByteStream>>;
}
