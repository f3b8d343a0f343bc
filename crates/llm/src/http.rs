use futures::StreamExt;
use reqwest::header::ACCEPT;
use snafu::{ResultExt, ensure};

use super::provider::{
    BoxFuture, BuildClientSnafu, ByteStream, ChatProxy, ChatRequest, EmptyMessageSetSnafu,
    InvalidEndpointSnafu, ProxyConfig, ProxyError, ProxyResult, ProxyRoute, RequestSnafu,
    UnexpectedStatusSnafu,
};

pub const EVENT_STREAM_MIME: &str = "text/event-stream";
pub const HTTP_PROXY_ID: &str = "http";

/// Proxy client for serverless functions reachable over HTTP.
pub struct HttpChatProxy {
    config: ProxyConfig,
    client: reqwest::Client,
}

impl HttpChatProxy {
    pub fn new(config: ProxyConfig) -> ProxyResult<Self> {
        validate_endpoint(&config.chat_url, "validate-chat-url")?;
        validate_endpoint(&config.collaboration_url, "validate-collaboration-url")?;

        let client = reqwest::Client::builder()
            .build()
            .context(BuildClientSnafu {
                stage: "build-client",
            })?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, route: ProxyRoute) -> &str {
        match route {
            ProxyRoute::Chat => &self.config.chat_url,
            ProxyRoute::Collaboration => &self.config.collaboration_url,
        }
    }
}

impl ChatProxy for HttpChatProxy {
    fn id(&self) -> &str {
        HTTP_PROXY_ID
    }

    fn open_stream<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, ProxyResult<ByteStream>> {
        Box::pin(async move {
            ensure!(
                !request.messages.is_empty(),
                EmptyMessageSetSnafu {
                    stage: "open-stream",
                }
            );

            let url = self.endpoint(request.route);
            let mut builder = self
                .client
                .post(url)
                .header(ACCEPT, EVENT_STREAM_MIME)
                .json(&request);
            if !self.config.api_key.is_empty() {
                builder = builder.bearer_auth(&self.config.api_key);
            }

            tracing::debug!(
                url = %url,
                message_count = request.messages.len(),
                "opening proxy stream"
            );
            let response = builder.send().await.context(RequestSnafu {
                stage: "send-chat-request",
            })?;

            let status = response.status();
            if !status.is_success() {
                let body = match response.text().await {
                    Ok(body) => body,
                    Err(error) => {
                        tracing::debug!(error = %error, "failed to read proxy error body");
                        String::new()
                    }
                };
                tracing::warn!(
                    url = %url,
                    status = status.as_u16(),
                    "proxy rejected chat request"
                );
                return UnexpectedStatusSnafu {
                    stage: "chat-http-status",
                    status: status.as_u16(),
                    body,
                }
                .fail();
            }

            let stream: ByteStream = response
                .bytes_stream()
                .map(|chunk| {
                    chunk.map_err(|source| ProxyError::Body {
                        stage: "read-chat-body",
                        source: Box::new(source),
                    })
                })
                .boxed();
            Ok(stream)
        })
    }
}

fn validate_endpoint(url: &str, stage: &'static str) -> ProxyResult<()> {
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        Ok(parsed) => InvalidEndpointSnafu {
            stage,
            url,
            details: format!("unsupported scheme `{}`", parsed.scheme()),
        }
        .fail(),
        Err(error) => InvalidEndpointSnafu {
            stage,
            url,
            details: error.to_string(),
        }
        .fail(),
    }
}
