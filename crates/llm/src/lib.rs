use std::sync::Arc;

mod http;
mod provider;

pub use http::{EVENT_STREAM_MIME, HTTP_PROXY_ID, HttpChatProxy};
pub use provider::{
    BoxFuture, ByteStream, ChatProxy, ChatRequest, ProxyConfig, ProxyError, ProxyMessage,
    ProxyResult, ProxyRoute, Role,
};

/// Builds the proxy client for the configured endpoints.
pub fn create_proxy(config: ProxyConfig) -> ProxyResult<Arc<dyn ChatProxy>> {
    Ok(Arc::new(HttpChatProxy::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::{HTTP_PROXY_ID, ProxyConfig, ProxyError, create_proxy};

    #[test]
    fn builds_http_proxy_with_trimmed_config() {
        let config = ProxyConfig::new(
            " https://example.com/chat ",
            "https://example.com/ai",
            " k ",
        );
        assert_eq!(config.chat_url, "https://example.com/chat");
        assert_eq!(config.api_key, "k");

        let proxy = create_proxy(config).expect("http proxy");
        assert_eq!(proxy.id(), HTTP_PROXY_ID);
    }

    #[test]
    fn invalid_collaboration_endpoint_is_rejected() {
        let config = ProxyConfig::new("https://example.com/chat", "not a url", "");
        assert!(matches!(
            create_proxy(config),
            Err(ProxyError::InvalidEndpoint { .. })
        ));
    }
}
