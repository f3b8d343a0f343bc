use codesphere_llm::ProxyError;
use codesphere_storage::StorageError;
use codesphere_stream::StreamError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("message is empty"))]
    EmptyInput { stage: &'static str },
    #[snafu(display("a reply is already streaming"))]
    Busy { stage: &'static str },
    #[snafu(display("storage failed on `{stage}`, {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("ai proxy failed on `{stage}`, {source}"))]
    Proxy {
        stage: &'static str,
        source: ProxyError,
    },
    #[snafu(display("reply stream failed on `{stage}`, {source}"))]
    Stream {
        stage: &'static str,
        source: StreamError,
    },
}

impl ChatError {
    /// Input rejections are not failures and never produce a notification.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::EmptyInput { .. } | Self::Busy { .. })
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
