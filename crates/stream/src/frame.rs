pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// One classified line of the proxy event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Data(String),
    Comment,
    Terminator,
    Blank,
}

impl StreamFrame {
    /// Classifies a complete line with its terminator already removed.
    ///
    /// Unknown frame types collapse into `Blank` so newer proxies can add
    /// fields without breaking older consumers.
    pub fn classify(line: &str) -> Self {
        if line.trim().is_empty() {
            return Self::Blank;
        }

        if line.starts_with(':') {
            return Self::Comment;
        }

        let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
            return Self::Blank;
        };

        let payload = rest.trim();
        if payload == DONE_SENTINEL {
            Self::Terminator
        } else {
            Self::Data(payload.to_string())
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Terminator)
    }
}
