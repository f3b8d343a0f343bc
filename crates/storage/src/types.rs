use super::ids::{CollaborationId, CollaborationMessageId, ConversationId, MessageId};

/// Title given to a conversation created before its first message.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Chat";

/// Reserved author id stored for AI-authored collaboration messages.
pub const AI_AUTHOR_ID: &str = "ai";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub title: String,
    pub created_at_unix_seconds: u64,
    pub updated_at_unix_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub title: String,
}

impl Default for NewConversation {
    fn default() -> Self {
        Self {
            title: DEFAULT_CONVERSATION_TITLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub seq: u64,
    pub role: MessageRole,
    pub content: String,
    pub created_at_unix_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
}

impl NewMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaborationRecord {
    pub id: CollaborationId,
    pub name: String,
    pub created_at_unix_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCollaboration {
    pub name: String,
}

/// Who wrote a collaboration message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageAuthor {
    Member(String),
    Ai,
}

impl MessageAuthor {
    pub fn member(user_id: impl Into<String>) -> Self {
        Self::Member(user_id.into())
    }

    pub fn is_ai(&self) -> bool {
        matches!(self, Self::Ai)
    }

    /// Stored author id; the AI uses [`AI_AUTHOR_ID`].
    pub fn user_id(&self) -> &str {
        match self {
            Self::Member(user_id) => user_id,
            Self::Ai => AI_AUTHOR_ID,
        }
    }

    pub(crate) fn from_stored(user_id: String, is_ai: bool) -> Self {
        if is_ai {
            Self::Ai
        } else {
            Self::Member(user_id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaborationMessageRecord {
    pub id: CollaborationMessageId,
    pub collaboration_id: CollaborationId,
    pub seq: u64,
    pub author: MessageAuthor,
    pub content: String,
    pub created_at_unix_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCollaborationMessage {
    pub author: MessageAuthor,
    pub content: String,
}

impl NewCollaborationMessage {
    pub fn new(author: MessageAuthor, content: impl Into<String>) -> Self {
        Self {
            author,
            content: content.into(),
        }
    }
}
