use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Opaque identifier of one visible message, unique within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub const fn new(raw: Uuid) -> Self {
        Self(raw)
    }

    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Speaker of an assembled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Message whose content grows while a stream is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub created_at_unix_seconds: u64,
}

impl AssembledMessage {
    pub fn new(id: MessageId, role: Role) -> Self {
        Self {
            id,
            role,
            content: String::new(),
            created_at_unix_seconds: unix_timestamp_seconds(),
        }
    }
}

/// Persistence collaborator invoked once when a session finalizes.
///
/// Implementations are bound to one conversation (or collaboration) and map the
/// message onto an "append message" call of the backing store.
pub trait MessageCommitter: Send + Sync {
    fn commit<'a>(&'a self, message: &'a AssembledMessage) -> BoxFuture<'a, Result<(), BoxError>>;
}

pub fn unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
