use std::future::Future;
use std::pin::Pin;

pub mod error;
pub mod ids;
pub mod memory;
pub mod realtime;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{CollaborationId, CollaborationMessageId, ConversationId, MessageId};
pub use memory::MemoryStorage;
pub use realtime::{ChannelRegistry, Subscription};
pub use sqlite::SqliteStorage;
pub use types::{
    AI_AUTHOR_ID, CollaborationMessageRecord, CollaborationRecord, ConversationRecord,
    DEFAULT_CONVERSATION_TITLE, MessageAuthor, MessageRecord, MessageRole, NewCollaboration,
    NewCollaborationMessage, NewConversation, NewMessage,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait ConversationStore: Send + Sync {
    fn create_conversation(
        &self,
        input: NewConversation,
    ) -> BoxFuture<'_, StorageResult<ConversationRecord>>;
    /// Most recently updated first.
    fn list_conversations(&self) -> BoxFuture<'_, StorageResult<Vec<ConversationRecord>>>;
}

pub trait MessageStore: Send + Sync {
    fn append_message(
        &self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> BoxFuture<'_, StorageResult<MessageRecord>>;
    /// Ascending by insertion.
    fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>>;
}

pub trait CollaborationStore: Send + Sync {
    fn create_collaboration(
        &self,
        input: NewCollaboration,
    ) -> BoxFuture<'_, StorageResult<CollaborationRecord>>;
    /// Inserts the message and publishes it to live subscribers once committed.
    fn append_collaboration_message(
        &self,
        collaboration_id: CollaborationId,
        input: NewCollaborationMessage,
    ) -> BoxFuture<'_, StorageResult<CollaborationMessageRecord>>;
    /// Ascending by creation.
    fn list_collaboration_messages(
        &self,
        collaboration_id: CollaborationId,
    ) -> BoxFuture<'_, StorageResult<Vec<CollaborationMessageRecord>>>;
    fn subscribe(&self, collaboration_id: CollaborationId) -> Subscription;
}

pub trait Storage: ConversationStore + MessageStore + CollaborationStore {}

impl<T> Storage for T where T: ConversationStore + MessageStore + CollaborationStore {}

pub(crate) fn unix_timestamp_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
