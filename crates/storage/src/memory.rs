use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use snafu::OptionExt;

use super::error::{NotFoundSnafu, StorageResult};
use super::ids::{CollaborationId, CollaborationMessageId, ConversationId, MessageId};
use super::realtime::{ChannelRegistry, Subscription};
use super::types::{
    CollaborationMessageRecord, CollaborationRecord, ConversationRecord, MessageRecord,
    NewCollaboration, NewCollaborationMessage, NewConversation, NewMessage,
};
use super::{
    BoxFuture, CollaborationStore, ConversationStore, MessageStore, unix_timestamp_seconds,
};

#[derive(Debug, Default)]
struct MemoryState {
    conversations: Vec<ConversationRecord>,
    messages: HashMap<ConversationId, Vec<MessageRecord>>,
    collaborations: Vec<CollaborationRecord>,
    collaboration_messages: HashMap<CollaborationId, Vec<CollaborationMessageRecord>>,
}

/// Process-local store used by tests and the offline terminal mode.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
    realtime: ChannelRegistry,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn realtime(&self) -> &ChannelRegistry {
        &self.realtime
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConversationStore for MemoryStorage {
    fn create_conversation(
        &self,
        input: NewConversation,
    ) -> BoxFuture<'_, StorageResult<ConversationRecord>> {
        Box::pin(async move {
            let now = unix_timestamp_seconds();
            let record = ConversationRecord {
                id: ConversationId::generate(),
                title: input.title,
                created_at_unix_seconds: now,
                updated_at_unix_seconds: now,
            };

            let mut state = self.lock();
            state.messages.insert(record.id, Vec::new());
            state.conversations.push(record.clone());
            Ok(record)
        })
    }

    fn list_conversations(&self) -> BoxFuture<'_, StorageResult<Vec<ConversationRecord>>> {
        Box::pin(async move {
            let mut conversations = self.lock().conversations.clone();
            conversations.sort_by(|left, right| {
                right
                    .updated_at_unix_seconds
                    .cmp(&left.updated_at_unix_seconds)
                    .then_with(|| right.id.cmp(&left.id))
            });
            Ok(conversations)
        })
    }
}

impl MessageStore for MemoryStorage {
    fn append_message(
        &self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> BoxFuture<'_, StorageResult<MessageRecord>> {
        Box::pin(async move {
            let now = unix_timestamp_seconds();
            let mut state = self.lock();
            let messages = state
                .messages
                .get_mut(&conversation_id)
                .context(NotFoundSnafu {
                    stage: "memory-message-append",
                    entity: "conversation",
                    id: conversation_id.to_string(),
                })?;

            let record = MessageRecord {
                id: MessageId::generate(),
                conversation_id,
                seq: messages.len() as u64 + 1,
                role: input.role,
                content: input.content,
                created_at_unix_seconds: now,
            };
            messages.push(record.clone());

            if let Some(conversation) = state
                .conversations
                .iter_mut()
                .find(|conversation| conversation.id == conversation_id)
            {
                conversation.updated_at_unix_seconds = now;
            }
            Ok(record)
        })
    }

    fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            self.lock()
                .messages
                .get(&conversation_id)
                .cloned()
                .context(NotFoundSnafu {
                    stage: "memory-message-list",
                    entity: "conversation",
                    id: conversation_id.to_string(),
                })
        })
    }
}

impl CollaborationStore for MemoryStorage {
    fn create_collaboration(
        &self,
        input: NewCollaboration,
    ) -> BoxFuture<'_, StorageResult<CollaborationRecord>> {
        Box::pin(async move {
            let record = CollaborationRecord {
                id: CollaborationId::generate(),
                name: input.name,
                created_at_unix_seconds: unix_timestamp_seconds(),
            };

            let mut state = self.lock();
            state.collaboration_messages.insert(record.id, Vec::new());
            state.collaborations.push(record.clone());
            Ok(record)
        })
    }

    fn append_collaboration_message(
        &self,
        collaboration_id: CollaborationId,
        input: NewCollaborationMessage,
    ) -> BoxFuture<'_, StorageResult<CollaborationMessageRecord>> {
        Box::pin(async move {
            let record = {
                let mut state = self.lock();
                let messages = state
                    .collaboration_messages
                    .get_mut(&collaboration_id)
                    .context(NotFoundSnafu {
                        stage: "memory-collaboration-message-append",
                        entity: "collaboration",
                        id: collaboration_id.to_string(),
                    })?;

                let record = CollaborationMessageRecord {
                    id: CollaborationMessageId::generate(),
                    collaboration_id,
                    seq: messages.len() as u64 + 1,
                    author: input.author,
                    content: input.content,
                    created_at_unix_seconds: unix_timestamp_seconds(),
                };
                messages.push(record.clone());
                record
            };

            self.realtime.publish(&record);
            Ok(record)
        })
    }

    fn list_collaboration_messages(
        &self,
        collaboration_id: CollaborationId,
    ) -> BoxFuture<'_, StorageResult<Vec<CollaborationMessageRecord>>> {
        Box::pin(async move {
            self.lock()
                .collaboration_messages
                .get(&collaboration_id)
                .cloned()
                .context(NotFoundSnafu {
                    stage: "memory-collaboration-message-list",
                    entity: "collaboration",
                    id: collaboration_id.to_string(),
                })
        })
    }

    fn subscribe(&self, collaboration_id: CollaborationId) -> Subscription {
        self.realtime.subscribe(collaboration_id)
    }
}
