use codesphere_stream::{MessageId, Role, StreamObserver};

/// Lifecycle of one visible message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Persisted and complete.
    Done,
    /// Assistant reply still receiving deltas.
    Streaming,
    /// Fully streamed, but saving it failed.
    Unsaved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
}

/// What the user currently sees for one conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationView {
    messages: Vec<VisibleMessage>,
}

impl ConversationView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[VisibleMessage] {
        &self.messages
    }

    pub fn get(&self, message_id: MessageId) -> Option<&VisibleMessage> {
        self.messages.iter().find(|message| message.id == message_id)
    }

    pub fn is_streaming(&self) -> bool {
        self.messages
            .iter()
            .any(|message| message.status == MessageStatus::Streaming)
    }

    pub fn push_committed(&mut self, message_id: MessageId, role: Role, content: impl Into<String>) {
        self.messages.push(VisibleMessage {
            id: message_id,
            role,
            content: content.into(),
            status: MessageStatus::Done,
        });
    }

    /// Adds the empty assistant placeholder that streamed deltas fill in.
    pub fn begin_streaming(&mut self, message_id: MessageId) {
        self.messages.push(VisibleMessage {
            id: message_id,
            role: Role::Assistant,
            content: String::new(),
            status: MessageStatus::Streaming,
        });
    }

    /// Removes a message that never completed; returns whether it was present.
    pub fn rollback(&mut self, message_id: MessageId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|message| message.id != message_id);
        before != self.messages.len()
    }

    pub fn mark_unsaved(&mut self, message_id: MessageId) {
        if let Some(message) = self.find_mut(message_id) {
            message.status = MessageStatus::Unsaved;
        }
    }

    /// Prior history sent with the next request: completed, non-empty messages only.
    pub fn history(&self) -> impl Iterator<Item = &VisibleMessage> {
        self.messages.iter().filter(|message| {
            message.status != MessageStatus::Streaming && !message.content.trim().is_empty()
        })
    }

    fn find_mut(&mut self, message_id: MessageId) -> Option<&mut VisibleMessage> {
        self.messages
            .iter_mut()
            .find(|message| message.id == message_id)
    }

    fn streaming_mut(&mut self, message_id: MessageId) -> Option<&mut VisibleMessage> {
        let message = self.find_mut(message_id);
        if message.is_none() {
            tracing::debug!(message_id = %message_id, "ignoring update for message not on screen");
        }
        message.filter(|message| message.status == MessageStatus::Streaming)
    }
}

impl StreamObserver for ConversationView {
    fn content_updated(&mut self, message_id: MessageId, content: &str) {
        if let Some(message) = self.streaming_mut(message_id) {
            message.content.clear();
            message.content.push_str(content);
        }
    }

    fn finalized(&mut self, message_id: MessageId, content: &str) {
        if let Some(message) = self.streaming_mut(message_id) {
            message.content.clear();
            message.content.push_str(content);
            message.status = MessageStatus::Done;
        }
    }
}

#[cfg(test)]
mod tests {
    use codesphere_stream::{MessageId, Role, StreamObserver};

    use super::{ConversationView, MessageStatus};

    #[test]
    fn streamed_updates_fill_the_placeholder_until_finalized() {
        let mut view = ConversationView::new();
        let user = MessageId::new_v4();
        let reply = MessageId::new_v4();
        view.push_committed(user, Role::User, "Hi");
        view.begin_streaming(reply);

        view.content_updated(reply, "Hi");
        view.content_updated(reply, "Hi there");
        assert_eq!(view.history().count(), 1);

        view.finalized(reply, "Hi there");
        let message = view.get(reply).expect("reply on screen");
        assert_eq!(message.content, "Hi there");
        assert_eq!(message.status, MessageStatus::Done);
        assert_eq!(view.history().count(), 2);

        // Late updates never touch a finished message.
        view.content_updated(reply, "Hi there!!");
        assert_eq!(view.get(reply).map(|m| m.content.as_str()), Some("Hi there"));
    }

    #[test]
    fn rollback_removes_only_the_target() {
        let mut view = ConversationView::new();
        let user = MessageId::new_v4();
        let reply = MessageId::new_v4();
        view.push_committed(user, Role::User, "question");
        view.begin_streaming(reply);
        view.content_updated(reply, "partial");

        assert!(view.rollback(reply));
        assert!(!view.rollback(reply));
        assert_eq!(view.messages().len(), 1);
        assert_eq!(view.messages()[0].id, user);
        assert!(!view.is_streaming());
    }

    #[test]
    fn updates_for_unknown_messages_are_ignored() {
        let mut view = ConversationView::new();
        view.content_updated(MessageId::new_v4(), "stray");
        assert!(view.messages().is_empty());
    }
}
