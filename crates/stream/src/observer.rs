use crate::message::MessageId;

/// Receives the full running content of a message while it streams.
///
/// `content_updated` fires after every appended delta; `finalized` fires exactly
/// once with the committed content, which equals the last streamed value.
pub trait StreamObserver {
    fn content_updated(&mut self, message_id: MessageId, content: &str);

    fn finalized(&mut self, message_id: MessageId, content: &str) {
        self.content_updated(message_id, content);
    }
}

impl<F> StreamObserver for F
where
    F: FnMut(MessageId, &str),
{
    fn content_updated(&mut self, message_id: MessageId, content: &str) {
        self(message_id, content);
    }
}
