use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::ids::CollaborationId;
use super::types::CollaborationMessageRecord;

const CHANNEL_CAPACITY: usize = 256;

type Channels = HashMap<CollaborationId, broadcast::Sender<CollaborationMessageRecord>>;

/// In-process realtime feed: one broadcast channel per subscribed collaboration.
///
/// Channels exist only while at least one [`Subscription`] is alive.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<Mutex<Channels>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, collaboration_id: CollaborationId) -> Subscription {
        let mut channels = self.lock();
        let receiver = channels
            .entry(collaboration_id)
            .or_insert_with(|| {
                tracing::debug!(collaboration_id = %collaboration_id, "opened realtime channel");
                broadcast::channel(CHANNEL_CAPACITY).0
            })
            .subscribe();

        Subscription {
            collaboration_id,
            receiver: Some(receiver),
            channels: Arc::clone(&self.channels),
        }
    }

    /// Delivers an inserted record to live subscribers; returns how many received it.
    pub fn publish(&self, record: &CollaborationMessageRecord) -> usize {
        let channels = self.lock();
        match channels.get(&record.collaboration_id) {
            Some(sender) => sender.send(record.clone()).unwrap_or(0),
            None => 0,
        }
    }

    pub fn is_open(&self, collaboration_id: CollaborationId) -> bool {
        self.lock().contains_key(&collaboration_id)
    }

    pub fn open_channels(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Channels> {
        lock_channels(&self.channels)
    }
}

/// Live feed of messages inserted into one collaboration after subscribing.
///
/// Dropping the subscription unsubscribes; the last one out closes the channel.
#[derive(Debug)]
pub struct Subscription {
    collaboration_id: CollaborationId,
    receiver: Option<broadcast::Receiver<CollaborationMessageRecord>>,
    channels: Arc<Mutex<Channels>>,
}

impl Subscription {
    pub fn collaboration_id(&self) -> CollaborationId {
        self.collaboration_id
    }

    /// Waits for the next inserted record; `None` once the feed is gone.
    pub async fn recv(&mut self) -> Option<CollaborationMessageRecord> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(record) => return Some(record),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        collaboration_id = %self.collaboration_id,
                        skipped,
                        "realtime subscriber lagged"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an already delivered record without waiting.
    pub fn try_recv(&mut self) -> Option<CollaborationMessageRecord> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.try_recv() {
                Ok(record) => return Some(record),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        collaboration_id = %self.collaboration_id,
                        skipped,
                        "realtime subscriber lagged"
                    );
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut channels = lock_channels(&self.channels);
        drop(self.receiver.take());

        let idle = channels
            .get(&self.collaboration_id)
            .is_some_and(|sender| sender.receiver_count() == 0);
        if idle {
            channels.remove(&self.collaboration_id);
            tracing::debug!(collaboration_id = %self.collaboration_id, "closed realtime channel");
        }
    }
}

fn lock_channels(channels: &Mutex<Channels>) -> MutexGuard<'_, Channels> {
    channels.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::ChannelRegistry;
    use crate::ids::{CollaborationId, CollaborationMessageId};
    use crate::types::{CollaborationMessageRecord, MessageAuthor};

    fn record(collaboration_id: CollaborationId, content: &str) -> CollaborationMessageRecord {
        CollaborationMessageRecord {
            id: CollaborationMessageId::generate(),
            collaboration_id,
            seq: 1,
            author: MessageAuthor::member("u-1"),
            content: content.to_string(),
            created_at_unix_seconds: 0,
        }
    }

    #[test]
    fn publishing_without_subscribers_is_a_no_op() {
        let registry = ChannelRegistry::new();
        let collaboration_id = CollaborationId::generate();

        assert_eq!(registry.publish(&record(collaboration_id, "hello")), 0);
        assert_eq!(registry.open_channels(), 0);
    }

    #[test]
    fn subscribers_only_see_their_collaboration() {
        let registry = ChannelRegistry::new();
        let mine = CollaborationId::generate();
        let other = CollaborationId::generate();
        let mut subscription = registry.subscribe(mine);

        registry.publish(&record(other, "elsewhere"));
        registry.publish(&record(mine, "here"));

        let received = subscription.try_recv().expect("record delivered");
        assert_eq!(received.content, "here");
        assert!(subscription.try_recv().is_none());
    }

    #[test]
    fn last_drop_tears_the_channel_down() {
        let registry = ChannelRegistry::new();
        let collaboration_id = CollaborationId::generate();
        let first = registry.subscribe(collaboration_id);
        let second = registry.subscribe(collaboration_id);

        drop(first);
        assert!(registry.is_open(collaboration_id));

        drop(second);
        assert!(!registry.is_open(collaboration_id));
        assert_eq!(registry.publish(&record(collaboration_id, "late")), 0);
    }

    #[tokio::test]
    async fn recv_waits_for_the_next_insert() {
        let registry = ChannelRegistry::new();
        let collaboration_id = CollaborationId::generate();
        let mut subscription = registry.subscribe(collaboration_id);

        let publisher = registry.clone();
        let handle = tokio::spawn(async move {
            publisher.publish(&record(collaboration_id, "later"));
        });

        let received = subscription.recv().await.expect("record delivered");
        assert_eq!(received.content, "later");
        handle.await.expect("publisher task");
    }
}
