use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use codesphere_llm::{ChatProxy, ChatRequest, ProxyMessage, ProxyRoute};
use codesphere_storage::{
    CollaborationId, CollaborationMessageId, CollaborationMessageRecord, CollaborationStore,
    MessageAuthor, NewCollaborationMessage, Subscription,
};
use codesphere_stream::{
    AssembledMessage, BoxError, BoxFuture, MessageCommitter, MessageId, StreamAssembler,
    StreamError, StreamObserver, TransportReader,
};
use snafu::{ResultExt, ensure};

use crate::error::{BusySnafu, ChatError, ChatResult, EmptyInputSnafu, StorageSnafu};
use crate::notify::{Notification, NotificationClass, Notifier};

pub const AI_MENTION: &str = "@ai";

/// Whether a typed message asks the assistant to reply (case-insensitive prefix).
pub fn mentions_ai(text: &str) -> bool {
    text.get(..AI_MENTION.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(AI_MENTION))
}

/// Prompt forwarded to the assistant: the message without its mention, trimmed.
///
/// A mention with nothing after it has no prompt.
pub fn ai_prompt(text: &str) -> Option<&str> {
    if !mentions_ai(text) {
        return None;
    }
    Some(text[AI_MENTION.len()..].trim()).filter(|prompt| !prompt.is_empty())
}

/// Persists finalized assistant replies into a collaboration under the AI author.
pub struct CollaborationCommitter {
    collaboration_id: CollaborationId,
    store: Arc<dyn CollaborationStore>,
}

impl CollaborationCommitter {
    pub fn new(collaboration_id: CollaborationId, store: Arc<dyn CollaborationStore>) -> Self {
        Self {
            collaboration_id,
            store,
        }
    }
}

impl MessageCommitter for CollaborationCommitter {
    fn commit<'a>(&'a self, message: &'a AssembledMessage) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            let input = NewCollaborationMessage::new(MessageAuthor::Ai, message.content.clone());
            self.store
                .append_collaboration_message(self.collaboration_id, input)
                .await
                .map(|_| ())
                .map_err(BoxError::from)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReply {
    pub message_id: MessageId,
    pub content: String,
    /// Streamed completely but not saved.
    pub unsaved: bool,
}

/// Messages of one collaboration as members see them, plus the AI reply in
/// flight and any AI replies that streamed but were never saved.
#[derive(Debug, Clone, Default)]
pub struct CollaborationTimeline {
    entries: Vec<CollaborationMessageRecord>,
    pending: Option<PendingReply>,
    unsaved: Vec<PendingReply>,
}

impl CollaborationTimeline {
    pub fn entries(&self) -> &[CollaborationMessageRecord] {
        &self.entries
    }

    pub fn pending(&self) -> Option<&PendingReply> {
        self.pending.as_ref()
    }

    /// Streamed AI replies whose save failed, oldest first. They stay on screen
    /// for the lifetime of the room.
    pub fn unsaved_replies(&self) -> &[PendingReply] {
        &self.unsaved
    }

    /// Adds an inserted record once; history and the live feed may overlap.
    pub fn apply(&mut self, record: CollaborationMessageRecord) -> bool {
        if self.contains(record.id) {
            return false;
        }
        self.entries.push(record);
        true
    }

    pub fn contains(&self, message_id: CollaborationMessageId) -> bool {
        self.entries.iter().any(|entry| entry.id == message_id)
    }

    fn begin_pending(&mut self, message_id: MessageId) {
        self.pending = Some(PendingReply {
            message_id,
            content: String::new(),
            unsaved: false,
        });
    }

    fn clear_pending(&mut self, message_id: MessageId) -> bool {
        if self.pending_mut(message_id).is_none() {
            return false;
        }
        self.pending = None;
        true
    }

    /// Moves the pending reply out of the in-flight slot into the unsaved list.
    fn keep_unsaved(&mut self, message_id: MessageId) {
        if self.pending_mut(message_id).is_none() {
            return;
        }
        if let Some(mut reply) = self.pending.take() {
            reply.unsaved = true;
            self.unsaved.push(reply);
        }
    }

    fn pending_mut(&mut self, message_id: MessageId) -> Option<&mut PendingReply> {
        self.pending
            .as_mut()
            .filter(|pending| pending.message_id == message_id)
    }
}

impl StreamObserver for CollaborationTimeline {
    fn content_updated(&mut self, message_id: MessageId, content: &str) {
        if let Some(pending) = self.pending_mut(message_id) {
            pending.content.clear();
            pending.content.push_str(content);
        }
    }

    // The committed reply comes back through the live feed.
    fn finalized(&mut self, message_id: MessageId, _content: &str) {
        self.clear_pending(message_id);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Posted(CollaborationMessageRecord),
    AiReplied {
        posted: CollaborationMessageRecord,
        reply: AssembledMessage,
    },
}

/// One member's live view of a collaboration.
///
/// Holds the realtime subscription for as long as the room is open; dropping
/// the room unsubscribes.
pub struct CollaborationRoom {
    collaboration_id: CollaborationId,
    member_id: String,
    store: Arc<dyn CollaborationStore>,
    proxy: Arc<dyn ChatProxy>,
    notifier: Arc<dyn Notifier>,
    assembler: StreamAssembler,
    subscription: tokio::sync::Mutex<Subscription>,
    timeline: Mutex<CollaborationTimeline>,
    ai_in_flight: AtomicBool,
}

impl CollaborationRoom {
    pub async fn open(
        collaboration_id: CollaborationId,
        member_id: impl Into<String>,
        store: Arc<dyn CollaborationStore>,
        proxy: Arc<dyn ChatProxy>,
        notifier: Arc<dyn Notifier>,
    ) -> ChatResult<Self> {
        // Subscribe first so nothing inserted while history loads is missed.
        let subscription = store.subscribe(collaboration_id);
        let history = store
            .list_collaboration_messages(collaboration_id)
            .await
            .context(StorageSnafu {
                stage: "load-collaboration-history",
            })?;

        let mut timeline = CollaborationTimeline::default();
        for record in history {
            timeline.apply(record);
        }

        let committer = CollaborationCommitter::new(collaboration_id, Arc::clone(&store));
        let member_id = member_id.into();
        tracing::info!(
            collaboration_id = %collaboration_id,
            member_id = %member_id,
            history_len = timeline.entries().len(),
            "opened collaboration room"
        );

        Ok(Self {
            collaboration_id,
            member_id,
            store,
            proxy,
            notifier,
            assembler: StreamAssembler::new(Arc::new(committer)),
            subscription: tokio::sync::Mutex::new(subscription),
            timeline: Mutex::new(timeline),
            ai_in_flight: AtomicBool::new(false),
        })
    }

    pub fn collaboration_id(&self) -> CollaborationId {
        self.collaboration_id
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    pub fn snapshot(&self) -> CollaborationTimeline {
        self.timeline().clone()
    }

    pub async fn send(&self, text: &str) -> ChatResult<SendOutcome> {
        self.send_with(text, &mut |_: MessageId, _: &str| {}).await
    }

    /// Posts `text` as typed; a leading `@ai` also streams an assistant reply.
    pub async fn send_with<O>(&self, text: &str, echo: &mut O) -> ChatResult<SendOutcome>
    where
        O: StreamObserver + ?Sized,
    {
        ensure!(
            !text.trim().is_empty(),
            EmptyInputSnafu {
                stage: "collaboration-send-validate"
            }
        );

        let prompt = ai_prompt(text);
        let guard = match prompt {
            Some(_) => match AiReplyGuard::acquire(self) {
                Some(guard) => Some(guard),
                None => {
                    return BusySnafu {
                        stage: "collaboration-ai-acquire",
                    }
                    .fail();
                }
            },
            None => None,
        };

        let author = MessageAuthor::member(self.member_id.as_str());
        let posted = match self
            .store
            .append_collaboration_message(
                self.collaboration_id,
                NewCollaborationMessage::new(author, text),
            )
            .await
        {
            Ok(posted) => posted,
            Err(source) => {
                tracing::error!(
                    collaboration_id = %self.collaboration_id,
                    error = %source,
                    "failed to post collaboration message"
                );
                self.notify(NotificationClass::PersistenceFailure, "Failed to send message");
                return Err(ChatError::Storage {
                    stage: "post-collaboration-message",
                    source,
                });
            }
        };
        self.timeline().apply(posted.clone());
        self.pump().await;

        let (Some(prompt), Some(mut guard)) = (prompt, guard) else {
            if mentions_ai(text) {
                tracing::debug!(
                    collaboration_id = %self.collaboration_id,
                    "mention without a prompt, not asking the ai"
                );
            }
            return Ok(SendOutcome::Posted(posted));
        };

        let reply = self.ask_ai(prompt, &mut guard, echo).await?;
        Ok(SendOutcome::AiReplied { posted, reply })
    }

    /// Applies every insert already delivered by the live feed.
    pub async fn pump(&self) -> usize {
        let mut subscription = self.subscription.lock().await;
        let mut applied = 0;
        while let Some(record) = subscription.try_recv() {
            if self.timeline().apply(record) {
                applied += 1;
            }
        }
        applied
    }

    /// Waits for the next insert from any member and applies it.
    pub async fn next_insert(&self) -> Option<CollaborationMessageRecord> {
        let mut subscription = self.subscription.lock().await;
        let record = subscription.recv().await?;
        self.timeline().apply(record.clone());
        Some(record)
    }

    async fn ask_ai<O>(
        &self,
        prompt: &str,
        guard: &mut AiReplyGuard<'_>,
        echo: &mut O,
    ) -> ChatResult<AssembledMessage>
    where
        O: StreamObserver + ?Sized,
    {
        let request = ChatRequest::new(vec![ProxyMessage::new(codesphere_llm::Role::User, prompt)])
            .with_route(ProxyRoute::Collaboration);
        let body = match self.proxy.open_stream(request).await {
            Ok(body) => body,
            Err(source) => {
                tracing::error!(
                    collaboration_id = %self.collaboration_id,
                    error = %source,
                    "collaboration ai request failed"
                );
                self.notify(NotificationClass::ProxyFailure, "AI unavailable");
                return Err(ChatError::Proxy {
                    stage: "open-collaboration-ai-stream",
                    source,
                });
            }
        };

        let message_id = MessageId::new_v4();
        self.timeline().begin_pending(message_id);
        guard.pending = Some(message_id);

        let mut session = self.assembler.begin(message_id);
        let mut observer = TimelineObserver {
            timeline: &self.timeline,
            echo,
        };
        let result = session.run(TransportReader::new(body), &mut observer).await;
        guard.pending = None;

        match result {
            Ok(reply) => {
                self.pump().await;
                Ok(reply)
            }
            Err(error) => Err(self.fail_reply(message_id, error)),
        }
    }

    fn fail_reply(&self, message_id: MessageId, error: StreamError) -> ChatError {
        match error {
            StreamError::Persistence { .. } => {
                self.timeline().keep_unsaved(message_id);
                self.notify(
                    NotificationClass::PersistenceFailure,
                    "The AI reply could not be saved",
                );
            }
            StreamError::Transport { .. } | StreamError::InvalidTransition { .. } => {
                self.timeline().clear_pending(message_id);
                self.notify(NotificationClass::TransientFailure, "AI unavailable");
            }
        }

        ChatError::Stream {
            stage: "assemble-collaboration-reply",
            source: error,
        }
    }

    fn notify(&self, class: NotificationClass, message: &str) {
        self.notifier.notify(Notification::new(class, message));
    }

    fn timeline(&self) -> MutexGuard<'_, CollaborationTimeline> {
        lock_timeline(&self.timeline)
    }
}

struct AiReplyGuard<'a> {
    room: &'a CollaborationRoom,
    pending: Option<MessageId>,
}

impl<'a> AiReplyGuard<'a> {
    fn acquire(room: &'a CollaborationRoom) -> Option<Self> {
        room.ai_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                room,
                pending: None,
            })
    }
}

impl Drop for AiReplyGuard<'_> {
    fn drop(&mut self) {
        if let Some(message_id) = self.pending.take() {
            self.room.timeline().clear_pending(message_id);
        }
        self.room.ai_in_flight.store(false, Ordering::Release);
    }
}

struct TimelineObserver<'a, O: ?Sized> {
    timeline: &'a Mutex<CollaborationTimeline>,
    echo: &'a mut O,
}

impl<O> StreamObserver for TimelineObserver<'_, O>
where
    O: StreamObserver + ?Sized,
{
    fn content_updated(&mut self, message_id: MessageId, content: &str) {
        lock_timeline(self.timeline).content_updated(message_id, content);
        self.echo.content_updated(message_id, content);
    }

    fn finalized(&mut self, message_id: MessageId, content: &str) {
        lock_timeline(self.timeline).finalized(message_id, content);
        self.echo.finalized(message_id, content);
    }
}

fn lock_timeline(timeline: &Mutex<CollaborationTimeline>) -> MutexGuard<'_, CollaborationTimeline> {
    timeline.lock().unwrap_or_else(PoisonError::into_inner)
}
