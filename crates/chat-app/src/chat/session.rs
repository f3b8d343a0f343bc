use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use codesphere_llm::{ChatProxy, ChatRequest, ProxyMessage};
use codesphere_storage::{
    ConversationId, ConversationStore, MessageRecord, MessageRole, MessageStore, NewConversation,
    NewMessage,
};
use codesphere_stream::{
    AssembledMessage, BoxError, BoxFuture, MessageCommitter, MessageId, Role, StreamAssembler,
    StreamError, StreamObserver, TransportReader,
};
use snafu::{ResultExt, ensure};

use super::conversation::ConversationView;
use crate::error::{BusySnafu, ChatError, ChatResult, EmptyInputSnafu, StorageSnafu};
use crate::notify::{Notification, NotificationClass, Notifier};

/// Persists finalized replies as messages of one conversation.
pub struct ConversationCommitter {
    conversation_id: ConversationId,
    messages: Arc<dyn MessageStore>,
}

impl ConversationCommitter {
    pub fn new(conversation_id: ConversationId, messages: Arc<dyn MessageStore>) -> Self {
        Self {
            conversation_id,
            messages,
        }
    }
}

impl MessageCommitter for ConversationCommitter {
    fn commit<'a>(&'a self, message: &'a AssembledMessage) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            let input = NewMessage::new(storage_role(message.role), message.content.clone());
            self.messages
                .append_message(self.conversation_id, input)
                .await
                .map(|_| ())
                .map_err(BoxError::from)
        })
    }
}

/// Direct chat with the assistant for one conversation.
///
/// One reply streams at a time; a second submit while one is in flight is rejected.
pub struct ChatSession {
    conversation_id: ConversationId,
    messages: Arc<dyn MessageStore>,
    proxy: Arc<dyn ChatProxy>,
    notifier: Arc<dyn Notifier>,
    assembler: StreamAssembler,
    view: Mutex<ConversationView>,
    in_flight: AtomicBool,
}

impl ChatSession {
    pub fn new(
        conversation_id: ConversationId,
        messages: Arc<dyn MessageStore>,
        proxy: Arc<dyn ChatProxy>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let committer = ConversationCommitter::new(conversation_id, Arc::clone(&messages));
        Self {
            conversation_id,
            messages,
            proxy,
            notifier,
            assembler: StreamAssembler::new(Arc::new(committer)),
            view: Mutex::new(ConversationView::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Creates a fresh "New Chat" conversation and a session bound to it.
    pub async fn start<S>(
        storage: Arc<S>,
        proxy: Arc<dyn ChatProxy>,
        notifier: Arc<dyn Notifier>,
    ) -> ChatResult<Self>
    where
        S: ConversationStore + MessageStore + 'static,
    {
        let conversation = match storage.create_conversation(NewConversation::default()).await {
            Ok(conversation) => conversation,
            Err(source) => {
                tracing::error!(error = %source, "failed to create conversation");
                notifier.notify(Notification::new(
                    NotificationClass::PersistenceFailure,
                    "Failed to create conversation",
                ));
                return Err(ChatError::Storage {
                    stage: "create-conversation",
                    source,
                });
            }
        };

        tracing::info!(conversation_id = %conversation.id, "started conversation");
        Ok(Self::new(conversation.id, storage, proxy, notifier))
    }

    /// Binds a session to an existing conversation and loads its history.
    pub async fn open(
        conversation_id: ConversationId,
        messages: Arc<dyn MessageStore>,
        proxy: Arc<dyn ChatProxy>,
        notifier: Arc<dyn Notifier>,
    ) -> ChatResult<Self> {
        let session = Self::new(conversation_id, messages, proxy, notifier);
        session.hydrate().await?;
        Ok(session)
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ConversationView {
        self.view().clone()
    }

    /// Replaces the visible history with what the store holds.
    pub async fn hydrate(&self) -> ChatResult<usize> {
        let Some(_guard) = SubmitGuard::acquire(self) else {
            return BusySnafu { stage: "hydrate" }.fail();
        };

        let records = self
            .messages
            .list_messages(self.conversation_id)
            .await
            .context(StorageSnafu {
                stage: "hydrate-list-messages",
            })?;

        let mut view = ConversationView::new();
        for record in &records {
            push_record(&mut view, record);
        }
        *self.view() = view;

        tracing::debug!(
            conversation_id = %self.conversation_id,
            message_count = records.len(),
            "hydrated conversation"
        );
        Ok(records.len())
    }

    pub async fn submit(&self, input: &str) -> ChatResult<AssembledMessage> {
        self.submit_with(input, &mut |_: MessageId, _: &str| {}).await
    }

    /// Sends `input` and streams the reply, mirroring every update into `echo`.
    ///
    /// Failures are reported through the notifier exactly once before the error
    /// is returned.
    pub async fn submit_with<O>(&self, input: &str, echo: &mut O) -> ChatResult<AssembledMessage>
    where
        O: StreamObserver + ?Sized,
    {
        let prompt = input.trim();
        ensure!(
            !prompt.is_empty(),
            EmptyInputSnafu {
                stage: "submit-validate"
            }
        );
        let Some(mut guard) = SubmitGuard::acquire(self) else {
            return BusySnafu {
                stage: "submit-acquire",
            }
            .fail();
        };

        let record = match self
            .messages
            .append_message(self.conversation_id, NewMessage::new(MessageRole::User, prompt))
            .await
        {
            Ok(record) => record,
            Err(source) => {
                tracing::error!(
                    conversation_id = %self.conversation_id,
                    error = %source,
                    "failed to persist user message"
                );
                self.notify(NotificationClass::PersistenceFailure, "Failed to send message");
                return Err(ChatError::Storage {
                    stage: "persist-user-message",
                    source,
                });
            }
        };
        push_record(&mut self.view(), &record);

        let request = ChatRequest::new(self.request_history());
        let body = match self.proxy.open_stream(request).await {
            Ok(body) => body,
            Err(source) => {
                tracing::error!(
                    conversation_id = %self.conversation_id,
                    proxy_id = self.proxy.id(),
                    error = %source,
                    "proxy rejected chat request"
                );
                self.notify(NotificationClass::ProxyFailure, "Failed to get response from AI");
                return Err(ChatError::Proxy {
                    stage: "open-proxy-stream",
                    source,
                });
            }
        };

        let message_id = MessageId::new_v4();
        self.view().begin_streaming(message_id);
        guard.placeholder = Some(message_id);

        let mut session = self.assembler.begin(message_id);
        let mut observer = ViewObserver {
            view: &self.view,
            echo,
        };
        let result = session.run(TransportReader::new(body), &mut observer).await;
        guard.placeholder = None;

        result.map_err(|error| self.fail_reply(message_id, error))
    }

    fn fail_reply(&self, message_id: MessageId, error: StreamError) -> ChatError {
        match error {
            StreamError::Persistence { .. } => {
                self.view().mark_unsaved(message_id);
                self.notify(
                    NotificationClass::PersistenceFailure,
                    "The reply could not be saved",
                );
            }
            StreamError::Transport { .. } | StreamError::InvalidTransition { .. } => {
                self.view().rollback(message_id);
                self.notify(
                    NotificationClass::TransientFailure,
                    "Connection lost while receiving the reply, please try again",
                );
            }
        }

        ChatError::Stream {
            stage: "assemble-reply",
            source: error,
        }
    }

    fn request_history(&self) -> Vec<ProxyMessage> {
        self.view()
            .history()
            .map(|message| ProxyMessage::new(proxy_role(message.role), message.content.clone()))
            .collect()
    }

    fn notify(&self, class: NotificationClass, message: &str) {
        self.notifier.notify(Notification::new(class, message));
    }

    fn view(&self) -> MutexGuard<'_, ConversationView> {
        lock_view(&self.view)
    }
}

/// Marks the session busy; rolls back a half-streamed placeholder if the
/// submit future is dropped before the reply settles.
struct SubmitGuard<'a> {
    session: &'a ChatSession,
    placeholder: Option<MessageId>,
}

impl<'a> SubmitGuard<'a> {
    fn acquire(session: &'a ChatSession) -> Option<Self> {
        session
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                session,
                placeholder: None,
            })
    }
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        if let Some(message_id) = self.placeholder.take()
            && self.session.view().rollback(message_id)
        {
            tracing::debug!(message_id = %message_id, "cancelled reply removed from view");
        }
        self.session.in_flight.store(false, Ordering::Release);
    }
}

struct ViewObserver<'a, O: ?Sized> {
    view: &'a Mutex<ConversationView>,
    echo: &'a mut O,
}

impl<O> StreamObserver for ViewObserver<'_, O>
where
    O: StreamObserver + ?Sized,
{
    fn content_updated(&mut self, message_id: MessageId, content: &str) {
        lock_view(self.view).content_updated(message_id, content);
        self.echo.content_updated(message_id, content);
    }

    fn finalized(&mut self, message_id: MessageId, content: &str) {
        lock_view(self.view).finalized(message_id, content);
        self.echo.finalized(message_id, content);
    }
}

fn lock_view(view: &Mutex<ConversationView>) -> MutexGuard<'_, ConversationView> {
    view.lock().unwrap_or_else(PoisonError::into_inner)
}

fn push_record(view: &mut ConversationView, record: &MessageRecord) {
    view.push_committed(
        MessageId::new(record.id.as_uuid()),
        chat_role(record.role),
        record.content.clone(),
    );
}

fn storage_role(role: Role) -> MessageRole {
    match role {
        Role::User => MessageRole::User,
        Role::Assistant => MessageRole::Assistant,
    }
}

fn chat_role(role: MessageRole) -> Role {
    match role {
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Assistant,
    }
}

fn proxy_role(role: Role) -> codesphere_llm::Role {
    match role {
        Role::User => codesphere_llm::Role::User,
        Role::Assistant => codesphere_llm::Role::Assistant,
    }
}
