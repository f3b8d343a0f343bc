mod common;

use std::sync::Arc;

use codesphere::ChatError;
use codesphere::chat::{ChatSession, MessageStatus};
use codesphere::notify::{NotificationCenter, NotificationClass};
use codesphere_llm::{ProxyConfig, ProxyMessage, ProxyRoute, Role as ProxyRole, create_proxy};
use codesphere_storage::{
    BoxFuture, ConversationId, ConversationRecord, ConversationStore, MemoryStorage,
    MessageRecord, MessageRole, MessageStore, NewConversation, NewMessage, SqliteStorage,
    StorageError, StorageResult,
};
use codesphere_stream::{MessageId, Role, StreamError};
use common::{Reply, ScriptedProxy, delta, done, raw, reply};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Memory store whose assistant appends always fail.
struct AssistantWritesFail {
    inner: MemoryStorage,
}

impl ConversationStore for AssistantWritesFail {
    fn create_conversation(
        &self,
        input: NewConversation,
    ) -> BoxFuture<'_, StorageResult<ConversationRecord>> {
        self.inner.create_conversation(input)
    }

    fn list_conversations(&self) -> BoxFuture<'_, StorageResult<Vec<ConversationRecord>>> {
        self.inner.list_conversations()
    }
}

impl MessageStore for AssistantWritesFail {
    fn append_message(
        &self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> BoxFuture<'_, StorageResult<MessageRecord>> {
        if input.role == MessageRole::Assistant {
            return Box::pin(async {
                Err(StorageError::InvariantViolation {
                    stage: "test-append",
                    details: "disk full".to_string(),
                })
            });
        }
        self.inner.append_message(conversation_id, input)
    }

    fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>> {
        self.inner.list_messages(conversation_id)
    }
}

async fn started(
    replies: impl IntoIterator<Item = Reply>,
) -> (ChatSession, Arc<MemoryStorage>, Arc<ScriptedProxy>, Arc<NotificationCenter>) {
    let storage = Arc::new(MemoryStorage::new());
    let proxy = ScriptedProxy::new(replies);
    let notifications = Arc::new(NotificationCenter::new());
    let session = ChatSession::start(storage.clone(), proxy.clone(), notifications.clone())
        .await
        .expect("conversation starts");
    (session, storage, proxy, notifications)
}

fn contents(records: &[MessageRecord]) -> Vec<(MessageRole, &str)> {
    records
        .iter()
        .map(|record| (record.role, record.content.as_str()))
        .collect()
}

#[tokio::test]
async fn streamed_reply_is_shown_incrementally_and_persisted_once() {
    let (session, storage, proxy, notifications) = started([reply(&["Hi", " there"])]).await;

    let mut updates = Vec::new();
    let assembled = session
        .submit_with("  Hello  ", &mut |_: MessageId, content: &str| {
            updates.push(content.to_string())
        })
        .await
        .expect("reply streams");

    assert_eq!(assembled.content, "Hi there");
    assert_eq!(assembled.role, Role::Assistant);
    assert_eq!(updates.first().map(String::as_str), Some("Hi"));
    assert_eq!(updates.last().map(String::as_str), Some("Hi there"));

    let stored = storage
        .list_messages(session.conversation_id())
        .await
        .expect("list messages");
    assert_eq!(
        contents(&stored),
        vec![
            (MessageRole::User, "Hello"),
            (MessageRole::Assistant, "Hi there")
        ]
    );

    let view = session.snapshot();
    assert_eq!(view.messages().len(), 2);
    assert!(view.messages().iter().all(|m| m.status == MessageStatus::Done));
    assert!(!view.is_streaming());

    let requests = proxy.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].route, ProxyRoute::Chat);
    assert_eq!(requests[0].messages, vec![ProxyMessage::new(ProxyRole::User, "Hello")]);
    assert!(notifications.is_empty());
    assert!(!session.is_busy());
}

#[tokio::test]
async fn new_conversation_uses_the_default_title() {
    let (_session, storage, _proxy, _notifications) = started([]).await;

    let conversations = storage.list_conversations().await.expect("list");
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].title, "New Chat");
}

#[tokio::test]
async fn follow_up_request_carries_the_whole_history() {
    let (session, _storage, proxy, _notifications) =
        started([reply(&["Hi there"]), reply(&["Sure"])]).await;

    session.submit("Hello").await.expect("first reply");
    session.submit("Tell me more").await.expect("second reply");

    let requests = proxy.requests();
    assert_eq!(
        requests[1].messages,
        vec![
            ProxyMessage::new(ProxyRole::User, "Hello"),
            ProxyMessage::new(ProxyRole::Assistant, "Hi there"),
            ProxyMessage::new(ProxyRole::User, "Tell me more"),
        ]
    );
}

#[tokio::test]
async fn fragmented_body_with_keepalives_and_bad_frames_still_assembles() {
    let frame = delta("Grüße 🦀");
    let split = frame
        .iter()
        .position(|byte| *byte == 0xC3)
        .expect("umlaut lead byte")
        + 1;
    let body = vec![
        raw(": keepalive\n\n"),
        frame.slice(..split),
        frame.slice(split..),
        raw("data: {\"ping\":true}\n"),
        raw("data: {oops\n"),
        done(),
        delta("ignored after terminator"),
    ];
    let (session, _storage, _proxy, notifications) = started([Reply::Body(body)]).await;

    let assembled = session.submit("Greet me").await.expect("reply streams");

    assert_eq!(assembled.content, "Grüße 🦀{oops");
    assert!(notifications.is_empty());
}

#[tokio::test]
async fn empty_body_finalizes_an_empty_reply() {
    let (session, storage, _proxy, _notifications) = started([Reply::Body(Vec::new())]).await;

    let assembled = session.submit("Anyone there?").await.expect("empty reply");
    assert_eq!(assembled.content, "");

    let stored = storage
        .list_messages(session.conversation_id())
        .await
        .expect("list");
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn connection_loss_discards_the_partial_reply() {
    let (session, storage, _proxy, notifications) =
        started([Reply::FailAfter(vec![delta("Par")])]).await;

    let error = session.submit("Hello").await.expect_err("transport fails");
    assert!(matches!(
        error,
        ChatError::Stream {
            source: StreamError::Transport { .. },
            ..
        }
    ));

    let view = session.snapshot();
    assert_eq!(view.messages().len(), 1);
    assert_eq!(view.messages()[0].role, Role::User);

    let stored = storage
        .list_messages(session.conversation_id())
        .await
        .expect("list");
    assert_eq!(contents(&stored), vec![(MessageRole::User, "Hello")]);

    let raised = notifications.drain();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].class, NotificationClass::TransientFailure);
    assert!(!session.is_busy());
}

#[tokio::test]
async fn proxy_rejection_never_shows_a_placeholder() {
    let (session, storage, _proxy, notifications) = started([Reply::Reject(500)]).await;

    let error = session.submit("Hello").await.expect_err("proxy rejects");
    assert!(matches!(error, ChatError::Proxy { .. }));

    assert_eq!(session.snapshot().messages().len(), 1);
    let stored = storage
        .list_messages(session.conversation_id())
        .await
        .expect("list");
    assert_eq!(stored.len(), 1);

    let raised = notifications.drain();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].class, NotificationClass::ProxyFailure);
    assert_eq!(raised[0].message, "Failed to get response from AI");
}

#[tokio::test]
async fn failed_save_keeps_the_reply_visible_as_unsaved() {
    let storage = Arc::new(AssistantWritesFail {
        inner: MemoryStorage::new(),
    });
    let proxy = ScriptedProxy::new([reply(&["Saved", "?"])]);
    let notifications = Arc::new(NotificationCenter::new());
    let session = ChatSession::start(storage.clone(), proxy, notifications.clone())
        .await
        .expect("conversation starts");

    let error = session.submit("Hello").await.expect_err("commit fails");
    assert!(matches!(
        error,
        ChatError::Stream {
            source: StreamError::Persistence { .. },
            ..
        }
    ));

    let view = session.snapshot();
    let last = view.messages().last().expect("reply stays visible");
    assert_eq!(last.content, "Saved?");
    assert_eq!(last.status, MessageStatus::Unsaved);

    let stored = storage
        .list_messages(session.conversation_id())
        .await
        .expect("list");
    assert_eq!(contents(&stored), vec![(MessageRole::User, "Hello")]);

    let raised = notifications.drain();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].class, NotificationClass::PersistenceFailure);
}

#[tokio::test]
async fn user_message_that_cannot_be_saved_is_not_sent() {
    let storage = Arc::new(MemoryStorage::new());
    let proxy = ScriptedProxy::new([reply(&["unused"])]);
    let notifications = Arc::new(NotificationCenter::new());
    let session = ChatSession::new(
        ConversationId::generate(),
        storage,
        proxy.clone(),
        notifications.clone(),
    );

    let error = session.submit("Hello").await.expect_err("unknown conversation");
    assert!(matches!(error, ChatError::Storage { .. }));
    assert!(proxy.requests().is_empty());
    assert!(session.snapshot().messages().is_empty());

    let raised = notifications.drain();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].message, "Failed to send message");
}

#[tokio::test]
async fn blank_input_is_ignored() {
    let (session, storage, proxy, notifications) = started([]).await;

    let error = session.submit(" \n\t ").await.expect_err("blank input");
    assert!(error.is_rejection());
    assert!(proxy.requests().is_empty());
    assert!(notifications.is_empty());
    assert!(
        storage
            .list_messages(session.conversation_id())
            .await
            .expect("list")
            .is_empty()
    );
}

#[tokio::test]
async fn dropping_an_inflight_submit_rolls_back_the_placeholder() {
    let (session, _storage, _proxy, notifications) =
        started([Reply::Hang(vec![delta("Par")])]).await;

    {
        let mut pending = std::pin::pin!(session.submit("Hello"));
        assert!(futures::poll!(pending.as_mut()).is_pending());

        let view = session.snapshot();
        let streaming = view.messages().last().expect("placeholder");
        assert_eq!(streaming.status, MessageStatus::Streaming);
        assert_eq!(streaming.content, "Par");
        assert!(session.is_busy());

        let busy = session.submit("Again").await.expect_err("one reply at a time");
        assert!(matches!(busy, ChatError::Busy { .. }));
    }

    let view = session.snapshot();
    assert_eq!(view.messages().len(), 1);
    assert!(!view.is_streaming());
    assert!(!session.is_busy());
    assert!(notifications.is_empty());
}

#[tokio::test]
async fn open_loads_existing_history() {
    let storage = Arc::new(MemoryStorage::new());
    let conversation = storage
        .create_conversation(NewConversation::default())
        .await
        .expect("create");
    for (role, content) in [
        (MessageRole::User, "Hello"),
        (MessageRole::Assistant, "Hi there"),
    ] {
        storage
            .append_message(conversation.id, NewMessage::new(role, content))
            .await
            .expect("append");
    }

    let session = ChatSession::open(
        conversation.id,
        storage,
        ScriptedProxy::new([]),
        Arc::new(NotificationCenter::new()),
    )
    .await
    .expect("open");

    let view = session.snapshot();
    let loaded = view
        .messages()
        .iter()
        .map(|m| (m.role, m.content.as_str(), m.status))
        .collect::<Vec<_>>();
    assert_eq!(
        loaded,
        vec![
            (Role::User, "Hello", MessageStatus::Done),
            (Role::Assistant, "Hi there", MessageStatus::Done),
        ]
    );
}

#[tokio::test]
async fn http_proxy_and_sqlite_store_work_end_to_end() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        ": keepalive\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" from the proxy\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/functions/v1/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let database = dir.path().join("chat.sqlite3");
    let storage = Arc::new(
        SqliteStorage::open(database.to_str().expect("utf-8 path"))
            .await
            .expect("open sqlite"),
    );
    let proxy = create_proxy(ProxyConfig::new(
        format!("{}/functions/v1/chat", server.uri()),
        format!("{}/functions/v1/collaboration-ai", server.uri()),
        "",
    ))
    .expect("http proxy");
    let notifications = Arc::new(NotificationCenter::new());

    let session = ChatSession::start(storage.clone(), proxy, notifications.clone())
        .await
        .expect("start");
    let assembled = session.submit("Hi").await.expect("reply");
    assert_eq!(assembled.content, "Hello from the proxy");

    let stored = storage
        .list_messages(session.conversation_id())
        .await
        .expect("list");
    assert_eq!(
        contents(&stored),
        vec![
            (MessageRole::User, "Hi"),
            (MessageRole::Assistant, "Hello from the proxy")
        ]
    );
    assert!(notifications.is_empty());
}
