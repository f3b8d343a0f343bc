use codesphere_storage::{
    AI_AUTHOR_ID, CollaborationId, CollaborationStore, ConversationId, ConversationStore,
    DEFAULT_CONVERSATION_TITLE, MemoryStorage, MessageAuthor, MessageRole, MessageStore,
    NewCollaboration, NewCollaborationMessage, NewConversation, NewMessage, SqliteStorage, Storage,
    StorageError,
};
use tempfile::TempDir;

async fn sqlite_store() -> (TempDir, SqliteStorage) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("codesphere.db");
    let store = SqliteStorage::open(&path.display().to_string())
        .await
        .expect("open sqlite store");
    (dir, store)
}

async fn messages_keep_insertion_order(store: &dyn Storage) {
    let conversation = store
        .create_conversation(NewConversation::default())
        .await
        .expect("create conversation");
    assert_eq!(conversation.title, DEFAULT_CONVERSATION_TITLE);

    store
        .append_message(conversation.id, NewMessage::new(MessageRole::User, "Hi"))
        .await
        .expect("append user");
    store
        .append_message(conversation.id, NewMessage::new(MessageRole::Assistant, "Hi there"))
        .await
        .expect("append assistant");

    let messages = store.list_messages(conversation.id).await.expect("list");
    let summary = messages
        .iter()
        .map(|message| (message.seq, message.role, message.content.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        summary,
        vec![
            (1, MessageRole::User, "Hi"),
            (2, MessageRole::Assistant, "Hi there"),
        ]
    );
}

async fn unknown_conversation_is_not_found(store: &dyn Storage) {
    let missing = ConversationId::generate();
    let result = store
        .append_message(missing, NewMessage::new(MessageRole::User, "lost"))
        .await;
    assert!(matches!(
        result,
        Err(StorageError::NotFound {
            entity: "conversation",
            ..
        })
    ));
}

async fn conversations_list_includes_new_ones(store: &dyn Storage) {
    let first = store
        .create_conversation(NewConversation::default())
        .await
        .expect("first");
    let second = store
        .create_conversation(NewConversation {
            title: "Release notes".to_string(),
        })
        .await
        .expect("second");

    let listed = store.list_conversations().await.expect("list");
    let ids = listed.iter().map(|record| record.id).collect::<Vec<_>>();
    assert!(ids.contains(&first.id));
    assert!(ids.contains(&second.id));
}

async fn collaboration_history_and_live_feed(store: &dyn Storage) {
    let collaboration = store
        .create_collaboration(NewCollaboration {
            name: "Launch".to_string(),
        })
        .await
        .expect("create collaboration");

    store
        .append_collaboration_message(
            collaboration.id,
            NewCollaborationMessage::new(MessageAuthor::member("u-1"), "before subscribing"),
        )
        .await
        .expect("append before");

    let mut subscription = store.subscribe(collaboration.id);
    store
        .append_collaboration_message(
            collaboration.id,
            NewCollaborationMessage::new(MessageAuthor::Ai, "from the assistant"),
        )
        .await
        .expect("append ai");

    let live = subscription.try_recv().expect("insert delivered");
    assert_eq!(live.content, "from the assistant");
    assert!(live.author.is_ai());
    assert!(subscription.try_recv().is_none());

    let history = store
        .list_collaboration_messages(collaboration.id)
        .await
        .expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "before subscribing");
    assert_eq!(history[0].author, MessageAuthor::member("u-1"));
    assert_eq!(history[1].author.user_id(), AI_AUTHOR_ID);
}

async fn unknown_collaboration_is_not_found(store: &dyn Storage) {
    let result = store
        .list_collaboration_messages(CollaborationId::generate())
        .await;
    assert!(matches!(
        result,
        Err(StorageError::NotFound {
            entity: "collaboration",
            ..
        })
    ));
}

#[tokio::test]
async fn memory_store_contract() {
    let store = MemoryStorage::new();
    messages_keep_insertion_order(&store).await;
    unknown_conversation_is_not_found(&store).await;
    conversations_list_includes_new_ones(&store).await;
    collaboration_history_and_live_feed(&store).await;
    unknown_collaboration_is_not_found(&store).await;
    assert_eq!(store.realtime().open_channels(), 0);
}

#[tokio::test]
async fn sqlite_store_contract() {
    let (_dir, store) = sqlite_store().await;
    messages_keep_insertion_order(&store).await;
    unknown_conversation_is_not_found(&store).await;
    conversations_list_includes_new_ones(&store).await;
    collaboration_history_and_live_feed(&store).await;
    unknown_collaboration_is_not_found(&store).await;
    assert_eq!(store.realtime().open_channels(), 0);
}

#[tokio::test]
async fn sqlite_history_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("codesphere.db").display().to_string();

    let conversation_id = {
        let store = SqliteStorage::open(&path).await.expect("open");
        let conversation = store
            .create_conversation(NewConversation::default())
            .await
            .expect("create");
        store
            .append_message(conversation.id, NewMessage::new(MessageRole::User, "persisted"))
            .await
            .expect("append");
        store.close().await;
        conversation.id
    };

    let reopened = SqliteStorage::open(&path).await.expect("reopen");
    let messages = reopened
        .list_messages(conversation_id)
        .await
        .expect("list after reopen");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "persisted");
}

#[tokio::test]
async fn sqlite_in_memory_database_stays_usable() {
    let store = SqliteStorage::open(":memory:").await.expect("open memory");
    messages_keep_insertion_order(&store).await;
}
