use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use super::error::{
    CreateSqliteDirectorySnafu, InvariantViolationSnafu, NotFoundSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu, StorageError,
    StorageResult,
};
use super::ids::{CollaborationId, CollaborationMessageId, ConversationId, MessageId};
use super::realtime::{ChannelRegistry, Subscription};
use super::types::{
    CollaborationMessageRecord, CollaborationRecord, ConversationRecord, MessageAuthor,
    MessageRecord, MessageRole, NewCollaboration, NewCollaborationMessage, NewConversation,
    NewMessage,
};
use super::{
    BoxFuture, CollaborationStore, ConversationStore, MessageStore, unix_timestamp_seconds,
};

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    realtime: ChannelRegistry,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // A single pinned connection also keeps `:memory:` databases alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                pragma: "foreign_keys",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::info!(database_url = %database_url, journal_mode = %journal_mode, "opened sqlite storage");
        Ok(Self {
            pool,
            realtime: ChannelRegistry::new(),
        })
    }

    /// Waits for in-flight queries and closes the connection.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("closed sqlite storage");
    }

    pub fn realtime(&self) -> &ChannelRegistry {
        &self.realtime
    }
}

impl ConversationStore for SqliteStorage {
    fn create_conversation(
        &self,
        input: NewConversation,
    ) -> BoxFuture<'_, StorageResult<ConversationRecord>> {
        Box::pin(async move {
            let conversation_id = ConversationId::generate();
            let now = now_i64()?;

            sqlx::query(
                "INSERT INTO conversations (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)",
            )
            .bind(conversation_id.to_string())
            .bind(input.title.clone())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "conversation-create-insert",
            })?;

            Ok(ConversationRecord {
                id: conversation_id,
                title: input.title,
                created_at_unix_seconds: i64_to_u64(now, "conversation-create-created-at")?,
                updated_at_unix_seconds: i64_to_u64(now, "conversation-create-updated-at")?,
            })
        })
    }

    fn list_conversations(&self) -> BoxFuture<'_, StorageResult<Vec<ConversationRecord>>> {
        Box::pin(async move {
            let rows = sqlx::query_as::<_, ConversationRow>(
                "SELECT id, title, created_at, updated_at FROM conversations ORDER BY updated_at DESC, id DESC",
            )
            .fetch_all(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "conversation-list-query",
            })?;

            rows.into_iter().map(conversation_row_to_record).collect()
        })
    }
}

impl MessageStore for SqliteStorage {
    fn append_message(
        &self,
        conversation_id: ConversationId,
        input: NewMessage,
    ) -> BoxFuture<'_, StorageResult<MessageRecord>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.context(SqliteQuerySnafu {
                stage: "message-append-begin",
            })?;
            ensure_row_exists(
                &mut *tx,
                "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?)",
                "conversation",
                conversation_id.to_string(),
                "message-append-load-conversation",
            )
            .await?;

            let next_seq = sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?",
            )
            .bind(conversation_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-append-next-seq",
            })?;

            let message_id = MessageId::generate();
            let now = now_i64()?;
            sqlx::query(
                "INSERT INTO messages (id, conversation_id, seq, role, content, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(message_id.to_string())
            .bind(conversation_id.to_string())
            .bind(next_seq)
            .bind(input.role.as_str())
            .bind(input.content.clone())
            .bind(now)
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-append-insert",
            })?;

            sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(conversation_id.to_string())
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "message-append-touch-conversation",
                })?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "message-append-commit",
            })?;

            Ok(MessageRecord {
                id: message_id,
                conversation_id,
                seq: i64_to_u64(next_seq, "message-append-seq")?,
                role: input.role,
                content: input.content,
                created_at_unix_seconds: i64_to_u64(now, "message-append-created-at")?,
            })
        })
    }

    fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>> {
        Box::pin(async move {
            let mut connection = self.pool.acquire().await.context(SqliteQuerySnafu {
                stage: "message-list-acquire",
            })?;
            ensure_row_exists(
                &mut *connection,
                "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?)",
                "conversation",
                conversation_id.to_string(),
                "message-list-load-conversation",
            )
            .await?;

            let rows = sqlx::query_as::<_, MessageRow>(
                "SELECT id, conversation_id, seq, role, content, created_at FROM messages WHERE conversation_id = ? ORDER BY seq ASC",
            )
            .bind(conversation_id.to_string())
            .fetch_all(&mut *connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "message-list-query",
            })?;

            rows.into_iter().map(message_row_to_record).collect()
        })
    }
}

impl CollaborationStore for SqliteStorage {
    fn create_collaboration(
        &self,
        input: NewCollaboration,
    ) -> BoxFuture<'_, StorageResult<CollaborationRecord>> {
        Box::pin(async move {
            let collaboration_id = CollaborationId::generate();
            let now = now_i64()?;

            sqlx::query("INSERT INTO collaborations (id, name, created_at) VALUES (?, ?, ?)")
                .bind(collaboration_id.to_string())
                .bind(input.name.clone())
                .bind(now)
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "collaboration-create-insert",
                })?;

            Ok(CollaborationRecord {
                id: collaboration_id,
                name: input.name,
                created_at_unix_seconds: i64_to_u64(now, "collaboration-create-created-at")?,
            })
        })
    }

    fn append_collaboration_message(
        &self,
        collaboration_id: CollaborationId,
        input: NewCollaborationMessage,
    ) -> BoxFuture<'_, StorageResult<CollaborationMessageRecord>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.context(SqliteQuerySnafu {
                stage: "collaboration-message-append-begin",
            })?;
            ensure_row_exists(
                &mut *tx,
                "SELECT EXISTS(SELECT 1 FROM collaborations WHERE id = ?)",
                "collaboration",
                collaboration_id.to_string(),
                "collaboration-message-append-load-collaboration",
            )
            .await?;

            let next_seq = sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM collaboration_messages WHERE collaboration_id = ?",
            )
            .bind(collaboration_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "collaboration-message-append-next-seq",
            })?;

            let message_id = CollaborationMessageId::generate();
            let now = now_i64()?;
            sqlx::query(
                "INSERT INTO collaboration_messages (id, collaboration_id, seq, user_id, is_ai, content, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(message_id.to_string())
            .bind(collaboration_id.to_string())
            .bind(next_seq)
            .bind(input.author.user_id().to_string())
            .bind(i64::from(input.author.is_ai()))
            .bind(input.content.clone())
            .bind(now)
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "collaboration-message-append-insert",
            })?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "collaboration-message-append-commit",
            })?;

            let record = CollaborationMessageRecord {
                id: message_id,
                collaboration_id,
                seq: i64_to_u64(next_seq, "collaboration-message-append-seq")?,
                author: input.author,
                content: input.content,
                created_at_unix_seconds: i64_to_u64(now, "collaboration-message-append-created-at")?,
            };
            let delivered = self.realtime.publish(&record);
            tracing::debug!(
                collaboration_id = %collaboration_id,
                message_id = %record.id,
                delivered,
                "published collaboration insert"
            );
            Ok(record)
        })
    }

    fn list_collaboration_messages(
        &self,
        collaboration_id: CollaborationId,
    ) -> BoxFuture<'_, StorageResult<Vec<CollaborationMessageRecord>>> {
        Box::pin(async move {
            let mut connection = self.pool.acquire().await.context(SqliteQuerySnafu {
                stage: "collaboration-message-list-acquire",
            })?;
            ensure_row_exists(
                &mut *connection,
                "SELECT EXISTS(SELECT 1 FROM collaborations WHERE id = ?)",
                "collaboration",
                collaboration_id.to_string(),
                "collaboration-message-list-load-collaboration",
            )
            .await?;

            let rows = sqlx::query_as::<_, CollaborationMessageRow>(
                "SELECT id, collaboration_id, seq, user_id, is_ai, content, created_at FROM collaboration_messages WHERE collaboration_id = ? ORDER BY created_at ASC, seq ASC",
            )
            .bind(collaboration_id.to_string())
            .fetch_all(&mut *connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "collaboration-message-list-query",
            })?;

            rows.into_iter()
                .map(collaboration_message_row_to_record)
                .collect()
        })
    }

    fn subscribe(&self, collaboration_id: CollaborationId) -> Subscription {
        self.realtime.subscribe(collaboration_id)
    }
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: String,
    title: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    seq: i64,
    role: String,
    content: String,
    created_at: i64,
}

#[derive(Debug, FromRow)]
struct CollaborationMessageRow {
    id: String,
    collaboration_id: String,
    seq: i64,
    user_id: String,
    is_ai: i64,
    content: String,
    created_at: i64,
}

fn conversation_row_to_record(row: ConversationRow) -> StorageResult<ConversationRecord> {
    Ok(ConversationRecord {
        id: ConversationId::parse(&row.id)?,
        title: row.title,
        created_at_unix_seconds: i64_to_u64(row.created_at, "conversation-row-created-at")?,
        updated_at_unix_seconds: i64_to_u64(row.updated_at, "conversation-row-updated-at")?,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        conversation_id: ConversationId::parse(&row.conversation_id)?,
        seq: i64_to_u64(row.seq, "message-row-seq")?,
        role: role_from_sql(&row.role)?,
        content: row.content,
        created_at_unix_seconds: i64_to_u64(row.created_at, "message-row-created-at")?,
    })
}

fn collaboration_message_row_to_record(
    row: CollaborationMessageRow,
) -> StorageResult<CollaborationMessageRecord> {
    Ok(CollaborationMessageRecord {
        id: CollaborationMessageId::parse(&row.id)?,
        collaboration_id: CollaborationId::parse(&row.collaboration_id)?,
        seq: i64_to_u64(row.seq, "collaboration-message-row-seq")?,
        author: MessageAuthor::from_stored(row.user_id, row.is_ai != 0),
        content: row.content,
        created_at_unix_seconds: i64_to_u64(row.created_at, "collaboration-message-row-created-at")?,
    })
}

async fn ensure_row_exists(
    connection: &mut SqliteConnection,
    query: &'static str,
    entity: &'static str,
    id: String,
    stage: &'static str,
) -> StorageResult<()> {
    let exists = sqlx::query_scalar::<_, i64>(query)
        .bind(id.clone())
        .fetch_one(&mut *connection)
        .await
        .context(SqliteQuerySnafu { stage })?;

    if exists == 0 {
        return NotFoundSnafu { stage, entity, id }.fail();
    }
    Ok(())
}

fn role_from_sql(raw: &str) -> StorageResult<MessageRole> {
    match raw {
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        _ => InvariantViolationSnafu {
            stage: "message-role-from-sql",
            details: format!("unknown message role '{raw}'"),
        }
        .fail(),
    }
}

fn now_i64() -> StorageResult<i64> {
    let now = unix_timestamp_seconds();
    now.try_into().map_err(|_| StorageError::InvariantViolation {
        stage: "sqlite-timestamp",
        details: format!("timestamp '{now}' cannot map to sqlite i64"),
    })
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}
