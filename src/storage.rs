use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::{
    Pool, Row, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous},
};

use crate::chat::{Chat, Message, MessageDraft, Sender, now_millis};
use crate::error::{Error, Result};

/// Durable store for chats and messages.
///
/// `update_chat` is a blind upsert by id: it writes the record whether or not
/// it already exists, refreshing `updated_at`. Message reads are always
/// scoped by `chat_id`, so a crash between the two steps of `delete_chat`
/// leaves at worst unreachable rows, never visible orphans.
#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn create_chat(&self, title: Option<&str>) -> Result<Chat>;
    async fn get_all_chats(&self) -> Result<Vec<Chat>>;
    async fn get_chat(&self, id: i64) -> Result<Option<Chat>>;
    async fn update_chat(&self, chat: &Chat) -> Result<Chat>;
    async fn delete_chat(&self, id: i64) -> Result<()>;
    async fn add_message(&self, draft: MessageDraft) -> Result<Message>;
    async fn get_messages_for_chat(&self, chat_id: i64) -> Result<Vec<Message>>;
    async fn clear_messages_for_chat(&self, chat_id: i64) -> Result<()>;
    async fn clear_messages(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct SqliteChatRepository {
    pool: Pool<Sqlite>,
}

impl SqliteChatRepository {
    pub async fn initialize(database_url: Option<String>) -> Result<Self> {
        let url = match database_url {
            Some(u) => u,
            None => resolve_default_db_url()?,
        };
        let options = url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
        let pool = Pool::<Sqlite>::connect_with(options).await?;
        // busy_timeout via PRAGMA
        sqlx::query("PRAGMA busy_timeout = 5000;").execute(&pool).await?;
        // apply migrations; re-running on an older database only adds the
        // missing chat_id index, existing rows are untouched
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

fn resolve_default_db_url() -> Result<String> {
    let base = std::env::var("XDG_DATA_HOME").ok().map(PathBuf::from).unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local").join("share")
    });
    let dir = base.join("charla");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("charla.db");
    Ok(format!("sqlite://{}", path.to_string_lossy()))
}

fn chat_from_row(row: &sqlx::sqlite::SqliteRow) -> Chat {
    Chat {
        id: row.get("id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Message> {
    let sender: String = row.get("sender");
    let sender: Sender = sender.parse().map_err(|e: String| {
        Error::Storage(sqlx::Error::ColumnDecode { index: "sender".into(), source: e.into() })
    })?;
    Ok(Message {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        sender,
        text: row.get("text"),
        audio: row.get("audio"),
        image: row.get("image"),
        timestamp: row.get("timestamp"),
    })
}

#[async_trait]
impl ChatRepository for SqliteChatRepository {
    async fn create_chat(&self, title: Option<&str>) -> Result<Chat> {
        let now = now_millis();
        let title = match title {
            Some(t) => t.to_string(),
            None => format!("Chat_{now}"),
        };
        let res = sqlx::query("INSERT INTO chats (title, created_at, updated_at) VALUES (?1, ?2, ?3)")
            .bind(&title)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(Chat { id: res.last_insert_rowid(), title, created_at: now, updated_at: now })
    }

    async fn get_all_chats(&self) -> Result<Vec<Chat>> {
        let rows = sqlx::query("SELECT id, title, created_at, updated_at FROM chats ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(chat_from_row).collect())
    }

    async fn get_chat(&self, id: i64) -> Result<Option<Chat>> {
        let row = sqlx::query("SELECT id, title, created_at, updated_at FROM chats WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(chat_from_row))
    }

    async fn update_chat(&self, chat: &Chat) -> Result<Chat> {
        let updated = Chat { updated_at: now_millis(), ..chat.clone() };
        sqlx::query(
            "INSERT INTO chats (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET title = excluded.title, updated_at = excluded.updated_at",
        )
        .bind(updated.id)
        .bind(&updated.title)
        .bind(updated.created_at)
        .bind(updated.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn delete_chat(&self, id: i64) -> Result<()> {
        // cascade: messages first, then the chat row
        self.clear_messages_for_chat(id).await?;
        sqlx::query("DELETE FROM chats WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_message(&self, draft: MessageDraft) -> Result<Message> {
        if !draft.has_content() {
            return Err(Error::Media("message has no text, audio, or image".into()));
        }
        let timestamp = now_millis();
        let res = sqlx::query(
            "INSERT INTO messages (chat_id, sender, text, audio, image, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(draft.chat_id)
        .bind(draft.sender.as_str())
        .bind(&draft.text)
        .bind(&draft.audio)
        .bind(&draft.image)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;
        Ok(Message {
            id: res.last_insert_rowid(),
            chat_id: draft.chat_id,
            sender: draft.sender,
            text: draft.text,
            audio: draft.audio,
            image: draft.image,
            timestamp,
        })
    }

    async fn get_messages_for_chat(&self, chat_id: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, chat_id, sender, text, audio, image, timestamp \
             FROM messages WHERE chat_id = ?1 ORDER BY id ASC",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn clear_messages_for_chat(&self, chat_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE chat_id = ?1")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_messages(&self) -> Result<()> {
        sqlx::query("DELETE FROM messages").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(crate) async fn test_repo(dir: &tempfile::TempDir) -> SqliteChatRepository {
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}", path.to_string_lossy());
        SqliteChatRepository::initialize(Some(url)).await.unwrap()
    }

    #[tokio::test]
    async fn create_get_update_delete_roundtrip() {
        let dir = tempdir().unwrap();
        let repo = test_repo(&dir).await;

        let chat = repo.create_chat(Some("Primer Chat")).await.unwrap();
        assert_eq!(chat.title, "Primer Chat");
        assert!(chat.id > 0);
        assert_eq!(chat.created_at, chat.updated_at);

        let got = repo.get_chat(chat.id).await.unwrap().unwrap();
        assert_eq!(got, chat);

        // updated_at must move strictly forward
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let renamed = Chat { title: "Renombrado".into(), ..chat.clone() };
        let saved = repo.update_chat(&renamed).await.unwrap();
        assert!(saved.updated_at > chat.updated_at);
        let got = repo.get_chat(chat.id).await.unwrap().unwrap();
        assert_eq!(got.title, "Renombrado");
        assert!(got.updated_at > chat.updated_at);

        repo.delete_chat(chat.id).await.unwrap();
        assert!(repo.get_chat(chat.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn default_title_is_timestamp_derived() {
        let dir = tempdir().unwrap();
        let repo = test_repo(&dir).await;
        let chat = repo.create_chat(None).await.unwrap();
        assert!(chat.title.starts_with("Chat_"), "got {}", chat.title);
    }

    #[tokio::test]
    async fn get_all_chats_in_insertion_order() {
        let dir = tempdir().unwrap();
        let repo = test_repo(&dir).await;
        let a = repo.create_chat(Some("a")).await.unwrap();
        let b = repo.create_chat(Some("b")).await.unwrap();
        let all = repo.get_all_chats().await.unwrap();
        assert_eq!(all.iter().map(|c| c.id).collect::<Vec<_>>(), vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn delete_chat_cascades_to_messages() {
        let dir = tempdir().unwrap();
        let repo = test_repo(&dir).await;
        let chat = repo.create_chat(Some("c")).await.unwrap();
        let other = repo.create_chat(Some("d")).await.unwrap();
        repo.add_message(MessageDraft::user_text(chat.id, "hola")).await.unwrap();
        repo.add_message(MessageDraft::bot_text(chat.id, "hola!")).await.unwrap();
        repo.add_message(MessageDraft::user_text(other.id, "aparte")).await.unwrap();

        repo.delete_chat(chat.id).await.unwrap();
        assert!(repo.get_messages_for_chat(chat.id).await.unwrap().is_empty());
        // unrelated chat untouched
        assert_eq!(repo.get_messages_for_chat(other.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn messages_keep_insertion_order_and_fields() {
        let dir = tempdir().unwrap();
        let repo = test_repo(&dir).await;
        let chat = repo.create_chat(Some("c")).await.unwrap();
        let m1 = repo
            .add_message(MessageDraft::user_audio(chat.id, "/tmp/a.wav", Some("hola".into())))
            .await
            .unwrap();
        let m2 = repo.add_message(MessageDraft::bot_text(chat.id, "respuesta")).await.unwrap();

        let msgs = repo.get_messages_for_chat(chat.id).await.unwrap();
        assert_eq!(msgs, vec![m1.clone(), m2]);
        assert_eq!(msgs[0].sender, Sender::Yo);
        assert_eq!(msgs[0].audio.as_deref(), Some("/tmp/a.wav"));
        assert_eq!(msgs[0].text.as_deref(), Some("hola"));
        assert!(msgs[0].timestamp <= msgs[1].timestamp);
    }

    #[tokio::test]
    async fn add_message_rejects_empty_draft() {
        let dir = tempdir().unwrap();
        let repo = test_repo(&dir).await;
        let chat = repo.create_chat(Some("c")).await.unwrap();
        let draft = MessageDraft {
            chat_id: chat.id,
            sender: Sender::Yo,
            text: None,
            audio: None,
            image: None,
        };
        assert!(repo.add_message(draft).await.is_err());
    }

    #[tokio::test]
    async fn clear_messages_for_chat_is_idempotent() {
        let dir = tempdir().unwrap();
        let repo = test_repo(&dir).await;
        let chat = repo.create_chat(Some("c")).await.unwrap();
        repo.add_message(MessageDraft::user_text(chat.id, "uno")).await.unwrap();

        repo.clear_messages_for_chat(chat.id).await.unwrap();
        assert!(repo.get_messages_for_chat(chat.id).await.unwrap().is_empty());
        // second clear is a no-op, not an error
        repo.clear_messages_for_chat(chat.id).await.unwrap();
        assert!(repo.get_messages_for_chat(chat.id).await.unwrap().is_empty());
        // chat itself survives
        assert!(repo.get_chat(chat.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_messages_spans_all_chats() {
        let dir = tempdir().unwrap();
        let repo = test_repo(&dir).await;
        let a = repo.create_chat(Some("a")).await.unwrap();
        let b = repo.create_chat(Some("b")).await.unwrap();
        repo.add_message(MessageDraft::user_text(a.id, "x")).await.unwrap();
        repo.add_message(MessageDraft::user_text(b.id, "y")).await.unwrap();

        repo.clear_messages().await.unwrap();
        assert!(repo.get_messages_for_chat(a.id).await.unwrap().is_empty());
        assert!(repo.get_messages_for_chat(b.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_chat_upserts_missing_record() {
        let dir = tempdir().unwrap();
        let repo = test_repo(&dir).await;
        let ghost = Chat { id: 42, title: "fantasma".into(), created_at: 1, updated_at: 1 };
        let saved = repo.update_chat(&ghost).await.unwrap();
        assert_eq!(saved.id, 42);
        assert_eq!(repo.get_chat(42).await.unwrap().unwrap().title, "fantasma");
    }

    #[tokio::test]
    async fn pragmas_and_migrations_applied() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}", path.to_string_lossy());
        let repo = SqliteChatRepository::initialize(Some(url.clone())).await.unwrap();

        let row = sqlx::query("PRAGMA journal_mode;").fetch_one(repo.pool()).await.unwrap();
        let mode: String = row.get(0);
        assert!(mode.eq_ignore_ascii_case("wal"), "journal_mode should be WAL, got {}", mode);

        let row = sqlx::query("PRAGMA busy_timeout;").fetch_one(repo.pool()).await.unwrap();
        let timeout: i64 = row.get(0);
        assert!(timeout >= 5000, "busy_timeout should be at least 5000, got {}", timeout);

        // the chat_id index from migration 0002 exists
        let row = sqlx::query(
            "SELECT count(*) as c FROM sqlite_master WHERE type = 'index' AND name = 'idx_messages_chat_id'",
        )
        .fetch_one(repo.pool())
        .await
        .unwrap();
        assert_eq!(row.get::<i64, _>("c"), 1);

        // migrations are idempotent: re-open the same file, records survive
        let chat = repo.create_chat(Some("persistente")).await.unwrap();
        drop(repo);
        let repo2 = SqliteChatRepository::initialize(Some(url)).await.unwrap();
        assert_eq!(repo2.get_chat(chat.id).await.unwrap().unwrap().title, "persistente");
    }
}
