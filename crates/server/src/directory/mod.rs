//! Directory Store
//!
//! Persisted users, conversations, participants, block edges and messages.
//! Everything lives in a single SQLite database; the relay core reaches the
//! rows only through the queries below.

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::{Conversation, Participant, StoredMessage, UserProfile};

/// Errors surfaced by directory store queries.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Query interface over the relational store.
pub struct DirectoryStore {
    pool: SqlitePool,
}

impl DirectoryStore {
    /// Open (or create) the database under `base_dir` and set up the schema.
    pub async fn new(base_dir: &Path) -> Result<Self> {
        let db_path = base_dir.join("relay.sqlite");

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let store = Self { pool };
        store.init_db().await?;

        info!("[Directory] Initialized at {:?}", db_path);

        Ok(store)
    }

    /// Create tables if they do not exist yet.
    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                first_name TEXT,
                last_name TEXT,
                username TEXT,
                email TEXT,
                phone_number TEXT,
                bio TEXT,
                profile_photo TEXT,
                background_image TEXT,
                privacy_settings_id TEXT,
                is_online INTEGER NOT NULL DEFAULT 0,
                last_seen TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                conversation_type TEXT NOT NULL,
                name TEXT,
                owner_id TEXT NOT NULL,
                group_image TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (owner_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_participants (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                deleted_at TEXT,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blocked_users (
                id TEXT PRIMARY KEY,
                blocker_id TEXT NOT NULL,
                blocked_id TEXT NOT NULL,
                blocked_at TEXT NOT NULL,
                FOREIGN KEY (blocker_id) REFERENCES users(id),
                FOREIGN KEY (blocked_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                content TEXT NOT NULL,
                type TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                image_key TEXT,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id),
                FOREIGN KEY (sender_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a user row. Profile attributes beyond the id may be empty.
    pub async fn create_user(&self, profile: &UserProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, first_name, last_name, username, email, phone_number,
                bio, profile_photo, background_image, privacy_settings_id,
                is_online, last_seen, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.username)
        .bind(&profile.email)
        .bind(&profile.phone_number)
        .bind(&profile.bio)
        .bind(&profile.profile_photo)
        .bind(&profile.background_image)
        .bind(&profile.privacy_settings_id)
        .bind(profile.is_online)
        .bind(profile.last_seen.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!("[Directory] User created: {}", profile.id);

        Ok(())
    }

    /// Look up a user's profile. Absent users come back as `None`.
    pub async fn find_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        #[allow(clippy::type_complexity)]
        let row: Option<(
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
            bool,
            Option<String>,
        )> = sqlx::query_as(
            r#"
            SELECT id, first_name, last_name, username, email, phone_number,
                   bio, profile_photo, background_image, privacy_settings_id,
                   is_online, last_seen
            FROM users WHERE id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(
                id,
                first_name,
                last_name,
                username,
                email,
                phone_number,
                bio,
                profile_photo,
                background_image,
                privacy_settings_id,
                is_online,
                last_seen,
            )| UserProfile {
                id,
                first_name,
                last_name,
                username,
                email,
                phone_number,
                bio,
                profile_photo,
                background_image,
                privacy_settings_id,
                is_online,
                last_seen: last_seen.and_then(|t| t.parse().ok()),
            },
        ))
    }

    /// Flip the online flag for a user. Going offline also stamps last_seen.
    pub async fn set_online(&self, user_id: &str, online: bool) -> Result<()> {
        if online {
            sqlx::query("UPDATE users SET is_online = 1 WHERE id = ?")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("UPDATE users SET is_online = 0, last_seen = ? WHERE id = ?")
                .bind(Utc::now().to_rfc3339())
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Create a conversation owned by `owner_id`. The owner joins as the
    /// first participant.
    pub async fn create_conversation(
        &self,
        owner_id: &str,
        conversation_type: &str,
        name: Option<&str>,
    ) -> Result<Conversation> {
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            conversation_type: conversation_type.to_string(),
            name: name.map(str::to_string),
            owner_id: owner_id.to_string(),
            group_image: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO conversations (id, conversation_type, name, owner_id, group_image, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&conversation.id)
        .bind(&conversation.conversation_type)
        .bind(&conversation.name)
        .bind(&conversation.owner_id)
        .bind(&conversation.group_image)
        .bind(conversation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.add_participant(&conversation.id, owner_id).await?;

        info!(
            "[Directory] Conversation {} created by {}",
            conversation.id, owner_id
        );

        Ok(conversation)
    }

    /// Look up a conversation by id.
    pub async fn find_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let row: Option<(String, String, Option<String>, String, Option<String>, String)> =
            sqlx::query_as(
                r#"
                SELECT id, conversation_type, name, owner_id, group_image, created_at
                FROM conversations WHERE id = ?
                "#,
            )
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(
            |(id, conversation_type, name, owner_id, group_image, created_at)| Conversation {
                id,
                conversation_type,
                name,
                owner_id,
                group_image,
                created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
            },
        ))
    }

    /// Add a user to a conversation.
    pub async fn add_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Participant> {
        let participant = Participant {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            joined_at: Utc::now(),
            deleted: false,
        };

        sqlx::query(
            r#"
            INSERT INTO conversation_participants (id, conversation_id, user_id, joined_at, deleted)
            VALUES (?, ?, ?, ?, 0)
            "#,
        )
        .bind(&participant.id)
        .bind(&participant.conversation_id)
        .bind(&participant.user_id)
        .bind(participant.joined_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(participant)
    }

    /// Soft-delete a user's membership. The row stays for history but the
    /// user no longer counts as a participant anywhere in the relay.
    pub async fn remove_participant(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE conversation_participants
            SET deleted = 1, deleted_at = ?
            WHERE conversation_id = ? AND user_id = ? AND deleted = 0
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Find the non-deleted membership row for (conversation, user).
    pub async fn find_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>> {
        let row: Option<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT id, conversation_id, user_id, joined_at
            FROM conversation_participants
            WHERE conversation_id = ? AND user_id = ? AND deleted = 0
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, conversation_id, user_id, joined_at)| Participant {
            id,
            conversation_id,
            user_id,
            joined_at: joined_at.parse().unwrap_or_else(|_| Utc::now()),
            deleted: false,
        }))
    }

    /// All non-deleted participants of a conversation.
    pub async fn list_participants(&self, conversation_id: &str) -> Result<Vec<Participant>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT id, conversation_id, user_id, joined_at
            FROM conversation_participants
            WHERE conversation_id = ? AND deleted = 0
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, conversation_id, user_id, joined_at)| Participant {
                id,
                conversation_id,
                user_id,
                joined_at: joined_at.parse().unwrap_or_else(|_| Utc::now()),
                deleted: false,
            })
            .collect())
    }

    /// Record that `blocker_id` blocks `blocked_id`.
    pub async fn block_user(&self, blocker_id: &str, blocked_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO blocked_users (id, blocker_id, blocked_id, blocked_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(blocker_id)
        .bind(blocked_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!("[Directory] {} blocked {}", blocker_id, blocked_id);

        Ok(())
    }

    /// Remove the block edge from `blocker_id` to `blocked_id`, if any.
    pub async fn unblock_user(&self, blocker_id: &str, blocked_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM blocked_users WHERE blocker_id = ? AND blocked_id = ?")
            .bind(blocker_id)
            .bind(blocked_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Directed check: has `blocker_id` blocked `blocked_id`? Callers check
    /// both directions themselves.
    pub async fn is_blocked(&self, blocker_id: &str, blocked_id: &str) -> Result<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT id FROM blocked_users WHERE blocker_id = ? AND blocked_id = ?")
                .bind(blocker_id)
                .bind(blocked_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.is_some())
    }

    /// Persist one message, assigning its id and server timestamp.
    pub async fn insert_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
        kind: &str,
        image_key: Option<&str>,
    ) -> Result<StoredMessage> {
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            kind: kind.to_string(),
            delivered: true,
            created_at: Utc::now(),
            image_key: image_key.map(str::to_string),
        };

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, type, status, created_at, image_key)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(&message.kind)
        .bind(message.delivered)
        .bind(message.created_at.to_rfc3339())
        .bind(&message.image_key)
        .execute(&self.pool)
        .await?;

        Ok(message)
    }

    /// Message history for a conversation, oldest first.
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        #[allow(clippy::type_complexity)]
        let rows: Vec<(String, String, String, String, String, bool, String, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT id, conversation_id, sender_id, content, type, status, created_at, image_key
                FROM messages
                WHERE conversation_id = ?
                ORDER BY created_at ASC, id ASC
                "#,
            )
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, conversation_id, sender_id, content, kind, delivered, created_at, image_key)| {
                    StoredMessage {
                        id,
                        conversation_id,
                        sender_id,
                        content,
                        kind,
                        delivered,
                        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                        image_key,
                    }
                },
            )
            .collect())
    }
}
