use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::{
    MessageStore, QuotedInfo, StoreError, StoreResult, StoredGroupMessage, StoredMessageAttribute,
    StoredPrivateMessage,
};

/// SQLite-backed message store. Structured fields live in columns; message
/// content and quoted replies are JSON-encoded.
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn open(&self) -> StoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS group_messages (
                id            TEXT    PRIMARY KEY,
                global_id     INTEGER NOT NULL,
                attribute     TEXT,
                sub_type      TEXT    NOT NULL,
                quoted_info   TEXT,
                group_code    INTEGER NOT NULL,
                anonymous_id  TEXT    NOT NULL DEFAULT '',
                content       TEXT    NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_group_messages_global_id
             ON group_messages (global_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS private_messages (
                id            TEXT    PRIMARY KEY,
                global_id     INTEGER NOT NULL,
                attribute     TEXT,
                sub_type      TEXT    NOT NULL,
                quoted_info   TEXT,
                session_uin   INTEGER NOT NULL,
                target_uin    INTEGER NOT NULL,
                content       TEXT    NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_private_messages_global_id
             ON private_messages (global_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_group_message(&self, message: &StoredGroupMessage) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO group_messages
             (id, global_id, attribute, sub_type, quoted_info, group_code, anonymous_id, content)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(message.global_id)
        .bind(encode_opt(&message.attribute)?)
        .bind(&message.sub_type)
        .bind(encode_opt(&message.quoted_info)?)
        .bind(message.group_code)
        .bind(&message.anonymous_id)
        .bind(serde_json::to_string(&message.content)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_private_message(&self, message: &StoredPrivateMessage) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO private_messages
             (id, global_id, attribute, sub_type, quoted_info, session_uin, target_uin, content)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(message.global_id)
        .bind(encode_opt(&message.attribute)?)
        .bind(&message.sub_type)
        .bind(encode_opt(&message.quoted_info)?)
        .bind(message.session_uin)
        .bind(message.target_uin)
        .bind(serde_json::to_string(&message.content)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn group_message_by_global_id(
        &self,
        global_id: i32,
    ) -> StoreResult<StoredGroupMessage> {
        let row = sqlx::query(
            "SELECT id, global_id, attribute, sub_type, quoted_info, group_code, anonymous_id, content
             FROM group_messages WHERE global_id = ? LIMIT 1",
        )
        .bind(global_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(global_id))?;

        Ok(StoredGroupMessage {
            id: row.try_get("id")?,
            global_id: row.try_get("global_id")?,
            attribute: decode_opt(row.try_get("attribute")?)?,
            sub_type: row.try_get("sub_type")?,
            quoted_info: decode_opt(row.try_get("quoted_info")?)?,
            group_code: row.try_get("group_code")?,
            anonymous_id: row.try_get("anonymous_id")?,
            content: serde_json::from_str(row.try_get::<String, _>("content")?.as_str())?,
        })
    }

    async fn private_message_by_global_id(
        &self,
        global_id: i32,
    ) -> StoreResult<StoredPrivateMessage> {
        let row = sqlx::query(
            "SELECT id, global_id, attribute, sub_type, quoted_info, session_uin, target_uin, content
             FROM private_messages WHERE global_id = ? LIMIT 1",
        )
        .bind(global_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(global_id))?;

        Ok(StoredPrivateMessage {
            id: row.try_get("id")?,
            global_id: row.try_get("global_id")?,
            attribute: decode_opt(row.try_get("attribute")?)?,
            sub_type: row.try_get("sub_type")?,
            quoted_info: decode_opt(row.try_get("quoted_info")?)?,
            session_uin: row.try_get("session_uin")?,
            target_uin: row.try_get("target_uin")?,
            content: serde_json::from_str(row.try_get::<String, _>("content")?.as_str())?,
        })
    }
}

fn encode_opt<T: serde::Serialize>(value: &Option<T>) -> StoreResult<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(StoreError::from))
        .transpose()
}

fn decode_opt<T: serde::de::DeserializeOwned>(column: Option<String>) -> StoreResult<Option<T>> {
    column
        .map(|text| serde_json::from_str(&text).map_err(StoreError::from))
        .transpose()
}
