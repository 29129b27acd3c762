//! Persisted-message storage: data model, global-ID derivation, and a
//! SQLite reference implementation.
//!
//! The gateway itself never computes global IDs; it hands them to whatever
//! [`MessageStore`] the embedding bot wires in, typically to resolve quoted
//! replies back to their original message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod sqlite;

pub use sqlite::SqliteMessageStore;

// ── Global IDs ───────────────────────────────────────────────────────────────

/// Derive the stable lookup identifier for a message: the CRC32 checksum of
/// `"{code}-{msg_id}"`, reinterpreted as a signed 32-bit value.
pub fn to_global_id(code: i64, msg_id: i32) -> i32 {
    crc32fast::hash(format!("{code}-{msg_id}").as_bytes()) as i32
}

// ── Data model ───────────────────────────────────────────────────────────────

/// Attributes shared by every stored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessageAttribute {
    pub message_seq: i32,
    pub internal_id: i32,
    pub sender_uin: i64,
    pub sender_name: String,
    pub timestamp: i64,
}

/// A quoted reply carried inside a stored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotedInfo {
    pub prev_id: String,
    pub prev_global_id: i32,
    pub quoted_content: Vec<serde_json::Value>,
}

/// Persisted group message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredGroupMessage {
    pub id: String,
    pub global_id: i32,
    pub attribute: Option<StoredMessageAttribute>,
    pub sub_type: String,
    pub quoted_info: Option<QuotedInfo>,
    pub group_code: i64,
    pub anonymous_id: String,
    pub content: Vec<serde_json::Value>,
}

/// Persisted private message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPrivateMessage {
    pub id: String,
    pub global_id: i32,
    pub attribute: Option<StoredMessageAttribute>,
    pub sub_type: String,
    pub quoted_info: Option<QuotedInfo>,
    pub session_uin: i64,
    pub target_uin: i64,
    pub content: Vec<serde_json::Value>,
}

/// A stored message of either kind.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredMessage {
    Group(StoredGroupMessage),
    Private(StoredPrivateMessage),
}

impl StoredMessage {
    pub fn id(&self) -> &str {
        match self {
            Self::Group(m) => &m.id,
            Self::Private(m) => &m.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Group(_) => "group",
            Self::Private(_) => "private",
        }
    }

    pub fn global_id(&self) -> i32 {
        match self {
            Self::Group(m) => m.global_id,
            Self::Private(m) => m.global_id,
        }
    }

    pub fn attribute(&self) -> Option<&StoredMessageAttribute> {
        match self {
            Self::Group(m) => m.attribute.as_ref(),
            Self::Private(m) => m.attribute.as_ref(),
        }
    }

    pub fn content(&self) -> &[serde_json::Value] {
        match self {
            Self::Group(m) => &m.content,
            Self::Private(m) => &m.content,
        }
    }
}

// ── Store trait ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message not found: global_id {0}")]
    NotFound(i32),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt stored content: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Message persistence operations the gateway's collaborators rely on.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Initialize backing storage (create tables, open files).
    async fn open(&self) -> StoreResult<()>;

    async fn insert_group_message(&self, message: &StoredGroupMessage) -> StoreResult<()>;
    async fn insert_private_message(&self, message: &StoredPrivateMessage) -> StoreResult<()>;

    async fn group_message_by_global_id(&self, global_id: i32)
    -> StoreResult<StoredGroupMessage>;
    async fn private_message_by_global_id(
        &self,
        global_id: i32,
    ) -> StoreResult<StoredPrivateMessage>;

    /// Look up a message of either kind by its global ID.
    async fn message_by_global_id(&self, global_id: i32) -> StoreResult<StoredMessage> {
        match self.group_message_by_global_id(global_id).await {
            Ok(message) => Ok(StoredMessage::Group(message)),
            Err(StoreError::NotFound(_)) => self
                .private_message_by_global_id(global_id)
                .await
                .map(StoredMessage::Private),
            Err(e) => Err(e),
        }
    }
}
