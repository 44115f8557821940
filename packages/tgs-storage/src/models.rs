use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
	Metadata,
	Messages,
}
impl SyncKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Metadata => "metadata",
			Self::Messages => "messages",
		}
	}
}
impl fmt::Display for SyncKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for SyncKind {
	type Err = Error;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw {
			"metadata" => Ok(Self::Metadata),
			"messages" => Ok(Self::Messages),
			other => Err(Error::InvalidArgument(format!("Unknown sync type {other:?}."))),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
	Idle,
	Queued,
	Running,
	Completed,
	Failed,
}
impl SyncStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Idle => "idle",
			Self::Queued => "queued",
			Self::Running => "running",
			Self::Completed => "completed",
			Self::Failed => "failed",
		}
	}

	pub fn is_in_flight(self) -> bool {
		matches!(self, Self::Queued | Self::Running)
	}
}
impl fmt::Display for SyncStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for SyncStatus {
	type Err = Error;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw {
			"idle" => Ok(Self::Idle),
			"queued" => Ok(Self::Queued),
			"running" => Ok(Self::Running),
			"completed" => Ok(Self::Completed),
			"failed" => Ok(Self::Failed),
			other => Err(Error::InvalidArgument(format!("Unknown sync status {other:?}."))),
		}
	}
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SyncConfigRow {
	pub id: i64,
	pub chat_id: i64,
	pub sync_type: String,
	pub status: String,
	pub priority: i32,
	pub last_sync_time: Option<OffsetDateTime>,
	pub last_message_id: Option<i64>,
	pub last_error: Option<String>,
	pub options: Value,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

/// Persisted lifecycle record for one `(chat_id, kind)` pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncConfigItem {
	pub chat_id: i64,
	pub kind: SyncKind,
	pub status: SyncStatus,
	pub priority: i32,
	#[serde(with = "crate::time_serde::option")]
	pub last_sync_time: Option<OffsetDateTime>,
	pub last_message_id: Option<i64>,
	pub last_error: Option<String>,
	pub options: Value,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
}
impl TryFrom<SyncConfigRow> for SyncConfigItem {
	type Error = Error;

	fn try_from(row: SyncConfigRow) -> Result<Self, Self::Error> {
		Ok(Self {
			chat_id: row.chat_id,
			kind: row.sync_type.parse()?,
			status: row.status.parse()?,
			priority: row.priority,
			last_sync_time: row.last_sync_time,
			last_message_id: row.last_message_id,
			last_error: row.last_error,
			options: row.options,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

/// Fields written when a task is (re)admitted.
#[derive(Debug, Clone)]
pub struct SyncConfigUpsert {
	pub kind: SyncKind,
	pub status: SyncStatus,
	pub priority: i32,
	pub options: Value,
}

/// Lifecycle transition. `None` timestamps and message ids keep the stored value; `last_error` is
/// always written so a successful run clears a previous failure.
#[derive(Debug, Clone)]
pub struct SyncStatusUpdate {
	pub status: SyncStatus,
	pub last_sync_time: Option<OffsetDateTime>,
	pub last_message_id: Option<i64>,
	pub last_error: Option<String>,
}
impl SyncStatusUpdate {
	pub fn status(status: SyncStatus) -> Self {
		Self { status, last_sync_time: None, last_message_id: None, last_error: None }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct ChatRecord {
	pub chat_id: i64,
	pub title: String,
	pub chat_type: String,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
	pub chat_id: i64,
	pub platform_message_id: i64,
	pub content: Option<String>,
	pub from_id: Option<i64>,
	pub reply_to_id: Option<i64>,
	pub forward_from_chat_id: Option<i64>,
	pub forward_from_message_id: Option<i64>,
	pub has_media: bool,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MessageToEmbed {
	pub record_id: i64,
	pub chat_id: i64,
	pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingUpdate {
	pub record_id: i64,
	pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SimilarMessage {
	pub record_id: i64,
	pub chat_id: i64,
	pub content: Option<String>,
	pub created_at: OffsetDateTime,
	pub similarity: f64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TextMatch {
	pub record_id: i64,
	pub chat_id: i64,
	pub content: Option<String>,
	pub created_at: OffsetDateTime,
}
