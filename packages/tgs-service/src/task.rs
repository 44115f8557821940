use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressReporter;
use tgs_storage::{models::SyncKind, time_serde};

/// Free-form per-task options. Known keys are typed; anything else is carried in `extra` and
/// persisted unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncOptions {
	pub incremental: bool,
	pub skip_media: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub from_message_id: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub to_message_id: Option<i64>,
	#[serde(with = "time_serde::option", skip_serializing_if = "Option::is_none")]
	pub start_time: Option<OffsetDateTime>,
	#[serde(with = "time_serde::option", skip_serializing_if = "Option::is_none")]
	pub end_time: Option<OffsetDateTime>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub limit: Option<u64>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}
impl SyncOptions {
	pub fn to_value(&self) -> Value {
		serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
	}
}

/// One unit of sync work. A chat has at most one live task per kind.
#[derive(Debug, Clone)]
pub struct SyncTask {
	pub kind: SyncKind,
	pub chat_id: i64,
	pub priority: i32,
	pub options: SyncOptions,
	cancel: CancellationToken,
	progress: ProgressReporter,
}
impl SyncTask {
	pub fn new(kind: SyncKind, chat_id: i64, priority: i32, options: SyncOptions) -> Self {
		Self {
			kind,
			chat_id,
			priority,
			options,
			cancel: CancellationToken::new(),
			progress: ProgressReporter::disabled(),
		}
	}

	/// Routes the worker's waiting reports to the command that created the task.
	pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
		self.progress = progress;

		self
	}

	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancel
	}

	pub fn progress(&self) -> &ProgressReporter {
		&self.progress
	}
}
