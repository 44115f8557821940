use std::{
	collections::HashMap,
	fmt::{self, Display, Formatter},
	sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::{
	Error, Result,
	embed::{DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY, EmbedRequest, EmbedStatus, EmbeddingBatchPipeline},
	orchestrator::{ChatsSyncOrchestrator, MultiSyncRequest},
	progress::{Progress, ProgressReporter},
	search::{DEFAULT_LIMIT, HybridSearch, SearchRequest},
	task::SyncOptions,
};
use tgs_config::{MAX_EMBEDDING_BATCH_SIZE, MAX_EMBEDDING_CONCURRENCY};
use tgs_storage::models::SyncKind;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandRequest {
	SyncChats {
		chat_ids: Vec<i64>,
		#[serde(default = "default_sync_kind")]
		kind: SyncKind,
		#[serde(default)]
		priorities: HashMap<i64, i32>,
		#[serde(default)]
		options: HashMap<i64, SyncOptions>,
	},
	SyncMetadata {
		chat_ids: Vec<i64>,
	},
	Embed {
		chat_id: i64,
		#[serde(default = "default_batch_size")]
		batch_size: usize,
		#[serde(default = "default_concurrency")]
		concurrency: usize,
	},
	Search {
		query: String,
		#[serde(default)]
		chat_id: Option<i64>,
		#[serde(default = "default_limit")]
		limit: u32,
		#[serde(default)]
		offset: u32,
		#[serde(default)]
		use_vector: bool,
	},
}
impl CommandRequest {
	pub fn kind(&self) -> CommandKind {
		match self {
			Self::SyncChats { .. } | Self::SyncMetadata { .. } => CommandKind::Sync,
			Self::Embed { .. } => CommandKind::Embed,
			Self::Search { .. } => CommandKind::Search,
		}
	}

	pub fn validate(&self) -> Result<()> {
		match self {
			Self::SyncChats { chat_ids, .. } | Self::SyncMetadata { chat_ids } => {
				if chat_ids.is_empty() {
					return Err(Error::invalid("chat_ids must not be empty."));
				}
			},
			Self::Embed { batch_size, concurrency, .. } => {
				if !(1..=MAX_EMBEDDING_BATCH_SIZE).contains(batch_size) {
					return Err(Error::invalid(format!(
						"batch_size must be between 1 and {MAX_EMBEDDING_BATCH_SIZE}."
					)));
				}
				if !(1..=MAX_EMBEDDING_CONCURRENCY).contains(concurrency) {
					return Err(Error::invalid(format!(
						"concurrency must be between 1 and {MAX_EMBEDDING_CONCURRENCY}."
					)));
				}
			},
			Self::Search { query, limit, .. } => {
				if query.trim().is_empty() {
					return Err(Error::invalid("query must not be empty."));
				}
				if *limit == 0 {
					return Err(Error::invalid("limit must be positive."));
				}
			},
		}

		Ok(())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
	Sync,
	Embed,
	Search,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
	Pending,
	Running,
	/// Paused on a retry backoff; the last progress carries `waitSeconds` and `resumeTime`.
	Waiting,
	Completed,
	Failed,
}
impl CommandStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Running => "running",
			Self::Waiting => "waiting",
			Self::Completed => "completed",
			Self::Failed => "failed",
		}
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Failed)
	}
}
impl Display for CommandStatus {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Client-visible snapshot of a command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
	pub id: Uuid,
	pub kind: CommandKind,
	pub status: CommandStatus,
	pub progress: u8,
	pub message: String,
	pub metadata: Option<Value>,
	pub result: Option<Value>,
	pub error: Option<String>,
}
impl Command {
	pub fn new(kind: CommandKind) -> Self {
		Self {
			id: Uuid::new_v4(),
			kind,
			status: CommandStatus::Pending,
			progress: 0,
			message: String::new(),
			metadata: None,
			result: None,
			error: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandEvent {
	Start { message: String },
	Progress(Progress),
	Complete { message: String, result: Value },
	Fail { message: String, error: String, result: Option<Value> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
	#[error("Command {id} is already {status}.")]
	Terminal { id: Uuid, status: CommandStatus },
}

/// Applies one event to a snapshot. Completed and failed commands accept no further events.
pub fn transition(command: &Command, event: CommandEvent) -> Result<Command, TransitionError> {
	if command.status.is_terminal() {
		return Err(TransitionError::Terminal { id: command.id, status: command.status });
	}

	let mut next = command.clone();

	match event {
		CommandEvent::Start { message } => {
			next.status = CommandStatus::Running;
			next.message = message;
		},
		CommandEvent::Progress(progress) => {
			next.status = if progress.wait_seconds().is_some() {
				CommandStatus::Waiting
			} else {
				CommandStatus::Running
			};
			next.progress = progress.percent.min(100);
			next.message = progress.message;

			if progress.metadata.is_some() {
				next.metadata = progress.metadata;
			}
		},
		CommandEvent::Complete { message, result } => {
			next.status = CommandStatus::Completed;
			next.progress = 100;
			next.message = message;
			next.result = Some(result);
		},
		CommandEvent::Fail { message, error, result } => {
			next.status = CommandStatus::Failed;
			next.message = message;
			next.error = Some(error);
			next.result = result;
		},
	}

	Ok(next)
}

/// Runs commands against the engine and streams every snapshot to one channel.
pub struct CommandRunner {
	orchestrator: Arc<ChatsSyncOrchestrator>,
	embed: Arc<EmbeddingBatchPipeline>,
	search: Arc<HybridSearch>,
}
impl CommandRunner {
	pub fn new(
		orchestrator: Arc<ChatsSyncOrchestrator>,
		embed: Arc<EmbeddingBatchPipeline>,
		search: Arc<HybridSearch>,
	) -> Self {
		Self { orchestrator, embed, search }
	}

	/// Returns the terminal snapshot. Send failures on `updates` are ignored.
	pub async fn execute(&self, request: CommandRequest, updates: &UnboundedSender<Command>) -> Command {
		let mut command = Command::new(request.kind());

		let _ = updates.send(command.clone());

		command =
			advance(command, CommandEvent::Start { message: "Command started.".to_string() }, updates);

		let (reporter, mut rx) = ProgressReporter::channel();
		let work = self.dispatch(request, reporter);

		tokio::pin!(work);

		let outcome = loop {
			tokio::select! {
				Some(progress) = rx.recv() => {
					command = advance(command, CommandEvent::Progress(progress), updates);
				},
				outcome = &mut work => break outcome,
			}
		};

		while let Ok(progress) = rx.try_recv() {
			command = advance(command, CommandEvent::Progress(progress), updates);
		}

		let event = match outcome {
			Ok(Finished { failed: false, message, result }) => CommandEvent::Complete { message, result },
			Ok(Finished { failed: true, message, result }) => CommandEvent::Fail {
				error: message.clone(),
				message,
				result: Some(result),
			},
			Err(err) => {
				tracing::error!(command_id = %command.id, error = %err, "Command failed.");

				CommandEvent::Fail {
					message: "Command failed.".to_string(),
					error: err.to_string(),
					result: None,
				}
			},
		};

		advance(command, event, updates)
	}

	async fn dispatch(&self, request: CommandRequest, progress: ProgressReporter) -> Result<Finished> {
		request.validate()?;

		match request {
			CommandRequest::SyncChats { chat_ids, kind, priorities, options } => {
				let request = MultiSyncRequest { chat_ids, kind, priorities, options };
				let report = self.orchestrator.start_multi_sync(request, &progress).await?;

				Ok(Finished::completed("Sync tasks scheduled.", to_value(&report)))
			},
			CommandRequest::SyncMetadata { chat_ids } => {
				let report = self.orchestrator.sync_metadata(chat_ids, &progress).await?;

				Ok(Finished::completed("Metadata sync scheduled.", to_value(&report)))
			},
			CommandRequest::Embed { chat_id, batch_size, concurrency } => {
				let report =
					self.embed.run(EmbedRequest { chat_id, batch_size, concurrency }, &progress).await?;
				let message = format!(
					"Embedded {}/{} messages; {} failed.",
					report.processed, report.total, report.failed
				);

				Ok(Finished {
					failed: report.status == EmbedStatus::Failed,
					message,
					result: to_value(&report),
				})
			},
			CommandRequest::Search { query, chat_id, limit, offset, use_vector } => {
				let response =
					self.search.search(SearchRequest { query, chat_id, limit, offset, use_vector }).await?;

				Ok(Finished::completed(
					format!("Found {} results.", response.items.len()),
					to_value(&response),
				))
			},
		}
	}
}

struct Finished {
	failed: bool,
	message: String,
	result: Value,
}
impl Finished {
	fn completed(message: impl Into<String>, result: Value) -> Self {
		Self { failed: false, message: message.into(), result }
	}
}

fn advance(command: Command, event: CommandEvent, updates: &UnboundedSender<Command>) -> Command {
	match transition(&command, event) {
		Ok(next) => {
			let _ = updates.send(next.clone());

			next
		},
		Err(err) => {
			tracing::warn!(error = %err, "Dropped command event.");

			command
		},
	}
}

fn to_value<T: Serialize>(value: &T) -> Value {
	serde_json::to_value(value).unwrap_or(Value::Null)
}

fn default_sync_kind() -> SyncKind {
	SyncKind::Messages
}

fn default_batch_size() -> usize {
	DEFAULT_BATCH_SIZE
}

fn default_concurrency() -> usize {
	DEFAULT_CONCURRENCY
}

fn default_limit() -> u32 {
	DEFAULT_LIMIT
}
