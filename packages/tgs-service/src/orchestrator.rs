use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
	time::Duration,
};

use serde::Serialize;
use serde_json::json;

use crate::{
	ChatClient, ChatStore, Error, MessageStore, Result, SyncStore,
	clock::Clock,
	fetcher::IncrementalFetcher,
	progress::{ProgressReporter, admission_percent},
	retry::{RetryExecutor, RetryPolicy},
	scheduler::{Admission, CancelReport, SyncScheduler},
	task::{SyncOptions, SyncTask},
	workers::{MessageSyncWorker, MetadataSyncWorker},
};
use tgs_config::SyncConfig;
use tgs_storage::models::{SyncConfigItem, SyncKind};

/// Share of the progress bar spent refreshing metadata ahead of a messages sync.
const METADATA_SLICE: u8 = 10;

#[derive(Debug, Clone)]
pub struct MultiSyncRequest {
	pub chat_ids: Vec<i64>,
	pub kind: SyncKind,
	/// Missing entries default to priority zero.
	pub priorities: HashMap<i64, i32>,
	/// Missing entries default to empty options.
	pub options: HashMap<i64, SyncOptions>,
}
impl MultiSyncRequest {
	pub fn new(kind: SyncKind, chat_ids: Vec<i64>) -> Self {
		Self { chat_ids, kind, priorities: HashMap::new(), options: HashMap::new() }
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MultiSyncReport {
	pub started: Vec<i64>,
	pub queued: Vec<i64>,
	pub duplicates: Vec<i64>,
}
impl MultiSyncReport {
	fn record(&mut self, chat_id: i64, admission: Admission) {
		match admission {
			Admission::Started => self.started.push(chat_id),
			Admission::Queued => self.queued.push(chat_id),
			Admission::Duplicate => self.duplicates.push(chat_id),
		}
	}
}

/// Storage the sync engine reads and writes through.
#[derive(Clone)]
pub struct SyncStores {
	pub sync: Arc<dyn SyncStore>,
	pub chats: Arc<dyn ChatStore>,
	pub messages: Arc<dyn MessageStore>,
}

/// Turns a multi-chat request into prioritized tasks on the two schedulers.
pub struct ChatsSyncOrchestrator {
	metadata: SyncScheduler,
	messages: SyncScheduler,
	chats: Arc<dyn ChatStore>,
	sync_store: Arc<dyn SyncStore>,
}
impl ChatsSyncOrchestrator {
	pub fn new(
		metadata: SyncScheduler,
		messages: SyncScheduler,
		chats: Arc<dyn ChatStore>,
		sync_store: Arc<dyn SyncStore>,
	) -> Self {
		Self { metadata, messages, chats, sync_store }
	}

	/// Builds both schedulers and their workers from `[sync]`. The workers share one retry
	/// policy on `clock`.
	pub fn from_config(
		cfg: &SyncConfig,
		client: Arc<dyn ChatClient>,
		stores: SyncStores,
		clock: Arc<dyn Clock>,
	) -> Self {
		let retry = RetryExecutor::new(RetryPolicy::from_config(cfg), clock.clone());
		let metadata_worker = MetadataSyncWorker::new(
			client.clone(),
			stores.chats.clone(),
			retry.clone(),
			clock,
			Duration::from_millis(cfg.dialogs_cache_ttl_ms),
		);
		let messages_worker = MessageSyncWorker::new(
			IncrementalFetcher::new(client, retry),
			stores.messages,
			stores.sync.clone(),
			cfg,
		);
		let metadata = SyncScheduler::new(
			SyncKind::Metadata,
			cfg.metadata_concurrency,
			stores.sync.clone(),
			Arc::new(metadata_worker),
		);
		let messages = SyncScheduler::new(
			SyncKind::Messages,
			cfg.messages_concurrency,
			stores.sync.clone(),
			Arc::new(messages_worker),
		);

		tracing::info!(
			metadata_concurrency = metadata.max_concurrent(),
			messages_concurrency = messages.max_concurrent(),
			max_retries = cfg.max_retries,
			"Sync engine ready."
		);

		Self::new(metadata, messages, stores.chats, stores.sync)
	}

	pub fn scheduler(&self, kind: SyncKind) -> &SyncScheduler {
		match kind {
			SyncKind::Metadata => &self.metadata,
			SyncKind::Messages => &self.messages,
		}
	}

	/// Returns once every task is admitted. The tasks themselves keep running in the background.
	pub async fn start_multi_sync(
		&self,
		request: MultiSyncRequest,
		progress: &ProgressReporter,
	) -> Result<MultiSyncReport> {
		let chat_ids = dedup_ids(&request.chat_ids);

		if chat_ids.is_empty() {
			return Err(Error::invalid("chat_ids must not be empty."));
		}

		let priority_of = |chat_id: i64| request.priorities.get(&chat_id).copied().unwrap_or(0);
		let mut base = 0;

		if request.kind == SyncKind::Messages {
			progress.report(0, "Refreshing chat metadata.");

			for (done, chat_id) in chat_ids.iter().enumerate() {
				let priority = priority_of(*chat_id);
				let task = SyncTask::new(SyncKind::Metadata, *chat_id, priority, SyncOptions::default())
					.with_progress(progress.clone());

				self.metadata.schedule(task).await?;
				progress.report(
					admission_percent(0, METADATA_SLICE / 2, done + 1, chat_ids.len()),
					"Refreshing chat metadata.",
				);
			}

			self.metadata.wait_for(&chat_ids).await;
			self.ensure_chats_exist(&chat_ids).await?;

			base = METADATA_SLICE;

			progress.report(base, "Chat metadata refreshed.");
		}

		let mut tasks: Vec<SyncTask> = chat_ids
			.iter()
			.map(|chat_id| {
				let options = request.options.get(chat_id).cloned().unwrap_or_default();

				SyncTask::new(request.kind, *chat_id, priority_of(*chat_id), options)
					.with_progress(progress.clone())
			})
			.collect();

		// Stable, so equal priorities keep request order.
		tasks.sort_by(|a, b| b.priority.cmp(&a.priority));

		let scheduler = self.scheduler(request.kind);
		let total = tasks.len();
		let span = 100 - base;
		let mut report = MultiSyncReport::default();

		progress.report(base, "Creating sync tasks.");

		for (done, task) in tasks.into_iter().enumerate() {
			let chat_id = task.chat_id;
			let admission = scheduler.schedule(task).await?;

			report.record(chat_id, admission);
			progress.report_with(
				admission_percent(base, span, done + 1, total),
				format!("Scheduled {}/{} chats.", done + 1, total),
				json!({ "chatId": chat_id }),
			);
		}

		tracing::info!(
			kind = %request.kind,
			started = report.started.len(),
			queued = report.queued.len(),
			duplicates = report.duplicates.len(),
			"Multi-chat sync admitted."
		);

		progress.report(100, "Sync tasks scheduled.");

		Ok(report)
	}

	pub async fn sync_metadata(
		&self,
		chat_ids: Vec<i64>,
		progress: &ProgressReporter,
	) -> Result<MultiSyncReport> {
		self.start_multi_sync(MultiSyncRequest::new(SyncKind::Metadata, chat_ids), progress).await
	}

	pub async fn sync_messages(
		&self,
		chat_ids: Vec<i64>,
		progress: &ProgressReporter,
	) -> Result<MultiSyncReport> {
		self.start_multi_sync(MultiSyncRequest::new(SyncKind::Messages, chat_ids), progress).await
	}

	/// Cancels one kind, or both when `kind` is `None`.
	pub async fn cancel_sync(
		&self,
		chat_id: i64,
		kind: Option<SyncKind>,
		purge: bool,
	) -> Result<Vec<(SyncKind, CancelReport)>> {
		let mut reports = Vec::new();

		for scheduler in [&self.metadata, &self.messages] {
			if kind.is_some_and(|kind| kind != scheduler.kind()) {
				continue;
			}

			reports.push((scheduler.kind(), scheduler.cancel(chat_id, purge).await?));
		}

		Ok(reports)
	}

	pub async fn get_sync_status(
		&self,
		chat_id: i64,
		kind: Option<SyncKind>,
	) -> Result<Vec<SyncConfigItem>> {
		match kind {
			Some(kind) => Ok(self.scheduler(kind).get_status(chat_id).await?.into_iter().collect()),
			None => self.sync_store.get_sync_config_by_chat_id(chat_id).await.map_err(Error::storage),
		}
	}

	/// Marks records left queued or running by a previous process as failed.
	pub async fn recover_interrupted(&self) -> Result<u64> {
		let rows = self.sync_store.reset_interrupted().await.map_err(Error::storage)?;

		if rows > 0 {
			tracing::warn!(rows, "Recovered sync records interrupted by a previous run.");
		}

		Ok(rows)
	}

	async fn ensure_chats_exist(&self, chat_ids: &[i64]) -> Result<()> {
		let mut missing = Vec::new();

		for chat_id in chat_ids {
			if self.chats.get_chat(*chat_id).await.map_err(Error::storage)?.is_none() {
				missing.push(*chat_id);
			}
		}

		if missing.is_empty() { Ok(()) } else { Err(Error::ChatsNotFound { chat_ids: missing }) }
	}
}

fn dedup_ids(chat_ids: &[i64]) -> Vec<i64> {
	let mut seen = HashSet::new();

	chat_ids.iter().copied().filter(|chat_id| seen.insert(*chat_id)).collect()
}
