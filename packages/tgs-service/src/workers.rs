use std::{sync::Arc, time::Duration};

use tokio::{sync::Mutex, time::Instant};

use crate::{
	BoxFuture, ChatClient, ChatStore, ChatSummary, Error, MessageStore, PlatformMessage, Result,
	SyncStore,
	clock::Clock,
	fetcher::{FetchOptions, IncrementalFetcher, MessageSink},
	retry::RetryExecutor,
	scheduler::{SyncOutcome, SyncWorker},
	task::SyncTask,
};
use tgs_storage::models::SyncKind;

/// Refreshes a chat's title and type from the account's dialog list.
pub struct MetadataSyncWorker {
	client: Arc<dyn ChatClient>,
	chats: Arc<dyn ChatStore>,
	retry: RetryExecutor,
	clock: Arc<dyn Clock>,
	cache_ttl: Duration,
	dialogs: Mutex<Option<CachedDialogs>>,
}
impl MetadataSyncWorker {
	pub fn new(
		client: Arc<dyn ChatClient>,
		chats: Arc<dyn ChatStore>,
		retry: RetryExecutor,
		clock: Arc<dyn Clock>,
		cache_ttl: Duration,
	) -> Self {
		Self { client, chats, retry, clock, cache_ttl, dialogs: Mutex::new(None) }
	}

	/// One dialog listing serves every metadata task scheduled within the cache window.
	async fn dialogs(&self, task: &SyncTask) -> Result<Arc<Vec<ChatSummary>>> {
		let mut cached = self.dialogs.lock().await;
		let now = self.clock.now();

		if let Some(entry) = cached.as_ref()
			&& now.duration_since(entry.fetched_at) < self.cache_ttl
		{
			return Ok(Arc::clone(&entry.dialogs));
		}

		let client = self.client.as_ref();
		let dialogs = self
			.retry
			.clone()
			.with_progress(task.progress().clone())
			.run("get_dialogs", || client.get_dialogs())
			.await
			.map_err(Error::remote)?;
		let dialogs = Arc::new(dialogs);

		*cached = Some(CachedDialogs { fetched_at: now, dialogs: Arc::clone(&dialogs) });

		Ok(dialogs)
	}
}
impl SyncWorker for MetadataSyncWorker {
	fn run<'a>(&'a self, task: &'a SyncTask) -> BoxFuture<'a, Result<SyncOutcome>> {
		Box::pin(async move {
			if task.cancellation().is_cancelled() {
				return Err(Error::Cancelled);
			}

			let dialogs = self.dialogs(task).await?;
			let Some(chat) = dialogs.iter().find(|chat| chat.id == task.chat_id) else {
				return Err(Error::ChatsNotFound { chat_ids: vec![task.chat_id] });
			};

			self.chats
				.upsert_chat(chat.id, &chat.title, &chat.chat_type)
				.await
				.map_err(Error::storage)?;

			tracing::debug!(chat_id = chat.id, title = %chat.title, "Chat metadata stored.");

			Ok(SyncOutcome { processed: 1, last_message_id: None })
		})
	}
}

struct CachedDialogs {
	fetched_at: Instant,
	dialogs: Arc<Vec<ChatSummary>>,
}

/// Pulls message history through the fetcher and persists every message.
pub struct MessageSyncWorker {
	fetcher: IncrementalFetcher,
	messages: Arc<dyn MessageStore>,
	sync_store: Arc<dyn SyncStore>,
	page_size: u32,
	empty_page_is_end: bool,
}
impl MessageSyncWorker {
	pub fn new(
		fetcher: IncrementalFetcher,
		messages: Arc<dyn MessageStore>,
		sync_store: Arc<dyn SyncStore>,
		cfg: &tgs_config::SyncConfig,
	) -> Self {
		Self {
			fetcher,
			messages,
			sync_store,
			page_size: cfg.page_size,
			empty_page_is_end: cfg.empty_page_is_end,
		}
	}

	async fn resume_cursor(&self, task: &SyncTask) -> Result<Option<i64>> {
		if !task.options.incremental {
			return Ok(None);
		}

		let record = self
			.sync_store
			.get_sync_config_by_chat_id_and_type(task.chat_id, SyncKind::Messages)
			.await
			.map_err(Error::storage)?;

		Ok(record.and_then(|item| item.last_message_id))
	}
}
impl SyncWorker for MessageSyncWorker {
	fn run<'a>(&'a self, task: &'a SyncTask) -> BoxFuture<'a, Result<SyncOutcome>> {
		Box::pin(async move {
			let resume_after = self.resume_cursor(task).await?;
			let options = FetchOptions::from_sync_options(
				&task.options,
				self.page_size,
				resume_after,
				self.empty_page_is_end,
			);
			let sink = StoreSink { messages: self.messages.as_ref() };
			let summary = self
				.fetcher
				.with_progress(task.progress().clone())
				.fetch_into(task.chat_id, options, task.cancellation().clone(), &sink)
				.await?;

			tracing::info!(
				chat_id = task.chat_id,
				processed = summary.processed,
				pages = summary.pages,
				"Message history fetched."
			);

			Ok(SyncOutcome {
				processed: summary.processed,
				last_message_id: summary.newest_id.max(resume_after),
			})
		})
	}
}

struct StoreSink<'a> {
	messages: &'a dyn MessageStore,
}
impl MessageSink for StoreSink<'_> {
	fn accept<'a>(&'a self, message: &'a PlatformMessage) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move { self.messages.upsert_message(&message.to_new_message()).await })
	}
}
