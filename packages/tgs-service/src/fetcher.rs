use std::{collections::VecDeque, sync::Arc};

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::{
	BoxFuture, ChatClient, Error, GetMessagesParams, InputPeer, PlatformMessage, RemoteMessage,
	Result, progress::ProgressReporter, retry::RetryExecutor, task::SyncOptions,
};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
	pub page_size: u32,
	/// Stop after this many messages have been yielded.
	pub limit: Option<u64>,
	/// Exclusive lower id bound; zero means unbounded.
	pub min_id: i64,
	/// Exclusive upper id bound; zero means unbounded.
	pub max_id: i64,
	pub start_time: Option<OffsetDateTime>,
	pub end_time: Option<OffsetDateTime>,
	/// Drop media-only messages that carry no text.
	pub skip_media: bool,
	/// Treat an empty page after the first one as the end of history.
	pub empty_page_is_end: bool,
}
impl FetchOptions {
	/// `resume_after` is the stored cursor used when the task is incremental.
	pub fn from_sync_options(
		options: &SyncOptions,
		page_size: u32,
		resume_after: Option<i64>,
		empty_page_is_end: bool,
	) -> Self {
		let mut min_id = options.from_message_id.unwrap_or(0);

		if options.incremental
			&& let Some(cursor) = resume_after
		{
			min_id = min_id.max(cursor);
		}

		Self {
			page_size: page_size.max(1),
			limit: options.limit,
			min_id,
			max_id: options.to_message_id.unwrap_or(0),
			start_time: options.start_time,
			end_time: options.end_time,
			skip_media: options.skip_media,
			empty_page_is_end,
		}
	}

	fn accepts(&self, message: &PlatformMessage) -> bool {
		if self.start_time.is_some_and(|start| message.date < start) {
			return false;
		}
		if self.end_time.is_some_and(|end| message.date > end) {
			return false;
		}
		if self.skip_media && message.has_media && message.text.is_none() {
			return false;
		}

		true
	}
}
impl Default for FetchOptions {
	fn default() -> Self {
		Self {
			page_size: DEFAULT_PAGE_SIZE,
			limit: None,
			min_id: 0,
			max_id: 0,
			start_time: None,
			end_time: None,
			skip_media: false,
			empty_page_is_end: false,
		}
	}
}

/// Receives messages one at a time as the stream yields them.
pub trait MessageSink
where
	Self: Send + Sync,
{
	fn accept<'a>(&'a self, message: &'a PlatformMessage) -> BoxFuture<'a, color_eyre::Result<()>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
	pub processed: u64,
	pub pages: u32,
	pub newest_id: Option<i64>,
}

/// Resolves a chat handle and pages through its history, newest first.
#[derive(Clone)]
pub struct IncrementalFetcher {
	client: Arc<dyn ChatClient>,
	retry: RetryExecutor,
}
impl IncrementalFetcher {
	pub fn new(client: Arc<dyn ChatClient>, retry: RetryExecutor) -> Self {
		Self { client, retry }
	}

	/// A fetcher whose retry backoffs are announced on `progress`.
	pub fn with_progress(&self, progress: ProgressReporter) -> Self {
		Self { client: Arc::clone(&self.client), retry: self.retry.clone().with_progress(progress) }
	}

	pub async fn open(
		&self,
		chat_id: i64,
		options: FetchOptions,
		cancel: CancellationToken,
	) -> Result<MessageStream<'_>> {
		let client = self.client.as_ref();
		let peer = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(Error::Cancelled),
			peer = self.retry.run("get_input_entity", || client.get_input_entity(chat_id)) =>
				peer.map_err(Error::remote)?,
		};

		Ok(MessageStream {
			client,
			retry: &self.retry,
			peer,
			options,
			cancel,
			buffer: VecDeque::new(),
			offset_id: 0,
			pages: 0,
			exhausted: false,
			yielded: 0,
			newest_id: None,
		})
	}

	/// Hands every fetched message to `sink` in order and stops at the first sink error.
	pub async fn fetch_into(
		&self,
		chat_id: i64,
		options: FetchOptions,
		cancel: CancellationToken,
		sink: &dyn MessageSink,
	) -> Result<FetchSummary> {
		let mut stream = self.open(chat_id, options, cancel).await?;

		while let Some(message) = stream.next().await? {
			sink.accept(&message).await.map_err(Error::storage)?;
		}

		Ok(stream.summary())
	}
}

/// Lazy message sequence. Pages are requested only as the consumer pulls.
pub struct MessageStream<'a> {
	client: &'a dyn ChatClient,
	retry: &'a RetryExecutor,
	peer: InputPeer,
	options: FetchOptions,
	cancel: CancellationToken,
	buffer: VecDeque<RemoteMessage>,
	offset_id: i64,
	pages: u32,
	exhausted: bool,
	yielded: u64,
	newest_id: Option<i64>,
}
impl MessageStream<'_> {
	pub async fn next(&mut self) -> Result<Option<PlatformMessage>> {
		loop {
			if self.options.limit.is_some_and(|limit| self.yielded >= limit) {
				return Ok(None);
			}

			let Some(item) = self.buffer.pop_front() else {
				if self.exhausted {
					return Ok(None);
				}

				self.fetch_page().await?;

				continue;
			};

			// The cursor moves past filtered items too, otherwise a fully filtered page would be
			// requested again.
			self.offset_id = item.id();

			let RemoteMessage::Message(message) = item else {
				continue;
			};

			if !self.options.accepts(&message) {
				continue;
			}

			self.yielded += 1;
			self.newest_id = Some(self.newest_id.map_or(message.id, |id| id.max(message.id)));

			return Ok(Some(message));
		}
	}

	pub fn summary(&self) -> FetchSummary {
		FetchSummary { processed: self.yielded, pages: self.pages, newest_id: self.newest_id }
	}

	async fn fetch_page(&mut self) -> Result<()> {
		if self.cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}

		let params = GetMessagesParams {
			limit: self.options.page_size,
			offset_id: self.offset_id,
			min_id: self.options.min_id,
			max_id: self.options.max_id,
		};
		let client = self.client;
		let peer = &self.peer;
		let page = tokio::select! {
			biased;
			_ = self.cancel.cancelled() => return Err(Error::Cancelled),
			page = self.retry.run("get_messages", || client.get_messages(peer, params)) =>
				page.map_err(|err| Error::Fetch { message: crate::root_message(&err) })?,
		};
		let first = self.pages == 0;

		self.pages += 1;

		tracing::debug!(
			chat_id = self.peer.chat_id,
			page = self.pages,
			offset_id = self.offset_id,
			items = page.len(),
			"Fetched message page."
		);

		if page.is_empty() {
			if first || self.options.empty_page_is_end {
				self.exhausted = true;

				return Ok(());
			}

			return Err(Error::Fetch {
				message: format!("Empty page at offset {} before end of history.", self.offset_id),
			});
		}
		if page.len() < self.options.page_size as usize {
			self.exhausted = true;
		}

		self.buffer.extend(page);

		Ok(())
	}
}
