#![allow(dead_code)]

use std::{
	collections::{HashMap, HashSet, VecDeque},
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use color_eyre::eyre;
use time::OffsetDateTime;
use tokio::{sync::Semaphore, time::Instant};

use tgs_service::{
	BoxFuture, ChatClient, ChatStore, ChatSummary, Clock, EmbeddingProvider, Error,
	GetMessagesParams, InputPeer, MessageStore, PlatformMessage, RemoteMessage, Result,
	SearchStore, SyncOutcome, SyncStore, SyncTask, SyncWorker,
};
use tgs_storage::{
	models::{
		ChatRecord, EmbeddingUpdate, MessageToEmbed, NewMessage, SimilarMessage, SyncConfigItem,
		SyncConfigUpsert, SyncKind, SyncStatus, SyncStatusUpdate, TextMatch,
	},
	sync_configs::{CANCELLED_ERROR, INTERRUPTED_ERROR},
};

/// Clock whose sleeps advance virtual time and return without waiting.
pub struct ManualClock {
	origin: Instant,
	elapsed: Mutex<Duration>,
	sleeps: Mutex<Vec<Duration>>,
	yielding: bool,
}
impl ManualClock {
	pub fn new() -> Arc<Self> {
		Self::build(false)
	}

	/// Sleeps yield to the runtime once, so concurrent callers interleave.
	pub fn yielding() -> Arc<Self> {
		Self::build(true)
	}

	fn build(yielding: bool) -> Arc<Self> {
		Arc::new(Self {
			origin: Instant::now(),
			elapsed: Mutex::new(Duration::ZERO),
			sleeps: Mutex::new(Vec::new()),
			yielding,
		})
	}

	pub fn origin(&self) -> Instant {
		self.origin
	}

	pub fn sleeps(&self) -> Vec<Duration> {
		self.sleeps.lock().unwrap().clone()
	}

	pub fn advance(&self, duration: Duration) {
		*self.elapsed.lock().unwrap() += duration;
	}
}
impl Clock for ManualClock {
	fn now(&self) -> Instant {
		self.origin + *self.elapsed.lock().unwrap()
	}

	fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
		self.sleeps.lock().unwrap().push(duration);
		self.advance(duration);

		if self.yielding {
			return Box::pin(tokio::task::yield_now());
		}

		Box::pin(async {})
	}
}

#[derive(Default)]
pub struct MemorySyncStore {
	rows: Mutex<HashMap<(i64, SyncKind), SyncConfigItem>>,
	history: Mutex<Vec<(i64, SyncKind, SyncStatus)>>,
	rejected: Mutex<Option<SyncStatus>>,
}
impl MemorySyncStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn get(&self, chat_id: i64, kind: SyncKind) -> Option<SyncConfigItem> {
		self.rows.lock().unwrap().get(&(chat_id, kind)).cloned()
	}

	pub fn status(&self, chat_id: i64, kind: SyncKind) -> Option<SyncStatus> {
		self.get(chat_id, kind).map(|item| item.status)
	}

	/// Every status written for the pair, in order.
	pub fn history(&self, chat_id: i64, kind: SyncKind) -> Vec<SyncStatus> {
		self.history
			.lock()
			.unwrap()
			.iter()
			.filter(|(id, k, _)| *id == chat_id && *k == kind)
			.map(|(_, _, status)| *status)
			.collect()
	}

	pub fn insert(&self, item: SyncConfigItem) {
		self.rows.lock().unwrap().insert((item.chat_id, item.kind), item);
	}

	/// Makes every status update to `status` fail without touching the row.
	pub fn reject_updates_to(&self, status: SyncStatus) {
		*self.rejected.lock().unwrap() = Some(status);
	}

	fn record(&self, chat_id: i64, kind: SyncKind, status: SyncStatus) {
		self.history.lock().unwrap().push((chat_id, kind, status));
	}
}
impl SyncStore for MemorySyncStore {
	fn upsert_sync_config<'a>(
		&'a self,
		chat_id: i64,
		upsert: &'a SyncConfigUpsert,
	) -> BoxFuture<'a, color_eyre::Result<SyncConfigItem>> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();
			let mut rows = self.rows.lock().unwrap();
			let item = rows.entry((chat_id, upsert.kind)).or_insert_with(|| SyncConfigItem {
				chat_id,
				kind: upsert.kind,
				status: upsert.status,
				priority: upsert.priority,
				last_sync_time: None,
				last_message_id: None,
				last_error: None,
				options: upsert.options.clone(),
				created_at: now,
				updated_at: now,
			});

			item.status = upsert.status;
			item.priority = upsert.priority;
			item.options = upsert.options.clone();
			item.last_error = None;
			item.updated_at = now;

			let item = item.clone();

			drop(rows);
			self.record(chat_id, upsert.kind, upsert.status);

			Ok(item)
		})
	}

	fn update_sync_status<'a>(
		&'a self,
		chat_id: i64,
		kind: SyncKind,
		update: &'a SyncStatusUpdate,
	) -> BoxFuture<'a, color_eyre::Result<u64>> {
		Box::pin(async move {
			if *self.rejected.lock().unwrap() == Some(update.status) {
				return Err(eyre::eyre!("connection reset"));
			}

			let mut rows = self.rows.lock().unwrap();
			let Some(item) = rows.get_mut(&(chat_id, kind)) else {
				return Ok(0);
			};

			item.status = update.status;
			item.last_sync_time = update.last_sync_time.or(item.last_sync_time);
			item.last_message_id = update.last_message_id.or(item.last_message_id);
			item.last_error = update.last_error.clone();
			item.updated_at = OffsetDateTime::now_utc();

			drop(rows);
			self.record(chat_id, kind, update.status);

			Ok(1)
		})
	}

	fn get_sync_config_by_chat_id(
		&self,
		chat_id: i64,
	) -> BoxFuture<'_, color_eyre::Result<Vec<SyncConfigItem>>> {
		Box::pin(async move {
			let mut items: Vec<_> = self
				.rows
				.lock()
				.unwrap()
				.values()
				.filter(|item| item.chat_id == chat_id)
				.cloned()
				.collect();

			items.sort_by_key(|item| item.kind.as_str());

			Ok(items)
		})
	}

	fn get_sync_config_by_chat_id_and_type(
		&self,
		chat_id: i64,
		kind: SyncKind,
	) -> BoxFuture<'_, color_eyre::Result<Option<SyncConfigItem>>> {
		Box::pin(async move { Ok(self.get(chat_id, kind)) })
	}

	fn cancel_sync_config(
		&self,
		chat_id: i64,
		kind: Option<SyncKind>,
		purge: bool,
	) -> BoxFuture<'_, color_eyre::Result<u64>> {
		Box::pin(async move {
			let mut rows = self.rows.lock().unwrap();
			let matches = |key: &(i64, SyncKind)| key.0 == chat_id && kind.is_none_or(|k| k == key.1);

			if purge {
				let before = rows.len();

				rows.retain(|key, _| !matches(key));

				return Ok((before - rows.len()) as u64);
			}

			let mut touched = 0;

			for (key, item) in rows.iter_mut() {
				if matches(key) && item.status.is_in_flight() {
					item.status = SyncStatus::Failed;
					item.last_error = Some(CANCELLED_ERROR.to_string());
					touched += 1;
				}
			}

			Ok(touched)
		})
	}

	fn reset_interrupted(&self) -> BoxFuture<'_, color_eyre::Result<u64>> {
		Box::pin(async move {
			let mut touched = 0;

			for item in self.rows.lock().unwrap().values_mut() {
				if item.status.is_in_flight() {
					item.status = SyncStatus::Failed;
					item.last_error = Some(INTERRUPTED_ERROR.to_string());
					touched += 1;
				}
			}

			Ok(touched)
		})
	}
}

#[derive(Default)]
pub struct MemoryChatStore {
	chats: Mutex<HashMap<i64, ChatRecord>>,
}
impl MemoryChatStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn with_chats(chat_ids: &[i64]) -> Arc<Self> {
		let store = Self::default();

		for chat_id in chat_ids {
			store.chats.lock().unwrap().insert(*chat_id, chat_record(*chat_id));
		}

		Arc::new(store)
	}

	pub fn get(&self, chat_id: i64) -> Option<ChatRecord> {
		self.chats.lock().unwrap().get(&chat_id).cloned()
	}
}
impl ChatStore for MemoryChatStore {
	fn get_chat(&self, chat_id: i64) -> BoxFuture<'_, color_eyre::Result<Option<ChatRecord>>> {
		Box::pin(async move { Ok(self.get(chat_id)) })
	}

	fn upsert_chat<'a>(
		&'a self,
		chat_id: i64,
		title: &'a str,
		chat_type: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move {
			self.chats.lock().unwrap().insert(
				chat_id,
				ChatRecord {
					chat_id,
					title: title.to_string(),
					chat_type: chat_type.to_string(),
					updated_at: OffsetDateTime::now_utc(),
				},
			);

			Ok(())
		})
	}
}

pub fn chat_record(chat_id: i64) -> ChatRecord {
	ChatRecord {
		chat_id,
		title: format!("Chat {chat_id}"),
		chat_type: "group".to_string(),
		updated_at: OffsetDateTime::UNIX_EPOCH,
	}
}

#[derive(Default)]
pub struct MemoryMessageStore {
	pub stored: Mutex<Vec<NewMessage>>,
	pub pending: Mutex<Vec<MessageToEmbed>>,
	pub written: Mutex<Vec<EmbeddingUpdate>>,
	/// Zero-based indexes of embedding writes that fail.
	pub failing_writes: Mutex<HashSet<usize>>,
	/// Record ids that no longer exist, so writes to them match no row.
	pub vanished: Mutex<HashSet<i64>>,
	write_calls: AtomicUsize,
}
impl MemoryMessageStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn with_pending(chat_id: i64, count: usize) -> Arc<Self> {
		let store = Self::default();

		*store.pending.lock().unwrap() = (0..count)
			.map(|i| MessageToEmbed {
				record_id: i as i64 + 1,
				chat_id,
				content: format!("message {i}"),
			})
			.collect();

		Arc::new(store)
	}

	pub fn fail_write(&self, index: usize) {
		self.failing_writes.lock().unwrap().insert(index);
	}

	pub fn stored_ids(&self) -> Vec<i64> {
		self.stored.lock().unwrap().iter().map(|message| message.platform_message_id).collect()
	}
}
impl MessageStore for MemoryMessageStore {
	fn upsert_message<'a>(&'a self, message: &'a NewMessage) -> BoxFuture<'a, color_eyre::Result<()>> {
		Box::pin(async move {
			let mut stored = self.stored.lock().unwrap();

			stored.retain(|existing| {
				(existing.chat_id, existing.platform_message_id)
					!= (message.chat_id, message.platform_message_id)
			});
			stored.push(message.clone());

			Ok(())
		})
	}

	fn find_messages_to_embed(
		&self,
		chat_id: i64,
	) -> BoxFuture<'_, color_eyre::Result<Vec<MessageToEmbed>>> {
		Box::pin(async move {
			Ok(self
				.pending
				.lock()
				.unwrap()
				.iter()
				.filter(|message| message.chat_id == chat_id)
				.cloned()
				.collect())
		})
	}

	fn update_message_embeddings<'a>(
		&'a self,
		_chat_id: i64,
		updates: &'a [EmbeddingUpdate],
	) -> BoxFuture<'a, color_eyre::Result<u64>> {
		Box::pin(async move {
			let call = self.write_calls.fetch_add(1, Ordering::SeqCst);

			if self.failing_writes.lock().unwrap().contains(&call) {
				return Err(eyre::eyre!("write {call} rejected"));
			}

			let vanished = self.vanished.lock().unwrap();
			let matched: Vec<_> = updates
				.iter()
				.filter(|update| !vanished.contains(&update.record_id))
				.cloned()
				.collect();

			drop(vanished);

			let rows = matched.len() as u64;

			self.written.lock().unwrap().extend(matched);

			Ok(rows)
		})
	}
}

/// Returns `[call_index; dimensions]` vectors and fails the listed calls.
pub struct FakeEmbedder {
	pub dimensions: usize,
	pub failing_calls: Mutex<HashSet<usize>>,
	/// Vectors returned per call are cut to this many when set.
	pub truncate_to: Mutex<Option<usize>>,
	calls: AtomicUsize,
	pub inputs: Mutex<Vec<Vec<String>>>,
}
impl FakeEmbedder {
	pub fn new(dimensions: usize) -> Arc<Self> {
		Arc::new(Self {
			dimensions,
			failing_calls: Mutex::new(HashSet::new()),
			truncate_to: Mutex::new(None),
			calls: AtomicUsize::new(0),
			inputs: Mutex::new(Vec::new()),
		})
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	pub fn fail_call(&self, index: usize) {
		self.failing_calls.lock().unwrap().insert(index);
	}
}
impl EmbeddingProvider for FakeEmbedder {
	fn embed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			let call = self.calls.fetch_add(1, Ordering::SeqCst);

			self.inputs.lock().unwrap().push(texts.to_vec());

			if self.failing_calls.lock().unwrap().contains(&call) {
				return Err(eyre::eyre!("provider unavailable"));
			}

			let mut count = texts.len();

			if let Some(limit) = *self.truncate_to.lock().unwrap() {
				count = count.min(limit);
			}

			Ok((0..count).map(|_| vec![call as f32; self.dimensions]).collect())
		})
	}
}

/// Chat client backed by an in-memory history, newest first, with optional scripted pages and
/// injected failures.
#[derive(Default)]
pub struct FakeChatClient {
	pub dialogs: Vec<ChatSummary>,
	history: HashMap<i64, Vec<RemoteMessage>>,
	script: Mutex<VecDeque<Vec<RemoteMessage>>>,
	failures_left: AtomicUsize,
	dialog_failures_left: AtomicUsize,
	pub requests: Mutex<Vec<GetMessagesParams>>,
	dialog_calls: AtomicUsize,
}
impl FakeChatClient {
	pub fn with_dialogs(chat_ids: &[i64]) -> Self {
		Self {
			dialogs: chat_ids
				.iter()
				.map(|id| ChatSummary {
					id: *id,
					title: format!("Chat {id}"),
					chat_type: "group".to_string(),
				})
				.collect(),
			..Self::default()
		}
	}

	/// Messages with ids `1..=count`.
	pub fn with_history(mut self, chat_id: i64, count: i64) -> Self {
		let mut items: Vec<_> =
			(1..=count).map(|id| RemoteMessage::Message(message(chat_id, id))).collect();

		items.reverse();
		self.history.insert(chat_id, items);

		self
	}

	pub fn with_items(mut self, chat_id: i64, mut items: Vec<RemoteMessage>) -> Self {
		items.sort_by_key(|item| std::cmp::Reverse(item.id()));
		self.history.insert(chat_id, items);

		self
	}

	/// Pages returned verbatim, in order, before the history is consulted.
	pub fn with_script(self, pages: Vec<Vec<RemoteMessage>>) -> Self {
		*self.script.lock().unwrap() = pages.into();

		self
	}

	pub fn failing(self, times: usize) -> Self {
		self.failures_left.store(times, Ordering::SeqCst);

		self
	}

	pub fn failing_dialogs(self, times: usize) -> Self {
		self.dialog_failures_left.store(times, Ordering::SeqCst);

		self
	}

	pub fn requests(&self) -> Vec<GetMessagesParams> {
		self.requests.lock().unwrap().clone()
	}

	pub fn dialog_calls(&self) -> usize {
		self.dialog_calls.load(Ordering::SeqCst)
	}
}
impl ChatClient for FakeChatClient {
	fn get_dialogs(&self) -> BoxFuture<'_, color_eyre::Result<Vec<ChatSummary>>> {
		Box::pin(async move {
			self.dialog_calls.fetch_add(1, Ordering::SeqCst);

			let failing = self
				.dialog_failures_left
				.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
				.is_ok();

			if failing {
				return Err(eyre::eyre!("FLOOD_WAIT on get_dialogs"));
			}

			Ok(self.dialogs.clone())
		})
	}

	fn get_input_entity(&self, chat_id: i64) -> BoxFuture<'_, color_eyre::Result<InputPeer>> {
		Box::pin(async move { Ok(InputPeer { chat_id, access_hash: chat_id * 31 }) })
	}

	fn get_messages<'a>(
		&'a self,
		peer: &'a InputPeer,
		params: GetMessagesParams,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RemoteMessage>>> {
		Box::pin(async move {
			self.requests.lock().unwrap().push(params);

			let failing = self
				.failures_left
				.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
				.is_ok();

			if failing {
				return Err(eyre::eyre!("FLOOD_WAIT on get_messages"));
			}
			if let Some(page) = self.script.lock().unwrap().pop_front() {
				return Ok(page);
			}

			let history = self.history.get(&peer.chat_id).cloned().unwrap_or_default();

			Ok(history
				.into_iter()
				.filter(|item| params.offset_id == 0 || item.id() < params.offset_id)
				.filter(|item| item.id() > params.min_id)
				.filter(|item| params.max_id == 0 || item.id() < params.max_id)
				.take(params.limit as usize)
				.collect())
		})
	}
}

pub fn message(chat_id: i64, id: i64) -> PlatformMessage {
	PlatformMessage {
		id,
		chat_id,
		date: OffsetDateTime::UNIX_EPOCH + time::Duration::minutes(id),
		text: Some(format!("text {id}")),
		from_id: Some(100),
		reply_to_id: None,
		forward_from_chat_id: None,
		forward_from_message_id: None,
		has_media: false,
	}
}

/// Worker that blocks each task on a shared gate and records start order and peak concurrency.
pub struct GatedWorker {
	pub gate: Semaphore,
	pub started: Mutex<Vec<i64>>,
	running: AtomicUsize,
	pub peak: AtomicUsize,
	/// Chats whose work fails with a remote error.
	pub failing: Mutex<HashSet<i64>>,
	/// Chats whose work panics.
	pub panicking: Mutex<HashSet<i64>>,
	/// Honour the task's cancellation token while blocked.
	pub abortable: bool,
}
impl GatedWorker {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::build(false))
	}

	pub fn abortable() -> Arc<Self> {
		Arc::new(Self::build(true))
	}

	fn build(abortable: bool) -> Self {
		Self {
			gate: Semaphore::new(0),
			started: Mutex::new(Vec::new()),
			running: AtomicUsize::new(0),
			peak: AtomicUsize::new(0),
			failing: Mutex::new(HashSet::new()),
			panicking: Mutex::new(HashSet::new()),
			abortable,
		}
	}

	pub fn open(&self, permits: usize) {
		self.gate.add_permits(permits);
	}

	pub fn started(&self) -> Vec<i64> {
		self.started.lock().unwrap().clone()
	}

	pub fn peak(&self) -> usize {
		self.peak.load(Ordering::SeqCst)
	}

	/// Waits until `count` tasks have entered the worker.
	pub async fn wait_started(&self, count: usize) {
		while self.started.lock().unwrap().len() < count {
			tokio::task::yield_now().await;
		}
	}
}
impl SyncWorker for GatedWorker {
	fn run<'a>(&'a self, task: &'a SyncTask) -> BoxFuture<'a, Result<SyncOutcome>> {
		Box::pin(async move {
			self.started.lock().unwrap().push(task.chat_id);

			let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;

			self.peak.fetch_max(running, Ordering::SeqCst);

			let result = if self.abortable {
				tokio::select! {
					_ = task.cancellation().cancelled() => Err(Error::Cancelled),
					permit = self.gate.acquire() => {
						permit.expect("Gate closed.").forget();

						Ok(())
					},
				}
			} else {
				self.gate.acquire().await.expect("Gate closed.").forget();

				Ok(())
			};

			self.running.fetch_sub(1, Ordering::SeqCst);
			result?;

			if self.panicking.lock().unwrap().contains(&task.chat_id) {
				panic!("worker exploded for chat {}", task.chat_id);
			}
			if self.failing.lock().unwrap().contains(&task.chat_id) {
				return Err(Error::Remote { message: "Bearer secret-token rejected".to_string() });
			}

			Ok(SyncOutcome { processed: 1, last_message_id: Some(task.chat_id * 10) })
		})
	}
}

#[derive(Default)]
pub struct FakeSearchStore {
	pub similar: Vec<SimilarMessage>,
	pub text: Vec<TextMatch>,
	pub calls: Mutex<Vec<(&'static str, i64, i64)>>,
}
impl SearchStore for FakeSearchStore {
	fn find_similar_messages<'a>(
		&'a self,
		_embedding: &'a [f32],
		chat_id: Option<i64>,
		limit: i64,
		offset: i64,
	) -> BoxFuture<'a, color_eyre::Result<Vec<SimilarMessage>>> {
		Box::pin(async move {
			self.calls.lock().unwrap().push(("vector", limit, offset));

			Ok(self
				.similar
				.iter()
				.filter(|row| chat_id.is_none_or(|id| id == row.chat_id))
				.cloned()
				.collect())
		})
	}

	fn find_messages_by_text<'a>(
		&'a self,
		_query: &'a str,
		chat_id: Option<i64>,
		limit: i64,
		offset: i64,
	) -> BoxFuture<'a, color_eyre::Result<Vec<TextMatch>>> {
		Box::pin(async move {
			self.calls.lock().unwrap().push(("text", limit, offset));

			Ok(self
				.text
				.iter()
				.filter(|row| chat_id.is_none_or(|id| id == row.chat_id))
				.cloned()
				.collect())
		})
	}
}
