use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::{
	BoxFuture, Error, Result, SyncStore, error::sanitize_error, queue::PriorityQueue,
	task::SyncTask,
};
use tgs_storage::models::{SyncConfigItem, SyncConfigUpsert, SyncKind, SyncStatus, SyncStatusUpdate};

/// Executes the work of one task. The scheduler owns every status write around it.
pub trait SyncWorker
where
	Self: Send + Sync,
{
	fn run<'a>(&'a self, task: &'a SyncTask) -> BoxFuture<'a, Result<SyncOutcome>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
	pub processed: u64,
	/// Newest platform message id seen, persisted as the incremental cursor.
	pub last_message_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
	Started,
	Queued,
	/// The chat already has a queued or running task of this kind.
	Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelReport {
	pub dequeued: usize,
	pub was_running: bool,
	pub rows: u64,
}

/// Bounded-concurrency executor for one sync kind.
///
/// Admission, dequeue, and terminal status writes all happen under one lock, so a chat is never
/// active twice and the active count never exceeds the cap.
#[derive(Clone)]
pub struct SyncScheduler {
	inner: Arc<Shared>,
}
impl SyncScheduler {
	pub fn new(
		kind: SyncKind,
		max_concurrent: usize,
		store: Arc<dyn SyncStore>,
		worker: Arc<dyn SyncWorker>,
	) -> Self {
		Self {
			inner: Arc::new(Shared {
				kind,
				max_concurrent: max_concurrent.max(1),
				store,
				worker,
				state: Mutex::new(State {
					queue: PriorityQueue::new(by_priority),
					active: HashMap::new(),
				}),
				finished: Notify::new(),
			}),
		}
	}

	pub fn kind(&self) -> SyncKind {
		self.inner.kind
	}

	pub fn max_concurrent(&self) -> usize {
		self.inner.max_concurrent
	}

	/// Persists the task as queued, then starts it immediately if a slot is free.
	///
	/// Returns once the task is admitted; it does not wait for the work to finish.
	pub async fn schedule(&self, task: SyncTask) -> Result<Admission> {
		let shared = &self.inner;

		if task.kind != shared.kind {
			return Err(Error::invalid(format!(
				"{} task submitted to the {} scheduler.",
				task.kind, shared.kind
			)));
		}

		let mut state = shared.state.lock().await;

		if state.holds(task.chat_id) {
			tracing::warn!(
				chat_id = task.chat_id,
				kind = %shared.kind,
				"Chat already has a pending sync. Skipping."
			);

			return Ok(Admission::Duplicate);
		}

		let upsert = SyncConfigUpsert {
			kind: shared.kind,
			status: SyncStatus::Queued,
			priority: task.priority,
			options: task.options.to_value(),
		};

		shared.store.upsert_sync_config(task.chat_id, &upsert).await.map_err(Error::storage)?;

		if state.active.len() >= shared.max_concurrent {
			tracing::info!(
				chat_id = task.chat_id,
				kind = %shared.kind,
				priority = task.priority,
				active = state.active.len(),
				"Sync queued."
			);

			state.queue.push(task);

			return Ok(Admission::Queued);
		}

		Shared::start(shared, &mut state, task);

		Ok(Admission::Started)
	}

	/// Drops a queued task and marks the persisted record cancelled, or deletes it with `purge`.
	///
	/// A running task is not interrupted; its eventual outcome is discarded so the cancelled
	/// status stands. Use [`SyncScheduler::abort`] to stop the work itself.
	pub async fn cancel(&self, chat_id: i64, purge: bool) -> Result<CancelReport> {
		let shared = &self.inner;
		let mut state = shared.state.lock().await;
		let dequeued = state.queue.retain(|task| task.chat_id != chat_id).len();
		let was_running = match state.active.get_mut(&chat_id) {
			Some(active) => {
				active.cancelled = true;

				true
			},
			None => false,
		};
		if dequeued > 0 {
			shared.finished.notify_waiters();
		}

		let rows = shared
			.store
			.cancel_sync_config(chat_id, Some(shared.kind), purge)
			.await
			.map_err(Error::storage)?;

		tracing::info!(
			chat_id,
			kind = %shared.kind,
			dequeued,
			was_running,
			purge,
			"Sync cancelled."
		);

		Ok(CancelReport { dequeued, was_running, rows })
	}

	/// Signals a running task to stop at its next checkpoint. Returns whether any task was
	/// signalled.
	pub async fn abort(&self, chat_id: i64) -> bool {
		let state = self.inner.state.lock().await;

		match state.active.get(&chat_id) {
			Some(active) => {
				active.cancel.cancel();

				true
			},
			None => false,
		}
	}

	pub async fn get_status(&self, chat_id: i64) -> Result<Option<SyncConfigItem>> {
		self.inner
			.store
			.get_sync_config_by_chat_id_and_type(chat_id, self.inner.kind)
			.await
			.map_err(Error::storage)
	}

	/// Resolves once none of `chat_ids` is queued or running.
	pub async fn wait_for(&self, chat_ids: &[i64]) {
		self.wait_until(|state| !chat_ids.iter().any(|chat_id| state.holds(*chat_id))).await;
	}

	pub async fn wait_idle(&self) {
		self.wait_until(|state| state.active.is_empty() && state.queue.is_empty()).await;
	}

	pub async fn active_len(&self) -> usize {
		self.inner.state.lock().await.active.len()
	}

	pub async fn queued_len(&self) -> usize {
		self.inner.state.lock().await.queue.len()
	}

	async fn wait_until(&self, done: impl Fn(&State) -> bool) {
		loop {
			let notified = self.inner.finished.notified();

			tokio::pin!(notified);

			notified.as_mut().enable();

			if done(&*self.inner.state.lock().await) {
				return;
			}

			notified.await;
		}
	}
}

struct Shared {
	kind: SyncKind,
	max_concurrent: usize,
	store: Arc<dyn SyncStore>,
	worker: Arc<dyn SyncWorker>,
	state: Mutex<State>,
	finished: Notify,
}
impl Shared {
	fn start(self: &Arc<Self>, state: &mut State, task: SyncTask) {
		tracing::info!(
			chat_id = task.chat_id,
			kind = %self.kind,
			priority = task.priority,
			"Sync started."
		);

		state.active.insert(
			task.chat_id,
			ActiveTask { cancel: task.cancellation().clone(), cancelled: false },
		);

		let shared = Arc::clone(self);

		tokio::spawn(async move { shared.run(task).await });
	}

	async fn run(self: Arc<Self>, task: SyncTask) {
		let chat_id = task.chat_id;

		match self.mark_running(chat_id).await {
			Ok(true) => {
				let result = self.execute(task).await;

				self.finish(chat_id, result).await;
			},
			Ok(false) => self.release(chat_id).await,
			// The work never starts without a persisted running status.
			Err(err) => self.finish(chat_id, Err(err)).await,
		}

		self.finished.notify_waiters();
	}

	/// Returns `false` when the task was cancelled before it began.
	async fn mark_running(&self, chat_id: i64) -> Result<bool> {
		let state = self.state.lock().await;

		if state.active.get(&chat_id).is_some_and(|active| active.cancelled) {
			return Ok(false);
		}

		let update = SyncStatusUpdate::status(SyncStatus::Running);

		if let Err(err) = self.store.update_sync_status(chat_id, self.kind, &update).await {
			tracing::error!(chat_id, kind = %self.kind, error = %err, "Failed to mark sync running.");

			return Err(Error::storage(err));
		}

		Ok(true)
	}

	async fn execute(&self, task: SyncTask) -> Result<SyncOutcome> {
		let worker = Arc::clone(&self.worker);
		// A panicking worker surfaces as a join error instead of taking the scheduler with it.
		let joined = tokio::spawn(async move { worker.run(&task).await }).await;

		match joined {
			Ok(result) => result,
			Err(err) => Err(Error::Worker { message: err.to_string() }),
		}
	}

	async fn finish(self: &Arc<Self>, chat_id: i64, result: Result<SyncOutcome>) {
		let mut state = self.state.lock().await;
		let cancelled = state.active.get(&chat_id).is_some_and(|active| active.cancelled);

		if cancelled {
			tracing::info!(
				chat_id,
				kind = %self.kind,
				"Sync finished after cancellation. Keeping cancelled status."
			);
		} else {
			let update = match &result {
				Ok(outcome) => {
					tracing::info!(
						chat_id,
						kind = %self.kind,
						processed = outcome.processed,
						"Sync completed."
					);

					SyncStatusUpdate {
						status: SyncStatus::Completed,
						last_sync_time: Some(OffsetDateTime::now_utc()),
						last_message_id: outcome.last_message_id,
						last_error: None,
					}
				},
				Err(err) => {
					tracing::error!(chat_id, kind = %self.kind, error = %err, "Sync failed.");

					SyncStatusUpdate {
						status: SyncStatus::Failed,
						last_sync_time: None,
						last_message_id: None,
						last_error: Some(sanitize_error(&err.to_string())),
					}
				},
			};

			if let Err(err) = self.store.update_sync_status(chat_id, self.kind, &update).await {
				tracing::error!(
					chat_id,
					kind = %self.kind,
					error = %err,
					"Failed to persist terminal sync status."
				);
			}
		}

		state.active.remove(&chat_id);
		self.drain(&mut state);
	}

	async fn release(self: &Arc<Self>, chat_id: i64) {
		let mut state = self.state.lock().await;

		state.active.remove(&chat_id);
		self.drain(&mut state);
	}

	fn drain(self: &Arc<Self>, state: &mut State) {
		while state.active.len() < self.max_concurrent {
			let Some(task) = state.queue.pop() else {
				break;
			};

			self.start(state, task);
		}
	}
}

struct State {
	queue: PriorityQueue<SyncTask>,
	active: HashMap<i64, ActiveTask>,
}
impl State {
	fn holds(&self, chat_id: i64) -> bool {
		self.active.contains_key(&chat_id) || self.queue.contains(|task| task.chat_id == chat_id)
	}
}

struct ActiveTask {
	cancel: CancellationToken,
	cancelled: bool,
}

fn by_priority(a: &SyncTask, b: &SyncTask) -> Ordering {
	a.priority.cmp(&b.priority)
}
