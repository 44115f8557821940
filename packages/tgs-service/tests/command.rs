mod support;

use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;

use tgs_service::{
	ChatsSyncOrchestrator, Command, CommandKind, CommandRequest, CommandRunner, CommandStatus,
	EmbeddingBatchPipeline, HybridSearch, MetadataSyncWorker, RateLimiter, RetryExecutor,
	RetryPolicy, SyncScheduler,
};
use tgs_storage::models::SyncKind;

use support::{
	FakeChatClient, FakeEmbedder, FakeSearchStore, GatedWorker, ManualClock, MemoryChatStore,
	MemoryMessageStore, MemorySyncStore,
};

struct Harness {
	runner: CommandRunner,
	embedder: Arc<FakeEmbedder>,
	worker: Arc<GatedWorker>,
	orchestrator: Arc<ChatsSyncOrchestrator>,
}

fn harness(pending: usize) -> Harness {
	harness_with(pending, FakeChatClient::with_dialogs(&[1, 2]))
}

fn harness_with(pending: usize, client: FakeChatClient) -> Harness {
	let clock = ManualClock::new();
	let store = MemorySyncStore::new();
	let chats = MemoryChatStore::new();
	let client = Arc::new(client);
	let retry = RetryExecutor::new(RetryPolicy::default(), clock.clone());
	let metadata_worker = Arc::new(MetadataSyncWorker::new(
		client,
		chats.clone(),
		retry,
		clock.clone(),
		Duration::from_secs(60),
	));
	let worker = GatedWorker::new();
	let orchestrator = Arc::new(ChatsSyncOrchestrator::new(
		SyncScheduler::new(SyncKind::Metadata, 5, store.clone(), metadata_worker),
		SyncScheduler::new(SyncKind::Messages, 3, store.clone(), worker.clone()),
		chats,
		store,
	));
	let embedder = FakeEmbedder::new(4);
	let limiter = Arc::new(RateLimiter::new(Duration::from_millis(1_500), clock));
	let embed = Arc::new(EmbeddingBatchPipeline::new(
		MemoryMessageStore::with_pending(7, pending),
		embedder.clone(),
		limiter.clone(),
	));
	let search =
		Arc::new(HybridSearch::new(Arc::new(FakeSearchStore::default()), embedder.clone(), limiter));

	let runner = CommandRunner::new(orchestrator.clone(), embed, search);

	Harness { runner, embedder, worker, orchestrator }
}

async fn run(runner: &CommandRunner, request: CommandRequest) -> (Command, Vec<Command>) {
	let (tx, mut rx) = mpsc::unbounded_channel();
	let last = runner.execute(request, &tx).await;

	drop(tx);

	let mut snapshots = Vec::new();

	while let Some(snapshot) = rx.recv().await {
		snapshots.push(snapshot);
	}

	(last, snapshots)
}

#[tokio::test]
async fn embed_command_streams_snapshots_to_completion() {
	let h = harness(5);
	let request = CommandRequest::Embed { chat_id: 7, batch_size: 2, concurrency: 2 };
	let (last, snapshots) = run(&h.runner, request).await;

	assert_eq!(snapshots.first().unwrap().status, CommandStatus::Pending);
	assert_eq!(snapshots[1].status, CommandStatus::Running);
	assert_eq!(snapshots.last(), Some(&last));
	assert!(snapshots.iter().all(|snapshot| snapshot.id == last.id));
	assert!(snapshots.windows(2).all(|pair| pair[0].progress <= pair[1].progress));
	assert_eq!(last.kind, CommandKind::Embed);
	assert_eq!(last.status, CommandStatus::Completed);
	assert_eq!(last.progress, 100);
	assert_eq!(last.result.as_ref().unwrap()["processed"], 5);
	assert_eq!(h.embedder.calls(), 3);
}

#[tokio::test]
async fn embed_with_nothing_processed_fails_with_counts() {
	let h = harness(2);

	h.embedder.fail_call(0);

	let (last, _) =
		run(&h.runner, CommandRequest::Embed { chat_id: 7, batch_size: 10, concurrency: 4 }).await;

	assert_eq!(last.status, CommandStatus::Failed);
	assert_eq!(last.result.as_ref().unwrap()["failed"], 2);
	assert!(last.error.is_some());
}

#[tokio::test]
async fn invalid_requests_fail_without_running() {
	let h = harness(1);
	let (last, snapshots) =
		run(&h.runner, CommandRequest::Embed { chat_id: 7, batch_size: 0, concurrency: 4 }).await;

	assert_eq!(last.status, CommandStatus::Failed);
	assert!(last.error.as_deref().unwrap().starts_with("Invalid request:"));
	assert_eq!(snapshots.len(), 3);
	assert_eq!(h.embedder.calls(), 0);
}

#[tokio::test]
async fn sync_command_reports_admission() {
	let h = harness(0);
	let request = CommandRequest::SyncChats {
		chat_ids: vec![1, 2],
		kind: SyncKind::Messages,
		priorities: Default::default(),
		options: Default::default(),
	};
	let (last, _) = run(&h.runner, request).await;

	assert_eq!(last.kind, CommandKind::Sync);
	assert_eq!(last.status, CommandStatus::Completed);
	assert_eq!(last.result.as_ref().unwrap()["started"], serde_json::json!([1, 2]));

	h.worker.open(2);
	h.orchestrator.scheduler(SyncKind::Messages).wait_idle().await;
}

#[tokio::test]
async fn search_command_returns_the_page() {
	let h = harness(0);
	let request = CommandRequest::Search {
		query: "hi".to_string(),
		chat_id: None,
		limit: 20,
		offset: 0,
		use_vector: false,
	};
	let (last, _) = run(&h.runner, request).await;

	assert_eq!(last.status, CommandStatus::Completed);
	assert_eq!(last.result.as_ref().unwrap()["total"], 0);
}

#[tokio::test]
async fn retry_backoff_shows_up_as_a_waiting_snapshot() {
	let h = harness_with(0, FakeChatClient::with_dialogs(&[1, 2]).failing_dialogs(1));
	let request: CommandRequest =
		serde_json::from_value(serde_json::json!({ "sync_chats": { "chat_ids": [1] } })).unwrap();
	let (last, snapshots) = run(&h.runner, request).await;
	let waiting = snapshots
		.iter()
		.position(|snapshot| snapshot.status == CommandStatus::Waiting)
		.expect("Expected a waiting snapshot.");
	let metadata = snapshots[waiting].metadata.as_ref().unwrap();

	assert!((2..=3).contains(&metadata["waitSeconds"].as_u64().unwrap()));
	assert!(metadata["resumeTime"].is_string());
	assert_eq!(snapshots[waiting + 1].status, CommandStatus::Running);
	assert_eq!(last.status, CommandStatus::Completed);

	h.worker.open(1);
	h.orchestrator.scheduler(SyncKind::Messages).wait_idle().await;
}
