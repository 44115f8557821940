pub mod clock;
pub mod command;
pub mod embed;
pub mod fetcher;
pub mod orchestrator;
pub mod pg;
pub mod progress;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
pub mod search;
pub mod task;
pub mod workers;

mod error;

use std::{future::Future, pin::Pin};

use time::OffsetDateTime;

pub use clock::{Clock, TokioClock};
pub use command::{
	Command, CommandEvent, CommandKind, CommandRequest, CommandRunner, CommandStatus,
	TransitionError, transition,
};
pub use embed::{EmbedReport, EmbedRequest, EmbedStatus, EmbeddingBatchPipeline};
pub use error::{Error, Result, root_message, sanitize_error};
pub use fetcher::{FetchOptions, FetchSummary, IncrementalFetcher, MessageSink, MessageStream};
pub use orchestrator::{ChatsSyncOrchestrator, MultiSyncReport, MultiSyncRequest, SyncStores};
pub use progress::{Progress, ProgressReporter, WAITING, admission_percent};
pub use queue::PriorityQueue;
pub use rate_limit::RateLimiter;
pub use retry::{RetryExecutor, RetryPolicy};
pub use scheduler::{Admission, CancelReport, SyncOutcome, SyncScheduler, SyncWorker};
pub use search::{HybridSearch, SearchRequest, SearchResponse, SearchResultItem, merge_results};
pub use task::{SyncOptions, SyncTask};
use tgs_storage::models::{
	ChatRecord, EmbeddingUpdate, MessageToEmbed, NewMessage, SimilarMessage, SyncConfigItem,
	SyncConfigUpsert, SyncKind, SyncStatusUpdate, TextMatch,
};
pub use workers::{MessageSyncWorker, MetadataSyncWorker};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Remote handle for a chat, resolved once per fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPeer {
	pub chat_id: i64,
	pub access_hash: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
	pub id: i64,
	pub title: String,
	pub chat_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetMessagesParams {
	pub limit: u32,
	/// Return messages with ids strictly below this one; zero starts from the newest.
	pub offset_id: i64,
	pub min_id: i64,
	pub max_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlatformMessage {
	pub id: i64,
	pub chat_id: i64,
	pub date: OffsetDateTime,
	pub text: Option<String>,
	pub from_id: Option<i64>,
	pub reply_to_id: Option<i64>,
	pub forward_from_chat_id: Option<i64>,
	pub forward_from_message_id: Option<i64>,
	pub has_media: bool,
}
impl PlatformMessage {
	pub fn to_new_message(&self) -> NewMessage {
		NewMessage {
			chat_id: self.chat_id,
			platform_message_id: self.id,
			content: self.text.clone(),
			from_id: self.from_id,
			reply_to_id: self.reply_to_id,
			forward_from_chat_id: self.forward_from_chat_id,
			forward_from_message_id: self.forward_from_message_id,
			has_media: self.has_media,
			created_at: self.date,
		}
	}
}

/// Page item returned by the remote API. Deleted or service messages come back as `Empty`.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteMessage {
	Empty { id: i64 },
	Message(PlatformMessage),
}
impl RemoteMessage {
	pub fn id(&self) -> i64 {
		match self {
			Self::Empty { id } => *id,
			Self::Message(message) => message.id,
		}
	}
}

pub trait ChatClient
where
	Self: Send + Sync,
{
	fn get_dialogs(&self) -> BoxFuture<'_, color_eyre::Result<Vec<ChatSummary>>>;

	fn get_input_entity(&self, chat_id: i64) -> BoxFuture<'_, color_eyre::Result<InputPeer>>;

	fn get_messages<'a>(
		&'a self,
		peer: &'a InputPeer,
		params: GetMessagesParams,
	) -> BoxFuture<'a, color_eyre::Result<Vec<RemoteMessage>>>;
}

pub trait SyncStore
where
	Self: Send + Sync,
{
	fn upsert_sync_config<'a>(
		&'a self,
		chat_id: i64,
		upsert: &'a SyncConfigUpsert,
	) -> BoxFuture<'a, color_eyre::Result<SyncConfigItem>>;

	fn update_sync_status<'a>(
		&'a self,
		chat_id: i64,
		kind: SyncKind,
		update: &'a SyncStatusUpdate,
	) -> BoxFuture<'a, color_eyre::Result<u64>>;

	fn get_sync_config_by_chat_id(
		&self,
		chat_id: i64,
	) -> BoxFuture<'_, color_eyre::Result<Vec<SyncConfigItem>>>;

	fn get_sync_config_by_chat_id_and_type(
		&self,
		chat_id: i64,
		kind: SyncKind,
	) -> BoxFuture<'_, color_eyre::Result<Option<SyncConfigItem>>>;

	fn cancel_sync_config(
		&self,
		chat_id: i64,
		kind: Option<SyncKind>,
		purge: bool,
	) -> BoxFuture<'_, color_eyre::Result<u64>>;

	fn reset_interrupted(&self) -> BoxFuture<'_, color_eyre::Result<u64>>;
}

pub trait ChatStore
where
	Self: Send + Sync,
{
	fn get_chat(&self, chat_id: i64) -> BoxFuture<'_, color_eyre::Result<Option<ChatRecord>>>;

	fn upsert_chat<'a>(
		&'a self,
		chat_id: i64,
		title: &'a str,
		chat_type: &'a str,
	) -> BoxFuture<'a, color_eyre::Result<()>>;
}

pub trait MessageStore
where
	Self: Send + Sync,
{
	fn upsert_message<'a>(&'a self, message: &'a NewMessage) -> BoxFuture<'a, color_eyre::Result<()>>;

	fn find_messages_to_embed(
		&self,
		chat_id: i64,
	) -> BoxFuture<'_, color_eyre::Result<Vec<MessageToEmbed>>>;

	fn update_message_embeddings<'a>(
		&'a self,
		chat_id: i64,
		updates: &'a [EmbeddingUpdate],
	) -> BoxFuture<'a, color_eyre::Result<u64>>;
}

pub trait SearchStore
where
	Self: Send + Sync,
{
	fn find_similar_messages<'a>(
		&'a self,
		embedding: &'a [f32],
		chat_id: Option<i64>,
		limit: i64,
		offset: i64,
	) -> BoxFuture<'a, color_eyre::Result<Vec<SimilarMessage>>>;

	fn find_messages_by_text<'a>(
		&'a self,
		query: &'a str,
		chat_id: Option<i64>,
		limit: i64,
		offset: i64,
	) -> BoxFuture<'a, color_eyre::Result<Vec<TextMatch>>>;
}

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>>;
}
