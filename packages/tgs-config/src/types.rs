use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub sync: SyncConfig,
	#[serde(default)]
	pub embedding: Embedding,
	#[serde(default)]
	pub search: Search,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
	/// Dimension of the `messages.embedding` vector column.
	pub vector_dim: u32,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	/// Metadata calls are cheap on the remote API, so this cap is higher than the messages cap.
	pub metadata_concurrency: usize,
	pub messages_concurrency: usize,
	pub page_size: u32,
	pub max_retries: u32,
	pub initial_delay_ms: u64,
	/// Treat a zero-length page after the first one as end of history instead of a failure.
	pub empty_page_is_end: bool,
	pub dialogs_cache_ttl_ms: u64,
}
impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			metadata_concurrency: 5,
			messages_concurrency: 3,
			page_size: 100,
			max_retries: 3,
			initial_delay_ms: 2_000,
			empty_page_is_end: false,
			dialogs_cache_ttl_ms: 60_000,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Embedding {
	pub batch_size: usize,
	pub concurrency: usize,
	pub min_interval_ms: u64,
}
impl Default for Embedding {
	fn default() -> Self {
		Self { batch_size: 1_000, concurrency: 4, min_interval_ms: 1_500 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Search {
	pub default_limit: u32,
}
impl Default for Search {
	fn default() -> Self {
		Self { default_limit: 20 }
	}
}
