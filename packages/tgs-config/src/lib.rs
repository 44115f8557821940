mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Config, Embedding, EmbeddingProviderConfig, Postgres, Providers, Search, Service, Storage, SyncConfig,
};

use std::{fs, path::Path};

pub const MAX_EMBEDDING_BATCH_SIZE: usize = 10_000;
pub const MAX_EMBEDDING_CONCURRENCY: usize = 10;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::validation("service.log_level", "must be non-empty."));
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::validation("storage.postgres.dsn", "must be non-empty."));
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::validation("storage.postgres.pool_max_conns", "must be greater than zero."));
	}

	let embedding = &cfg.providers.embedding;

	if embedding.dimensions == 0 {
		return Err(Error::validation(
			"providers.embedding.dimensions",
			"must be greater than zero.",
		));
	}
	if embedding.dimensions != cfg.storage.postgres.vector_dim {
		return Err(Error::validation(
			"providers.embedding.dimensions",
			"must match storage.postgres.vector_dim.",
		));
	}
	if embedding.api_key.trim().is_empty() {
		return Err(Error::validation("providers.embedding.api_key", "must be non-empty."));
	}
	if embedding.timeout_ms == 0 {
		return Err(Error::validation("providers.embedding.timeout_ms", "must be greater than zero."));
	}
	if embedding.default_headers.values().any(|value| !value.is_string()) {
		return Err(Error::validation(
			"providers.embedding.default_headers",
			"values must be strings.",
		));
	}
	if cfg.sync.metadata_concurrency == 0 {
		return Err(Error::validation("sync.metadata_concurrency", "must be greater than zero."));
	}
	if cfg.sync.messages_concurrency == 0 {
		return Err(Error::validation("sync.messages_concurrency", "must be greater than zero."));
	}
	if cfg.sync.page_size == 0 {
		return Err(Error::validation("sync.page_size", "must be greater than zero."));
	}
	if cfg.sync.initial_delay_ms == 0 && cfg.sync.max_retries > 0 {
		return Err(Error::validation(
			"sync.initial_delay_ms",
			"must be greater than zero when retries are enabled.",
		));
	}
	if !(1..=MAX_EMBEDDING_BATCH_SIZE).contains(&cfg.embedding.batch_size) {
		return Err(Error::validation(
			"embedding.batch_size",
			format!("must be in the range 1-{MAX_EMBEDDING_BATCH_SIZE}."),
		));
	}
	if !(1..=MAX_EMBEDDING_CONCURRENCY).contains(&cfg.embedding.concurrency) {
		return Err(Error::validation(
			"embedding.concurrency",
			format!("must be in the range 1-{MAX_EMBEDDING_CONCURRENCY}."),
		));
	}
	if cfg.search.default_limit == 0 {
		return Err(Error::validation("search.default_limit", "must be greater than zero."));
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	let log_level = cfg.service.log_level.trim();

	if log_level.len() != cfg.service.log_level.len() {
		cfg.service.log_level = log_level.to_string();
	}

	while cfg.providers.embedding.api_base.ends_with('/') {
		cfg.providers.embedding.api_base.pop();
	}

	if !cfg.providers.embedding.path.is_empty() && !cfg.providers.embedding.path.starts_with('/') {
		cfg.providers.embedding.path.insert(0, '/');
	}
}
