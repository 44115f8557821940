pub mod cli;

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use color_eyre::Result;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use tgs_providers::embedding::HttpEmbedder;
use tgs_service::{
	EmbedRequest, EmbeddingBatchPipeline, HybridSearch, ProgressReporter, RateLimiter,
	SearchRequest, SyncStore, TokioClock,
};
use tgs_storage::db::Db;

#[derive(Debug, Parser)]
#[command(version = cli::VERSION, rename_all = "kebab", styles = cli::styles())]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Embed every stored message of a chat that has content but no vector.
	Embed {
		#[arg(long)]
		chat_id: i64,
		#[arg(long)]
		batch_size: Option<usize>,
		#[arg(long)]
		concurrency: Option<usize>,
	},
	/// Search stored messages by substring, optionally blended with vector similarity.
	Search {
		query: String,
		#[arg(long)]
		chat_id: Option<i64>,
		#[arg(long)]
		limit: Option<u32>,
		#[arg(long, default_value_t = 0)]
		offset: u32,
		#[arg(long)]
		vector: bool,
	},
	/// Print the persisted sync records of a chat.
	Status {
		#[arg(long)]
		chat_id: i64,
	},
	/// Fail sync records left queued or running by a crashed process.
	Recover,
}

pub async fn run(args: Args) -> Result<()> {
	let config = tgs_config::load(&args.config)?;
	let filter = EnvFilter::new(config.service.log_level.clone());

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let db = Arc::new(Db::connect(&config.storage.postgres).await?);

	db.ensure_schema().await?;

	let limiter = Arc::new(RateLimiter::new(
		Duration::from_millis(config.embedding.min_interval_ms),
		Arc::new(TokioClock),
	));

	match args.command {
		Command::Embed { chat_id, batch_size, concurrency } => {
			let provider = Arc::new(HttpEmbedder::new(config.providers.embedding.clone())?);
			let pipeline = EmbeddingBatchPipeline::new(db.clone(), provider, limiter)
				.with_dimensions(config.storage.postgres.vector_dim as usize);
			let request = EmbedRequest {
				chat_id,
				batch_size: batch_size.unwrap_or(config.embedding.batch_size),
				concurrency: concurrency.unwrap_or(config.embedding.concurrency),
			};
			let (reporter, mut rx) = ProgressReporter::channel();
			let logger = tokio::spawn(async move {
				while let Some(progress) = rx.recv().await {
					tracing::info!(percent = progress.percent, "{}", progress.message);
				}
			});
			let report = pipeline.run(request, &reporter).await;

			drop(reporter);

			let _ = logger.await;

			print_json(&report?)
		},
		Command::Search { query, chat_id, limit, offset, vector } => {
			let provider = Arc::new(HttpEmbedder::new(config.providers.embedding.clone())?);
			let search = HybridSearch::new(db, provider, limiter);
			let request = SearchRequest {
				query,
				chat_id,
				limit: limit.unwrap_or(config.search.default_limit),
				offset,
				use_vector: vector,
			};

			print_json(&search.search(request).await?)
		},
		Command::Status { chat_id } => print_json(&db.get_sync_config_by_chat_id(chat_id).await?),
		Command::Recover => {
			let rows = db.reset_interrupted().await?;

			tracing::info!(rows, "Interrupted sync records recovered.");

			print_json(&json!({ "recovered": rows }))
		},
	}
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);

	Ok(())
}
