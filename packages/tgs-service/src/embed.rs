use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::{
	EmbeddingProvider, Error, MessageStore, Result, progress::ProgressReporter,
	rate_limit::RateLimiter,
};
use tgs_storage::models::{EmbeddingUpdate, MessageToEmbed};

pub const DEFAULT_BATCH_SIZE: usize = 1_000;
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedRequest {
	pub chat_id: i64,
	/// Messages per provider call.
	pub batch_size: usize,
	/// Vectors per storage write.
	pub concurrency: usize,
}
impl EmbedRequest {
	pub fn new(chat_id: i64) -> Self {
		Self { chat_id, batch_size: DEFAULT_BATCH_SIZE, concurrency: DEFAULT_CONCURRENCY }
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedStatus {
	Completed,
	Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedReport {
	pub chat_id: i64,
	pub total: usize,
	pub processed: usize,
	pub failed: usize,
	pub status: EmbedStatus,
}

/// Embeds every message of a chat that has content but no vector yet.
///
/// Failures are counted per batch or per write and never abort the run.
pub struct EmbeddingBatchPipeline {
	messages: Arc<dyn MessageStore>,
	provider: Arc<dyn EmbeddingProvider>,
	limiter: Arc<RateLimiter>,
	dimensions: Option<usize>,
}
impl EmbeddingBatchPipeline {
	/// `limiter` should be shared with every other caller of the same provider.
	pub fn new(
		messages: Arc<dyn MessageStore>,
		provider: Arc<dyn EmbeddingProvider>,
		limiter: Arc<RateLimiter>,
	) -> Self {
		Self { messages, provider, limiter, dimensions: None }
	}

	/// Rejects vectors whose length differs from `dimensions` before they reach storage.
	pub fn with_dimensions(mut self, dimensions: usize) -> Self {
		self.dimensions = Some(dimensions);

		self
	}

	pub async fn run(&self, request: EmbedRequest, progress: &ProgressReporter) -> Result<EmbedReport> {
		if request.batch_size == 0 || request.concurrency == 0 {
			return Err(Error::invalid("batch_size and concurrency must be positive."));
		}

		let pending = self
			.messages
			.find_messages_to_embed(request.chat_id)
			.await
			.map_err(Error::storage)?;
		let total = pending.len();
		let mut processed = 0;
		let mut failed = 0;

		progress.report_with(0, format!("Found {total} messages to embed."), json!({ "total": total }));

		for batch in pending.chunks(request.batch_size) {
			let updates = match self.embed_batch(request.chat_id, batch).await {
				Ok(updates) => updates,
				Err(err) => {
					tracing::warn!(
						chat_id = request.chat_id,
						batch = batch.len(),
						error = %err,
						"Embedding batch failed."
					);

					failed += batch.len();

					progress.report(percent(processed, total), progress_message(processed, total));

					continue;
				},
			};

			for chunk in updates.chunks(request.concurrency) {
				match self.messages.update_message_embeddings(request.chat_id, chunk).await {
					Ok(rows) => {
						let written = usize::try_from(rows).unwrap_or(usize::MAX).min(chunk.len());

						if written < chunk.len() {
							tracing::warn!(
								chat_id = request.chat_id,
								rows = chunk.len(),
								written,
								"Embedding write matched fewer messages than sent."
							);
						}

						processed += written;
						failed += chunk.len() - written;
					},
					Err(err) => {
						tracing::warn!(
							chat_id = request.chat_id,
							rows = chunk.len(),
							error = %err,
							"Embedding write failed."
						);

						failed += chunk.len();
					},
				}

				progress.report_with(
					percent(processed, total),
					progress_message(processed, total),
					json!({ "processed": processed, "failed": failed, "total": total }),
				);
			}
		}

		let status =
			if total > 0 && processed == 0 { EmbedStatus::Failed } else { EmbedStatus::Completed };

		tracing::info!(
			chat_id = request.chat_id,
			total,
			processed,
			failed,
			"Embedding run finished."
		);

		Ok(EmbedReport { chat_id: request.chat_id, total, processed, failed, status })
	}

	async fn embed_batch(
		&self,
		chat_id: i64,
		batch: &[MessageToEmbed],
	) -> Result<Vec<EmbeddingUpdate>> {
		let texts: Vec<String> = batch.iter().map(|message| message.content.clone()).collect();
		let provider = self.provider.as_ref();
		let vectors =
			self.limiter.run(|| provider.embed(&texts)).await.map_err(Error::provider)?;

		if vectors.len() != batch.len() {
			return Err(Error::Provider {
				message: format!(
					"Provider returned {} vectors for {} messages in chat {chat_id}.",
					vectors.len(),
					batch.len()
				),
			});
		}
		if let Some(expected) = self.dimensions
			&& let Some(bad) = vectors.iter().find(|vector| vector.len() != expected)
		{
			return Err(Error::Provider {
				message: format!(
					"Provider returned a {}-dimensional vector; expected {expected}.",
					bad.len()
				),
			});
		}

		Ok(batch
			.iter()
			.zip(vectors)
			.map(|(message, embedding)| EmbeddingUpdate { record_id: message.record_id, embedding })
			.collect())
	}
}

/// `round(processed / total * 100)`.
fn percent(processed: usize, total: usize) -> u8 {
	if total == 0 {
		return 100;
	}

	((processed.min(total) * 200 + total) / (2 * total)) as u8
}

fn progress_message(processed: usize, total: usize) -> String {
	format!("Embedded {processed}/{total} messages.")
}
