use std::{collections::HashMap, sync::Arc, time::Instant};

use serde::Serialize;
use time::OffsetDateTime;

use crate::{EmbeddingProvider, Error, Result, SearchStore, rate_limit::RateLimiter};
use tgs_storage::{
	models::{SimilarMessage, TextMatch},
	time_serde,
};

pub const DEFAULT_LIMIT: u32 = 20;
/// Lexical matches carry no similarity, so they rank as exact hits.
pub const LEXICAL_SCORE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
	pub query: String,
	pub chat_id: Option<i64>,
	pub limit: u32,
	pub offset: u32,
	pub use_vector: bool,
}
impl SearchRequest {
	pub fn new(query: impl Into<String>) -> Self {
		Self { query: query.into(), chat_id: None, limit: DEFAULT_LIMIT, offset: 0, use_vector: false }
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResultItem {
	pub record_id: i64,
	pub chat_id: i64,
	pub content: Option<String>,
	#[serde(with = "time_serde")]
	pub created_at: OffsetDateTime,
	pub score: f64,
}
impl From<SimilarMessage> for SearchResultItem {
	fn from(row: SimilarMessage) -> Self {
		Self {
			record_id: row.record_id,
			chat_id: row.chat_id,
			content: row.content,
			created_at: row.created_at,
			score: row.similarity,
		}
	}
}
impl From<TextMatch> for SearchResultItem {
	fn from(row: TextMatch) -> Self {
		Self {
			record_id: row.record_id,
			chat_id: row.chat_id,
			content: row.content,
			created_at: row.created_at,
			score: LEXICAL_SCORE,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
	pub items: Vec<SearchResultItem>,
	/// Distinct hits before pagination.
	pub total: usize,
	pub duration_ms: u64,
}

/// Searches messages by pgvector similarity or by substring match, one source per request.
pub struct HybridSearch {
	store: Arc<dyn SearchStore>,
	provider: Arc<dyn EmbeddingProvider>,
	limiter: Arc<RateLimiter>,
}
impl HybridSearch {
	pub fn new(
		store: Arc<dyn SearchStore>,
		provider: Arc<dyn EmbeddingProvider>,
		limiter: Arc<RateLimiter>,
	) -> Self {
		Self { store, provider, limiter }
	}

	pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
		let query = request.query.trim();

		if query.is_empty() {
			return Err(Error::invalid("query must not be empty."));
		}
		if request.limit == 0 {
			return Err(Error::invalid("limit must be positive."));
		}

		let started = Instant::now();
		// The source is asked for twice the page from the offset, and the ranked list is sliced
		// from the offset again.
		let fetch_limit = i64::from(request.limit) * 2;
		let fetch_offset = i64::from(request.offset);
		// The modes are exclusive: similarity ranks vector hits, lexical hits all rank equal.
		let (vector, lexical) = if request.use_vector {
			(self.vector_hits(query, request.chat_id, fetch_limit, fetch_offset).await?, Vec::new())
		} else {
			(Vec::new(), self.lexical_hits(query, request.chat_id, fetch_limit, fetch_offset).await?)
		};
		let (items, total) =
			merge_results(vector, lexical, request.offset as usize, request.limit as usize);
		let duration_ms = started.elapsed().as_millis() as u64;

		tracing::info!(
			chat_id = request.chat_id,
			use_vector = request.use_vector,
			total,
			returned = items.len(),
			duration_ms,
			"Search finished."
		);

		Ok(SearchResponse { items, total, duration_ms })
	}

	async fn lexical_hits(
		&self,
		query: &str,
		chat_id: Option<i64>,
		limit: i64,
		offset: i64,
	) -> Result<Vec<SearchResultItem>> {
		let rows = self
			.store
			.find_messages_by_text(query, chat_id, limit, offset)
			.await
			.map_err(Error::storage)?;

		Ok(rows.into_iter().map(SearchResultItem::from).collect())
	}

	async fn vector_hits(
		&self,
		query: &str,
		chat_id: Option<i64>,
		limit: i64,
		offset: i64,
	) -> Result<Vec<SearchResultItem>> {
		let texts = vec![query.to_string()];
		let provider = self.provider.as_ref();
		let mut vectors =
			self.limiter.run(|| provider.embed(&texts)).await.map_err(Error::provider)?;
		let Some(embedding) = vectors.pop() else {
			return Err(Error::Provider { message: "Provider returned no query vector.".to_string() });
		};
		let rows = self
			.store
			.find_similar_messages(&embedding, chat_id, limit, offset)
			.await
			.map_err(Error::storage)?;

		Ok(rows.into_iter().map(SearchResultItem::from).collect())
	}
}

/// Dedups by record id, ranks by score, and returns one page plus the distinct hit count.
///
/// A record seen in both lists keeps the position of its first appearance but takes the
/// lexical score. The sort is stable, so equal scores keep that first-seen order.
pub fn merge_results(
	vector: Vec<SearchResultItem>,
	lexical: Vec<SearchResultItem>,
	offset: usize,
	limit: usize,
) -> (Vec<SearchResultItem>, usize) {
	let mut merged: Vec<SearchResultItem> = Vec::with_capacity(vector.len() + lexical.len());
	let mut index = HashMap::new();

	for item in vector.into_iter().chain(lexical) {
		match index.get(&item.record_id) {
			Some(&slot) => merged[slot] = item,
			None => {
				index.insert(item.record_id, merged.len());
				merged.push(item);
			},
		}
	}

	merged.sort_by(|a, b| b.score.total_cmp(&a.score));

	let total = merged.len();
	let page = merged.into_iter().skip(offset).take(limit).collect();

	(page, total)
}
