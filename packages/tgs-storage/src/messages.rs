use sqlx::{Postgres, QueryBuilder};

use crate::{
	Error, Result,
	db::Db,
	models::{EmbeddingUpdate, MessageToEmbed, NewMessage, SimilarMessage, TextMatch},
};

pub async fn upsert_message(db: &Db, message: &NewMessage) -> Result<()> {
	// An edited message keeps its identity but loses a stale embedding.
	sqlx::query(
		"\
INSERT INTO messages (
	chat_id,
	platform_message_id,
	content,
	from_id,
	reply_to_id,
	forward_from_chat_id,
	forward_from_message_id,
	has_media,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
ON CONFLICT (chat_id, platform_message_id) DO UPDATE
SET
	content = EXCLUDED.content,
	from_id = EXCLUDED.from_id,
	reply_to_id = EXCLUDED.reply_to_id,
	forward_from_chat_id = EXCLUDED.forward_from_chat_id,
	forward_from_message_id = EXCLUDED.forward_from_message_id,
	has_media = EXCLUDED.has_media,
	embedding = CASE
		WHEN messages.content IS DISTINCT FROM EXCLUDED.content THEN NULL
		ELSE messages.embedding
	END,
	updated_at = now()",
	)
	.bind(message.chat_id)
	.bind(message.platform_message_id)
	.bind(message.content.as_deref())
	.bind(message.from_id)
	.bind(message.reply_to_id)
	.bind(message.forward_from_chat_id)
	.bind(message.forward_from_message_id)
	.bind(message.has_media)
	.bind(message.created_at)
	.execute(&db.pool)
	.await?;

	Ok(())
}

pub async fn find_messages_to_embed(db: &Db, chat_id: i64) -> Result<Vec<MessageToEmbed>> {
	let rows = sqlx::query_as::<_, MessageToEmbed>(
		"\
SELECT record_id, chat_id, content
FROM messages
WHERE chat_id = $1 AND embedding IS NULL AND content IS NOT NULL
ORDER BY platform_message_id ASC",
	)
	.bind(chat_id)
	.fetch_all(&db.pool)
	.await?;

	Ok(rows)
}

/// Writes all vectors in one statement and returns the number of rows updated.
pub async fn update_message_embeddings(
	db: &Db,
	chat_id: i64,
	updates: &[EmbeddingUpdate],
) -> Result<u64> {
	if updates.is_empty() {
		return Ok(0);
	}

	for update in updates {
		if update.embedding.len() != db.vector_dim as usize {
			return Err(Error::InvalidArgument(format!(
				"Embedding for record {} has dimension {}, expected {}.",
				update.record_id,
				update.embedding.len(),
				db.vector_dim
			)));
		}
	}

	let mut builder = QueryBuilder::<Postgres>::new(
		"UPDATE messages AS m SET embedding = v.vec::vector, updated_at = now() FROM (",
	);

	builder.push_values(updates, |mut b, update| {
		b.push_bind(update.record_id).push_bind(format_vector_text(&update.embedding));
	});
	builder.push(") AS v(record_id, vec) WHERE m.record_id = v.record_id AND m.chat_id = ");
	builder.push_bind(chat_id);

	let result = builder.build().execute(&db.pool).await?;

	Ok(result.rows_affected())
}

pub async fn find_similar_messages(
	db: &Db,
	embedding: &[f32],
	chat_id: Option<i64>,
	limit: i64,
	offset: i64,
) -> Result<Vec<SimilarMessage>> {
	let vec_text = format_vector_text(embedding);
	let rows = sqlx::query_as::<_, SimilarMessage>(
		"\
SELECT
	record_id,
	chat_id,
	content,
	created_at,
	(1 - (embedding <=> $1::text::vector))::float8 AS similarity
FROM messages
WHERE embedding IS NOT NULL AND ($2::bigint IS NULL OR chat_id = $2)
ORDER BY embedding <=> $1::text::vector ASC
LIMIT $3
OFFSET $4",
	)
	.bind(vec_text.as_str())
	.bind(chat_id)
	.bind(limit)
	.bind(offset)
	.fetch_all(&db.pool)
	.await?;

	Ok(rows)
}

pub async fn find_messages_by_text(
	db: &Db,
	query: &str,
	chat_id: Option<i64>,
	limit: i64,
	offset: i64,
) -> Result<Vec<TextMatch>> {
	let pattern = format!("%{}%", escape_like(query.trim()));
	let rows = sqlx::query_as::<_, TextMatch>(
		"\
SELECT record_id, chat_id, content, created_at
FROM messages
WHERE content ILIKE $1 ESCAPE '\\' AND ($2::bigint IS NULL OR chat_id = $2)
ORDER BY created_at DESC, record_id DESC
LIMIT $3
OFFSET $4",
	)
	.bind(pattern)
	.bind(chat_id)
	.bind(limit)
	.bind(offset)
	.fetch_all(&db.pool)
	.await?;

	Ok(rows)
}

pub fn format_vector_text(vec: &[f32]) -> String {
	let mut out = String::from("[");

	for (idx, value) in vec.iter().enumerate() {
		if idx > 0 {
			out.push(',');
		}
		out.push_str(&value.to_string());
	}

	out.push(']');

	out
}

fn escape_like(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());

	for ch in raw.chars() {
		if matches!(ch, '%' | '_' | '\\') {
			out.push('\\');
		}
		out.push(ch);
	}

	out
}
