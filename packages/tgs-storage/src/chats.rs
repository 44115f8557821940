use time::OffsetDateTime;

use crate::{Result, db::Db, models::ChatRecord};

pub async fn get_chat(db: &Db, chat_id: i64) -> Result<Option<ChatRecord>> {
	let chat = sqlx::query_as::<_, ChatRecord>(
		"SELECT chat_id, title, chat_type, updated_at FROM chats WHERE chat_id = $1",
	)
	.bind(chat_id)
	.fetch_optional(&db.pool)
	.await?;

	Ok(chat)
}

pub async fn upsert_chat(db: &Db, chat_id: i64, title: &str, chat_type: &str) -> Result<()> {
	let now = OffsetDateTime::now_utc();

	sqlx::query(
		"\
INSERT INTO chats (chat_id, title, chat_type, created_at, updated_at)
VALUES ($1, $2, $3, $4, $4)
ON CONFLICT (chat_id) DO UPDATE
SET
	title = EXCLUDED.title,
	chat_type = EXCLUDED.chat_type,
	updated_at = EXCLUDED.updated_at",
	)
	.bind(chat_id)
	.bind(title)
	.bind(chat_type)
	.bind(now)
	.execute(&db.pool)
	.await?;

	Ok(())
}
