use time::OffsetDateTime;

use crate::{
	Result,
	db::Db,
	models::{SyncConfigItem, SyncConfigRow, SyncConfigUpsert, SyncKind, SyncStatus, SyncStatusUpdate},
};

pub const CANCELLED_ERROR: &str = "Sync cancelled.";
pub const INTERRUPTED_ERROR: &str = "Sync interrupted before completion.";

const SELECT_COLUMNS: &str = "\
SELECT
	id,
	chat_id,
	sync_type,
	status,
	priority,
	last_sync_time,
	last_message_id,
	last_error,
	options,
	created_at,
	updated_at
FROM sync_config_items";

pub async fn upsert_sync_config(
	db: &Db,
	chat_id: i64,
	upsert: &SyncConfigUpsert,
) -> Result<SyncConfigItem> {
	let now = OffsetDateTime::now_utc();
	let row = sqlx::query_as::<_, SyncConfigRow>(
		"\
INSERT INTO sync_config_items (
	chat_id,
	sync_type,
	status,
	priority,
	options,
	created_at,
	updated_at
)
VALUES ($1, $2, $3, $4, $5, $6, $6)
ON CONFLICT (chat_id, sync_type) DO UPDATE
SET
	status = EXCLUDED.status,
	priority = EXCLUDED.priority,
	options = EXCLUDED.options,
	last_error = NULL,
	updated_at = EXCLUDED.updated_at
RETURNING
	id,
	chat_id,
	sync_type,
	status,
	priority,
	last_sync_time,
	last_message_id,
	last_error,
	options,
	created_at,
	updated_at",
	)
	.bind(chat_id)
	.bind(upsert.kind.as_str())
	.bind(upsert.status.as_str())
	.bind(upsert.priority)
	.bind(&upsert.options)
	.bind(now)
	.fetch_one(&db.pool)
	.await?;

	row.try_into()
}

/// Returns the number of rows touched; zero means no record exists for the pair.
pub async fn update_sync_status(
	db: &Db,
	chat_id: i64,
	kind: SyncKind,
	update: &SyncStatusUpdate,
) -> Result<u64> {
	let now = OffsetDateTime::now_utc();
	let result = sqlx::query(
		"\
UPDATE sync_config_items
SET
	status = $1,
	last_sync_time = COALESCE($2, last_sync_time),
	last_message_id = COALESCE($3, last_message_id),
	last_error = $4,
	updated_at = $5
WHERE chat_id = $6 AND sync_type = $7",
	)
	.bind(update.status.as_str())
	.bind(update.last_sync_time)
	.bind(update.last_message_id)
	.bind(update.last_error.as_deref())
	.bind(now)
	.bind(chat_id)
	.bind(kind.as_str())
	.execute(&db.pool)
	.await?;

	Ok(result.rows_affected())
}

pub async fn get_sync_config_by_chat_id(db: &Db, chat_id: i64) -> Result<Vec<SyncConfigItem>> {
	let sql = format!("{SELECT_COLUMNS}\nWHERE chat_id = $1\nORDER BY sync_type ASC");
	let rows = sqlx::query_as::<_, SyncConfigRow>(&sql).bind(chat_id).fetch_all(&db.pool).await?;

	rows.into_iter().map(SyncConfigItem::try_from).collect()
}

pub async fn get_sync_config_by_chat_id_and_type(
	db: &Db,
	chat_id: i64,
	kind: SyncKind,
) -> Result<Option<SyncConfigItem>> {
	let sql = format!("{SELECT_COLUMNS}\nWHERE chat_id = $1 AND sync_type = $2");
	let row = sqlx::query_as::<_, SyncConfigRow>(&sql)
		.bind(chat_id)
		.bind(kind.as_str())
		.fetch_optional(&db.pool)
		.await?;

	row.map(SyncConfigItem::try_from).transpose()
}

/// Moves in-flight rows to a terminal failed state, or deletes every matching row when `purge`
/// is set.
pub async fn cancel_sync_config(
	db: &Db,
	chat_id: i64,
	kind: Option<SyncKind>,
	purge: bool,
) -> Result<u64> {
	let kind = kind.map(SyncKind::as_str);
	let result = if purge {
		sqlx::query(
			"DELETE FROM sync_config_items WHERE chat_id = $1 AND ($2::text IS NULL OR sync_type = $2)",
		)
		.bind(chat_id)
		.bind(kind)
		.execute(&db.pool)
		.await?
	} else {
		sqlx::query(
			"\
UPDATE sync_config_items
SET status = $1, last_error = $2, updated_at = $3
WHERE chat_id = $4
	AND ($5::text IS NULL OR sync_type = $5)
	AND status IN ($6, $7)",
		)
		.bind(SyncStatus::Failed.as_str())
		.bind(CANCELLED_ERROR)
		.bind(OffsetDateTime::now_utc())
		.bind(chat_id)
		.bind(kind)
		.bind(SyncStatus::Queued.as_str())
		.bind(SyncStatus::Running.as_str())
		.execute(&db.pool)
		.await?
	};

	Ok(result.rows_affected())
}

/// Fails rows left queued or running by a process that exited mid-sync.
pub async fn reset_interrupted(db: &Db) -> Result<u64> {
	let result = sqlx::query(
		"\
UPDATE sync_config_items
SET status = $1, last_error = $2, updated_at = $3
WHERE status IN ($4, $5)",
	)
	.bind(SyncStatus::Failed.as_str())
	.bind(INTERRUPTED_ERROR)
	.bind(OffsetDateTime::now_utc())
	.bind(SyncStatus::Queued.as_str())
	.bind(SyncStatus::Running.as_str())
	.execute(&db.pool)
	.await?;

	Ok(result.rows_affected())
}
