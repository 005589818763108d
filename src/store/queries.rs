//! SQL statements shared by the pool and the per-item transactions.
//!
//! Every function is generic over the executor so the same statement can run
//! on the pool (autocommit) or on `&mut *transaction`.

use chrono::{DateTime, Utc};
use sqlx::{Executor, QueryBuilder, Sqlite, SqliteConnection, sqlite::SqliteRow};
use uuid::Uuid;

use crate::{
    BatchError,
    core::model::{Batch, BatchFilter, BatchStatus, Item, ItemResult, ItemStatus, LogEntry},
};

const BIND_LIMIT: usize = 32766;
const ITEM_COLUMNS: [&str; 6] = [
    "id",
    "batch_id",
    "item_index",
    "status",
    "source_data",
    "created_at",
];

pub(crate) async fn insert_batch<'e, E>(executor: E, batch: &Batch) -> Result<(), BatchError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO batches \
         (id, batch_type, status, source_info, metadata, created_at, updated_at, retry_count, parent_batch_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(batch.id.to_string())
    .bind(batch.batch_type.as_str())
    .bind(batch.status.as_str())
    .bind(serde_json::to_string(&batch.source_info)?)
    .bind(serde_json::to_string(&batch.metadata)?)
    .bind(batch.created_at)
    .bind(batch.updated_at)
    .bind(batch.retry_count)
    .bind(batch.parent_batch_id.map(|id| id.to_string()))
    .execute(executor)
    .await?;
    Ok(())
}

/// Writes item rows with multi-row `INSERT`s, each sized to stay under the
/// bind parameter limit.
pub(crate) async fn insert_items(
    connection: &mut SqliteConnection,
    items: &[Item],
) -> Result<(), BatchError> {
    for chunk in items.chunks(BIND_LIMIT / ITEM_COLUMNS.len()) {
        let mut query_builder = QueryBuilder::<Sqlite>::new("INSERT INTO items (");
        query_builder.push(ITEM_COLUMNS.join(", "));
        query_builder.push(") ");

        let mut rows = Vec::with_capacity(chunk.len());
        for item in chunk {
            rows.push((item, serde_json::to_string(&item.source_data)?));
        }
        query_builder.push_values(rows, |mut b, (item, source_data)| {
            b.push_bind(item.id.to_string())
                .push_bind(item.batch_id.to_string())
                .push_bind(item.item_index)
                .push_bind(item.status.as_str())
                .push_bind(source_data)
                .push_bind(item.created_at);
        });

        query_builder.build().execute(&mut *connection).await?;
    }
    Ok(())
}

pub(crate) async fn select_batch<'e, E>(executor: E, id: Uuid) -> Result<Option<SqliteRow>, BatchError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM batches WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;
    Ok(row)
}

/// Items of a batch in ordinal order, optionally restricted to some statuses.
pub(crate) async fn select_items<'e, E>(
    executor: E,
    batch_id: Uuid,
    statuses: Option<&[ItemStatus]>,
) -> Result<Vec<SqliteRow>, BatchError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut query_builder = QueryBuilder::<Sqlite>::new("SELECT * FROM items WHERE batch_id = ");
    query_builder.push_bind(batch_id.to_string());

    if let Some(statuses) = statuses {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        query_builder.push(" AND status IN (");
        let mut separated = query_builder.separated(", ");
        for status in statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");
    }
    query_builder.push(" ORDER BY item_index");

    let rows = query_builder.build().fetch_all(executor).await?;
    Ok(rows)
}

pub(crate) async fn mark_batch_processing<'e, E>(
    executor: E,
    id: Uuid,
    started_at: DateTime<Utc>,
    is_retry: bool,
) -> Result<(), BatchError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE batches \
         SET status = ?, started_at = ?, completed_at = NULL, error_message = NULL, \
             retry_count = retry_count + ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(BatchStatus::Processing.as_str())
    .bind(started_at)
    .bind(i64::from(is_retry))
    .bind(started_at)
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn finish_batch<'e, E>(
    executor: E,
    id: Uuid,
    status: BatchStatus,
    completed_at: DateTime<Utc>,
    error_message: Option<&str>,
) -> Result<(), BatchError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE batches \
         SET status = ?, completed_at = ?, error_message = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(completed_at)
    .bind(error_message)
    .bind(completed_at)
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn set_item_status<'e, E>(
    executor: E,
    id: Uuid,
    status: ItemStatus,
) -> Result<(), BatchError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE items SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

pub(crate) async fn complete_item<'e, E>(
    executor: E,
    id: Uuid,
    result: &ItemResult,
    processed_at: DateTime<Utc>,
) -> Result<(), BatchError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let processed_data = result
        .processed_data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "UPDATE items \
         SET status = ?, processed_data = ?, target_table = ?, target_id = ?, \
             error_message = NULL, processed_at = ? \
         WHERE id = ?",
    )
    .bind(ItemStatus::Completed.as_str())
    .bind(processed_data)
    .bind(result.target_table.as_deref())
    .bind(result.target_id.as_deref())
    .bind(processed_at)
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn fail_item<'e, E>(
    executor: E,
    id: Uuid,
    error_message: &str,
    processed_at: DateTime<Utc>,
) -> Result<(), BatchError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE items SET status = ?, error_message = ?, processed_at = ? WHERE id = ?",
    )
    .bind(ItemStatus::Failed.as_str())
    .bind(error_message)
    .bind(processed_at)
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn insert_log<'e, E>(executor: E, entry: &LogEntry) -> Result<(), BatchError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let details = entry.details.as_ref().map(serde_json::to_string).transpose()?;

    sqlx::query(
        "INSERT INTO logs (batch_id, item_id, level, message, details, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.batch_id.to_string())
    .bind(entry.item_id.map(|id| id.to_string()))
    .bind(entry.level.as_str())
    .bind(entry.message.as_str())
    .bind(details)
    .bind(entry.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn select_logs<'e, E>(executor: E, batch_id: Uuid) -> Result<Vec<SqliteRow>, BatchError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT * FROM logs WHERE batch_id = ? ORDER BY id")
        .bind(batch_id.to_string())
        .fetch_all(executor)
        .await?;
    Ok(rows)
}

pub(crate) async fn select_summary<'e, E>(executor: E, id: Uuid) -> Result<Option<SqliteRow>, BatchError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM batch_summaries WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(executor)
        .await?;
    Ok(row)
}

pub(crate) async fn select_summaries<'e, E>(
    executor: E,
    filter: &BatchFilter,
) -> Result<Vec<SqliteRow>, BatchError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut query_builder = QueryBuilder::<Sqlite>::new("SELECT * FROM batch_summaries WHERE 1 = 1");

    if let Some(batch_type) = &filter.batch_type {
        query_builder.push(" AND batch_type = ");
        query_builder.push_bind(batch_type.as_str());
    }
    if let Some(status) = filter.status {
        query_builder.push(" AND status = ");
        query_builder.push_bind(status.as_str());
    }

    query_builder.push(" ORDER BY created_at DESC, id");

    // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
    if filter.limit.is_some() || filter.offset.is_some() {
        query_builder.push(" LIMIT ");
        query_builder.push_bind(filter.limit.map(i64::from).unwrap_or(-1));
        query_builder.push(" OFFSET ");
        query_builder.push_bind(i64::from(filter.offset.unwrap_or(0)));
    }

    let rows = query_builder.build().fetch_all(executor).await?;
    Ok(rows)
}

pub(crate) async fn select_failed_batches<'e, E>(executor: E) -> Result<Vec<SqliteRow>, BatchError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT * FROM failed_batches ORDER BY created_at DESC, id")
        .fetch_all(executor)
        .await?;
    Ok(rows)
}
