use serde_json::Value;
use sqlx::{Row, sqlite::SqliteRow};
use uuid::Uuid;

use crate::{
    BatchError,
    core::model::{Batch, BatchSummary, FailedBatch, Item, LogEntry},
};

/// Maps one SQLite row onto a domain value.
pub trait RowMapper<T> {
    fn map_row(&self, row: &SqliteRow) -> Result<T, BatchError>;
}

pub struct BatchRowMapper;

impl RowMapper<Batch> for BatchRowMapper {
    fn map_row(&self, row: &SqliteRow) -> Result<Batch, BatchError> {
        Ok(Batch {
            id: uuid_column(row, "id")?,
            batch_type: row.try_get("batch_type")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            source_info: json_column(row, "source_info")?.unwrap_or(Value::Null),
            metadata: json_column(row, "metadata")?.unwrap_or(Value::Null),
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            error_message: row.try_get("error_message")?,
            retry_count: row.try_get("retry_count")?,
            parent_batch_id: optional_uuid_column(row, "parent_batch_id")?,
        })
    }
}

pub struct ItemRowMapper;

impl RowMapper<Item> for ItemRowMapper {
    fn map_row(&self, row: &SqliteRow) -> Result<Item, BatchError> {
        Ok(Item {
            id: uuid_column(row, "id")?,
            batch_id: uuid_column(row, "batch_id")?,
            item_index: row.try_get("item_index")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            source_data: json_column(row, "source_data")?.unwrap_or(Value::Null),
            processed_data: json_column(row, "processed_data")?,
            target_table: row.try_get("target_table")?,
            target_id: row.try_get("target_id")?,
            error_message: row.try_get("error_message")?,
            processed_at: row.try_get("processed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

pub struct LogRowMapper;

impl RowMapper<LogEntry> for LogRowMapper {
    fn map_row(&self, row: &SqliteRow) -> Result<LogEntry, BatchError> {
        Ok(LogEntry {
            id: Some(row.try_get("id")?),
            batch_id: uuid_column(row, "batch_id")?,
            item_id: optional_uuid_column(row, "item_id")?,
            level: row.try_get::<String, _>("level")?.parse()?,
            message: row.try_get("message")?,
            details: json_column(row, "details")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

pub struct SummaryRowMapper;

impl RowMapper<BatchSummary> for SummaryRowMapper {
    fn map_row(&self, row: &SqliteRow) -> Result<BatchSummary, BatchError> {
        Ok(BatchSummary {
            id: uuid_column(row, "id")?,
            batch_type: row.try_get("batch_type")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            retry_count: row.try_get("retry_count")?,
            parent_batch_id: optional_uuid_column(row, "parent_batch_id")?,
            error_message: row.try_get("error_message")?,
            total_items: count_column(row, "total_items")?,
            completed_items: count_column(row, "completed_items")?,
            failed_items: count_column(row, "failed_items")?,
            pending_items: count_column(row, "pending_items")?,
            skipped_items: count_column(row, "skipped_items")?,
        })
    }
}

pub struct FailedBatchRowMapper;

impl RowMapper<FailedBatch> for FailedBatchRowMapper {
    fn map_row(&self, row: &SqliteRow) -> Result<FailedBatch, BatchError> {
        Ok(FailedBatch {
            id: uuid_column(row, "id")?,
            batch_type: row.try_get("batch_type")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
            retry_count: row.try_get("retry_count")?,
            failed_items: count_column(row, "failed_items")?,
        })
    }
}

/// Applies a mapper to every row, stopping at the first row that cannot be decoded.
pub fn map_rows<T>(mapper: &dyn RowMapper<T>, rows: &[SqliteRow]) -> Result<Vec<T>, BatchError> {
    rows.iter().map(|row| mapper.map_row(row)).collect()
}

fn uuid_column(row: &SqliteRow, column: &str) -> Result<Uuid, BatchError> {
    let raw: String = row.try_get(column)?;
    parse_uuid(column, &raw)
}

fn optional_uuid_column(row: &SqliteRow, column: &str) -> Result<Option<Uuid>, BatchError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| parse_uuid(column, &raw)).transpose()
}

fn parse_uuid(column: &str, raw: &str) -> Result<Uuid, BatchError> {
    Uuid::parse_str(raw)
        .map_err(|err| BatchError::CorruptRow(format!("column `{column}` holds `{raw}`: {err}")))
}

fn json_column(row: &SqliteRow, column: &str) -> Result<Option<Value>, BatchError> {
    let raw: Option<String> = row.try_get(column)?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

fn count_column(row: &SqliteRow, column: &str) -> Result<u64, BatchError> {
    let count: i64 = row.try_get(column)?;
    u64::try_from(count)
        .map_err(|_| BatchError::CorruptRow(format!("column `{column}` is negative: {count}")))
}
