use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::BatchError;

/// Lifecycle status of a batch.
///
/// `pending → processing → {completed | failed}`. A batch re-entered by
/// [`BatchManager::process_batch`](crate::core::manager::BatchManager::process_batch)
/// goes back through `processing` with the same vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Created, not yet picked up.
    Pending,
    /// A processing run is in flight.
    Processing,
    /// The run went through every item. Individual items may still have failed.
    Completed,
    /// The run was aborted: setup or validation failed, or an item error escalated.
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(BatchError::CorruptRow(format!(
                "unknown batch status `{other}`"
            ))),
        }
    }
}

/// Lifecycle status of a single item: `pending → processing → {completed | failed | skipped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        }
    }

    /// An item in a terminal status is never attempted again within its batch.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Skipped
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "processing" => Ok(ItemStatus::Processing),
            "completed" => Ok(ItemStatus::Completed),
            "failed" => Ok(ItemStatus::Failed),
            "skipped" => Ok(ItemStatus::Skipped),
            other => Err(BatchError::CorruptRow(format!(
                "unknown item status `{other}`"
            ))),
        }
    }
}

/// Severity of a durable log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(BatchError::CorruptRow(format!("unknown log level `{other}`"))),
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// A durable unit of work grouping the items submitted together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub batch_type: String,
    pub status: BatchStatus,
    /// Free-form description of where the records came from.
    pub source_info: Value,
    pub metadata: Value,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    /// Set only on batches created by reprocessing. Always points to a batch of the same type.
    pub parent_batch_id: Option<Uuid>,
}

impl Batch {
    pub(crate) fn pending(
        batch_type: String,
        source_info: Value,
        metadata: Value,
        parent_batch_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            batch_type,
            status: BatchStatus::Pending,
            source_info,
            metadata,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            error_message: None,
            retry_count: 0,
            parent_batch_id,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_successful(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    pub fn is_reprocess(&self) -> bool {
        self.parent_batch_id.is_some()
    }
}

/// One record of a batch with its own independent outcome.
///
/// `source_data` is written once at creation and never touched again, which is
/// what makes reprocessing independent from the original data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub batch_id: Uuid,
    /// Ordinal position, unique within the batch.
    pub item_index: i64,
    pub status: ItemStatus,
    pub source_data: Value,
    pub processed_data: Option<Value>,
    pub target_table: Option<String>,
    pub target_id: Option<String>,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Item {
    pub(crate) fn pending(batch_id: Uuid, item_index: i64, source_data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            item_index,
            status: ItemStatus::Pending,
            source_data,
            processed_data: None,
            target_table: None,
            target_id: None,
            error_message: None,
            processed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_successful(&self) -> bool {
        self.status == ItemStatus::Completed
    }
}

/// Append-only audit record tied to a batch and optionally to one of its items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// `None` until the entry has been appended to the store.
    pub id: Option<i64>,
    pub batch_id: Uuid,
    pub item_id: Option<Uuid>,
    pub level: LogLevel,
    pub message: String,
    pub details: Option<Value>,
    pub created_at: DateTime<Utc>,
}

const TARGET_TABLE_KEY: &str = "target_table";
const TARGET_ID_KEY: &str = "target_id";
const PROCESSED_DATA_KEY: &str = "processed_data";

/// What a processor reports back for a successfully processed item.
///
/// Three keys are recognized and stored on the item row (target table, target id
/// and the processed payload). Anything else is carried in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub target_table: Option<String>,
    pub target_id: Option<String>,
    pub processed_data: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ItemResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the resource the item was written to.
    pub fn target(mut self, table: impl Into<String>, id: impl ToString) -> Self {
        self.target_table = Some(table.into());
        self.target_id = Some(id.to_string());
        self
    }

    pub fn processed_data(mut self, data: impl Into<Value>) -> Self {
        self.processed_data = Some(data.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a key, routing the well-known ones to their dedicated fields.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match key.as_str() {
            TARGET_TABLE_KEY => self.target_table = value_to_text(value),
            TARGET_ID_KEY => self.target_id = value_to_text(value),
            PROCESSED_DATA_KEY => {
                self.processed_data = if value.is_null() { None } else { Some(value) }
            }
            _ => {
                self.extra.insert(key, value);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

impl From<Map<String, Value>> for ItemResult {
    fn from(map: Map<String, Value>) -> Self {
        let mut result = ItemResult::new();
        for (key, value) in map {
            result.insert(key, value);
        }
        result
    }
}

fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

/// Aggregated view of a batch, read from the `batch_summaries` view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub id: Uuid,
    pub batch_type: String,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i64,
    pub parent_batch_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub total_items: u64,
    pub completed_items: u64,
    pub failed_items: u64,
    /// Items not attempted yet, including any caught mid-flight.
    pub pending_items: u64,
    pub skipped_items: u64,
}

impl BatchSummary {
    /// Wall-clock duration of the last run, once it has both started and completed.
    pub fn duration_seconds(&self) -> Option<f64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        let micros = (completed - started).num_microseconds()?;
        Some(micros as f64 / 1_000_000.0)
    }

    /// Percentage of items that completed, `0.0` for an empty batch.
    pub fn success_rate(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        self.completed_items as f64 / self.total_items as f64 * 100.0
    }

    pub fn items_per_second(&self) -> Option<f64> {
        if !self.status.is_terminal() {
            return None;
        }
        match self.duration_seconds() {
            Some(duration) if duration > 0.0 => Some(self.completed_items as f64 / duration),
            _ => None,
        }
    }
}

/// Row of the `failed_batches` triage view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedBatch {
    pub id: Uuid,
    pub batch_type: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i64,
    pub failed_items: u64,
}

/// Filter for listing batch summaries, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchFilter {
    pub batch_type: Option<String>,
    pub status: Option<BatchStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl BatchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_type(mut self, batch_type: impl Into<String>) -> Self {
        self.batch_type = Some(batch_type.into());
        self
    }

    pub fn status(mut self, status: BatchStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}
