use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use log::{debug, warn};
use serde_json::Value;
use sqlx::{Sqlite, Transaction, query::Query, sqlite::SqliteArguments};
use uuid::Uuid;

pub use sqlx::{
    Row,
    sqlite::{SqliteQueryResult, SqliteRow},
};

use crate::{
    BatchError,
    core::model::{Batch, Item, ItemResult, ItemStatus, LogEntry, LogLevel},
    store::{Store, queries},
};

/// `log` target every context log line is mirrored to.
pub const LOG_TARGET: &str = "reliable_imports::batch";

/// A positional parameter for the queries issued through a [`ProcessingContext`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Bound as its JSON text.
    Json(Value),
}

impl From<bool> for QueryParam {
    fn from(value: bool) -> Self {
        QueryParam::Bool(value)
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        QueryParam::Int(value)
    }
}

impl From<i32> for QueryParam {
    fn from(value: i32) -> Self {
        QueryParam::Int(i64::from(value))
    }
}

impl From<u32> for QueryParam {
    fn from(value: u32) -> Self {
        QueryParam::Int(i64::from(value))
    }
}

impl From<f64> for QueryParam {
    fn from(value: f64) -> Self {
        QueryParam::Float(value)
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        QueryParam::Text(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        QueryParam::Text(value)
    }
}

impl From<Uuid> for QueryParam {
    fn from(value: Uuid) -> Self {
        QueryParam::Text(value.to_string())
    }
}

/// Scalars map onto their SQL counterpart, arrays and objects are bound as JSON text.
impl From<Value> for QueryParam {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => QueryParam::Null,
            Value::Bool(flag) => QueryParam::Bool(flag),
            Value::Number(number) => match number.as_i64() {
                Some(int) => QueryParam::Int(int),
                None => number
                    .as_f64()
                    .map(QueryParam::Float)
                    .unwrap_or_else(|| QueryParam::Text(number.to_string())),
            },
            Value::String(text) => QueryParam::Text(text),
            other => QueryParam::Json(other),
        }
    }
}

impl From<&Value> for QueryParam {
    fn from(value: &Value) -> Self {
        QueryParam::from(value.clone())
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(QueryParam::Null)
    }
}

fn bind_params<'q>(
    sql: &'q str,
    params: &'q [QueryParam],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| match param {
            QueryParam::Null => query.bind(Option::<String>::None),
            QueryParam::Bool(flag) => query.bind(*flag),
            QueryParam::Int(int) => query.bind(*int),
            QueryParam::Float(float) => query.bind(*float),
            QueryParam::Text(text) => query.bind(text.as_str()),
            QueryParam::Json(json) => query.bind(json.to_string()),
        })
}

/// The handle a [`BatchProcessor`](crate::core::processor::BatchProcessor) works
/// through during one processing run.
///
/// It gives access to:
/// - the database, scoped to the current item's transaction while an item is
///   being handled ([`fetch_all`](Self::fetch_all), [`fetch_optional`](Self::fetch_optional),
///   [`execute`](Self::execute));
/// - durable logging tied to the batch and, when there is one, the current item;
/// - a metadata store that lives exactly as long as the run, handy to cache
///   reference data loaded once in `on_batch_start`;
/// - reprocessing awareness ([`is_reprocess`](Self::is_reprocess),
///   [`original_batch_id`](Self::original_batch_id)).
///
/// Log entries are buffered while an item transaction is open and written once
/// it is closed, so the trace of a failed item survives its rollback.
pub struct ProcessingContext {
    store: Arc<Store>,
    batch: Batch,
    current_item: Option<Uuid>,
    scope: Option<Transaction<'static, Sqlite>>,
    metadata: HashMap<String, Value>,
    pending_logs: Vec<LogEntry>,
}

impl ProcessingContext {
    /// Creates a context for a run of `batch`, with an empty metadata store.
    pub fn new(store: Arc<Store>, batch: Batch) -> Self {
        Self {
            store,
            batch,
            current_item: None,
            scope: None,
            metadata: HashMap::new(),
            pending_logs: Vec::new(),
        }
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch.id
    }

    pub fn batch_type(&self) -> &str {
        &self.batch.batch_type
    }

    /// The item being handled, if any.
    pub fn current_item_id(&self) -> Option<Uuid> {
        self.current_item
    }

    /// Runs a query and returns every row.
    pub fn fetch_all(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Vec<SqliteRow>, BatchError> {
        let query = bind_params(sql, params);
        let rows = match self.scope.as_mut() {
            Some(tx) => self.store.block_on(query.fetch_all(&mut **tx))?,
            None => self.store.block_on(query.fetch_all(self.store.pool()))?,
        };
        Ok(rows)
    }

    /// Runs a query and returns the first row, if any.
    pub fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Option<SqliteRow>, BatchError> {
        let query = bind_params(sql, params);
        let row = match self.scope.as_mut() {
            Some(tx) => self.store.block_on(query.fetch_optional(&mut **tx))?,
            None => self.store.block_on(query.fetch_optional(self.store.pool()))?,
        };
        Ok(row)
    }

    /// Runs a statement, reporting rows affected and the last inserted row id.
    pub fn execute(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<SqliteQueryResult, BatchError> {
        let query = bind_params(sql, params);
        let outcome = match self.scope.as_mut() {
            Some(tx) => self.store.block_on(query.execute(&mut **tx))?,
            None => self.store.block_on(query.execute(self.store.pool()))?,
        };
        Ok(outcome)
    }

    /// Records a log entry for the batch, tied to the current item if there is one.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, details: Option<Value>) {
        let message = message.into();
        log::log!(
            target: LOG_TARGET,
            log::Level::from(level),
            "[{}] {}",
            self.batch.batch_type,
            message
        );
        self.pending_logs.push(LogEntry {
            id: None,
            batch_id: self.batch.id,
            item_id: self.current_item,
            level,
            message,
            details,
            created_at: Utc::now(),
        });
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message, None);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, None);
    }

    /// Stores a value for the rest of the run.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Whether this run handles a batch created by reprocessing.
    pub fn is_reprocess(&self) -> bool {
        self.batch.is_reprocess()
    }

    /// The batch this run derives from: the parent for a reprocess, the batch itself otherwise.
    pub fn original_batch_id(&self) -> Uuid {
        self.batch.parent_batch_id.unwrap_or(self.batch.id)
    }

    /// Opens the transaction bound to `item` and moves the item to `processing` inside it.
    pub(crate) fn begin_item_scope(&mut self, item: &Item) -> Result<(), BatchError> {
        if self.scope.is_some() {
            warn!("Item scope still open when starting item {}, rolling it back", item.id);
            self.rollback_item_scope()?;
        }

        let mut tx = self.store.block_on(self.store.pool().begin())?;
        let moved = self.store.block_on(queries::set_item_status(
            &mut *tx,
            item.id,
            ItemStatus::Processing,
        ));
        if let Err(err) = moved {
            self.store.block_on(tx.rollback())?;
            return Err(err);
        }

        self.scope = Some(tx);
        self.current_item = Some(item.id);
        Ok(())
    }

    /// Marks the current item `skipped` within its scope.
    pub(crate) fn skip_current_item(&mut self) -> Result<(), BatchError> {
        let Some(item_id) = self.current_item else {
            return Ok(());
        };
        match self.scope.as_mut() {
            Some(tx) => self.store.block_on(queries::set_item_status(
                &mut **tx,
                item_id,
                ItemStatus::Skipped,
            )),
            None => self.store.block_on(queries::set_item_status(
                self.store.pool(),
                item_id,
                ItemStatus::Skipped,
            )),
        }
    }

    /// Stores the processor's result on the current item and marks it `completed`.
    pub(crate) fn complete_current_item(&mut self, result: &ItemResult) -> Result<(), BatchError> {
        let Some(item_id) = self.current_item else {
            return Ok(());
        };
        if !result.extra.is_empty() {
            debug!(
                "Item {} reported extra result keys: {:?}",
                item_id,
                result.extra.keys().collect::<Vec<_>>()
            );
        }
        let processed_at = Utc::now();
        match self.scope.as_mut() {
            Some(tx) => self.store.block_on(queries::complete_item(
                &mut **tx,
                item_id,
                result,
                processed_at,
            )),
            None => self.store.block_on(queries::complete_item(
                self.store.pool(),
                item_id,
                result,
                processed_at,
            )),
        }
    }

    pub(crate) fn commit_item_scope(&mut self) -> Result<(), BatchError> {
        if let Some(tx) = self.scope.take() {
            self.store.block_on(tx.commit())?;
        }
        Ok(())
    }

    /// Reverts everything done for the current item. The item stays current so
    /// its failure can still be recorded and logged against it.
    pub(crate) fn rollback_item_scope(&mut self) -> Result<(), BatchError> {
        if let Some(tx) = self.scope.take() {
            self.store.block_on(tx.rollback())?;
        }
        Ok(())
    }

    pub(crate) fn clear_current_item(&mut self) {
        self.current_item = None;
    }

    /// Appends the buffered log entries. Deferred while an item scope is open.
    pub(crate) fn flush_logs(&mut self) -> Result<(), BatchError> {
        if self.scope.is_some() || self.pending_logs.is_empty() {
            return Ok(());
        }
        let entries = std::mem::take(&mut self.pending_logs);
        self.store.append_logs(&entries)
    }
}

impl Drop for ProcessingContext {
    fn drop(&mut self) {
        if let Err(err) = self.rollback_item_scope() {
            warn!("Failed to roll back item scope of batch {}: {}", self.batch.id, err);
        }
        if let Err(err) = self.flush_logs() {
            warn!("Failed to write buffered logs of batch {}: {}", self.batch.id, err);
        }
    }
}
