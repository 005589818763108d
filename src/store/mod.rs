use std::{future::Future, str::FromStr};

use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlx::{
    Executor, SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tokio::runtime::{Builder, Runtime};
use uuid::Uuid;

use crate::{
    BatchError,
    core::model::{
        Batch, BatchFilter, BatchStatus, BatchSummary, FailedBatch, Item, ItemStatus, LogEntry,
    },
};

/// Connection settings and environment loading.
pub mod config;

/// Row to domain mapping.
pub mod mapper;

pub(crate) mod queries;

pub use config::StoreConfig;
use mapper::{
    BatchRowMapper, FailedBatchRowMapper, ItemRowMapper, LogRowMapper, RowMapper,
    SummaryRowMapper, map_rows,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// The relational store holding batches, items and logs.
///
/// The store exposes a blocking API: it owns a small tokio runtime and drives
/// every SQLx future to completion on it, so callers never need an async
/// context. For the same reason a `Store` must not be created or dropped from
/// inside another tokio runtime.
///
/// # Examples
///
/// ```
/// use reliable_imports::store::Store;
///
/// let store = Store::in_memory().unwrap();
/// assert!(store.find_batch(uuid::Uuid::new_v4()).unwrap().is_none());
/// ```
///
/// Rows are read through the store but only written by
/// [`BatchManager`](crate::core::manager::BatchManager):
///
/// ```compile_fail
/// use reliable_imports::{core::model::BatchStatus, store::Store};
///
/// let store = Store::in_memory().unwrap();
/// store
///     .finish_batch(uuid::Uuid::new_v4(), BatchStatus::Completed, chrono::Utc::now(), None)
///     .unwrap();
/// ```
pub struct Store {
    runtime: Runtime,
    pool: SqlitePool,
}

impl Store {
    /// Opens the database described by `config` and applies the embedded migrations.
    pub fn connect(config: &StoreConfig) -> Result<Self, BatchError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("reliable-imports-store")
            .enable_all()
            .build()?;

        let options = SqliteConnectOptions::from_str(config.url())?
            .create_if_missing(config.get_create_if_missing())
            .foreign_keys(true)
            .busy_timeout(config.get_busy_timeout());

        let pool_options = if config.is_in_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(config.get_max_connections().max(1))
        };

        let pool = runtime.block_on(pool_options.connect_with(options))?;
        let store = Self { runtime, pool };
        store.migrate()?;

        info!("Connected import store at {}", config.url());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, BatchError> {
        Self::connect(&StoreConfig::in_memory())
    }

    pub fn from_env() -> Result<Self, BatchError> {
        Self::connect(&StoreConfig::from_env()?)
    }

    /// Applies pending schema migrations. Idempotent.
    pub fn migrate(&self) -> Result<(), BatchError> {
        self.block_on(MIGRATOR.run(&self.pool))?;
        debug!("Import schema is up to date");
        Ok(())
    }

    /// Runs one or more raw SQL statements, e.g. to create the tables processors write to.
    pub fn execute_script(&self, sql: &str) -> Result<(), BatchError> {
        self.block_on((&self.pool).execute(sql))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Drives a future to completion on the store's runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Inserts the batch row and all of its item rows as one atomic unit.
    pub(crate) fn insert_batch_with_items(&self, batch: &Batch, items: &[Item]) -> Result<(), BatchError> {
        self.block_on(async {
            let mut tx = self.pool.begin().await?;
            queries::insert_batch(&mut *tx, batch).await?;
            queries::insert_items(&mut *tx, items).await?;
            tx.commit().await?;
            Ok::<(), BatchError>(())
        })
    }

    pub fn find_batch(&self, id: Uuid) -> Result<Option<Batch>, BatchError> {
        let row = self.block_on(queries::select_batch(&self.pool, id))?;
        row.map(|row| BatchRowMapper.map_row(&row)).transpose()
    }

    /// Items of a batch in ordinal order; `statuses` narrows the selection.
    pub fn load_items(
        &self,
        batch_id: Uuid,
        statuses: Option<&[ItemStatus]>,
    ) -> Result<Vec<Item>, BatchError> {
        let rows = self.block_on(queries::select_items(&self.pool, batch_id, statuses))?;
        map_rows(&ItemRowMapper, &rows)
    }

    pub(crate) fn mark_batch_processing(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
        is_retry: bool,
    ) -> Result<(), BatchError> {
        self.block_on(queries::mark_batch_processing(
            &self.pool, id, started_at, is_retry,
        ))
    }

    pub(crate) fn finish_batch(
        &self,
        id: Uuid,
        status: BatchStatus,
        completed_at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> Result<(), BatchError> {
        self.block_on(queries::finish_batch(
            &self.pool,
            id,
            status,
            completed_at,
            error_message,
        ))
    }

    pub(crate) fn fail_item(
        &self,
        id: Uuid,
        error_message: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), BatchError> {
        self.block_on(queries::fail_item(&self.pool, id, error_message, processed_at))
    }

    /// Appends log entries in order. Entries are never updated afterwards.
    pub(crate) fn append_logs(&self, entries: &[LogEntry]) -> Result<(), BatchError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.block_on(async {
            let mut tx = self.pool.begin().await?;
            for entry in entries {
                queries::insert_log(&mut *tx, entry).await?;
            }
            tx.commit().await?;
            Ok::<(), BatchError>(())
        })
    }

    pub fn load_logs(&self, batch_id: Uuid) -> Result<Vec<LogEntry>, BatchError> {
        let rows = self.block_on(queries::select_logs(&self.pool, batch_id))?;
        map_rows(&LogRowMapper, &rows)
    }

    pub fn batch_summary(&self, id: Uuid) -> Result<Option<BatchSummary>, BatchError> {
        let row = self.block_on(queries::select_summary(&self.pool, id))?;
        row.map(|row| SummaryRowMapper.map_row(&row)).transpose()
    }

    pub fn list_summaries(&self, filter: &BatchFilter) -> Result<Vec<BatchSummary>, BatchError> {
        let rows = self.block_on(queries::select_summaries(&self.pool, filter))?;
        map_rows(&SummaryRowMapper, &rows)
    }

    pub fn failed_batches(&self) -> Result<Vec<FailedBatch>, BatchError> {
        let rows = self.block_on(queries::select_failed_batches(&self.pool))?;
        map_rows(&FailedBatchRowMapper, &rows)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.runtime.block_on(self.pool.close());
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn batch_with_items(count: i64) -> (Batch, Vec<Item>) {
        let batch = Batch::pending(
            "customer_data".to_string(),
            json!({"file": "customers.csv"}),
            json!({}),
            None,
        );
        let items = (0..count)
            .map(|index| Item::pending(batch.id, index, json!({"row": index})))
            .collect();
        (batch, items)
    }

    #[test]
    fn batch_and_items_are_stored_together() {
        let store = Store::in_memory().unwrap();
        let (batch, items) = batch_with_items(3);

        store.insert_batch_with_items(&batch, &items).unwrap();

        let loaded = store.find_batch(batch.id).unwrap().unwrap();
        assert_eq!(loaded.batch_type, "customer_data");
        assert_eq!(loaded.status, BatchStatus::Pending);
        assert_eq!(loaded.source_info, json!({"file": "customers.csv"}));

        let loaded_items = store.load_items(batch.id, None).unwrap();
        assert_eq!(loaded_items.len(), 3);
        assert_eq!(loaded_items[2].item_index, 2);
        assert_eq!(loaded_items[2].source_data, json!({"row": 2}));
    }

    #[test]
    fn duplicate_item_index_rolls_back_the_whole_batch() {
        let store = Store::in_memory().unwrap();
        let (batch, mut items) = batch_with_items(2);
        items[1].item_index = 0;

        let result = store.insert_batch_with_items(&batch, &items);

        assert!(matches!(result, Err(BatchError::Database(_))));
        assert!(store.find_batch(batch.id).unwrap().is_none());
    }

    #[test]
    fn status_filter_selects_matching_items_only() {
        let store = Store::in_memory().unwrap();
        let (batch, items) = batch_with_items(4);
        store.insert_batch_with_items(&batch, &items).unwrap();
        store
            .fail_item(items[1].id, "boom", Utc::now())
            .unwrap();

        let failed = store
            .load_items(batch.id, Some(&[ItemStatus::Failed][..]))
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, items[1].id);
        assert_eq!(failed[0].error_message.as_deref(), Some("boom"));

        let none = store.load_items(batch.id, Some(&[][..])).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn summary_counts_items_by_status() {
        let store = Store::in_memory().unwrap();
        let (batch, items) = batch_with_items(3);
        store.insert_batch_with_items(&batch, &items).unwrap();
        store.fail_item(items[0].id, "bad row", Utc::now()).unwrap();

        let summary = store.batch_summary(batch.id).unwrap().unwrap();

        assert_eq!(summary.total_items, 3);
        assert_eq!(summary.failed_items, 1);
        assert_eq!(summary.pending_items, 2);
        assert_eq!(summary.completed_items, 0);
        assert_eq!(summary.skipped_items, 0);
    }

    #[test]
    fn failed_batches_view_lists_failed_runs_only() {
        let store = Store::in_memory().unwrap();
        let (failed, failed_items) = batch_with_items(2);
        let (ok, ok_items) = batch_with_items(1);
        store.insert_batch_with_items(&failed, &failed_items).unwrap();
        store.insert_batch_with_items(&ok, &ok_items).unwrap();

        store.fail_item(failed_items[0].id, "boom", Utc::now()).unwrap();
        store
            .finish_batch(failed.id, BatchStatus::Failed, Utc::now(), Some("aborted"))
            .unwrap();
        store
            .finish_batch(ok.id, BatchStatus::Completed, Utc::now(), None)
            .unwrap();

        let triage = store.failed_batches().unwrap();
        assert_eq!(triage.len(), 1);
        assert_eq!(triage[0].id, failed.id);
        assert_eq!(triage[0].failed_items, 1);
        assert_eq!(triage[0].error_message.as_deref(), Some("aborted"));
    }

    #[test]
    fn large_batches_are_inserted_in_several_statements() {
        let store = Store::in_memory().unwrap();
        let (batch, items) = batch_with_items(6000);

        store.insert_batch_with_items(&batch, &items).unwrap();

        let loaded = store.load_items(batch.id, None).unwrap();
        assert_eq!(loaded.len(), 6000);
        assert_eq!(loaded[5999].id, items[5999].id);
        assert_eq!(loaded[5999].source_data, json!({"row": 5999}));
        assert!(loaded.iter().all(|item| item.status == ItemStatus::Pending));
    }
}
