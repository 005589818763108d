use std::{fmt, sync::Arc};

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    BatchError,
    core::{
        context::ProcessingContext,
        model::{
            Batch, BatchFilter, BatchStatus, BatchSummary, FailedBatch, Item, ItemStatus,
            LogEntry, LogLevel,
        },
        processor::BatchProcessor,
        registry::ProcessorRegistry,
    },
    store::Store,
};

/// Type alias for orchestrator results.
type BatchResult<T> = Result<T, BatchError>;

/// A batch waiting to be created.
///
/// Records are stored verbatim as the items' source payloads, indexed from zero
/// in the given order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBatch {
    batch_type: String,
    records: Vec<Value>,
    source_info: Value,
    metadata: Value,
    parent_batch_id: Option<Uuid>,
}

impl NewBatch {
    pub fn new(batch_type: impl Into<String>, records: Vec<Value>) -> Self {
        Self {
            batch_type: batch_type.into(),
            records,
            source_info: json!({}),
            metadata: json!({}),
            parent_batch_id: None,
        }
    }

    /// Describes where the records come from (file name, upload id, ...).
    pub fn source_info(mut self, source_info: Value) -> Self {
        self.source_info = source_info;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Links the new batch to the batch it re-derives from.
    pub fn parent(mut self, parent_batch_id: Uuid) -> Self {
        self.parent_batch_id = Some(parent_batch_id);
        self
    }
}

const FAILED: &[ItemStatus] = &[ItemStatus::Failed];
const FAILED_OR_SKIPPED: &[ItemStatus] = &[ItemStatus::Failed, ItemStatus::Skipped];

/// Which items of a batch are copied into a reprocess batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSelection {
    /// Items whose processing raised an error. Skipped items are left out.
    #[default]
    FailedOnly,
    /// Every item, whatever its outcome.
    All,
    /// Failed items plus the ones skipped by validation.
    FailedOrSkipped,
}

impl ItemSelection {
    /// `true` selects failed items only, `false` every item.
    pub fn failed_items_only(failed_items_only: bool) -> Self {
        if failed_items_only {
            ItemSelection::FailedOnly
        } else {
            ItemSelection::All
        }
    }

    fn statuses(&self) -> Option<&'static [ItemStatus]> {
        match self {
            ItemSelection::FailedOnly => Some(FAILED),
            ItemSelection::All => None,
            ItemSelection::FailedOrSkipped => Some(FAILED_OR_SKIPPED),
        }
    }
}

impl fmt::Display for ItemSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemSelection::FailedOnly => f.write_str("failed items"),
            ItemSelection::All => f.write_str("all items"),
            ItemSelection::FailedOrSkipped => f.write_str("failed or skipped items"),
        }
    }
}

/// Outcome of a reprocessing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprocessReport {
    pub original_batch_id: Uuid,
    pub new_batch_id: Uuid,
    pub items_reprocessed: usize,
    pub status: BatchStatus,
    pub summary: BatchSummary,
}

/// How a processing run ended, short of an infrastructure error.
enum RunOutcome {
    Finished,
    Aborted(String),
}

enum ItemOutcome {
    Completed,
    Skipped,
    Failed(anyhow::Error),
}

/// Creates batches, drives their processing and reprocessing, and reports on them.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use serde_json::json;
/// use reliable_imports::core::{
///     context::ProcessingContext,
///     manager::{BatchManagerBuilder, NewBatch},
///     model::{Item, ItemResult},
///     processor::{BatchProcessor, ItemProcessorResult},
///     registry::ProcessorRegistry,
/// };
/// use reliable_imports::store::Store;
///
/// #[derive(Default)]
/// struct EchoProcessor;
///
/// impl BatchProcessor for EchoProcessor {
///     fn validate_item(&self, item: &Item, _ctx: &mut ProcessingContext) -> bool {
///         item.source_data.is_object()
///     }
///
///     fn process_item(&self, item: &Item, _ctx: &mut ProcessingContext) -> ItemProcessorResult {
///         Ok(ItemResult::new().processed_data(item.source_data.clone()))
///     }
/// }
///
/// let mut registry = ProcessorRegistry::new();
/// registry.register_type::<EchoProcessor>("echo");
///
/// let manager = BatchManagerBuilder::new()
///     .store(Arc::new(Store::in_memory().unwrap()))
///     .registry(registry)
///     .build()
///     .unwrap();
///
/// let batch_id = manager
///     .create_batch(NewBatch::new("echo", vec![json!({"a": 1}), json!("not an object")]))
///     .unwrap();
/// let summary = manager.process_batch(batch_id, true).unwrap();
///
/// assert_eq!(summary.completed_items, 1);
/// assert_eq!(summary.skipped_items, 1);
/// assert_eq!(summary.success_rate(), 50.0);
/// ```
pub struct BatchManager {
    store: Arc<Store>,
    registry: ProcessorRegistry,
}

impl BatchManager {
    pub fn new(store: Arc<Store>, registry: ProcessorRegistry) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProcessorRegistry {
        &mut self.registry
    }

    /// Creates a `pending` batch and one `pending` item per record, atomically.
    ///
    /// # Returns
    /// - `Ok(Uuid)` the id of the new batch
    /// - `Err(BatchError::ProcessorNotFound)` when no processor handles the batch type; nothing is written
    /// - `Err(BatchError::BatchNotFound)` when the parent batch does not exist
    /// - `Err(BatchError::Validation)` when the parent batch has another batch type
    pub fn create_batch(&self, new_batch: NewBatch) -> BatchResult<Uuid> {
        self.registry.ensure_registered(&new_batch.batch_type)?;

        if let Some(parent_id) = new_batch.parent_batch_id {
            let parent = self.get_batch(parent_id)?;
            if parent.batch_type != new_batch.batch_type {
                return Err(BatchError::Validation(format!(
                    "parent batch {} has type `{}`, expected `{}`",
                    parent_id, parent.batch_type, new_batch.batch_type
                )));
            }
        }

        let NewBatch {
            batch_type,
            records,
            source_info,
            metadata,
            parent_batch_id,
        } = new_batch;

        let batch = Batch::pending(batch_type, source_info, metadata, parent_batch_id);
        let items: Vec<Item> = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| Item::pending(batch.id, index as i64, record))
            .collect();

        self.store.insert_batch_with_items(&batch, &items)?;

        info!(
            "Created batch: {}, id: {}, items: {}",
            batch.batch_type,
            batch.id,
            items.len()
        );
        Ok(batch.id)
    }

    /// Runs every pending item of a batch through its processor.
    ///
    /// Each item is handled in its own transaction. A failing item is rolled back,
    /// marked `failed` and, unless `continue_on_error` is `false` or the processor's
    /// `on_item_error` escalates, processing moves on to the next item. Items that
    /// already reached a terminal status in an earlier run are left untouched.
    ///
    /// # Returns
    /// - `Ok(BatchSummary)` once the batch is `completed` or `failed`
    /// - `Err(BatchError::BatchNotFound)` / `Err(BatchError::ProcessorNotFound)` before anything is touched
    /// - `Err(BatchError::Database)` when the store itself fails mid-run; the batch is marked `failed` if possible
    pub fn process_batch(&self, batch_id: Uuid, continue_on_error: bool) -> BatchResult<BatchSummary> {
        let batch = self.get_batch(batch_id)?;
        let processor = self.registry.resolve(&batch.batch_type)?;

        let is_retry = batch.started_at.is_some();
        self.store
            .mark_batch_processing(batch_id, Utc::now(), is_retry)?;
        let batch = self.get_batch(batch_id)?;
        info!("Start of batch: {}, id: {}", batch.batch_type, batch.id);

        let mut ctx = ProcessingContext::new(Arc::clone(&self.store), batch);

        match self.run(processor.as_ref(), &mut ctx, continue_on_error) {
            Ok(RunOutcome::Finished) => {
                self.store
                    .finish_batch(batch_id, BatchStatus::Completed, Utc::now(), None)?;
            }
            Ok(RunOutcome::Aborted(message)) => {
                warn!("Batch {} failed: {}", batch_id, message);
                self.store.finish_batch(
                    batch_id,
                    BatchStatus::Failed,
                    Utc::now(),
                    Some(&message),
                )?;
            }
            Err(err) => {
                error!("Batch {} stopped on store error: {}", batch_id, err);
                if let Err(rollback_err) = ctx.rollback_item_scope() {
                    warn!("Could not roll back item scope: {}", rollback_err);
                }
                ctx.clear_current_item();
                let message = format!("batch processing interrupted: {err}");
                if let Err(mark_err) =
                    self.store
                        .finish_batch(batch_id, BatchStatus::Failed, Utc::now(), Some(&message))
                {
                    warn!("Could not mark batch {} as failed: {}", batch_id, mark_err);
                }
                return Err(err);
            }
        }
        drop(ctx);

        let summary = self.get_batch_summary(batch_id)?;
        info!(
            "End of batch: {}, id: {}, status: {}, completed: {}, failed: {}, skipped: {}",
            summary.batch_type,
            summary.id,
            summary.status,
            summary.completed_items,
            summary.failed_items,
            summary.skipped_items
        );
        Ok(summary)
    }

    fn run(
        &self,
        processor: &dyn BatchProcessor,
        ctx: &mut ProcessingContext,
        continue_on_error: bool,
    ) -> BatchResult<RunOutcome> {
        if let Err(err) = processor.on_batch_start(ctx) {
            let message = format!("batch setup failed: {err:#}");
            ctx.error(message.clone());
            processor.on_batch_complete(ctx, false);
            ctx.flush_logs()?;
            return Ok(RunOutcome::Aborted(message));
        }

        if !processor.validate_batch(ctx) {
            let message = "batch validation failed".to_string();
            ctx.error(message.clone());
            processor.on_batch_complete(ctx, false);
            ctx.flush_logs()?;
            return Ok(RunOutcome::Aborted(message));
        }
        ctx.flush_logs()?;

        let items = self.store.load_items(ctx.batch_id(), None)?;
        let mut aborted = None;

        for item in &items {
            if item.status.is_terminal() {
                debug!("Item {} already {}, leaving it", item.item_index, item.status);
                continue;
            }

            if let ItemOutcome::Failed(err) = self.run_item(processor, ctx, item)? {
                let keep_going = processor.on_item_error(item, &err, ctx);
                ctx.log(
                    LogLevel::Error,
                    format!("item {} failed: {err:#}", item.item_index),
                    Some(json!({
                        "item_index": item.item_index,
                        "error": format!("{err:#}"),
                        "escalated": !keep_going,
                    })),
                );
                if !continue_on_error || !keep_going {
                    aborted = Some(format!(
                        "batch processing aborted at item {}: {err:#}",
                        item.item_index
                    ));
                }
            }

            ctx.clear_current_item();
            ctx.flush_logs()?;
            if aborted.is_some() {
                break;
            }
        }

        processor.on_batch_complete(ctx, aborted.is_none());
        ctx.flush_logs()?;

        Ok(match aborted {
            Some(message) => RunOutcome::Aborted(message),
            None => RunOutcome::Finished,
        })
    }

    fn run_item(
        &self,
        processor: &dyn BatchProcessor,
        ctx: &mut ProcessingContext,
        item: &Item,
    ) -> BatchResult<ItemOutcome> {
        ctx.begin_item_scope(item)?;

        if processor.should_skip_item(item, ctx) {
            ctx.debug(format!("item {} skipped", item.item_index));
            ctx.skip_current_item()?;
            ctx.commit_item_scope()?;
            return Ok(ItemOutcome::Skipped);
        }

        if !processor.validate_item(item, ctx) {
            ctx.warning(format!("item {} failed validation, skipped", item.item_index));
            ctx.skip_current_item()?;
            ctx.commit_item_scope()?;
            return Ok(ItemOutcome::Skipped);
        }

        match processor.process_item(item, ctx) {
            Ok(result) => {
                ctx.complete_current_item(&result)?;
                ctx.commit_item_scope()?;
                Ok(ItemOutcome::Completed)
            }
            Err(err) => {
                ctx.rollback_item_scope()?;
                self.store
                    .fail_item(item.id, &format!("{err:#}"), Utc::now())?;
                Ok(ItemOutcome::Failed(err))
            }
        }
    }

    /// Copies the selected items of a batch into a new child batch and processes it.
    ///
    /// # Returns
    /// - `Ok(Uuid)` the id of the new batch
    /// - `Err(BatchError::Validation)` when no item matches `selection`
    pub fn reprocess_batch(
        &self,
        batch_id: Uuid,
        selection: ItemSelection,
        continue_on_error: bool,
    ) -> BatchResult<Uuid> {
        self.reprocess_batch_report(batch_id, selection, continue_on_error)
            .map(|report| report.new_batch_id)
    }

    /// Same as [`reprocess_batch`](Self::reprocess_batch), returning the full report.
    pub fn reprocess_batch_report(
        &self,
        batch_id: Uuid,
        selection: ItemSelection,
        continue_on_error: bool,
    ) -> BatchResult<ReprocessReport> {
        let original = self.get_batch(batch_id)?;
        let items = self.store.load_items(batch_id, selection.statuses())?;

        if items.is_empty() {
            return Err(BatchError::Validation(format!(
                "batch {batch_id} has no {selection} to reprocess"
            )));
        }

        let items_reprocessed = items.len();
        let records = items.into_iter().map(|item| item.source_data).collect();
        let new_batch_id = self.create_batch(
            NewBatch::new(original.batch_type, records)
                .source_info(original.source_info)
                .metadata(original.metadata)
                .parent(batch_id),
        )?;
        info!(
            "Reprocessing {} of batch {} as batch {}",
            selection, batch_id, new_batch_id
        );

        let summary = self.process_batch(new_batch_id, continue_on_error)?;

        Ok(ReprocessReport {
            original_batch_id: batch_id,
            new_batch_id,
            items_reprocessed,
            status: summary.status,
            summary,
        })
    }

    /// Aggregated counts, status and timing of a batch.
    pub fn get_batch_summary(&self, batch_id: Uuid) -> BatchResult<BatchSummary> {
        self.store
            .batch_summary(batch_id)?
            .ok_or(BatchError::BatchNotFound(batch_id))
    }

    pub fn get_batch(&self, batch_id: Uuid) -> BatchResult<Batch> {
        self.store
            .find_batch(batch_id)?
            .ok_or(BatchError::BatchNotFound(batch_id))
    }

    /// Items of a batch in ordinal order.
    pub fn get_batch_items(&self, batch_id: Uuid) -> BatchResult<Vec<Item>> {
        self.get_batch(batch_id)?;
        self.store.load_items(batch_id, None)
    }

    /// Log entries of a batch in the order they were written.
    pub fn get_batch_logs(&self, batch_id: Uuid) -> BatchResult<Vec<LogEntry>> {
        self.get_batch(batch_id)?;
        self.store.load_logs(batch_id)
    }

    /// Batch summaries, newest first.
    pub fn list_batches(&self, filter: &BatchFilter) -> BatchResult<Vec<BatchSummary>> {
        self.store.list_summaries(filter)
    }

    /// Batches currently `failed`, with their failed item counts.
    pub fn failed_batches(&self) -> BatchResult<Vec<FailedBatch>> {
        self.store.failed_batches()
    }
}

/// Builder for [`BatchManager`].
#[derive(Default)]
pub struct BatchManagerBuilder {
    store: Option<Arc<Store>>,
    registry: Option<ProcessorRegistry>,
}

impl BatchManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Fails with [`BatchError::Configuration`] when no store was given.
    pub fn build(self) -> BatchResult<BatchManager> {
        let store = self
            .store
            .ok_or_else(|| BatchError::Configuration("a store is required".to_string()))?;
        Ok(BatchManager::new(store, self.registry.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{model::ItemResult, processor::ItemProcessorResult};

    #[derive(Default)]
    struct PassThroughProcessor;

    impl BatchProcessor for PassThroughProcessor {
        fn validate_item(&self, _item: &Item, _ctx: &mut ProcessingContext) -> bool {
            true
        }

        fn process_item(&self, item: &Item, _ctx: &mut ProcessingContext) -> ItemProcessorResult {
            if item.source_data["fail"].as_bool().unwrap_or(false) {
                anyhow::bail!("row {} is broken", item.item_index);
            }
            Ok(ItemResult::new().processed_data(item.source_data.clone()))
        }
    }

    fn manager() -> BatchManager {
        let mut registry = ProcessorRegistry::new();
        registry.register_type::<PassThroughProcessor>("pass_through");
        BatchManagerBuilder::new()
            .store(Arc::new(Store::in_memory().unwrap()))
            .registry(registry)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_a_store() {
        let result = BatchManagerBuilder::new().build();
        assert!(matches!(result, Err(BatchError::Configuration(_))));
    }

    #[test]
    fn selection_maps_to_statuses() {
        assert_eq!(ItemSelection::failed_items_only(true), ItemSelection::FailedOnly);
        assert_eq!(ItemSelection::failed_items_only(false), ItemSelection::All);
        assert_eq!(ItemSelection::All.statuses(), None);
        assert_eq!(
            ItemSelection::FailedOrSkipped.statuses(),
            Some(&[ItemStatus::Failed, ItemStatus::Skipped][..])
        );
    }

    #[test]
    fn new_batch_records_are_indexed_in_order() {
        let manager = manager();
        let batch_id = manager
            .create_batch(NewBatch::new(
                "pass_through",
                vec![json!({"n": 0}), json!({"n": 1}), json!({"n": 2})],
            ))
            .unwrap();

        let items = manager.get_batch_items(batch_id).unwrap();
        let indexes: Vec<i64> = items.iter().map(|item| item.item_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(items[2].source_data, json!({"n": 2}));
        assert!(items.iter().all(|item| item.status == ItemStatus::Pending));
    }

    #[test]
    fn failed_item_error_is_recorded_and_logged() {
        let manager = manager();
        let batch_id = manager
            .create_batch(NewBatch::new(
                "pass_through",
                vec![json!({}), json!({"fail": true})],
            ))
            .unwrap();

        let summary = manager.process_batch(batch_id, true).unwrap();

        assert_eq!(summary.status, BatchStatus::Completed);
        assert_eq!(summary.failed_items, 1);
        let items = manager.get_batch_items(batch_id).unwrap();
        assert_eq!(items[1].error_message.as_deref(), Some("row 1 is broken"));

        let logs = manager.get_batch_logs(batch_id).unwrap();
        let error_log = logs
            .iter()
            .find(|entry| entry.level == LogLevel::Error)
            .unwrap();
        assert_eq!(error_log.item_id, Some(items[1].id));
        assert_eq!(error_log.details.as_ref().unwrap()["item_index"], json!(1));
    }

    #[test]
    fn rerunning_a_batch_leaves_finished_items_and_counts_the_retry() {
        let manager = manager();
        let batch_id = manager
            .create_batch(NewBatch::new(
                "pass_through",
                vec![json!({}), json!({"fail": true})],
            ))
            .unwrap();
        manager.process_batch(batch_id, true).unwrap();
        let first_items = manager.get_batch_items(batch_id).unwrap();

        let summary = manager.process_batch(batch_id, true).unwrap();

        assert_eq!(summary.retry_count, 1);
        assert_eq!(summary.completed_items, 1);
        assert_eq!(summary.failed_items, 1);
        let items = manager.get_batch_items(batch_id).unwrap();
        assert_eq!(items[0].processed_at, first_items[0].processed_at);
    }
}
