//! Applies a diff to the store in bounded batches.
//!
//! Order of work: the link pre-pass, then updates, then creates. Each update
//! batch first asks the store which of its targets still exist; rows deleted
//! since the diff was computed are written as new rows instead. Progress is
//! counted in rows touched and never runs backwards.

use itertools::Itertools;
use log::{debug, info};

use crate::{
    data::{RowUpdate, TypedRow},
    diff::DiffResult,
    error::{ImportError, Result},
    link::{LinkResolver, PendingLinks},
    schema::TableSchema,
    store::{StoreError, TableStore},
};

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Monotonic progress counter clamped to its total.
pub struct ProgressTracker<'a> {
    touched: usize,
    total: usize,
    on_progress: &'a mut dyn FnMut(usize, usize),
}

impl<'a> ProgressTracker<'a> {
    pub fn new(total: usize, on_progress: &'a mut dyn FnMut(usize, usize)) -> Self {
        ProgressTracker {
            touched: 0,
            total,
            on_progress,
        }
    }

    pub fn advance(&mut self, rows: usize) {
        self.touched = self.touched.saturating_add(rows).min(self.total);
        (self.on_progress)(self.touched, self.total);
    }

    pub fn touched(&self) -> usize {
        self.touched
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub created: usize,
    pub updated: usize,
    /// Update targets deleted mid-import and written as new rows.
    pub rerouted: usize,
    pub linked_rows_created: usize,
    pub total: usize,
}

impl ExecutionReport {
    fn has_writes(&self) -> bool {
        self.created + self.updated + self.linked_rows_created > 0
    }
}

pub struct BatchExecutor<'a, S: TableStore + ?Sized> {
    store: &'a S,
    table: &'a TableSchema,
    batch_size: usize,
}

impl<'a, S: TableStore + ?Sized> BatchExecutor<'a, S> {
    pub fn new(store: &'a S, table: &'a TableSchema) -> Self {
        BatchExecutor {
            store,
            table,
            batch_size: DEFAULT_BATCH_SIZE.min(store.request_limit()).max(1),
        }
    }

    /// Sets the batch size, capped by the store's per-call row limit.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, self.store.request_limit().max(1));
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Rows touched by executing `diff`: writes plus distinct linked names.
    pub fn total_for(&self, diff: &DiffResult) -> usize {
        diff.write_count() + self.pending_links(diff).name_count()
    }

    fn pending_links(&self, diff: &DiffResult) -> PendingLinks {
        PendingLinks::collect(
            self.table,
            diff.to_create
                .iter()
                .chain(diff.to_update.iter().map(|update| &update.fields)),
        )
    }

    pub async fn execute(
        &self,
        diff: DiffResult,
        on_progress: &mut dyn FnMut(usize, usize),
    ) -> Result<ExecutionReport> {
        let pending = self.pending_links(&diff);
        let total = diff.write_count() + pending.name_count();
        let mut progress = ProgressTracker::new(total, on_progress);
        let mut report = ExecutionReport {
            total,
            ..ExecutionReport::default()
        };
        let DiffResult {
            to_create: mut creates,
            to_update: mut updates,
            ..
        } = diff;

        if !pending.is_empty() {
            let mut resolver = LinkResolver::new(self.store);
            let resolved = resolver.resolve(&pending, &mut progress).await;
            report.linked_rows_created = resolver.created();
            let ids = resolved.map_err(|err| self.failure(err, &report))?;
            for row in creates.iter_mut() {
                ids.rewrite(row);
            }
            for update in updates.iter_mut() {
                ids.rewrite(&mut update.fields);
            }
        }

        for chunk in batches(updates, self.batch_size) {
            let live = self.reroute_missing(chunk, &mut creates, &mut report).await?;
            if live.is_empty() {
                continue;
            }
            let count = live.len();
            self.store
                .update_rows(&self.table.id, live)
                .await
                .map_err(|err| self.failure(err, &report))?;
            report.updated += count;
            progress.advance(count);
            debug!("Updated {count} row(s) in '{}'", self.table.name);
        }

        for chunk in batches(creates, self.batch_size) {
            let count = chunk.len();
            self.store
                .create_rows(&self.table.id, chunk)
                .await
                .map_err(|err| self.failure(err, &report))?;
            report.created += count;
            progress.advance(count);
            debug!("Created {count} row(s) in '{}'", self.table.name);
        }

        info!(
            "Import into '{}' finished: {} created, {} updated, {} linked row(s) created",
            self.table.name, report.created, report.updated, report.linked_rows_created
        );
        Ok(report)
    }

    /// Splits off updates whose target row was deleted and queues their
    /// fields as new rows.
    async fn reroute_missing(
        &self,
        chunk: Vec<RowUpdate>,
        creates: &mut Vec<TypedRow>,
        report: &mut ExecutionReport,
    ) -> Result<Vec<RowUpdate>> {
        let ids = chunk
            .iter()
            .map(|update| update.id.clone())
            .collect::<Vec<_>>();
        let alive = self
            .store
            .rows_still_exist(&self.table.id, &ids)
            .await
            .map_err(|err| self.failure(err, report))?;
        let (live, vanished): (Vec<_>, Vec<_>) = chunk
            .into_iter()
            .partition(|update| alive.contains(&update.id));
        if !vanished.is_empty() {
            info!(
                "{} row(s) were deleted during the import and will be created instead",
                vanished.len()
            );
            report.rerouted += vanished.len();
            creates.extend(vanished.into_iter().map(|update| update.fields));
        }
        Ok(live)
    }

    fn failure(&self, err: StoreError, report: &ExecutionReport) -> ImportError {
        if report.has_writes() {
            ImportError::PartialWrite {
                created: report.created,
                updated: report.updated,
                linked_rows_created: report.linked_rows_created,
                source: err,
            }
        } else {
            ImportError::Store(err)
        }
    }
}

fn batches<T>(rows: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let chunks = rows.into_iter().chunks(size.max(1));
    chunks.into_iter().map(Iterator::collect).collect()
}
