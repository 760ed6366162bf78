//! Link pre-pass: makes sure every name referenced from a link cell exists in
//! its linked table, then rewrites link cells from names to row ids.
//!
//! Rows are created one at a time through `create_row` because each linked
//! name becomes exactly one row. A linked table whose primary column is
//! computed cannot receive rows, so names missing from it are dropped.

use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;
use log::{debug, info};

use crate::{
    convert,
    data::{LinkRef, RowId, TypedRow, Value},
    executor::ProgressTracker,
    schema::{ColumnId, TableId, TableSchema},
    store::{StoreError, TableStore},
};

/// Unresolved names per linked table, collected from the rows about to be
/// written.
#[derive(Debug, Clone, Default)]
pub struct PendingLinks {
    names_by_table: BTreeMap<TableId, Vec<String>>,
    table_by_column: BTreeMap<ColumnId, TableId>,
}

impl PendingLinks {
    pub fn collect<'r, I>(table: &TableSchema, rows: I) -> Self
    where
        I: IntoIterator<Item = &'r TypedRow>,
    {
        let table_by_column = table
            .link_columns()
            .filter_map(|column| {
                column
                    .linked_table_id()
                    .map(|linked| (column.id.clone(), linked.to_string()))
            })
            .collect::<BTreeMap<_, _>>();

        let mut names_by_table: BTreeMap<TableId, Vec<String>> = BTreeMap::new();
        for row in rows {
            for (column_id, linked_table) in &table_by_column {
                let Some(Some(Value::Links(links))) = row.get(column_id) else {
                    continue;
                };
                let names = names_by_table.entry(linked_table.clone()).or_default();
                for name in links
                    .iter()
                    .filter(|link| !link.is_resolved())
                    .filter_map(|link| link.name.as_ref())
                {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
            }
        }
        names_by_table.retain(|_, names| !names.is_empty());

        PendingLinks {
            names_by_table,
            table_by_column,
        }
    }

    /// Distinct names across all linked tables.
    pub fn name_count(&self) -> usize {
        self.names_by_table.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.names_by_table.is_empty()
    }

    pub fn names(&self, table_id: &str) -> &[String] {
        self.names_by_table
            .get(table_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Row id of every linked name that could be resolved.
#[derive(Debug, Clone, Default)]
pub struct LinkIds {
    ids_by_table: HashMap<TableId, HashMap<String, RowId>>,
    table_by_column: BTreeMap<ColumnId, TableId>,
}

impl LinkIds {
    pub fn id_for(&self, table_id: &str, name: &str) -> Option<&RowId> {
        self.ids_by_table.get(table_id)?.get(name)
    }

    /// Replaces names with ids in every link cell of `row`. Names that did
    /// not resolve are dropped and the result holds each id once.
    pub fn rewrite(&self, row: &mut TypedRow) {
        for (column_id, linked_table) in &self.table_by_column {
            let Some(Some(Value::Links(links))) = row.get_mut(column_id) else {
                continue;
            };
            let rewritten = links
                .drain(..)
                .filter_map(|link| match link.id {
                    Some(id) => Some(id),
                    None => {
                        let name = link.name?;
                        let id = self.id_for(linked_table, &name).cloned();
                        if id.is_none() {
                            debug!("Dropping unresolved link '{name}' in column '{column_id}'");
                        }
                        id
                    }
                })
                .unique()
                .map(LinkRef::resolved)
                .collect::<Vec<_>>();
            *links = rewritten;
        }
    }
}

pub struct LinkResolver<'a, S: TableStore + ?Sized> {
    store: &'a S,
    created: usize,
}

impl<'a, S: TableStore + ?Sized> LinkResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        LinkResolver { store, created: 0 }
    }

    /// Linked rows created so far, including before a failure.
    pub fn created(&self) -> usize {
        self.created
    }

    pub async fn resolve(
        &mut self,
        pending: &PendingLinks,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<LinkIds, StoreError> {
        let mut ids_by_table = HashMap::new();
        for (table_id, names) in &pending.names_by_table {
            let ids = self.resolve_table(table_id, names, progress).await?;
            ids_by_table.insert(table_id.clone(), ids);
        }
        Ok(LinkIds {
            ids_by_table,
            table_by_column: pending.table_by_column.clone(),
        })
    }

    async fn resolve_table(
        &mut self,
        table_id: &str,
        names: &[String],
        progress: &mut ProgressTracker<'_>,
    ) -> Result<HashMap<String, RowId>, StoreError> {
        let Some(linked) = self.store.table_schema(table_id).await? else {
            debug!("Linked table '{table_id}' no longer exists; leaving its names unresolved");
            progress.advance(names.len());
            return Ok(HashMap::new());
        };
        let Some(primary) = linked.primary_column().cloned() else {
            progress.advance(names.len());
            return Ok(HashMap::new());
        };

        let mut ids = self
            .store
            .load_existing_rows(table_id)
            .await?
            .into_iter()
            .filter_map(|row| {
                let name = convert::display(row.cell(&primary.id)?, &primary);
                Some((name, row.id))
            })
            .collect::<HashMap<_, _>>();

        let (known, missing): (Vec<&String>, Vec<&String>) =
            names.iter().partition(|name| ids.contains_key(name.as_str()));
        progress.advance(known.len());

        if primary.column_type.is_computed() {
            debug!(
                "Primary column of '{}' is computed; {} name(s) cannot be created",
                linked.name,
                missing.len()
            );
            progress.advance(missing.len());
            return Ok(ids);
        }

        let mut created_here = 0;
        for name in missing {
            let value = match convert::convert(name, &primary) {
                Ok(Some(value)) => value,
                Ok(None) | Err(_) => {
                    debug!(
                        "Linked name '{name}' cannot be stored in primary column '{}'",
                        primary.name
                    );
                    progress.advance(1);
                    continue;
                }
            };
            let mut fields = TypedRow::new();
            fields.insert(primary.id.clone(), Some(value));
            let id = self.store.create_row(table_id, fields).await?;
            self.created += 1;
            created_here += 1;
            ids.insert(name.clone(), id);
            progress.advance(1);
        }
        info!(
            "Linked table '{}' resolved {} name(s), created {} row(s)",
            linked.name,
            names.len(),
            created_here
        );
        Ok(ids)
    }
}
