//! Classifies every incoming row as a create, an update, unchanged, or a
//! duplicate of a row an earlier incoming row already claimed.
//!
//! Existing rows are bucketed by the normalized value of the first merge key
//! column so each incoming row only runs the full matcher against rows that
//! can possibly match. Work is spread over scheduler slices.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::debug;

use crate::{
    data::{RowId, RowUpdate, TypedRow, is_blank_row},
    error::{ImportError, Result},
    matcher::{MergeMatcher, Normalized, normalize, values_differ},
    rows::{MappedColumns, Projection, project_row},
    scheduler::Scheduler,
    schema::ColumnId,
    store::ExistingRow,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub to_create: Vec<TypedRow>,
    pub to_update: Vec<RowUpdate>,
    pub unchanged_by_id: BTreeMap<RowId, TypedRow>,
    pub duplicate_ignored_count: usize,
    pub failed_conversions: BTreeMap<ColumnId, Vec<String>>,
}

impl DiffResult {
    /// Rows the executor will write.
    pub fn write_count(&self) -> usize {
        self.to_create.len() + self.to_update.len()
    }

    /// Every non-blank incoming row lands in exactly one of the buckets.
    pub fn classified_count(&self) -> usize {
        self.write_count() + self.unchanged_by_id.len() + self.duplicate_ignored_count
    }

    pub fn has_failures(&self) -> bool {
        self.failed_conversions.values().any(|values| !values.is_empty())
    }

    fn record_failures(&mut self, projection: &Projection) {
        for (column_id, raw) in &projection.failures {
            self.failed_conversions
                .entry(column_id.clone())
                .or_default()
                .push(raw.clone());
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiffRequest<'a> {
    pub rows: &'a [Vec<String>],
    pub columns: &'a MappedColumns,
    pub merge_key: &'a [ColumnId],
}

pub async fn compute_diff(
    request: DiffRequest<'_>,
    existing: &[ExistingRow],
    scheduler: &Scheduler,
) -> Result<DiffResult> {
    let mut diff = DiffResult::default();
    let matcher = MergeMatcher::new(request.merge_key.to_vec());

    let Some(first_key) = matcher.first_column().filter(|_| !existing.is_empty()) else {
        scheduler
            .for_each(request.rows, |_, row| {
                let projection = project_row(row, request.columns)?;
                diff.record_failures(&projection);
                if !is_blank_row(&projection.values) {
                    diff.to_create.push(projection.values);
                }
                Ok::<_, ImportError>(())
            })
            .await?;
        debug!(
            "Diff without matching: {} create(s) from {} row(s)",
            diff.to_create.len(),
            request.rows.len()
        );
        return Ok(diff);
    };

    let mut buckets: HashMap<Normalized, Vec<&ExistingRow>> = HashMap::new();
    for row in existing {
        buckets
            .entry(normalize(row.cell(first_key)))
            .or_default()
            .push(row);
    }

    let mut claimed: HashSet<RowId> = HashSet::new();
    scheduler
        .for_each(request.rows, |_, row| {
            let projection = project_row(row, request.columns)?;
            diff.record_failures(&projection);
            let values = projection.values;
            if is_blank_row(&values) {
                return Ok(());
            }

            let bucket_key = normalize(values.get(first_key).and_then(Option::as_ref));
            let mut matched = buckets
                .get(&bucket_key)
                .into_iter()
                .flatten()
                .filter(|candidate| matcher.matches(&values, candidate))
                .peekable();

            if matched.peek().is_none() {
                diff.to_create.push(values);
                return Ok(());
            }

            // Claimed candidates are skipped, not treated as a stop: a row is
            // a duplicate only once every matching candidate is taken.
            let Some(target) = matched.find(|candidate| !claimed.contains(&candidate.id)) else {
                diff.duplicate_ignored_count += 1;
                return Ok(());
            };
            claimed.insert(target.id.clone());

            let changed = request.columns.iter().any(|mapped| {
                values_differ(
                    &mapped.column,
                    target.cell(&mapped.column.id),
                    values.get(&mapped.column.id).and_then(Option::as_ref),
                )
            });
            if changed {
                diff.to_update.push(RowUpdate {
                    id: target.id.clone(),
                    fields: values,
                });
            } else {
                diff.unchanged_by_id.insert(target.id.clone(), values);
            }
            Ok::<_, ImportError>(())
        })
        .await?;

    debug!(
        "Diff: {} create(s), {} update(s), {} unchanged, {} duplicate(s)",
        diff.to_create.len(),
        diff.to_update.len(),
        diff.unchanged_by_id.len(),
        diff.duplicate_ignored_count
    );
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::Value,
        mapping::{ColumnMapping, FieldMapping},
        schema::{Column, ColumnType, LinkedPrimaryTypes, TableSchema},
    };

    fn table() -> TableSchema {
        TableSchema {
            id: "tblTickets".into(),
            name: "Tickets".into(),
            primary_column_id: "fldKey".into(),
            columns: vec![
                Column::new("fldKey", "Key", ColumnType::SingleLineText),
                Column::new("fldStatus", "Status", ColumnType::SingleSelect)
                    .with_choices(["Open", "Closed"]),
            ],
        }
    }

    fn columns() -> MappedColumns {
        let mut mapping = ColumnMapping::new();
        mapping.insert("fldKey", FieldMapping::enabled(0));
        mapping.insert("fldStatus", FieldMapping::enabled(1));
        MappedColumns::resolve(&table(), &mapping, &LinkedPrimaryTypes::default())
    }

    fn ticket(id: &str, key: &str, status: &str) -> ExistingRow {
        let mut cells = BTreeMap::new();
        cells.insert("fldKey".to_string(), Value::Text(key.into()));
        cells.insert("fldStatus".to_string(), Value::Choice(status.into()));
        ExistingRow::new(id, cells)
    }

    fn rows(values: &[[&str; 2]]) -> Vec<Vec<String>> {
        values
            .iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    #[tokio::test]
    async fn blank_rows_are_skipped_without_a_key() {
        let columns = columns();
        let rows = rows(&[["T-1", "Open"], ["", ""], ["T-2", "Bogus"]]);
        let diff = compute_diff(
            DiffRequest {
                rows: &rows,
                columns: &columns,
                merge_key: &[],
            },
            &[ticket("rec1", "T-1", "Open")],
            &Scheduler::default(),
        )
        .await
        .unwrap();
        assert_eq!(diff.to_create.len(), 2);
        assert!(diff.to_update.is_empty());
        assert_eq!(diff.failed_conversions["fldStatus"], vec!["Bogus"]);
    }

    #[tokio::test]
    async fn second_match_for_the_same_row_is_a_duplicate() {
        let columns = columns();
        let rows = rows(&[["T-1", "Closed"], ["T-1", "Open"], ["T-3", "Open"]]);
        let key = vec!["fldKey".to_string()];
        let diff = compute_diff(
            DiffRequest {
                rows: &rows,
                columns: &columns,
                merge_key: &key,
            },
            &[ticket("rec1", "T-1", "Open"), ticket("rec2", "T-2", "Open")],
            &Scheduler::default(),
        )
        .await
        .unwrap();
        assert_eq!(diff.to_update.len(), 1);
        assert_eq!(diff.to_update[0].id, "rec1");
        assert_eq!(diff.duplicate_ignored_count, 1);
        assert_eq!(diff.to_create.len(), 1);
        assert_eq!(diff.classified_count(), 3);
    }

    #[tokio::test]
    async fn whitespace_differences_are_unchanged() {
        let columns = columns();
        let rows = rows(&[["T-1", " Open "]]);
        let key = vec!["fldKey".to_string()];
        let diff = compute_diff(
            DiffRequest {
                rows: &rows,
                columns: &columns,
                merge_key: &key,
            },
            &[ticket("rec1", "T-1", "Open")],
            &Scheduler::default(),
        )
        .await
        .unwrap();
        assert!(diff.to_update.is_empty());
        assert!(diff.unchanged_by_id.contains_key("rec1"));
    }

    #[tokio::test]
    async fn later_matches_claim_unclaimed_candidates() {
        let columns = columns();
        let rows = rows(&[["T-1", "Open"], ["T-1", "Closed"]]);
        let key = vec!["fldKey".to_string()];
        let diff = compute_diff(
            DiffRequest {
                rows: &rows,
                columns: &columns,
                merge_key: &key,
            },
            &[ticket("rec1", "T-1", "Open"), ticket("rec2", "T-1", "Open")],
            &Scheduler::default(),
        )
        .await
        .unwrap();
        assert!(diff.unchanged_by_id.contains_key("rec1"));
        assert_eq!(diff.to_update.len(), 1);
        assert_eq!(diff.to_update[0].id, "rec2");
        assert_eq!(diff.duplicate_ignored_count, 0);
    }
}
