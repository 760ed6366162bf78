//! Which incoming column feeds which target column.
//!
//! A [`ColumnMapping`] is keyed by target column id. Each entry says whether
//! the column takes part in the import and which header index feeds it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::{ColumnId, LinkedPrimaryTypes, TableSchema, is_supported};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub is_enabled: bool,
    #[serde(default)]
    pub source_index: Option<usize>,
}

impl FieldMapping {
    pub fn enabled(source_index: usize) -> Self {
        FieldMapping {
            is_enabled: true,
            source_index: Some(source_index),
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_enabled && self.source_index.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping {
    entries: BTreeMap<ColumnId, FieldMapping>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column_id: &str) -> Option<&FieldMapping> {
        self.entries.get(column_id)
    }

    pub fn insert(&mut self, column_id: impl Into<String>, mapping: FieldMapping) {
        self.entries.insert(column_id.into(), mapping);
    }

    pub fn contains(&self, column_id: &str) -> bool {
        self.entries.contains_key(column_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ColumnId, &FieldMapping)> {
        self.entries.iter()
    }

    /// Drops entries naming columns that were deleted or are not importable.
    pub fn prune(&mut self, table: &TableSchema, linked: &LinkedPrimaryTypes) {
        self.entries.retain(|column_id, _| {
            table
                .column(column_id)
                .is_some_and(|column| is_supported(column, linked))
        });
    }

    pub fn pruned(mut self, table: &TableSchema, linked: &LinkedPrimaryTypes) -> Self {
        self.prune(table, linked);
        self
    }

    /// True when every source index is unset or within `header_count`.
    pub fn fits_headers(&self, header_count: usize) -> bool {
        self.entries.values().all(|mapping| {
            mapping
                .source_index
                .is_none_or(|index| index < header_count)
        })
    }

    /// Maps every supported column whose name equals a header, ignoring
    /// case. The first matching header wins.
    pub fn matching_headers(
        headers: &[String],
        table: &TableSchema,
        linked: &LinkedPrimaryTypes,
    ) -> Self {
        let mut mapping = ColumnMapping::new();
        for (index, header) in headers.iter().enumerate() {
            let Some(column) = table.columns.iter().find(|column| {
                column.name.eq_ignore_ascii_case(header.trim()) && is_supported(column, linked)
            }) else {
                continue;
            };
            if mapping.contains(&column.id) {
                continue;
            }
            mapping.insert(column.id.clone(), FieldMapping::enabled(index));
        }
        mapping
    }

    /// Adds entries from `other` for columns this mapping does not mention.
    pub fn fill_from(&mut self, other: &ColumnMapping) {
        for (column_id, mapping) in other.iter() {
            self.entries
                .entry(column_id.clone())
                .or_insert(*mapping);
        }
    }

    pub fn set_source_index(&mut self, column_id: &str, source_index: Option<usize>) {
        self.entries
            .entry(column_id.to_string())
            .and_modify(|mapping| mapping.source_index = source_index)
            .or_insert(FieldMapping {
                is_enabled: true,
                source_index,
            });
    }

    /// Flips a column on or off. Turning a column off forgets its source.
    pub fn toggle(&mut self, column_id: &str) {
        match self.entries.get_mut(column_id) {
            Some(mapping) if mapping.is_enabled => {
                mapping.is_enabled = false;
                mapping.source_index = None;
            }
            Some(mapping) => mapping.is_enabled = true,
            None => {
                self.entries.insert(
                    column_id.to_string(),
                    FieldMapping {
                        is_enabled: true,
                        source_index: None,
                    },
                );
            }
        }
    }

    pub fn enabled_column_ids(&self) -> impl Iterator<Item = &ColumnId> {
        self.entries
            .iter()
            .filter(|(_, mapping)| mapping.is_enabled)
            .map(|(column_id, _)| column_id)
    }

    /// Enabled and pointing at a header.
    pub fn is_mapped(&self, column_id: &str) -> bool {
        self.get(column_id).is_some_and(FieldMapping::is_active)
    }
}

/// Mapping and header mode chosen when a file is first reviewed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialLayout {
    pub mapping: ColumnMapping,
    pub is_first_line_headers: bool,
}

/// Starts from the stored mapping, then adds columns whose name matches a
/// value of the first line. Any such match means the first line holds
/// headers. Otherwise the stored header choice is kept only when the stored
/// mapping still fits the file.
pub fn initial_layout(
    first_line: &[String],
    stored: ColumnMapping,
    stored_first_line_headers: bool,
    table: &TableSchema,
    linked: &LinkedPrimaryTypes,
) -> InitialLayout {
    let fits = stored.fits_headers(first_line.len());
    let matching = ColumnMapping::matching_headers(first_line, table, linked);
    let mut mapping = stored;
    let is_first_line_headers = if matching.is_empty() {
        fits && stored_first_line_headers
    } else {
        mapping.fill_from(&matching);
        true
    };
    InitialLayout {
        mapping,
        is_first_line_headers,
    }
}
