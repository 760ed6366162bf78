//! Row projection: raw incoming cells to typed values per target column.
//!
//! [`MappedColumns::resolve()`] picks the target columns an import writes,
//! walking the table's columns rather than the mapping so stale mapping
//! entries never reach the conversion step. [`project_row()`] then converts
//! one incoming row and reports the raw values that failed conversion.

use std::collections::BTreeMap;

use crate::{
    convert,
    data::TypedRow,
    error::Result,
    mapping::ColumnMapping,
    schema::{Column, ColumnId, LinkedPrimaryTypes, TableSchema, is_supported},
};

#[derive(Debug, Clone)]
pub struct MappedColumn {
    pub column: Column,
    pub source_index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MappedColumns {
    columns: Vec<MappedColumn>,
}

impl MappedColumns {
    /// Supported, enabled columns with a source index, in table order.
    pub fn resolve(
        table: &TableSchema,
        mapping: &ColumnMapping,
        linked: &LinkedPrimaryTypes,
    ) -> Self {
        let columns = table
            .columns
            .iter()
            .filter(|column| is_supported(column, linked))
            .filter_map(|column| {
                let entry = mapping.get(&column.id)?;
                if !entry.is_enabled {
                    return None;
                }
                entry.source_index.map(|source_index| MappedColumn {
                    column: column.clone(),
                    source_index,
                })
            })
            .collect();
        MappedColumns { columns }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappedColumn> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, column_id: &str) -> Option<&MappedColumn> {
        self.columns
            .iter()
            .find(|mapped| mapped.column.id == column_id)
    }

    pub fn column_ids(&self) -> impl Iterator<Item = &ColumnId> {
        self.columns.iter().map(|mapped| &mapped.column.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub values: TypedRow,
    /// Raw values that were non-empty but did not convert.
    pub failures: BTreeMap<ColumnId, String>,
}

pub fn project_row(row: &[String], columns: &MappedColumns) -> Result<Projection> {
    let mut projection = Projection::default();
    for mapped in columns.iter() {
        let raw = row
            .get(mapped.source_index)
            .map(String::as_str)
            .unwrap_or("");
        let value = convert::convert(raw, &mapped.column)?;
        if value.is_none() && !raw.is_empty() {
            projection
                .failures
                .insert(mapped.column.id.clone(), raw.to_string());
        }
        projection.values.insert(mapped.column.id.clone(), value);
    }
    Ok(projection)
}
