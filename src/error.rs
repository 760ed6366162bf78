//! Error types shared by the import engine.
//!
//! [`ImportError`] covers everything that can stop an import attempt:
//! structural input problems, limit and permission checks, link cell
//! grammar errors, and store failures. Per-cell conversion failures are not
//! errors; they are collected in the diff result instead.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("There was an error parsing the JSON file: {0}")]
    MalformedJson(#[source] serde_json::Error),

    #[error("The JSON file you uploaded was empty.")]
    EmptyInput,

    #[error("Unsupported JSON document shape: {0}")]
    UnsupportedShape(String),

    #[error("The JSON file cannot contain more than {limit} rows (found {found}).")]
    TooManyRows { limit: usize, found: usize },

    #[error(
        "The JSON file has too many records to import. You can import at most {remaining} more record(s)."
    )]
    RowLimitExceeded { remaining: usize, requested: usize },

    #[error("You don't have permissions to import to the selected fields")]
    PermissionDenied,

    #[error("Linked value '{raw}' must split into exactly one row, found {rows}")]
    LinkCellRows { raw: String, rows: usize },

    #[error("Column '{column}' has unsupported type {column_type}")]
    UnsupportedColumn { column: String, column_type: String },

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("{0}")]
    Invalid(String),

    #[error("Column '{column}' cannot read position {index}; the file has {header_count} column(s)")]
    SourceIndexOutOfRange {
        column: String,
        index: usize,
        header_count: usize,
    },

    #[error("Data diff is not ready")]
    DiffNotReady,

    #[error(
        "Import stopped after {created} created, {updated} updated and {linked_rows_created} linked row(s): {source}"
    )]
    PartialWrite {
        created: usize,
        updated: usize,
        linked_rows_created: usize,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Splitting delimited text: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T, E = ImportError> = std::result::Result<T, E>;
