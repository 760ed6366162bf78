//! The table store query surface and an in-memory reference store.
//!
//! The import engine only talks to a store through [`TableStore`]. Every
//! call is async and awaited in order by the engine; nothing is submitted
//! concurrently.
//!
//! [`MemoryStore`] keeps tables in memory, optionally persisted to a JSON
//! file, and enforces a per-call row ceiling the way a remote store limits
//! request payloads.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    data::{LinkRef, RowId, RowUpdate, TypedRow, Value},
    schema::{ColumnId, TableSchema},
};

pub const DEFAULT_REQUEST_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Row '{row}' not found in table '{table}'")]
    RowNotFound { table: String, row: String },

    #[error("Column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    #[error("Request carries {requested} rows but the store accepts at most {limit} per call")]
    RequestTooLarge { requested: usize, limit: usize },

    #[error("Table '{0}' is read-only")]
    ReadOnly(String),

    #[error("Store rejected the request: {0}")]
    Rejected(String),

    #[error("Store file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A row already present in the target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRow {
    pub id: RowId,
    cells: BTreeMap<ColumnId, Value>,
}

impl ExistingRow {
    pub fn new(id: impl Into<String>, cells: BTreeMap<ColumnId, Value>) -> Self {
        ExistingRow {
            id: id.into(),
            cells,
        }
    }

    pub fn cell(&self, column_id: &str) -> Option<&Value> {
        self.cells.get(column_id)
    }

    pub fn cells(&self) -> &BTreeMap<ColumnId, Value> {
        &self.cells
    }

    /// Display form of the given column, empty when the cell is empty.
    pub fn display_of(&self, column_id: &str) -> String {
        self.cell(column_id)
            .map(Value::as_display)
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait TableStore: Send + Sync {
    async fn table_schema(&self, table_id: &str) -> Result<Option<TableSchema>, StoreError>;

    /// Snapshot of every row in the table. Link cells carry the linked row's
    /// primary display value as their name.
    async fn load_existing_rows(&self, table_id: &str) -> Result<Vec<ExistingRow>, StoreError>;

    /// The subset of `ids` still present in the table.
    async fn rows_still_exist(
        &self,
        table_id: &str,
        ids: &[RowId],
    ) -> Result<HashSet<RowId>, StoreError>;

    async fn create_rows(
        &self,
        table_id: &str,
        rows: Vec<TypedRow>,
    ) -> Result<Vec<RowId>, StoreError>;

    async fn update_rows(&self, table_id: &str, updates: Vec<RowUpdate>) -> Result<(), StoreError>;

    async fn create_row(&self, table_id: &str, fields: TypedRow) -> Result<RowId, StoreError>;

    /// Largest number of rows accepted by one `create_rows`/`update_rows`.
    fn request_limit(&self) -> usize {
        DEFAULT_REQUEST_LIMIT
    }

    fn can_create_rows(&self, table_id: &str, rows: &[TypedRow]) -> bool;

    fn can_update_rows(&self, table_id: &str, updates: &[RowUpdate]) -> bool;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredRow {
    pub id: RowId,
    #[serde(default)]
    pub fields: BTreeMap<ColumnId, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTable {
    pub schema: TableSchema,
    #[serde(default)]
    pub rows: Vec<StoredRow>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

impl StoredTable {
    pub fn new(schema: TableSchema) -> Self {
        StoredTable {
            schema,
            rows: Vec::new(),
            read_only: false,
        }
    }

    pub fn with_rows(mut self, rows: Vec<StoredRow>) -> Self {
        self.rows = rows;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub tables: Vec<StoredTable>,
}

#[derive(Debug)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
    request_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new(StoreData::default())
    }
}

impl MemoryStore {
    pub fn new(data: StoreData) -> Self {
        MemoryStore {
            data: Mutex::new(data),
            request_limit: DEFAULT_REQUEST_LIMIT,
        }
    }

    pub fn with_tables(tables: Vec<StoredTable>) -> Self {
        MemoryStore::new(StoreData { tables })
    }

    pub fn with_request_limit(mut self, limit: usize) -> Self {
        self.request_limit = limit.max(1);
        self
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path)?;
        let data: StoreData = serde_json::from_reader(BufReader::new(file))?;
        debug!("Loaded {} table(s) from {:?}", data.tables.len(), path);
        Ok(MemoryStore::new(data))
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let data = self.lock();
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &*data)?;
        Ok(())
    }

    pub fn snapshot(&self) -> StoreData {
        self.lock().clone()
    }

    pub fn table_schemas(&self) -> Vec<TableSchema> {
        self.lock()
            .tables
            .iter()
            .map(|table| table.schema.clone())
            .collect()
    }

    pub fn find_table(&self, token: &str) -> Option<TableSchema> {
        let token = token.trim();
        let data = self.lock();
        data.tables
            .iter()
            .find(|table| table.schema.id == token)
            .or_else(|| {
                data.tables
                    .iter()
                    .find(|table| table.schema.name.eq_ignore_ascii_case(token))
            })
            .map(|table| table.schema.clone())
    }

    pub fn rows(&self, table_id: &str) -> Vec<StoredRow> {
        self.lock()
            .tables
            .iter()
            .find(|table| table.schema.id == table_id)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table_id: &str) -> usize {
        self.lock()
            .tables
            .iter()
            .find(|table| table.schema.id == table_id)
            .map_or(0, |table| table.rows.len())
    }

    /// Removes rows, as another collaborator editing the table would.
    pub fn delete_rows(&self, table_id: &str, ids: &[RowId]) -> Result<usize, StoreError> {
        let mut data = self.lock();
        let table = table_mut(&mut data, table_id)?;
        let before = table.rows.len();
        table.rows.retain(|row| !ids.contains(&row.id));
        Ok(before - table.rows.len())
    }

    pub fn set_read_only(&self, table_id: &str, read_only: bool) -> Result<(), StoreError> {
        let mut data = self.lock();
        table_mut(&mut data, table_id)?.read_only = read_only;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, StoreData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_request_size(&self, requested: usize) -> Result<(), StoreError> {
        if requested > self.request_limit {
            return Err(StoreError::RequestTooLarge {
                requested,
                limit: self.request_limit,
            });
        }
        Ok(())
    }

    fn is_writable(&self, table_id: &str) -> bool {
        self.lock()
            .tables
            .iter()
            .find(|table| table.schema.id == table_id)
            .is_some_and(|table| !table.read_only)
    }
}

fn table_mut<'a>(data: &'a mut StoreData, table_id: &str) -> Result<&'a mut StoredTable, StoreError> {
    data.tables
        .iter_mut()
        .find(|table| table.schema.id == table_id)
        .ok_or_else(|| StoreError::TableNotFound(table_id.to_string()))
}

fn new_row_id() -> RowId {
    let simple = Uuid::new_v4().simple().to_string();
    format!("rec{}", &simple[..14])
}

/// Validates columns and reduces link cells to ids before they are stored.
fn prepare_fields(
    table: &StoredTable,
    fields: TypedRow,
) -> Result<BTreeMap<ColumnId, Option<Value>>, StoreError> {
    let mut prepared = BTreeMap::new();
    for (column_id, value) in fields {
        let column = table
            .schema
            .column(&column_id)
            .ok_or_else(|| StoreError::ColumnNotFound {
                table: table.schema.id.clone(),
                column: column_id.clone(),
            })?;
        if column.column_type.is_computed() {
            return Err(StoreError::Rejected(format!(
                "column '{}' is computed and cannot be written",
                column.name
            )));
        }
        let value = match value {
            Some(Value::Links(links)) => {
                let mut ids = Vec::with_capacity(links.len());
                for link in links {
                    let id = link.id.ok_or_else(|| {
                        StoreError::Rejected(format!(
                            "link cell for column '{}' contains an unresolved reference",
                            column.name
                        ))
                    })?;
                    if !ids.iter().any(|existing: &LinkRef| existing.id.as_ref() == Some(&id)) {
                        ids.push(LinkRef::resolved(id));
                    }
                }
                Some(Value::Links(ids))
            }
            other => other,
        };
        prepared.insert(column_id, value);
    }
    Ok(prepared)
}

fn apply_fields(row: &mut StoredRow, fields: BTreeMap<ColumnId, Option<Value>>) {
    for (column_id, value) in fields {
        match value {
            Some(value) => {
                row.fields.insert(column_id, value);
            }
            None => {
                row.fields.remove(&column_id);
            }
        }
    }
}

fn primary_names(data: &StoreData, table_id: &str) -> HashMap<RowId, String> {
    let Some(table) = data.tables.iter().find(|table| table.schema.id == table_id) else {
        return HashMap::new();
    };
    let primary = &table.schema.primary_column_id;
    table
        .rows
        .iter()
        .map(|row| {
            let name = row
                .fields
                .get(primary)
                .map(Value::as_display)
                .unwrap_or_default();
            (row.id.clone(), name)
        })
        .collect()
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn table_schema(&self, table_id: &str) -> Result<Option<TableSchema>, StoreError> {
        Ok(self
            .lock()
            .tables
            .iter()
            .find(|table| table.schema.id == table_id)
            .map(|table| table.schema.clone()))
    }

    async fn load_existing_rows(&self, table_id: &str) -> Result<Vec<ExistingRow>, StoreError> {
        let data = self.lock();
        let table = data
            .tables
            .iter()
            .find(|table| table.schema.id == table_id)
            .ok_or_else(|| StoreError::TableNotFound(table_id.to_string()))?;

        let names_by_column = table
            .schema
            .link_columns()
            .filter_map(|column| {
                column
                    .linked_table_id()
                    .map(|linked| (column.id.clone(), primary_names(&data, linked)))
            })
            .collect::<HashMap<_, _>>();

        let rows = table
            .rows
            .iter()
            .map(|row| {
                let cells = row
                    .fields
                    .iter()
                    .map(|(column_id, value)| {
                        let value = match (value, names_by_column.get(column_id)) {
                            (Value::Links(links), Some(names)) => Value::Links(
                                links
                                    .iter()
                                    .map(|link| LinkRef {
                                        id: link.id.clone(),
                                        name: link
                                            .id
                                            .as_ref()
                                            .and_then(|id| names.get(id).cloned()),
                                    })
                                    .collect(),
                            ),
                            (other, _) => other.clone(),
                        };
                        (column_id.clone(), value)
                    })
                    .collect();
                ExistingRow::new(row.id.clone(), cells)
            })
            .collect();
        Ok(rows)
    }

    async fn rows_still_exist(
        &self,
        table_id: &str,
        ids: &[RowId],
    ) -> Result<HashSet<RowId>, StoreError> {
        let data = self.lock();
        let table = data
            .tables
            .iter()
            .find(|table| table.schema.id == table_id)
            .ok_or_else(|| StoreError::TableNotFound(table_id.to_string()))?;
        let wanted = ids.iter().collect::<HashSet<_>>();
        Ok(table
            .rows
            .iter()
            .filter(|row| wanted.contains(&row.id))
            .map(|row| row.id.clone())
            .collect())
    }

    async fn create_rows(
        &self,
        table_id: &str,
        rows: Vec<TypedRow>,
    ) -> Result<Vec<RowId>, StoreError> {
        self.check_request_size(rows.len())?;
        let mut data = self.lock();
        let table = table_mut(&mut data, table_id)?;
        if table.read_only {
            return Err(StoreError::ReadOnly(table_id.to_string()));
        }
        let prepared = rows
            .into_iter()
            .map(|fields| prepare_fields(table, fields))
            .collect::<Result<Vec<_>, _>>()?;
        let mut ids = Vec::with_capacity(prepared.len());
        for fields in prepared {
            let mut row = StoredRow {
                id: new_row_id(),
                fields: BTreeMap::new(),
            };
            apply_fields(&mut row, fields);
            ids.push(row.id.clone());
            table.rows.push(row);
        }
        Ok(ids)
    }

    async fn update_rows(&self, table_id: &str, updates: Vec<RowUpdate>) -> Result<(), StoreError> {
        self.check_request_size(updates.len())?;
        let mut data = self.lock();
        let table = table_mut(&mut data, table_id)?;
        if table.read_only {
            return Err(StoreError::ReadOnly(table_id.to_string()));
        }
        let mut prepared = Vec::with_capacity(updates.len());
        for update in updates {
            if !table.rows.iter().any(|row| row.id == update.id) {
                return Err(StoreError::RowNotFound {
                    table: table_id.to_string(),
                    row: update.id,
                });
            }
            prepared.push((update.id, prepare_fields(table, update.fields)?));
        }
        for (id, fields) in prepared {
            if let Some(row) = table.rows.iter_mut().find(|row| row.id == id) {
                apply_fields(row, fields);
            }
        }
        Ok(())
    }

    async fn create_row(&self, table_id: &str, fields: TypedRow) -> Result<RowId, StoreError> {
        let mut ids = self.create_rows(table_id, vec![fields]).await?;
        ids.pop()
            .ok_or_else(|| StoreError::Rejected("create returned no row id".to_string()))
    }

    fn request_limit(&self) -> usize {
        self.request_limit
    }

    fn can_create_rows(&self, table_id: &str, _rows: &[TypedRow]) -> bool {
        self.is_writable(table_id)
    }

    fn can_update_rows(&self, table_id: &str, _updates: &[RowUpdate]) -> bool {
        self.is_writable(table_id)
    }
}
