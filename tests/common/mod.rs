#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use json_table_import::{
    data::{LinkRef, TypedRow, Value},
    preprocess::ParsedGrid,
    schema::{Column, ColumnType, TableSchema},
    store::{MemoryStore, StoredRow, StoredTable},
};
use tempfile::{TempDir, tempdir};

pub const CONTACTS: &str = "tblContacts";
pub const COMPANIES: &str = "tblCompanies";
pub const TAGS: &str = "tblTags";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Persists `store` as a store file under the workspace.
    pub fn write_store(&self, name: &str, store: &MemoryStore) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        store.save(&path).expect("save store file");
        path
    }
}

pub fn companies_table() -> TableSchema {
    TableSchema {
        id: COMPANIES.into(),
        name: "Companies".into(),
        primary_column_id: "fldCompanyName".into(),
        columns: vec![Column::new(
            "fldCompanyName",
            "Name",
            ColumnType::SingleLineText,
        )],
    }
}

/// Tags are named by a formula, so rows can be matched but never created.
pub fn tags_table() -> TableSchema {
    TableSchema {
        id: TAGS.into(),
        name: "Tags".into(),
        primary_column_id: "fldTagLabel".into(),
        columns: vec![Column::new("fldTagLabel", "Label", ColumnType::Formula)],
    }
}

pub fn contacts_table() -> TableSchema {
    TableSchema {
        id: CONTACTS.into(),
        name: "Contacts".into(),
        primary_column_id: "fldEmail".into(),
        columns: vec![
            Column::new("fldEmail", "Email", ColumnType::Email),
            Column::new("fldName", "Name", ColumnType::SingleLineText),
            Column::new("fldAge", "Age", ColumnType::Number),
            Column::new("fldStatus", "Status", ColumnType::SingleSelect)
                .with_choices(["Lead", "Customer"]),
            Column::new("fldCompany", "Company", ColumnType::MultipleRecordLinks)
                .linked_to(COMPANIES),
            Column::new("fldTags", "Tags", ColumnType::MultipleRecordLinks).linked_to(TAGS),
            Column::new("fldCreated", "Created", ColumnType::CreatedTime),
        ],
    }
}

pub fn stored(id: &str, cells: &[(&str, Value)]) -> StoredRow {
    StoredRow {
        id: id.into(),
        fields: cells
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect::<BTreeMap<_, _>>(),
    }
}

pub fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

pub fn choice(value: &str) -> Value {
    Value::Choice(value.to_string())
}

pub fn links(ids: &[&str]) -> Value {
    Value::Links(ids.iter().map(|id| LinkRef::resolved(*id)).collect())
}

/// Contacts linked to companies and tags, with two existing contacts, one
/// company and one tag.
pub fn crm_store() -> MemoryStore {
    MemoryStore::with_tables(vec![
        StoredTable::new(companies_table())
            .with_rows(vec![stored("recAcme", &[("fldCompanyName", text("Acme"))])]),
        StoredTable::new(tags_table())
            .with_rows(vec![stored("recVip", &[("fldTagLabel", text("vip"))])]),
        StoredTable::new(contacts_table()).with_rows(vec![
            stored(
                "recAda",
                &[
                    ("fldEmail", text("ada@example.test")),
                    ("fldName", text("Ada")),
                    ("fldStatus", choice("Lead")),
                    ("fldCompany", links(&["recAcme"])),
                ],
            ),
            stored(
                "recBob",
                &[
                    ("fldEmail", text("bob@example.test")),
                    ("fldName", text("Bob")),
                    ("fldStatus", choice("Customer")),
                ],
            ),
        ]),
    ])
}

pub fn grid(lines: &[&[&str]]) -> ParsedGrid {
    ParsedGrid {
        lines: lines
            .iter()
            .map(|line| line.iter().map(|cell| cell.to_string()).collect())
            .collect(),
    }
}

pub fn row(cells: &[(&str, Option<Value>)]) -> TypedRow {
    cells
        .iter()
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

/// Records every progress callback.
#[derive(Debug, Default)]
pub struct ProgressLog {
    pub calls: Vec<(usize, usize)>,
}

impl ProgressLog {
    pub fn last(&self) -> Option<(usize, usize)> {
        self.calls.last().copied()
    }

    pub fn is_monotonic(&self) -> bool {
        self.calls.windows(2).all(|pair| pair[0].0 <= pair[1].0)
    }
}
