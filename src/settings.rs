//! Persisted import settings.
//!
//! Settings live in a YAML file and remember, per target table, the column
//! mapping and merge key, plus the last table and header/merge toggles.
//! Reads prune entries naming columns that were deleted or became
//! unimportable. Files written before schema version 2 had incompatible
//! mapping formats, so their mappings are discarded on load.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    mapping::ColumnMapping,
    schema::{ColumnId, LinkedPrimaryTypes, TableId, TableSchema, is_supported},
};

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schema_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    table_id: Option<TableId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    column_mappings_by_table_id: BTreeMap<TableId, ColumnMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_first_line_headers: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    should_merge_duplicates: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    merge_column_ids_by_table_id: BTreeMap<TableId, Vec<ColumnId>>,
}

impl ImportSettings {
    pub fn new() -> Self {
        ImportSettings {
            schema_version: Some(SCHEMA_VERSION),
            ..ImportSettings::default()
        }
    }

    /// Loads settings, or starts fresh when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No settings at {path:?}; starting with defaults");
            return Ok(ImportSettings::new());
        }
        let file = File::open(path).with_context(|| format!("Opening settings file {path:?}"))?;
        let settings: ImportSettings = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing settings YAML {path:?}"))?;
        Ok(settings.migrated())
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let settings: ImportSettings =
            serde_yaml::from_str(text).context("Parsing settings YAML")?;
        Ok(settings.migrated())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Creating settings file {path:?}"))?;
        serde_yaml::to_writer(BufWriter::new(file), self)
            .with_context(|| format!("Writing settings to {path:?}"))
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Serializing settings to YAML string")
    }

    fn migrated(mut self) -> Self {
        match self.schema_version {
            Some(version) if version >= SCHEMA_VERSION => {
                if version > SCHEMA_VERSION {
                    warn!(
                        "Settings schema version {version} is newer than {SCHEMA_VERSION}; \
                         update this tool before relying on them"
                    );
                }
            }
            _ => {
                self.schema_version = Some(SCHEMA_VERSION);
                self.column_mappings_by_table_id.clear();
            }
        }
        self
    }

    pub fn schema_version(&self) -> Option<u32> {
        self.schema_version
    }

    /// Settings written by a newer release.
    pub fn is_schema_version_out_of_date(&self) -> bool {
        self.schema_version.is_some_and(|version| version > SCHEMA_VERSION)
    }

    pub fn table_id(&self) -> Option<&str> {
        self.table_id.as_deref()
    }

    pub fn set_table_id(&mut self, table_id: impl Into<String>) {
        self.table_id = Some(table_id.into());
    }

    pub fn is_first_line_headers(&self) -> bool {
        self.is_first_line_headers.unwrap_or(true)
    }

    pub fn set_first_line_headers(&mut self, value: bool) {
        self.is_first_line_headers = Some(value);
    }

    pub fn should_merge_duplicates(&self) -> bool {
        self.should_merge_duplicates.unwrap_or(false)
    }

    pub fn set_merge_duplicates(&mut self, value: bool) {
        self.should_merge_duplicates = Some(value);
    }

    /// Stored mapping for `table`, without deleted or unsupported columns.
    pub fn column_mapping(&self, table: &TableSchema, linked: &LinkedPrimaryTypes) -> ColumnMapping {
        self.column_mappings_by_table_id
            .get(&table.id)
            .cloned()
            .unwrap_or_default()
            .pruned(table, linked)
    }

    pub fn set_column_mapping(&mut self, table_id: impl Into<String>, mapping: ColumnMapping) {
        self.column_mappings_by_table_id
            .insert(table_id.into(), mapping);
    }

    /// Stored merge key for `table`, without deleted or unsupported columns.
    pub fn merge_column_ids(&self, table: &TableSchema, linked: &LinkedPrimaryTypes) -> Vec<ColumnId> {
        self.merge_column_ids_by_table_id
            .get(&table.id)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        table
                            .column(id)
                            .is_some_and(|column| is_supported(column, linked))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_merge_column_ids(&mut self, table_id: impl Into<String>, column_ids: Vec<ColumnId>) {
        self.merge_column_ids_by_table_id
            .insert(table_id.into(), column_ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mapping::FieldMapping,
        schema::{Column, ColumnType},
    };

    fn table() -> TableSchema {
        TableSchema {
            id: "tblBooks".into(),
            name: "Books".into(),
            primary_column_id: "fldTitle".into(),
            columns: vec![
                Column::new("fldTitle", "Title", ColumnType::SingleLineText),
                Column::new("fldIsbn", "ISBN", ColumnType::SingleLineText),
                Column::new("fldCreated", "Created", ColumnType::CreatedTime),
            ],
        }
    }

    #[test]
    fn reads_prune_deleted_and_unsupported_columns() {
        let mut settings = ImportSettings::new();
        let mut mapping = ColumnMapping::new();
        mapping.insert("fldTitle", FieldMapping::enabled(0));
        mapping.insert("fldCreated", FieldMapping::enabled(1));
        mapping.insert("fldDeleted", FieldMapping::enabled(2));
        settings.set_column_mapping("tblBooks", mapping);
        settings.set_merge_column_ids(
            "tblBooks",
            vec!["fldDeleted".into(), "fldIsbn".into(), "fldCreated".into()],
        );

        let linked = LinkedPrimaryTypes::default();
        let pruned = settings.column_mapping(&table(), &linked);
        assert_eq!(pruned.len(), 1);
        assert!(pruned.contains("fldTitle"));
        assert_eq!(settings.merge_column_ids(&table(), &linked), vec!["fldIsbn"]);
    }

    #[test]
    fn old_schema_versions_lose_their_mappings() {
        let yaml = "\
schemaVersion: 1
tableId: tblBooks
columnMappingsByTableId:
  tblBooks:
    fldTitle:
      isEnabled: true
      sourceIndex: 0
";
        let settings = ImportSettings::from_yaml_str(yaml).unwrap();
        assert_eq!(settings.schema_version(), Some(SCHEMA_VERSION));
        assert_eq!(settings.table_id(), Some("tblBooks"));
        assert!(
            settings
                .column_mapping(&table(), &LinkedPrimaryTypes::default())
                .is_empty()
        );
    }

    #[test]
    fn newer_schema_versions_are_flagged() {
        let settings = ImportSettings::from_yaml_str("schemaVersion: 3\n").unwrap();
        assert!(settings.is_schema_version_out_of_date());
        assert!(!ImportSettings::new().is_schema_version_out_of_date());
    }

    #[test]
    fn toggles_have_defaults() {
        let settings = ImportSettings::new();
        assert!(settings.is_first_line_headers());
        assert!(!settings.should_merge_duplicates());
    }

    #[test]
    fn settings_round_trip_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yml");
        let mut settings = ImportSettings::new();
        settings.set_table_id("tblBooks");
        settings.set_merge_duplicates(true);
        settings.save(&path).unwrap();
        let loaded = ImportSettings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }
}
