//! Table schema model and the column compatibility filter.
//!
//! [`ColumnType`] enumerates every column type the store knows about. Only a
//! subset is importable; [`is_supported`] decides importability for a
//! concrete [`Column`], consulting [`LinkedPrimaryTypes`] for link columns
//! because a link is only importable when the linked table's primary value
//! can be matched by name.

use std::{collections::HashMap, fmt, str::FromStr};

use anyhow::anyhow;
use log::debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::{error::Result, store::TableStore};

pub type ColumnId = String;
pub type TableId = String;

const DEFAULT_RATING_MAX: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    SingleLineText,
    Email,
    Url,
    MultilineText,
    Number,
    Currency,
    Percent,
    SingleSelect,
    MultipleSelects,
    SingleCollaborator,
    MultipleCollaborators,
    MultipleRecordLinks,
    Date,
    DateTime,
    PhoneNumber,
    Checkbox,
    Rating,
    Duration,
    Formula,
    AutoNumber,
    CreatedTime,
    LastModifiedTime,
    Rollup,
    Lookup,
    Count,
    Attachment,
    Button,
    Barcode,
}

pub const SUPPORTED_TYPES: &[ColumnType] = &[
    ColumnType::SingleLineText,
    ColumnType::Email,
    ColumnType::Url,
    ColumnType::MultilineText,
    ColumnType::Number,
    ColumnType::Currency,
    ColumnType::Percent,
    ColumnType::SingleSelect,
    ColumnType::MultipleSelects,
    ColumnType::SingleCollaborator,
    ColumnType::MultipleCollaborators,
    ColumnType::MultipleRecordLinks,
    ColumnType::Date,
    ColumnType::DateTime,
    ColumnType::PhoneNumber,
    ColumnType::Checkbox,
    ColumnType::Rating,
    ColumnType::Duration,
];

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::SingleLineText => "singleLineText",
            ColumnType::Email => "email",
            ColumnType::Url => "url",
            ColumnType::MultilineText => "multilineText",
            ColumnType::Number => "number",
            ColumnType::Currency => "currency",
            ColumnType::Percent => "percent",
            ColumnType::SingleSelect => "singleSelect",
            ColumnType::MultipleSelects => "multipleSelects",
            ColumnType::SingleCollaborator => "singleCollaborator",
            ColumnType::MultipleCollaborators => "multipleCollaborators",
            ColumnType::MultipleRecordLinks => "multipleRecordLinks",
            ColumnType::Date => "date",
            ColumnType::DateTime => "dateTime",
            ColumnType::PhoneNumber => "phoneNumber",
            ColumnType::Checkbox => "checkbox",
            ColumnType::Rating => "rating",
            ColumnType::Duration => "duration",
            ColumnType::Formula => "formula",
            ColumnType::AutoNumber => "autoNumber",
            ColumnType::CreatedTime => "createdTime",
            ColumnType::LastModifiedTime => "lastModifiedTime",
            ColumnType::Rollup => "rollup",
            ColumnType::Lookup => "lookup",
            ColumnType::Count => "count",
            ColumnType::Attachment => "attachment",
            ColumnType::Button => "button",
            ColumnType::Barcode => "barcode",
        }
    }

    pub fn variants() -> &'static [ColumnType] {
        &[
            ColumnType::SingleLineText,
            ColumnType::Email,
            ColumnType::Url,
            ColumnType::MultilineText,
            ColumnType::Number,
            ColumnType::Currency,
            ColumnType::Percent,
            ColumnType::SingleSelect,
            ColumnType::MultipleSelects,
            ColumnType::SingleCollaborator,
            ColumnType::MultipleCollaborators,
            ColumnType::MultipleRecordLinks,
            ColumnType::Date,
            ColumnType::DateTime,
            ColumnType::PhoneNumber,
            ColumnType::Checkbox,
            ColumnType::Rating,
            ColumnType::Duration,
            ColumnType::Formula,
            ColumnType::AutoNumber,
            ColumnType::CreatedTime,
            ColumnType::LastModifiedTime,
            ColumnType::Rollup,
            ColumnType::Lookup,
            ColumnType::Count,
            ColumnType::Attachment,
            ColumnType::Button,
            ColumnType::Barcode,
        ]
    }

    /// Whether values of this type can be written by an import.
    pub fn is_importable(&self) -> bool {
        SUPPORTED_TYPES.contains(self)
    }

    /// Whether a linked table whose primary column has this type can be the
    /// target of an imported link column.
    pub fn is_importable_as_linked_primary(&self) -> bool {
        self.is_importable() || matches!(self, ColumnType::Formula | ColumnType::AutoNumber)
    }

    /// Computed columns cannot receive writes, so no rows can be created by
    /// naming their value.
    pub fn is_computed(&self) -> bool {
        matches!(
            self,
            ColumnType::Formula
                | ColumnType::AutoNumber
                | ColumnType::CreatedTime
                | ColumnType::LastModifiedTime
                | ColumnType::Rollup
                | ColumnType::Lookup
                | ColumnType::Count
                | ColumnType::Button
        )
    }

    pub fn is_multi_valued(&self) -> bool {
        matches!(
            self,
            ColumnType::MultipleSelects
                | ColumnType::MultipleCollaborators
                | ColumnType::MultipleRecordLinks
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        ColumnType::variants()
            .iter()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(normalized))
            .copied()
            .ok_or_else(|| {
                anyhow!(
                    "Unknown column type '{value}'. Known types: {}",
                    ColumnType::variants()
                        .iter()
                        .map(|ty| ty.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        ColumnType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_table_id: Option<TableId>,
    /// Select options, or the known collaborators for collaborator columns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub options: ColumnOptions,
}

impl Column {
    pub fn new(id: impl Into<String>, name: impl Into<String>, column_type: ColumnType) -> Self {
        Column {
            id: id.into(),
            name: name.into(),
            column_type,
            options: ColumnOptions::default(),
        }
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    pub fn linked_to(mut self, table_id: impl Into<String>) -> Self {
        self.options.linked_table_id = Some(table_id.into());
        self
    }

    pub fn with_max(mut self, max: u8) -> Self {
        self.options.max = Some(max);
        self
    }

    pub fn is_link(&self) -> bool {
        self.column_type == ColumnType::MultipleRecordLinks
    }

    pub fn linked_table_id(&self) -> Option<&str> {
        if self.is_link() {
            self.options.linked_table_id.as_deref()
        } else {
            None
        }
    }

    pub fn rating_max(&self) -> u8 {
        self.options.max.unwrap_or(DEFAULT_RATING_MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub id: TableId,
    pub name: String,
    pub primary_column_id: ColumnId,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn column(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.id == id)
    }

    /// Looks a column up by id first, then by case-insensitive name.
    pub fn find_column(&self, token: &str) -> Option<&Column> {
        let token = token.trim();
        self.column(token).or_else(|| {
            self.columns
                .iter()
                .find(|column| column.name.eq_ignore_ascii_case(token))
        })
    }

    pub fn primary_column(&self) -> Option<&Column> {
        self.column(&self.primary_column_id)
    }

    pub fn link_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|column| column.is_link())
    }
}

/// Primary column type of every table linked from a target table.
#[derive(Debug, Clone, Default)]
pub struct LinkedPrimaryTypes {
    by_table_id: HashMap<TableId, ColumnType>,
}

impl LinkedPrimaryTypes {
    /// Resolves the primary column type of every table linked from `table`.
    /// Linked tables missing from the store are left out, which makes the
    /// link columns pointing at them unsupported.
    pub async fn resolve<S>(store: &S, table: &TableSchema) -> Result<Self>
    where
        S: TableStore + ?Sized,
    {
        let mut by_table_id = HashMap::new();
        for column in table.link_columns() {
            let Some(linked_id) = column.linked_table_id() else {
                continue;
            };
            if by_table_id.contains_key(linked_id) {
                continue;
            }
            match store.table_schema(linked_id).await? {
                Some(linked) => {
                    if let Some(primary) = linked.primary_column() {
                        by_table_id.insert(linked_id.to_string(), primary.column_type);
                    }
                }
                None => debug!(
                    "Linked table '{linked_id}' for column '{}' no longer exists",
                    column.name
                ),
            }
        }
        Ok(LinkedPrimaryTypes { by_table_id })
    }

    pub fn from_tables(table: &TableSchema, tables: &[TableSchema]) -> Self {
        let by_table_id = table
            .link_columns()
            .filter_map(|column| column.linked_table_id())
            .filter_map(|linked_id| {
                tables
                    .iter()
                    .find(|candidate| candidate.id == linked_id)
                    .and_then(|linked| linked.primary_column())
                    .map(|primary| (linked_id.to_string(), primary.column_type))
            })
            .collect();
        LinkedPrimaryTypes { by_table_id }
    }

    pub fn primary_type(&self, table_id: &str) -> Option<ColumnType> {
        self.by_table_id.get(table_id).copied()
    }
}

/// Whether `column` can be the target of an import.
pub fn is_supported(column: &Column, linked: &LinkedPrimaryTypes) -> bool {
    if column.is_link() {
        column
            .linked_table_id()
            .and_then(|table_id| linked.primary_type(table_id))
            .is_some_and(|primary| primary.is_importable_as_linked_primary())
    } else {
        column.column_type.is_importable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people_table(primary: ColumnType) -> TableSchema {
        TableSchema {
            id: "tblPeople".into(),
            name: "People".into(),
            primary_column_id: "fldName".into(),
            columns: vec![Column::new("fldName", "Name", primary)],
        }
    }

    fn tasks_table() -> TableSchema {
        TableSchema {
            id: "tblTasks".into(),
            name: "Tasks".into(),
            primary_column_id: "fldTitle".into(),
            columns: vec![
                Column::new("fldTitle", "Title", ColumnType::SingleLineText),
                Column::new("fldOwner", "Owner", ColumnType::MultipleRecordLinks)
                    .linked_to("tblPeople"),
                Column::new("fldTotal", "Total", ColumnType::Formula),
            ],
        }
    }

    #[test]
    fn column_type_round_trips_through_tokens() {
        for ty in ColumnType::variants() {
            assert_eq!(ColumnType::from_str(ty.as_str()).unwrap(), *ty);
        }
        assert_eq!(
            ColumnType::from_str("SINGLELINETEXT").unwrap(),
            ColumnType::SingleLineText
        );
        assert!(ColumnType::from_str("spreadsheet").is_err());
    }

    #[test]
    fn formula_is_only_importable_as_linked_primary() {
        assert!(!ColumnType::Formula.is_importable());
        assert!(ColumnType::Formula.is_importable_as_linked_primary());
        assert!(ColumnType::AutoNumber.is_importable_as_linked_primary());
        assert!(!ColumnType::Rollup.is_importable_as_linked_primary());
    }

    #[test]
    fn link_support_follows_linked_primary_type() {
        let tasks = tasks_table();
        let owner = tasks.column("fldOwner").unwrap();

        let formula_primary =
            LinkedPrimaryTypes::from_tables(&tasks, &[people_table(ColumnType::Formula)]);
        assert!(is_supported(owner, &formula_primary));

        let attachment_primary =
            LinkedPrimaryTypes::from_tables(&tasks, &[people_table(ColumnType::Attachment)]);
        assert!(!is_supported(owner, &attachment_primary));

        let missing = LinkedPrimaryTypes::from_tables(&tasks, &[]);
        assert!(!is_supported(owner, &missing));
    }

    #[test]
    fn computed_columns_are_unsupported() {
        let tasks = tasks_table();
        let linked = LinkedPrimaryTypes::default();
        assert!(!is_supported(tasks.column("fldTotal").unwrap(), &linked));
        assert!(is_supported(tasks.column("fldTitle").unwrap(), &linked));
    }

    #[test]
    fn find_column_accepts_names_case_insensitively() {
        let tasks = tasks_table();
        assert_eq!(tasks.find_column("owner").unwrap().id, "fldOwner");
        assert_eq!(tasks.find_column("fldTitle").unwrap().name, "Title");
        assert!(tasks.find_column("missing").is_none());
    }

    #[test]
    fn column_type_serializes_as_token() {
        let column = Column::new("fldA", "A", ColumnType::MultipleSelects);
        let json = serde_json::to_string(&column).unwrap();
        assert!(json.contains("\"type\":\"multipleSelects\""));
        let parsed: Column = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, column);
    }
}
