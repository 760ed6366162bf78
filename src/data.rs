use std::{collections::BTreeMap, fmt};

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::schema::ColumnId;

pub type RowId = String;

/// Typed values keyed by column id. `None` is an explicit empty cell.
pub type TypedRow = BTreeMap<ColumnId, Option<Value>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Text(String),
    Number(Decimal),
    Integer(i64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Choice(String),
    Choices(Vec<String>),
    Links(Vec<LinkRef>),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Text(s) | Value::Choice(s) => s.clone(),
            Value::Number(d) => d.normalize().to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            Value::Choices(items) => items.join(", "),
            Value::Links(links) => links
                .iter()
                .map(LinkRef::label)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// True for sequences with no entries. Scalars are never empty.
    pub fn is_empty_sequence(&self) -> bool {
        match self {
            Value::Choices(items) => items.is_empty(),
            Value::Links(links) => links.is_empty(),
            _ => false,
        }
    }

    pub fn as_links(&self) -> Option<&[LinkRef]> {
        match self {
            Value::Links(links) => Some(links),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// A reference from a link cell to a row in the linked table.
///
/// Incoming cells only know the linked row's primary value (`name`); once the
/// link resolver has run they carry the row `id`. Cells read back from the
/// store carry both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LinkRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl LinkRef {
    pub fn named(name: impl Into<String>) -> Self {
        LinkRef {
            id: None,
            name: Some(name.into()),
        }
    }

    pub fn resolved(id: impl Into<String>) -> Self {
        LinkRef {
            id: Some(id.into()),
            name: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.id.is_some()
    }

    pub fn label(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.id.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowUpdate {
    pub id: RowId,
    pub fields: TypedRow,
}

/// True when every value is absent or an empty sequence.
pub fn is_blank_row(row: &TypedRow) -> bool {
    row.values().all(|value| match value {
        None => true,
        Some(value) => value.is_empty_sequence(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn number_display_drops_trailing_zeros() {
        let value = Value::Number(Decimal::from_str("12.500").unwrap());
        assert_eq!(value.as_display(), "12.5");
    }

    #[test]
    fn link_labels_prefer_names() {
        let value = Value::Links(vec![
            LinkRef::named("Acme"),
            LinkRef::resolved("rec2"),
            LinkRef {
                id: Some("rec3".into()),
                name: Some("Globex".into()),
            },
        ]);
        assert_eq!(value.as_display(), "Acme, rec2, Globex");
    }

    #[test]
    fn blank_rows_ignore_empty_sequences() {
        let mut row = TypedRow::new();
        row.insert("fldA".into(), None);
        row.insert("fldB".into(), Some(Value::Links(Vec::new())));
        assert!(is_blank_row(&row));

        row.insert("fldC".into(), Some(Value::Integer(0)));
        assert!(!is_blank_row(&row));
        assert!(is_blank_row(&TypedRow::new()));
    }

    #[test]
    fn link_ref_serializes_only_present_parts() {
        let json = serde_json::to_string(&LinkRef::named("Acme")).unwrap();
        assert_eq!(json, "{\"name\":\"Acme\"}");
        let json = serde_json::to_string(&LinkRef::resolved("rec1")).unwrap();
        assert_eq!(json, "{\"id\":\"rec1\"}");
    }
}
