//! Type-aware equality for merge keys and update detection.
//!
//! Stored and incoming values go through the same [`normalize()`] before
//! they are compared: text is trimmed with CRLF folded to LF, and
//! multi-valued cells become unordered sets (links by name). The normalized
//! form is hashable, so the diff engine also uses it to bucket existing rows.

use std::collections::BTreeSet;

use crate::{
    data::{LinkRef, TypedRow, Value},
    schema::{Column, ColumnId},
    store::ExistingRow,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Normalized {
    Null,
    Text(String),
    Set(BTreeSet<String>),
    Scalar(Value),
}

impl Normalized {
    pub fn is_null(&self) -> bool {
        matches!(self, Normalized::Null)
    }
}

pub fn normalize(value: Option<&Value>) -> Normalized {
    match value {
        None => Normalized::Null,
        Some(Value::Text(text) | Value::Choice(text)) => {
            Normalized::Text(text.trim().replace("\r\n", "\n"))
        }
        Some(Value::Choices(items)) => Normalized::Set(items.iter().cloned().collect()),
        Some(Value::Links(links)) => Normalized::Set(links.iter().map(LinkRef::label).collect()),
        Some(other) => Normalized::Scalar(other.clone()),
    }
}

/// Composite merge key predicate.
#[derive(Debug, Clone, Default)]
pub struct MergeMatcher {
    key: Vec<ColumnId>,
}

impl MergeMatcher {
    pub fn new(key: Vec<ColumnId>) -> Self {
        MergeMatcher { key }
    }

    pub fn key(&self) -> &[ColumnId] {
        &self.key
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    pub fn first_column(&self) -> Option<&ColumnId> {
        self.key.first()
    }

    /// Every key column is non-null on both sides and normalizes equal.
    pub fn matches(&self, incoming: &TypedRow, existing: &ExistingRow) -> bool {
        if self.key.is_empty() {
            return false;
        }
        self.key.iter().all(|column_id| {
            let incoming = normalize(incoming.get(column_id).and_then(Option::as_ref));
            if incoming.is_null() {
                return false;
            }
            let stored = normalize(existing.cell(column_id));
            !stored.is_null() && stored == incoming
        })
    }
}

/// Whether writing `incoming` into a cell currently holding `existing`
/// would change it.
pub fn values_differ(column: &Column, existing: Option<&Value>, incoming: Option<&Value>) -> bool {
    if column.is_link() {
        let existing_empty = existing.is_none_or(Value::is_empty_sequence);
        let incoming_empty = incoming.is_none_or(Value::is_empty_sequence);
        if !existing_empty && incoming.is_none() {
            return true;
        }
        if existing_empty && incoming_empty {
            return false;
        }
    }
    normalize(existing) != normalize(incoming)
}
