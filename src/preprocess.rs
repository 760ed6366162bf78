//! Turns a JSON document into a header line plus rows of raw strings.
//!
//! The pipeline is: parse, optionally extract a sub-document with an RFC 6901
//! JSON Pointer, drop nested structures that cannot map onto a single cell,
//! then flatten into delimited text and split it back into rows with the
//! shared row grammar. Splitting the flattened text rather than the JSON
//! keeps cells containing delimiters quoted consistently with how link and
//! multi-select cells are split later.

use log::debug;
use serde_json::{Map, Value as JsonValue};

use crate::{
    error::{ImportError, Result},
    io_utils,
};

/// Rows of raw cells. Whether the first row holds headers is decided later.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedGrid {
    pub lines: Vec<Vec<String>>,
}

impl ParsedGrid {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn first_line(&self) -> &[String] {
        self.lines.first().map(Vec::as_slice).unwrap_or_default()
    }
}

/// Headers and data rows of a parsed grid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn parse_document(text: &str) -> Result<JsonValue> {
    if text.trim().is_empty() {
        return Err(ImportError::EmptyInput);
    }
    let document: JsonValue = serde_json::from_str(text).map_err(ImportError::MalformedJson)?;
    let empty = match &document {
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::Object(fields) => fields.is_empty(),
        _ => false,
    };
    if empty {
        return Err(ImportError::EmptyInput);
    }
    Ok(document)
}

/// Items to import. Without a pointer the document must be an array. A
/// pointer match that is itself an array contributes its elements; any
/// other match is a single item.
pub fn extract_items(document: JsonValue, pointer: Option<&str>) -> Result<Vec<JsonValue>> {
    match pointer.map(str::trim).filter(|pointer| !pointer.is_empty()) {
        None => match document {
            JsonValue::Array(items) => Ok(items),
            _ => Err(ImportError::UnsupportedShape(
                "The selected file does not contain a top-level array. \
                 Select a different file or pass a JSON Pointer."
                    .to_string(),
            )),
        },
        Some(pointer) => {
            let mut document = document;
            let found = document.pointer_mut(pointer).map(JsonValue::take);
            match found {
                Some(JsonValue::Array(items)) if !items.is_empty() => Ok(items),
                Some(JsonValue::Array(_)) | Some(JsonValue::Null) | None => {
                    Err(ImportError::UnsupportedShape(format!(
                        "JSON Pointer '{pointer}' has no matches"
                    )))
                }
                Some(item) => Ok(vec![item]),
            }
        }
    }
}

/// Removes members of object items that cannot live in one cell: nested
/// objects and arrays whose second element is an object. Array items are
/// left alone.
pub fn prune_nested(items: &mut [JsonValue]) {
    for item in items.iter_mut() {
        let JsonValue::Object(fields) = item else {
            continue;
        };
        fields.retain(|_, value| match value {
            JsonValue::Object(_) => false,
            JsonValue::Array(elements) => !matches!(elements.get(1), Some(JsonValue::Object(_))),
            _ => true,
        });
    }
}

/// Flattens items into lines. Object items share the key order of the first
/// item, which becomes the first line.
pub fn to_grid(items: &[JsonValue]) -> Result<ParsedGrid> {
    let mut lines = Vec::with_capacity(items.len() + 1);
    match items.first() {
        Some(JsonValue::Object(first)) => {
            let keys = first.keys().cloned().collect::<Vec<_>>();
            lines.push(keys.clone());
            for item in items {
                lines.push(match item {
                    JsonValue::Object(fields) => object_cells(fields, &keys),
                    other => item_cells(other),
                });
            }
        }
        Some(_) => lines.extend(items.iter().map(item_cells)),
        None => {}
    }
    for line in lines.iter_mut().filter(|line| line.is_empty()) {
        line.push(String::new());
    }

    let flattened = io_utils::render_rows(&lines)?;
    let lines = io_utils::split_rows(&flattened)?;
    debug!("Flattened {} JSON item(s) into {} line(s)", items.len(), lines.len());
    Ok(ParsedGrid { lines })
}

fn object_cells(fields: &Map<String, JsonValue>, keys: &[String]) -> Vec<String> {
    keys.iter()
        .map(|key| fields.get(key).map(cell_text).unwrap_or_default())
        .collect()
}

fn item_cells(item: &JsonValue) -> Vec<String> {
    match item {
        JsonValue::Array(elements) => elements.iter().map(cell_text).collect(),
        JsonValue::Object(fields) => fields.values().map(cell_text).collect(),
        scalar => vec![cell_text(scalar)],
    }
}

fn cell_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::Bool(flag) => flag.to_string(),
        JsonValue::Number(number) => number_text(number),
        JsonValue::String(text) => text.clone(),
        JsonValue::Array(elements) => elements.iter().map(cell_text).collect::<Vec<_>>().join(","),
        JsonValue::Object(_) => value.to_string(),
    }
}

fn number_text(number: &serde_json::Number) -> String {
    if let Some(int) = number.as_i64() {
        return int.to_string();
    }
    if let Some(int) = number.as_u64() {
        return int.to_string();
    }
    match number.as_f64() {
        Some(float) if float.fract() == 0.0 && float.abs() < 1e15 => format!("{float:.0}"),
        Some(float) => float.to_string(),
        None => number.to_string(),
    }
}

/// Full pipeline from document text to grid, rejecting files with more than
/// `max_lines` lines.
pub fn preprocess(text: &str, pointer: Option<&str>, max_lines: usize) -> Result<ParsedGrid> {
    let document = parse_document(text)?;
    let mut items = extract_items(document, pointer)?;
    prune_nested(&mut items);
    let grid = to_grid(&items)?;
    if grid.len() > max_lines {
        return Err(ImportError::TooManyRows {
            limit: max_lines,
            found: grid.len(),
        });
    }
    Ok(grid)
}

/// Splits a grid into headers and rows. Without a header line the headers
/// are `Column 1`, `Column 2`, ... sized by the first line.
pub fn split_layout(grid: &ParsedGrid, is_first_line_headers: bool) -> Layout {
    if grid.is_empty() {
        return Layout::default();
    }
    if is_first_line_headers {
        Layout {
            headers: grid.lines[0].clone(),
            rows: grid.lines[1..].to_vec(),
        }
    } else {
        Layout {
            headers: default_headers(grid.first_line().len()),
            rows: grid.lines.clone(),
        }
    }
}

pub fn default_headers(count: usize) -> Vec<String> {
    (1..=count).map(|index| format!("Column {index}")).collect()
}
