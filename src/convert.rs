//! Conversion of raw parsed cells into typed column values.
//!
//! Every importable [`ColumnType`] has a parser, a display renderer and an
//! optional operator hint, all dispatched by an exhaustive match so adding a
//! column type fails to compile until each of them handles it.
//!
//! An empty raw value is always `None`. A non-empty value that does not fit
//! the column is also `None`; callers compare against the raw value to tell
//! "intentionally empty" apart from "could not convert". Only link cells
//! produce errors, when the cell does not split into exactly one row.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use itertools::Itertools;
use rust_decimal::{Decimal, prelude::ToPrimitive};

use crate::{
    data::{LinkRef, Value},
    error::{ImportError, Result},
    io_utils,
    schema::{Column, ColumnType},
};

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹', '₩', '¢'];
const TRUE_TOKENS: &[&str] = &["true", "t", "yes", "y", "1", "checked", "x", "on", "✓", "✔"];
const FALSE_TOKENS: &[&str] = &["false", "f", "no", "n", "0", "unchecked", "off"];

/// Converts one raw cell for `column`.
pub fn convert(raw: &str, column: &Column) -> Result<Option<Value>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let value = match column.column_type {
        ColumnType::SingleLineText
        | ColumnType::Email
        | ColumnType::Url
        | ColumnType::MultilineText
        | ColumnType::PhoneNumber => Some(Value::Text(raw.to_string())),
        ColumnType::Number => parse_number(raw).map(Value::Number),
        ColumnType::Currency => parse_currency(raw).map(Value::Number),
        ColumnType::Percent => parse_percent(raw).map(Value::Number),
        ColumnType::SingleSelect | ColumnType::SingleCollaborator => {
            match_choice(raw.trim(), &column.options.choices).map(Value::Choice)
        }
        ColumnType::MultipleSelects | ColumnType::MultipleCollaborators => {
            parse_choices(raw, &column.options.choices)?.map(Value::Choices)
        }
        ColumnType::MultipleRecordLinks => parse_link_names(raw)?.map(Value::Links),
        ColumnType::Date => parse_date(raw.trim()).map(Value::Date),
        ColumnType::DateTime => parse_datetime(raw.trim()).map(Value::DateTime),
        ColumnType::Checkbox => parse_checkbox(raw).map(Value::Boolean),
        ColumnType::Rating => parse_rating(raw, column.rating_max()).map(Value::Integer),
        ColumnType::Duration => parse_duration(raw).map(Value::Integer),
        ColumnType::Formula
        | ColumnType::AutoNumber
        | ColumnType::CreatedTime
        | ColumnType::LastModifiedTime
        | ColumnType::Rollup
        | ColumnType::Lookup
        | ColumnType::Count
        | ColumnType::Attachment
        | ColumnType::Button
        | ColumnType::Barcode => {
            return Err(ImportError::UnsupportedColumn {
                column: column.name.clone(),
                column_type: column.column_type.to_string(),
            });
        }
    };
    Ok(value)
}

/// Renders a typed value in the form [`convert`] accepts for `column`.
pub fn display(value: &Value, column: &Column) -> String {
    match (column.column_type, value) {
        (ColumnType::Percent, Value::Number(fraction)) => {
            format!("{}%", (*fraction * Decimal::ONE_HUNDRED).normalize())
        }
        (ColumnType::Duration, Value::Integer(seconds)) => format_duration(*seconds),
        (ColumnType::Checkbox, Value::Boolean(checked)) => {
            if *checked { "checked" } else { "unchecked" }.to_string()
        }
        (_, Value::Choices(items)) => io_utils::render_row(items),
        (_, Value::Links(links)) => {
            io_utils::render_row(&links.iter().map(LinkRef::label).collect::<Vec<_>>())
        }
        _ => value.as_display(),
    }
}

/// Operator hint shown next to failed conversions for a column type.
pub fn help_message(column_type: ColumnType) -> Option<&'static str> {
    match column_type {
        ColumnType::SingleSelect | ColumnType::MultipleSelects => {
            Some("Create new select options to import these values")
        }
        ColumnType::SingleCollaborator | ColumnType::MultipleCollaborators => {
            Some("Invite missing collaborators to import these values")
        }
        ColumnType::Date | ColumnType::DateTime => {
            Some("Use YYYY-MM-DD dates or RFC 3339 timestamps")
        }
        ColumnType::Duration => Some("Use h:mm, h:mm:ss or a number of seconds"),
        _ => None,
    }
}

/// Splits a link cell into unresolved references.
///
/// Line breaks are flattened first because they would otherwise start a
/// second row. A cell that still splits into anything other than one row is
/// an error.
pub fn parse_link_names(raw: &str) -> Result<Option<Vec<LinkRef>>> {
    let flattened = raw.replace("\r\n", " ").replace(['\n', '\r'], " ");
    let rows = io_utils::split_rows(&flattened)?;
    if rows.len() != 1 {
        return Err(ImportError::LinkCellRows {
            raw: raw.to_string(),
            rows: rows.len(),
        });
    }
    let row = &rows[0];
    if row.iter().all(|cell| cell.is_empty()) && row.len() <= 1 {
        return Ok(None);
    }
    let names = row
        .iter()
        .map(|cell| cell.trim())
        .filter(|cell| !cell.is_empty())
        .unique()
        .map(LinkRef::named)
        .collect();
    Ok(Some(names))
}

fn split_names(raw: &str) -> Result<Vec<String>> {
    let flattened = raw.replace("\r\n", " ").replace(['\n', '\r'], " ");
    let rows = io_utils::split_rows(&flattened)?;
    Ok(rows
        .into_iter()
        .flatten()
        .map(|cell| cell.trim().to_string())
        .filter(|cell| !cell.is_empty())
        .unique()
        .collect())
}

fn match_choice(token: &str, choices: &[String]) -> Option<String> {
    choices
        .iter()
        .find(|choice| choice.as_str() == token)
        .or_else(|| {
            choices
                .iter()
                .find(|choice| choice.to_lowercase() == token.to_lowercase())
        })
        .cloned()
}

fn parse_choices(raw: &str, choices: &[String]) -> Result<Option<Vec<String>>> {
    let names = split_names(raw)?;
    if names.is_empty() {
        return Ok(None);
    }
    let matched = names
        .iter()
        .map(|name| match_choice(name, choices))
        .collect::<Option<Vec<_>>>();
    Ok(matched.map(|items| items.into_iter().unique().collect()))
}

fn strip_grouping(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
        .collect()
}

pub fn parse_number(raw: &str) -> Option<Decimal> {
    let cleaned = strip_grouping(raw);
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

pub fn parse_currency(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed),
    };
    let body = body
        .trim_start_matches(CURRENCY_SYMBOLS)
        .trim_end_matches(CURRENCY_SYMBOLS)
        .trim();
    let parsed = parse_number(body)?;
    Some(if negative { -parsed } else { parsed })
}

pub fn parse_percent(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    let body = trimmed.strip_suffix('%').unwrap_or(trimmed);
    parse_number(body).map(|value| value / Decimal::ONE_HUNDRED)
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| parse_datetime(value).map(|dt| dt.date()))
}

pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            const DATE_ONLY: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];
            DATE_ONLY
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}

pub fn parse_checkbox(raw: &str) -> Option<bool> {
    let lowered = raw.trim().to_lowercase();
    if TRUE_TOKENS.contains(&lowered.as_str()) {
        Some(true)
    } else if FALSE_TOKENS.contains(&lowered.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Ratings run from 1 to the column maximum. A literal `"0"` is a cleared
/// rating and must survive as `0` rather than being reported as a failure.
pub fn parse_rating(raw: &str, max: u8) -> Option<i64> {
    if raw == "0" {
        return Some(0);
    }
    let parsed: i64 = raw.trim().parse().ok()?;
    (1..=i64::from(max)).contains(&parsed).then_some(parsed)
}

/// Durations are whole seconds, written as `h:mm`, `h:mm:ss` or a bare
/// number of seconds.
pub fn parse_duration(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if !trimmed.contains(':') {
        let seconds = parse_number(trimmed)?;
        return seconds.round().to_i64();
    }
    let parts = trimmed.split(':').collect::<Vec<_>>();
    let numbers = parts
        .iter()
        .map(|part| part.trim().parse::<i64>().ok().filter(|n| *n >= 0))
        .collect::<Option<Vec<_>>>()?;
    match numbers.as_slice() {
        [hours, minutes] if *minutes < 60 => hours.checked_mul(3600)?.checked_add(minutes * 60),
        [hours, minutes, seconds] if *minutes < 60 && *seconds < 60 => hours
            .checked_mul(3600)?
            .checked_add(minutes * 60)?
            .checked_add(*seconds),
        _ => None,
    }
}

pub fn format_duration(seconds: i64) -> String {
    let sign = if seconds < 0 { "-" } else { "" };
    let total = seconds.abs();
    format!(
        "{sign}{}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
