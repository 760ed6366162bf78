//! Input reading and the shared delimited-row grammar.
//!
//! - **Input**: JSON documents are read from a path, or stdin when the path
//!   is `-`, and decoded with `encoding_rs` (UTF-8 by default).
//! - **Row grammar**: the same comma-separated, double-quote-escaped grammar
//!   is used to flatten JSON into header/value rows and to split link and
//!   multi-select cells into names, so a cell that survived the flattening
//!   round trip splits back the way it was written.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

pub const ROW_DELIMITER: u8 = b',';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

/// Reads the whole input document, honouring the `-` stdin convention.
pub fn read_input(path: &Path, encoding: &'static Encoding) -> Result<String> {
    let mut bytes = Vec::new();
    if is_dash(path) {
        std::io::stdin()
            .lock()
            .read_to_end(&mut bytes)
            .context("Reading input from stdin")?;
    } else {
        let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
        BufReader::new(file)
            .read_to_end(&mut bytes)
            .with_context(|| format!("Reading input file {path:?}"))?;
    }
    decode_bytes(&bytes, encoding).with_context(|| format!("Decoding input {path:?}"))
}

fn row_reader(text: &str) -> csv::Reader<&[u8]> {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(ROW_DELIMITER)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(text.as_bytes())
}

/// Splits delimited text into rows of cells.
pub fn split_rows(text: &str) -> Result<Vec<Vec<String>>, csv::Error> {
    row_reader(text)
        .records()
        .map(|record| record.map(|record| record.iter().map(str::to_string).collect()))
        .collect()
}

/// Renders rows with the same grammar [`split_rows`] reads.
pub fn render_rows(rows: &[Vec<String>]) -> Result<String, csv::Error> {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(ROW_DELIMITER)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true)
        .flexible(true);
    let mut writer = builder.from_writer(Vec::new());
    for row in rows {
        writer.write_record(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| csv::Error::from(err.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Renders a single list of names as one delimited row without a line
/// terminator.
pub fn render_row(cells: &[String]) -> String {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(ROW_DELIMITER)
        .quote_style(QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'));
    let mut writer = builder.from_writer(Vec::new());
    if writer.write_record(cells).is_err() {
        return cells.join(",");
    }
    match writer.into_inner() {
        Ok(bytes) => String::from_utf8_lossy(&bytes)
            .trim_end_matches('\n')
            .to_string(),
        Err(_) => cells.join(","),
    }
}
