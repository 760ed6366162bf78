use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::executor::DEFAULT_BATCH_SIZE;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Import JSON records into a typed table store",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import a JSON file into a table, creating and updating rows
    Import(ImportArgs),
    /// Show how a JSON file maps onto a table without writing anything
    Preview(PreviewArgs),
    /// List the columns of a table and whether they can be imported
    Columns(ColumnsArgs),
}

/// Options shared by every command that reads a JSON file against a table.
#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    /// JSON file to import ('-' reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Store file holding the target tables
    #[arg(short = 's', long = "store")]
    pub store: PathBuf,
    /// Target table id or name (defaults to the table remembered in the settings file)
    #[arg(short = 't', long = "table")]
    pub table: Option<String>,
    /// Settings file remembering mappings and merge keys per table
    #[arg(long = "settings")]
    pub settings: Option<PathBuf>,
    /// Columns (id or name) whose values identify existing rows; enables merging
    #[arg(short = 'k', long = "merge-key", value_delimiter = ',')]
    pub merge_key: Vec<String>,
    /// Map a column to a source, as `Column=Header` or `Column=@N` (1-based position)
    #[arg(short = 'm', long = "map", value_parser = parse_mapping, action = clap::ArgAction::Append)]
    pub mappings: Vec<MappingArg>,
    /// Treat the first line as headers even when no header matches a column
    #[arg(long = "header-row", conflicts_with = "no_header_row")]
    pub header_row: bool,
    /// Treat the first line as data
    #[arg(long = "no-header-row")]
    pub no_header_row: bool,
    /// RFC 6901 JSON Pointer selecting the array to import, e.g. `/data/items`
    #[arg(short = 'p', long = "pointer")]
    pub pointer: Option<String>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

impl SessionArgs {
    pub fn header_override(&self) -> Option<bool> {
        if self.header_row {
            Some(true)
        } else if self.no_header_row {
            Some(false)
        } else {
            None
        }
    }
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub session: SessionArgs,
    /// Rows per create or update request (capped by the store limit)
    #[arg(long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
    /// Compute and report the changes without writing them
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Abort when any value cannot be converted for its column
    #[arg(long)]
    pub strict: bool,
    /// Remember the mapping and merge key in the settings file
    #[arg(long = "save-settings", requires = "settings")]
    pub save_settings: bool,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub session: SessionArgs,
    /// Number of rows to display
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
}

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    /// Store file holding the tables
    #[arg(short = 's', long = "store")]
    pub store: PathBuf,
    /// Table id or name
    #[arg(short = 't', long = "table")]
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingSource {
    Header(String),
    /// Zero-based position in the line.
    Position(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingArg {
    pub column: String,
    pub source: MappingSource,
}

pub fn parse_mapping(value: &str) -> Result<MappingArg, String> {
    let (column, source) = value
        .split_once('=')
        .ok_or_else(|| format!("Mapping '{value}' must look like Column=Header or Column=@N"))?;
    let column = column.trim();
    let source = source.trim();
    if column.is_empty() || source.is_empty() {
        return Err(format!("Mapping '{value}' has an empty side"));
    }
    let source = match source.strip_prefix('@') {
        Some(position) => {
            let position: usize = position
                .trim()
                .parse()
                .map_err(|_| format!("Mapping position '{position}' is not a number"))?;
            if position == 0 {
                return Err("Mapping positions start at 1".to_string());
            }
            MappingSource::Position(position - 1)
        }
        None => MappingSource::Header(source.to_string()),
    };
    Ok(MappingArg {
        column: column.to_string(),
        source,
    })
}
