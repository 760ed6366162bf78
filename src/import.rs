//! Import sessions and the `import` command.
//!
//! An [`ImportSession`] ties one parsed file to one target table: it owns the
//! header layout, column mapping and merge key the operator is editing,
//! keeps a snapshot of the table's rows, recomputes the diff when asked, and
//! finally hands the newest diff to the batch executor.

use std::path::Path;

use anyhow::{Context, anyhow, bail};
use log::{info, warn};

use crate::{
    cli::{ImportArgs, MappingSource, SessionArgs},
    convert,
    diff::{DiffRequest, DiffResult, compute_diff},
    error::{ImportError, Result},
    executor::{BatchExecutor, DEFAULT_BATCH_SIZE, ExecutionReport},
    io_utils,
    mapping::{ColumnMapping, FieldMapping, initial_layout},
    preprocess::{self, Layout, ParsedGrid},
    rows::MappedColumns,
    scheduler::{LatestDiff, Scheduler},
    schema::{ColumnId, LinkedPrimaryTypes, TableSchema, is_supported},
    settings::ImportSettings,
    store::{ExistingRow, MemoryStore, TableStore},
};

pub const MAX_ROWS_PER_TABLE: usize = 50_000;
pub const MAX_LINES_PER_FILE: usize = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportLimits {
    pub max_rows_per_table: usize,
    pub max_lines_per_file: usize,
}

impl Default for ImportLimits {
    fn default() -> Self {
        ImportLimits {
            max_rows_per_table: MAX_ROWS_PER_TABLE,
            max_lines_per_file: MAX_LINES_PER_FILE,
        }
    }
}

/// Operator choices for one import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    pub mapping: ColumnMapping,
    pub merge_key: Vec<ColumnId>,
    pub should_merge: bool,
    pub is_first_line_headers: bool,
    pub batch_size: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            mapping: ColumnMapping::new(),
            merge_key: Vec::new(),
            should_merge: false,
            is_first_line_headers: true,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Values of one column that could not be converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionFailures {
    pub column_id: ColumnId,
    pub column_name: String,
    pub values: Vec<String>,
    pub help: Option<&'static str>,
}

pub struct ImportSession<'s, S: TableStore + ?Sized> {
    store: &'s S,
    table: TableSchema,
    linked: LinkedPrimaryTypes,
    grid: ParsedGrid,
    layout: Layout,
    config: ImportConfig,
    existing: Vec<ExistingRow>,
    latest: LatestDiff<DiffResult>,
    scheduler: Scheduler,
    limits: ImportLimits,
}

impl<'s, S: TableStore + ?Sized> ImportSession<'s, S> {
    /// Loads the table and its rows and lays the grid out using whatever the
    /// settings remember for this table.
    pub async fn open(
        store: &'s S,
        table_id: &str,
        grid: ParsedGrid,
        settings: &ImportSettings,
    ) -> Result<Self> {
        let table = store
            .table_schema(table_id)
            .await?
            .ok_or_else(|| ImportError::TableNotFound(table_id.to_string()))?;
        let linked = LinkedPrimaryTypes::resolve(store, &table).await?;
        let existing = store.load_existing_rows(&table.id).await?;

        let layout = initial_layout(
            grid.first_line(),
            settings.column_mapping(&table, &linked),
            settings.is_first_line_headers(),
            &table,
            &linked,
        );
        let merge_key = settings.merge_column_ids(&table, &linked);
        let config = ImportConfig {
            mapping: layout.mapping,
            should_merge: settings.should_merge_duplicates() && !merge_key.is_empty(),
            merge_key,
            is_first_line_headers: layout.is_first_line_headers,
            batch_size: DEFAULT_BATCH_SIZE,
        };
        info!(
            "Opened import into '{}' with {} existing row(s) and {} line(s)",
            table.name,
            existing.len(),
            grid.len()
        );
        let layout = preprocess::split_layout(&grid, config.is_first_line_headers);
        Ok(ImportSession {
            store,
            table,
            linked,
            grid,
            layout,
            config,
            existing,
            latest: LatestDiff::new(),
            scheduler: Scheduler::default(),
            limits: ImportLimits::default(),
        })
    }

    pub fn with_limits(mut self, limits: ImportLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn table(&self) -> &TableSchema {
        &self.table
    }

    pub fn linked_primary_types(&self) -> &LinkedPrimaryTypes {
        &self.linked
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn headers(&self) -> &[String] {
        &self.layout.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.layout.rows
    }

    pub fn existing_rows(&self) -> &[ExistingRow] {
        &self.existing
    }

    pub fn set_first_line_headers(&mut self, is_first_line_headers: bool) {
        self.config.is_first_line_headers = is_first_line_headers;
        self.layout = preprocess::split_layout(&self.grid, is_first_line_headers);
        self.latest.begin();
    }

    /// Points a column at a header position. Positions past the current
    /// header set are rejected and leave the mapping as it was.
    pub fn set_source_index(&mut self, column_id: &str, source_index: Option<usize>) -> Result<()> {
        let mut mapping = self.config.mapping.clone();
        mapping.set_source_index(column_id, source_index);
        let header_count = self.headers().len();
        if !mapping.fits_headers(header_count) {
            return Err(ImportError::SourceIndexOutOfRange {
                column: column_id.to_string(),
                index: source_index.unwrap_or_default(),
                header_count,
            });
        }
        self.config.mapping = mapping;
        self.latest.begin();
        Ok(())
    }

    pub fn toggle_column(&mut self, column_id: &str) {
        self.config.mapping.toggle(column_id);
        self.latest.begin();
    }

    pub fn set_mapping(&mut self, mapping: ColumnMapping) {
        self.config.mapping = mapping.pruned(&self.table, &self.linked);
        self.latest.begin();
    }

    /// Sets the merge key. Merging is on whenever the key is non-empty.
    pub fn set_merge_key(&mut self, merge_key: Vec<ColumnId>) {
        self.config.should_merge = !merge_key.is_empty();
        self.config.merge_key = merge_key;
        self.latest.begin();
    }

    pub fn set_merge(&mut self, should_merge: bool) {
        self.config.should_merge = should_merge;
        self.latest.begin();
    }

    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.config.batch_size = batch_size.max(1);
    }

    /// Reloads the table's rows, invalidating any computed diff.
    pub async fn refresh_existing(&mut self) -> Result<()> {
        self.existing = self.store.load_existing_rows(&self.table.id).await?;
        self.latest.begin();
        Ok(())
    }

    fn effective_merge_key(&self) -> &[ColumnId] {
        if self.config.should_merge {
            &self.config.merge_key
        } else {
            &[]
        }
    }

    pub fn mapped_columns(&self) -> MappedColumns {
        MappedColumns::resolve(&self.table, &self.config.mapping, &self.linked)
    }

    /// Starts a diff request. Only the newest request can be committed.
    pub fn begin_diff(&self) -> u64 {
        self.latest.begin()
    }

    /// Computes the diff for `generation` and stores it if no newer request
    /// started meanwhile. Returns whether it was stored.
    pub async fn compute_for(&self, generation: u64) -> Result<bool> {
        let columns = self.mapped_columns();
        let diff = compute_diff(
            DiffRequest {
                rows: &self.layout.rows,
                columns: &columns,
                merge_key: self.effective_merge_key(),
            },
            &self.existing,
            &self.scheduler,
        )
        .await?;
        Ok(self.latest.commit(generation, diff))
    }

    pub async fn recompute_diff(&self) -> Result<bool> {
        let generation = self.begin_diff();
        self.compute_for(generation).await
    }

    pub fn is_diff_ready(&self) -> bool {
        self.latest.is_ready()
    }

    pub fn with_diff<R>(&self, f: impl FnOnce(Option<&DiffResult>) -> R) -> R {
        self.latest.with(f)
    }

    fn remaining_rows(&self) -> usize {
        self.limits
            .max_rows_per_table
            .saturating_sub(self.existing.len())
    }

    /// First reason the current configuration cannot be imported.
    pub fn validate(&self) -> Result<()> {
        let mapping = &self.config.mapping;
        let mut enabled = mapping.iter().filter(|(_, entry)| entry.is_enabled).peekable();
        if enabled.peek().is_none() || enabled.all(|(_, entry)| entry.source_index.is_none()) {
            return Err(ImportError::Invalid(
                "Map at least one JSON column to a field".to_string(),
            ));
        }
        if self.config.should_merge && self.config.merge_key.is_empty() {
            return Err(ImportError::Invalid(
                "Choose a field to match existing records for merging".to_string(),
            ));
        }
        if self.config.should_merge
            && !self
                .config
                .merge_key
                .iter()
                .all(|column_id| mapping.is_mapped(column_id))
        {
            return Err(ImportError::Invalid(
                "Map the merge field to a JSON column".to_string(),
            ));
        }
        for column in &self.table.columns {
            if let Some(entry) = mapping.get(&column.id)
                && entry.is_enabled
                && entry.source_index.is_none()
            {
                return Err(ImportError::Invalid(format!(
                    "Map a JSON column to the \"{}\" field",
                    column.name
                )));
            }
        }
        if !self.can_write() {
            return Err(ImportError::PermissionDenied);
        }
        Ok(())
    }

    fn can_write(&self) -> bool {
        self.latest.with(|diff| match diff {
            None => true,
            Some(diff) => {
                self.store.can_create_rows(&self.table.id, &diff.to_create)
                    && self.store.can_update_rows(&self.table.id, &diff.to_update)
            }
        })
    }

    /// One-line summary of what an import would do.
    pub fn status_text(&self) -> Option<String> {
        self.latest
            .with(|diff| diff.map(|diff| status_text(diff, self.remaining_rows())))
    }

    pub fn warnings(&self) -> Vec<String> {
        self.latest.with(|diff| diff.map(warnings).unwrap_or_default())
    }

    pub fn conversion_failures(&self) -> Vec<ConversionFailures> {
        self.latest.with(|diff| {
            diff.map(|diff| conversion_failures(&self.table, diff))
                .unwrap_or_default()
        })
    }

    /// Writes the current choices back to `settings`.
    pub fn remember(&self, settings: &mut ImportSettings) {
        settings.set_table_id(self.table.id.clone());
        settings.set_column_mapping(self.table.id.clone(), self.config.mapping.clone());
        settings.set_merge_column_ids(self.table.id.clone(), self.config.merge_key.clone());
        settings.set_merge_duplicates(self.config.should_merge);
        settings.set_first_line_headers(self.config.is_first_line_headers);
    }

    /// Consumes the newest diff and writes it.
    pub async fn run(&mut self, on_progress: &mut dyn FnMut(usize, usize)) -> Result<ExecutionReport> {
        self.validate()?;
        let diff = self.latest.take().ok_or(ImportError::DiffNotReady)?;
        let remaining = self.remaining_rows();
        if diff.to_create.len() > remaining {
            return Err(ImportError::RowLimitExceeded {
                remaining,
                requested: diff.to_create.len(),
            });
        }
        let executor =
            BatchExecutor::new(self.store, &self.table).with_batch_size(self.config.batch_size);
        executor.execute(diff, on_progress).await
    }
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

pub fn status_text(diff: &DiffResult, remaining_rows: usize) -> String {
    if diff.to_create.len() > remaining_rows {
        return "Table record limit exceeded.".to_string();
    }
    let mut parts = Vec::new();
    if !diff.to_create.is_empty() {
        parts.push(format!("{} will be created.", plural(diff.to_create.len(), "record")));
    }
    if !diff.to_update.is_empty() {
        parts.push(format!("{} will be updated.", plural(diff.to_update.len(), "record")));
    }
    if !diff.unchanged_by_id.is_empty() {
        parts.push(format!(
            "{} didn't change.",
            plural(diff.unchanged_by_id.len(), "record")
        ));
    }
    if parts.is_empty() {
        return "No records will be created or updated.".to_string();
    }
    parts.join(" ")
}

pub fn warnings(diff: &DiffResult) -> Vec<String> {
    let mut warnings = Vec::new();
    match diff.duplicate_ignored_count {
        0 => {}
        1 => warnings.push(
            "1 row in the JSON file was ignored because it had duplicate values in the merge field."
                .to_string(),
        ),
        count => warnings.push(format!(
            "{count} rows in the JSON file were ignored because they had duplicate values in the merge field."
        )),
    }
    let failed = diff.failed_conversions.values().map(Vec::len).sum::<usize>();
    if failed > 0 {
        warnings.push(format!("{} couldn't be mapped.", plural(failed, "cell value")));
    }
    warnings
}

pub fn conversion_failures(table: &TableSchema, diff: &DiffResult) -> Vec<ConversionFailures> {
    diff.failed_conversions
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(column_id, values)| {
            let column = table.column(column_id);
            ConversionFailures {
                column_id: column_id.clone(),
                column_name: column
                    .map(|column| column.name.clone())
                    .unwrap_or_else(|| column_id.clone()),
                values: values.clone(),
                help: column.and_then(|column| convert::help_message(column.column_type)),
            }
        })
        .collect()
}

/// Store, settings and grid loaded from the command line.
pub(crate) struct Workspace {
    pub store: MemoryStore,
    pub settings: ImportSettings,
    pub table_id: String,
    pub grid: ParsedGrid,
}

pub(crate) fn load_workspace(args: &SessionArgs) -> anyhow::Result<Workspace> {
    let store = MemoryStore::load(&args.store)
        .with_context(|| format!("Loading store from {:?}", args.store))?;
    let settings = match &args.settings {
        Some(path) => ImportSettings::load(path)?,
        None => ImportSettings::new(),
    };
    if settings.is_schema_version_out_of_date() {
        warn!("Settings were written by a newer version; stored choices may be ignored");
    }
    let token = args
        .table
        .clone()
        .or_else(|| settings.table_id().map(str::to_string))
        .ok_or_else(|| anyhow!("Pick a table with --table"))?;
    let table_id = store
        .find_table(&token)
        .map(|table| table.id)
        .ok_or_else(|| anyhow!("Table '{token}' not found in {:?}", args.store))?;

    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let text = io_utils::read_input(&args.input, encoding)?;
    let grid = preprocess::preprocess(&text, args.pointer.as_deref(), MAX_LINES_PER_FILE)
        .with_context(|| format!("Reading JSON from {:?}", args.input))?;
    Ok(Workspace {
        store,
        settings,
        table_id,
        grid,
    })
}

/// Applies command line overrides on top of the remembered layout.
pub(crate) fn apply_session_args<S: TableStore + ?Sized>(
    session: &mut ImportSession<'_, S>,
    args: &SessionArgs,
) -> anyhow::Result<()> {
    if let Some(is_first_line_headers) = args.header_override() {
        session.set_first_line_headers(is_first_line_headers);
    }
    for mapping in &args.mappings {
        let column = session
            .table()
            .find_column(&mapping.column)
            .ok_or_else(|| anyhow!("Column '{}' not found", mapping.column))?;
        if !is_supported(column, session.linked_primary_types()) {
            bail!(
                "Column '{}' has type {} which cannot be imported",
                column.name,
                column.column_type
            );
        }
        let column_id = column.id.clone();
        let index = match &mapping.source {
            MappingSource::Position(index) => *index,
            MappingSource::Header(header) => session
                .headers()
                .iter()
                .position(|candidate| candidate.trim().eq_ignore_ascii_case(header.trim()))
                .ok_or_else(|| anyhow!("Header '{header}' not found"))?,
        };
        if index >= session.headers().len() {
            bail!(
                "Position {} is past the {} column(s) of the input",
                index + 1,
                session.headers().len()
            );
        }
        let mut mapping = session.config().mapping.clone();
        mapping.insert(column_id, FieldMapping::enabled(index));
        session.set_mapping(mapping);
    }
    if !args.merge_key.is_empty() {
        let key = args
            .merge_key
            .iter()
            .map(|token| {
                session
                    .table()
                    .find_column(token)
                    .map(|column| column.id.clone())
                    .ok_or_else(|| anyhow!("Merge column '{token}' not found"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        session.set_merge_key(key);
    }
    Ok(())
}

pub(crate) fn print_failures(failures: &[ConversionFailures]) {
    for failure in failures {
        eprintln!(
            "{}: {} value(s) could not be converted: {}",
            failure.column_name,
            failure.values.len(),
            failure.values.join(", ")
        );
        if let Some(help) = failure.help {
            eprintln!("  {help}");
        }
    }
}

pub async fn execute(args: &ImportArgs) -> anyhow::Result<()> {
    let Workspace {
        store,
        mut settings,
        table_id,
        grid,
    } = load_workspace(&args.session)?;

    let mut session = ImportSession::open(&store, &table_id, grid, &settings)
        .await
        .with_context(|| format!("Opening table '{table_id}'"))?;
    apply_session_args(&mut session, &args.session)?;
    session.set_batch_size(args.batch_size);
    session
        .recompute_diff()
        .await
        .context("Comparing the JSON rows with the table")?;
    session.validate()?;

    if let Some(status) = session.status_text() {
        info!("{status}");
    }
    for warning in session.warnings() {
        warn!("{warning}");
    }
    let failures = session.conversion_failures();
    print_failures(&failures);
    if args.strict && !failures.is_empty() {
        bail!("Some values could not be converted; rerun without --strict to import the rest");
    }

    if args.save_settings
        && let Some(path) = &args.session.settings
    {
        session.remember(&mut settings);
        settings.save(path)?;
        info!("Saved settings to {path:?}");
    }

    if args.dry_run {
        info!("Dry run: no rows were written");
        return Ok(());
    }

    let mut last_reported = 0;
    let mut on_progress = |touched: usize, total: usize| {
        let percent = if total == 0 { 100 } else { touched * 100 / total };
        if percent >= last_reported + 10 || touched == total {
            info!("Progress: {touched}/{total} row(s)");
            last_reported = percent;
        }
    };
    let outcome = session.run(&mut on_progress).await;
    // Partial writes are persisted too so the store file matches what was applied.
    save_store(&store, &args.session.store)?;
    let report = outcome?;
    info!(
        "Created {} and updated {} row(s) in '{}' ({} re-created after deletion, {} linked row(s) created)",
        report.created,
        report.updated,
        session.table().name,
        report.rerouted,
        report.linked_rows_created
    );
    Ok(())
}

fn save_store(store: &MemoryStore, path: &Path) -> anyhow::Result<()> {
    store
        .save(path)
        .with_context(|| format!("Writing store to {path:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff_with(creates: usize, updates: usize, unchanged: usize) -> DiffResult {
        let mut diff = DiffResult::default();
        diff.to_create = vec![Default::default(); creates];
        diff.to_update = (0..updates)
            .map(|index| crate::data::RowUpdate {
                id: format!("rec{index}"),
                fields: Default::default(),
            })
            .collect();
        for index in 0..unchanged {
            diff.unchanged_by_id
                .insert(format!("recU{index}"), Default::default());
        }
        diff
    }

    #[test]
    fn status_text_pluralizes() {
        assert_eq!(
            status_text(&diff_with(2, 1, 3), 100),
            "2 records will be created. 1 record will be updated. 3 records didn't change."
        );
        assert_eq!(status_text(&diff_with(0, 0, 1), 100), "1 record didn't change.");
        assert_eq!(
            status_text(&diff_with(0, 0, 0), 100),
            "No records will be created or updated."
        );
    }

    #[test]
    fn status_text_flags_the_row_limit() {
        assert_eq!(status_text(&diff_with(3, 0, 0), 2), "Table record limit exceeded.");
    }

    #[test]
    fn warnings_count_duplicates_and_failures() {
        let mut diff = diff_with(1, 0, 0);
        diff.duplicate_ignored_count = 2;
        diff.failed_conversions
            .insert("fldA".into(), vec!["x".into(), "y".into()]);
        assert_eq!(
            warnings(&diff),
            vec![
                "2 rows in the JSON file were ignored because they had duplicate values in the merge field.",
                "2 cell values couldn't be mapped.",
            ]
        );
    }
}
