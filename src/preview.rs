use anyhow::{Context, Result};
use log::{info, warn};

use crate::{
    cli::PreviewArgs,
    convert,
    data::TypedRow,
    diff::DiffResult,
    import::{self, ImportSession, Workspace},
    rows::MappedColumns,
    table,
};

pub async fn execute(args: &PreviewArgs) -> Result<()> {
    let Workspace {
        store,
        settings,
        table_id,
        grid,
    } = import::load_workspace(&args.session)?;

    let mut session = ImportSession::open(&store, &table_id, grid, &settings)
        .await
        .with_context(|| format!("Opening table '{table_id}'"))?;
    import::apply_session_args(&mut session, &args.session)?;
    session
        .recompute_diff()
        .await
        .context("Comparing the JSON rows with the table")?;

    if let Err(err) = session.validate() {
        warn!("{err}");
    }
    let columns = session.mapped_columns();
    let (headers, rows) = session.with_diff(|diff| match diff {
        Some(diff) => preview_rows(diff, &columns, args.rows),
        None => (Vec::new(), Vec::new()),
    });
    table::print_table(&headers, &rows);

    if let Some(status) = session.status_text() {
        println!("{status}");
    }
    for warning in session.warnings() {
        println!("{warning}");
    }
    import::print_failures(&session.conversion_failures());
    info!("Previewed {} row(s) for '{}'", rows.len(), session.table().name);
    Ok(())
}

/// Updates first, then creates, then unchanged rows, up to `limit` rows.
pub fn preview_rows(
    diff: &DiffResult,
    columns: &MappedColumns,
    limit: usize,
) -> (Vec<String>, Vec<Vec<String>>) {
    let mut headers = vec!["action".to_string(), "id".to_string()];
    headers.extend(columns.iter().map(|mapped| mapped.column.name.clone()));

    let updates = diff
        .to_update
        .iter()
        .map(|update| ("update", update.id.as_str(), &update.fields));
    let creates = diff.to_create.iter().map(|row| ("create", "", row));
    let unchanged = diff
        .unchanged_by_id
        .iter()
        .map(|(id, row)| ("unchanged", id.as_str(), row));

    let rows = updates
        .chain(creates)
        .chain(unchanged)
        .take(limit)
        .map(|(action, id, row)| render_row(action, id, row, columns))
        .collect();
    (headers, rows)
}

fn render_row(action: &str, id: &str, row: &TypedRow, columns: &MappedColumns) -> Vec<String> {
    let mut cells = vec![action.to_string(), id.to_string()];
    cells.extend(columns.iter().map(|mapped| {
        row.get(&mapped.column.id)
            .and_then(Option::as_ref)
            .map(|value| convert::display(value, &mapped.column))
            .unwrap_or_default()
    }));
    cells
}
