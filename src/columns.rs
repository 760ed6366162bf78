//! Column listing for a table in a store file.
//!
//! Renders each column's id, name and type, and whether an import can write
//! it, as an ASCII table.

use anyhow::{Context, Result, anyhow};
use log::info;

use crate::{
    cli::ColumnsArgs,
    schema::{LinkedPrimaryTypes, TableSchema, is_supported},
    store::MemoryStore,
    table,
};

pub async fn execute(args: &ColumnsArgs) -> Result<()> {
    let store = MemoryStore::load(&args.store)
        .with_context(|| format!("Loading store from {:?}", args.store))?;
    let schema = store
        .find_table(&args.table)
        .ok_or_else(|| anyhow!("Table '{}' not found in {:?}", args.table, args.store))?;
    let linked = LinkedPrimaryTypes::resolve(&store, &schema)
        .await
        .with_context(|| format!("Resolving linked tables of '{}'", schema.name))?;

    if schema.columns.is_empty() {
        info!("Table '{}' does not define any columns", schema.name);
        return Ok(());
    }

    let (headers, rows) = column_rows(&schema, &linked);
    table::print_table(&headers, &rows);
    info!(
        "Listed {} column(s) of '{}'",
        schema.columns.len(),
        schema.name
    );
    Ok(())
}

pub fn column_rows(
    schema: &TableSchema,
    linked: &LinkedPrimaryTypes,
) -> (Vec<String>, Vec<Vec<String>>) {
    let headers = vec![
        "#".to_string(),
        "id".to_string(),
        "name".to_string(),
        "type".to_string(),
        "importable".to_string(),
    ];
    let rows = schema
        .columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let mut name = column.name.clone();
            if column.id == schema.primary_column_id {
                name.push_str(" (primary)");
            }
            let column_type = match column.linked_table_id() {
                Some(linked_id) => format!("{} -> {linked_id}", column.column_type),
                None => column.column_type.to_string(),
            };
            let importable = if is_supported(column, linked) { "yes" } else { "no" };
            vec![
                (idx + 1).to_string(),
                column.id.clone(),
                name,
                column_type,
                importable.to_string(),
            ]
        })
        .collect();
    (headers, rows)
}
