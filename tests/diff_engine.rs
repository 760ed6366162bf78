mod common;

use std::collections::{BTreeMap, HashSet};

use common::{CONTACTS, companies_table, contacts_table, crm_store, tags_table, text};
use json_table_import::{
    diff::{DiffRequest, DiffResult, compute_diff},
    executor::BatchExecutor,
    mapping::{ColumnMapping, FieldMapping},
    rows::MappedColumns,
    scheduler::Scheduler,
    schema::LinkedPrimaryTypes,
    store::{ExistingRow, TableStore},
};
use proptest::prelude::*;

fn columns(entries: &[(&str, usize)]) -> MappedColumns {
    let table = contacts_table();
    let linked = LinkedPrimaryTypes::from_tables(&table, &[companies_table(), tags_table()]);
    let mut mapping = ColumnMapping::new();
    for (column_id, index) in entries {
        mapping.insert(*column_id, FieldMapping::enabled(*index));
    }
    MappedColumns::resolve(&table, &mapping, &linked)
}

fn lines(values: &[&[&str]]) -> Vec<Vec<String>> {
    values
        .iter()
        .map(|line| line.iter().map(|cell| cell.to_string()).collect())
        .collect()
}

fn key(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|column| column.to_string()).collect()
}

async fn diff(
    rows: &[Vec<String>],
    columns: &MappedColumns,
    merge_key: &[String],
    existing: &[ExistingRow],
) -> DiffResult {
    compute_diff(
        DiffRequest {
            rows,
            columns,
            merge_key,
        },
        existing,
        &Scheduler::default(),
    )
    .await
    .expect("diff")
}

fn contact(id: &str, email: &str, name: &str) -> ExistingRow {
    let mut cells = BTreeMap::new();
    cells.insert("fldEmail".to_string(), text(email));
    cells.insert("fldName".to_string(), text(name));
    ExistingRow::new(id, cells)
}

#[tokio::test]
async fn rows_with_an_empty_key_are_always_created() {
    let columns = columns(&[("fldEmail", 0), ("fldName", 1)]);
    let existing = vec![contact("recA", "", "Nameless")];
    let rows = lines(&[&["", "Nameless"], &["", "Nameless"]]);
    let result = diff(&rows, &columns, &key(&["fldEmail"]), &existing).await;
    assert_eq!(result.to_create.len(), 2);
    assert_eq!(result.duplicate_ignored_count, 0);
}

#[tokio::test]
async fn an_empty_table_turns_every_row_into_a_create() {
    let columns = columns(&[("fldEmail", 0), ("fldName", 1)]);
    let rows = lines(&[
        &["a@example.test", "A"],
        &["a@example.test", "A"],
        &["", ""],
        &["c@example.test", "C"],
    ]);
    let result = diff(&rows, &columns, &key(&["fldEmail"]), &[]).await;
    assert_eq!(result.to_create.len(), 3);
    assert!(result.to_update.is_empty());
    assert!(result.unchanged_by_id.is_empty());
    assert_eq!(result.duplicate_ignored_count, 0);
}

#[tokio::test]
async fn composite_keys_need_every_column_to_match() {
    let columns = columns(&[("fldEmail", 0), ("fldName", 1), ("fldAge", 2)]);
    let existing = vec![contact("recA", "a@example.test", "Ann")];
    let rows = lines(&[
        &["a@example.test", "Ann", "31"],
        &["a@example.test", "Anne", "31"],
    ]);
    let result = diff(&rows, &columns, &key(&["fldEmail", "fldName"]), &existing).await;
    assert_eq!(result.to_update.len(), 1);
    assert_eq!(result.to_update[0].id, "recA");
    assert_eq!(result.to_create.len(), 1);
}

#[tokio::test]
async fn duplicate_existing_rows_are_claimed_in_order() {
    let columns = columns(&[("fldEmail", 0), ("fldName", 1)]);
    let existing = vec![
        contact("recA", "same@example.test", "One"),
        contact("recB", "same@example.test", "Two"),
    ];
    let rows = lines(&[
        &["same@example.test", "One"],
        &["same@example.test", "Changed"],
        &["same@example.test", "Three"],
    ]);
    let result = diff(&rows, &columns, &key(&["fldEmail"]), &existing).await;
    assert!(result.unchanged_by_id.contains_key("recA"));
    assert_eq!(result.to_update.len(), 1);
    assert_eq!(result.to_update[0].id, "recB");
    assert_eq!(result.duplicate_ignored_count, 1);
    assert!(result.to_create.is_empty());
}

#[tokio::test]
async fn failed_conversions_are_collected_per_column() {
    let columns = columns(&[("fldEmail", 0), ("fldAge", 1), ("fldStatus", 2)]);
    let rows = lines(&[
        &["a@example.test", "old", "Lead"],
        &["b@example.test", "40", "Partner"],
    ]);
    let result = diff(&rows, &columns, &[], &[]).await;
    assert_eq!(result.to_create.len(), 2);
    assert_eq!(result.failed_conversions["fldAge"], vec!["old".to_string()]);
    assert_eq!(
        result.failed_conversions["fldStatus"],
        vec!["Partner".to_string()]
    );
    assert_eq!(result.to_create[0]["fldAge"], None);
}

#[tokio::test]
async fn unchanged_links_compare_by_name() {
    let store = crm_store();
    let existing = store.load_existing_rows(CONTACTS).await.expect("rows");
    let columns = columns(&[("fldEmail", 0), ("fldCompany", 1)]);
    let rows = lines(&[&["ada@example.test", " Acme "], &["bob@example.test", ""]]);
    let result = diff(&rows, &columns, &key(&["fldEmail"]), &existing).await;
    assert_eq!(result.unchanged_by_id.len(), 2);
    assert!(result.to_update.is_empty());
}

#[tokio::test]
async fn clearing_a_link_cell_is_an_update() {
    let store = crm_store();
    let existing = store.load_existing_rows(CONTACTS).await.expect("rows");
    let columns = columns(&[("fldEmail", 0), ("fldCompany", 1)]);
    let rows = lines(&[&["ada@example.test", ""]]);
    let result = diff(&rows, &columns, &key(&["fldEmail"]), &existing).await;
    assert_eq!(result.to_update.len(), 1);
    assert_eq!(result.to_update[0].fields["fldCompany"], None);
}

#[tokio::test]
async fn applying_a_diff_then_diffing_again_changes_nothing() {
    let store = crm_store();
    let table = contacts_table();
    let columns = columns(&[("fldEmail", 0), ("fldName", 1), ("fldCompany", 2)]);
    let merge_key = key(&["fldEmail"]);
    let rows = lines(&[
        &["ada@example.test", "Ada Lovelace", "Acme"],
        &["new@example.test", "Newcomer", "Acme, Initech"],
        &["bob@example.test", "Bob", ""],
    ]);

    let existing = store.load_existing_rows(CONTACTS).await.expect("rows");
    let first = diff(&rows, &columns, &merge_key, &existing).await;
    assert_eq!(first.write_count(), 2);
    BatchExecutor::new(&store, &table)
        .execute(first, &mut |_, _| {})
        .await
        .expect("apply");

    let existing = store.load_existing_rows(CONTACTS).await.expect("rows");
    let second = diff(&rows, &columns, &merge_key, &existing).await;
    assert_eq!(second.write_count(), 0);
    assert_eq!(second.unchanged_by_id.len(), 3);
}

proptest! {
    #[test]
    fn every_non_blank_row_is_classified_once(
        keys in prop::collection::vec(prop::option::of(0u8..4), 0..24),
        existing_keys in prop::collection::vec(prop::option::of(0u8..4), 0..8),
    ) {
        let columns = columns(&[("fldEmail", 0), ("fldName", 1)]);
        let rows = keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                let email = key.map(|key| format!("k{key}@example.test")).unwrap_or_default();
                vec![email, format!("row {index}")]
            })
            .collect::<Vec<_>>();
        let existing = existing_keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                let email = key.map(|key| format!("k{key}@example.test")).unwrap_or_default();
                contact(&format!("rec{index}"), &email, "stored")
            })
            .collect::<Vec<_>>();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let result = runtime.block_on(diff(&rows, &columns, &key(&["fldEmail"]), &existing));

        prop_assert_eq!(result.classified_count(), rows.len());
        let mut claimed = HashSet::new();
        for id in result
            .to_update
            .iter()
            .map(|update| &update.id)
            .chain(result.unchanged_by_id.keys())
        {
            prop_assert!(claimed.insert(id.clone()), "{} claimed twice", id);
        }
        let rows_without_key = keys.iter().filter(|key| key.is_none()).count();
        prop_assert!(result.to_create.len() >= rows_without_key);
    }
}
