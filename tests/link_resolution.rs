mod common;

use common::{COMPANIES, CONTACTS, ProgressLog, crm_store, grid};
use json_table_import::{
    data::{LinkRef, Value},
    import::ImportSession,
    settings::ImportSettings,
};

fn link_ids(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_links)
        .map(|links| links.iter().filter_map(|link| link.id.clone()).collect())
        .unwrap_or_default()
}

fn company_id(store: &json_table_import::store::MemoryStore, name: &str) -> Option<String> {
    store
        .rows(COMPANIES)
        .into_iter()
        .find(|row| row.fields.get("fldCompanyName").map(Value::as_display).as_deref() == Some(name))
        .map(|row| row.id)
}

#[tokio::test]
async fn each_missing_name_creates_one_linked_row() {
    let store = crm_store();
    let file = grid(&[
        &["Email", "Company"],
        &["cy@example.test", "Globex"],
        &["dee@example.test", "Globex, Acme"],
        &["eve@example.test", "acme"],
    ]);
    let mut session = ImportSession::open(&store, CONTACTS, file, &ImportSettings::new())
        .await
        .expect("open session");
    session.recompute_diff().await.expect("diff");

    let mut log = ProgressLog::default();
    let report = session
        .run(&mut |touched, total| log.calls.push((touched, total)))
        .await
        .expect("import");

    // Globex and "acme" are both missing; Acme already exists.
    assert_eq!(report.linked_rows_created, 2);
    assert_eq!(report.created, 3);
    assert_eq!(report.total, 6);
    assert_eq!(log.last(), Some((6, 6)));
    assert!(log.is_monotonic());
    assert_eq!(store.row_count(COMPANIES), 3);

    let globex = company_id(&store, "Globex").expect("Globex created");
    let acme = company_id(&store, "Acme").expect("Acme kept");
    let contacts = store.rows(CONTACTS);
    let dee = contacts
        .iter()
        .find(|row| row.fields.get("fldEmail").map(Value::as_display).as_deref() == Some("dee@example.test"))
        .expect("dee created");
    let cy = contacts
        .iter()
        .find(|row| row.fields.get("fldEmail").map(Value::as_display).as_deref() == Some("cy@example.test"))
        .expect("cy created");
    assert_eq!(link_ids(cy.fields.get("fldCompany")), vec![globex.clone()]);
    assert_eq!(link_ids(dee.fields.get("fldCompany")), vec![globex, acme]);
}

#[tokio::test]
async fn computed_primary_tables_only_link_existing_rows() {
    let store = crm_store();
    let file = grid(&[
        &["Email", "Tags"],
        &["cy@example.test", "vip, brand new"],
    ]);
    let mut session = ImportSession::open(&store, CONTACTS, file, &ImportSettings::new())
        .await
        .expect("open session");
    session.recompute_diff().await.expect("diff");

    let mut log = ProgressLog::default();
    let report = session
        .run(&mut |touched, total| log.calls.push((touched, total)))
        .await
        .expect("import");
    assert_eq!(report.linked_rows_created, 0);
    assert_eq!(log.last(), Some((3, 3)));

    let contacts = store.rows(CONTACTS);
    let cy = contacts.last().expect("cy created");
    assert_eq!(link_ids(cy.fields.get("fldTags")), vec!["recVip".to_string()]);
}

#[tokio::test]
async fn cells_repeating_a_name_link_it_once() {
    let store = crm_store();
    let file = grid(&[&["Email", "Company"], &["cy@example.test", "Acme,Acme"]]);
    let mut session = ImportSession::open(&store, CONTACTS, file, &ImportSettings::new())
        .await
        .expect("open session");
    session.recompute_diff().await.expect("diff");
    session.with_diff(|diff| {
        let created = &diff.expect("diff ready").to_create[0];
        assert_eq!(
            created["fldCompany"],
            Some(Value::Links(vec![LinkRef::named("Acme")]))
        );
    });
    session.run(&mut |_, _| {}).await.expect("import");
    let contacts = store.rows(CONTACTS);
    assert_eq!(
        link_ids(contacts.last().and_then(|row| row.fields.get("fldCompany"))),
        vec!["recAcme".to_string()]
    );
}
