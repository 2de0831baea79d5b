//! Against a real Postgres. Run with
//! `TALLY_TEST_DATABASE_URL=postgres://... cargo test -- --ignored`.

use tally::{
    ColumnDefinition, Combinator, Executor, FindOptions, MigrationUnit, Migrator, MigratorConfig,
    Operation, Row, StaticSource, TableDefinition, TableEngine, Value,
};

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
#[ignore = "needs TALLY_TEST_DATABASE_URL"]
async fn migrate_and_crud_roundtrip() {
    let Ok(url) = std::env::var("TALLY_TEST_DATABASE_URL") else {
        eprintln!("TALLY_TEST_DATABASE_URL not set, skipping");
        return;
    };
    let db = tally::connect(&url).await.unwrap().with_actor("live-test");
    let namespace = format!("tally_test_{}", std::process::id());

    let people = TableDefinition::new(namespace.as_str(), "people")
        .audit()
        .soft_delete()
        .column(
            ColumnDefinition::new("id", "uuid")
                .primary_key()
                .default("gen_random_uuid()"),
        )
        .column(ColumnDefinition::new("email", "text").not_null().unique())
        .column(ColumnDefinition::new("status", "text").not_null().default("'active'"))
        .check("status IN ('active', 'away')")
        .load()
        .unwrap();

    let config = MigratorConfig {
        namespace: namespace.clone(),
        tracking_namespace: namespace.clone(),
        tracking_table: "_tally_migrations".to_string(),
    };
    let source = StaticSource::new([
        MigrationUnit::new(namespace.as_str(), 1, "schema")
            .up(format!("CREATE SCHEMA IF NOT EXISTS \"{namespace}\"")),
        MigrationUnit::new(namespace.as_str(), 2, "people").up(Operation::CreateTable(people.clone())),
    ]);
    let migrator = Migrator::new(config, source).unwrap();

    let report = migrator.migrate(&db).await.unwrap();
    assert_eq!(report.applied, [1, 2]);
    assert!(migrator.migrate(&db).await.unwrap().applied.is_empty());

    let engine = TableEngine::new(people);
    let created = engine
        .insert(&db, &row(&[("email", "ada@example.com".into())]))
        .await
        .unwrap();
    assert_eq!(created.get("created_by"), Some(&Value::from("live-test")));
    let id = created.get("id").cloned().unwrap();

    let updated = engine
        .update(
            &db,
            &row(&[("id", id.clone())]),
            &row(&[("status", "away".into())]),
        )
        .await
        .unwrap();
    assert_eq!(updated.get("status"), Some(&Value::from("away")));

    let removed = engine.remove_where(&db, &row(&[("id", id.clone())])).await.unwrap();
    assert_eq!(removed, 1);
    let live = engine
        .find_where(&row(&[("id", id)]), Combinator::And, FindOptions::default())
        .unwrap()
        .fetch(&db)
        .await
        .unwrap();
    assert!(live.is_empty());

    db.batch_execute(&format!("DROP SCHEMA \"{namespace}\" CASCADE"))
        .await
        .unwrap();
}
