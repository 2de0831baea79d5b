mod common;

use common::{FakeDb, row};
use tally::{
    ColumnDefinition, Combinator, Error, ExecutorExt, FindOptions, GeneratedKind, OrderKey,
    TableDefinition, TableEngine, Value, ViolationKind,
};
use uuid::Uuid;

fn users() -> TableEngine {
    TableEngine::new(
        TableDefinition::new("public", "users")
            .column(
                ColumnDefinition::new("id", "uuid")
                    .primary_key()
                    .default("gen_random_uuid()"),
            )
            .column(ColumnDefinition::new("email", "text").not_null().unique())
            .load()
            .unwrap(),
    )
}

fn products() -> TableEngine {
    TableEngine::new(
        TableDefinition::new("shop", "products")
            .audit()
            .column(ColumnDefinition::new("id", "bigint").primary_key())
            .column(ColumnDefinition::new("sku", "text").not_null().immutable())
            .column(ColumnDefinition::new("name", "varchar(80)").not_null())
            .load()
            .unwrap(),
    )
}

fn invoices() -> TableEngine {
    TableEngine::new(
        TableDefinition::new("billing", "invoices")
            .column(
                ColumnDefinition::new("id", "bigint")
                    .primary_key()
                    .identity(GeneratedKind::Always),
            )
            .column(ColumnDefinition::new("amount", "numeric(10,2)").not_null())
            .column(
                ColumnDefinition::new("amount_cents", "bigint")
                    .generated_as("(amount * 100)::bigint"),
            )
            .load()
            .unwrap(),
    )
}

fn stored_invoice() -> Vec<tally::Row> {
    vec![row(&[
        ("id", Value::I64(1)),
        ("amount", Value::from("12.00")),
        ("amount_cents", Value::I64(1200)),
    ])]
}

fn tickets(soft_delete: bool) -> TableEngine {
    let mut def = TableDefinition::new("public", "tickets").audit();
    if soft_delete {
        def = def.soft_delete();
    }
    TableEngine::new(
        def.column(ColumnDefinition::new("id", "bigint").primary_key())
            .column(ColumnDefinition::new("status", "text").not_null())
            .load()
            .unwrap(),
    )
}

#[tokio::test]
async fn insert_returns_stored_row() {
    let db = FakeDb::new();
    let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
    db.respond(vec![row(&[
        ("id", Value::Uuid(id)),
        ("email", "ada@example.com".into()),
    ])]);

    let stored = users()
        .insert(&db, &row(&[("email", "ada@example.com".into())]))
        .await
        .unwrap();

    assert_eq!(stored.get("id"), Some(&Value::Uuid(id)));
    insta::assert_snapshot!(db.statements().join("\n--\n"), @r#"
INSERT INTO "public"."users" ("email")
VALUES ($1)
RETURNING *
"#);
    assert_eq!(db.params(0), [Value::from("ada@example.com")]);
}

#[tokio::test]
async fn insert_missing_required_column_touches_nothing() {
    let db = FakeDb::new();
    let err = users()
        .insert(&db, &row(&[("id", Value::Uuid(Uuid::nil()))]))
        .await
        .unwrap_err();

    let Error::Validation(validation) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert_eq!(validation.violations.len(), 1);
    assert_eq!(validation.violations[0].column, "email");
    assert_eq!(validation.violations[0].kind, ViolationKind::Missing);
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn insert_stamps_actor_on_audited_tables() {
    let db = FakeDb::new().with_actor("importer");
    db.respond(vec![row(&[("id", Value::I64(1))])]);

    products()
        .insert(
            &db,
            &row(&[
                ("id", Value::I64(1)),
                ("sku", "A-1".into()),
                ("name", "Anvil".into()),
            ]),
        )
        .await
        .unwrap();

    let insert = &db.statements()[0];
    assert!(insert.contains("\"created_by\", \"updated_by\""), "{insert}");
    assert_eq!(
        db.params(0),
        [
            Value::I64(1),
            Value::from("A-1"),
            Value::from("Anvil"),
            Value::from("importer"),
            Value::from("importer"),
        ]
    );
}

#[tokio::test]
async fn update_rejects_changed_immutable_column() {
    let db = FakeDb::new();
    db.respond(vec![row(&[
        ("id", Value::I64(1)),
        ("sku", "A-1".into()),
        ("name", "Anvil".into()),
    ])]);

    let err = products()
        .update(
            &db,
            &row(&[("id", Value::I64(1))]),
            &row(&[("sku", "B-2".into()), ("name", "Bigger anvil".into())]),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::ImmutableField { ref column, .. } if column == "sku"),
        "{err:?}"
    );
    let statements = db.statements();
    assert_eq!(statements.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(statements.last().map(String::as_str), Some("ROLLBACK"));
    assert!(db.starting_with("UPDATE").is_empty());
}

#[tokio::test]
async fn update_accepts_unchanged_immutable_column() {
    let db = FakeDb::new().with_actor("editor");
    db.respond(vec![row(&[
        ("id", Value::I64(1)),
        ("sku", "A-1".into()),
        ("name", "Anvil".into()),
    ])]);
    db.respond(vec![row(&[
        ("id", Value::I64(1)),
        ("sku", "A-1".into()),
        ("name", "Bigger anvil".into()),
    ])]);

    let updated = products()
        .update(
            &db,
            &row(&[("id", Value::I64(1))]),
            &row(&[("sku", "A-1".into()), ("name", "Bigger anvil".into())]),
        )
        .await
        .unwrap();

    assert_eq!(updated.get("name"), Some(&Value::from("Bigger anvil")));
    let statements = db.statements();
    insta::assert_snapshot!(statements.join("\n--\n"), @r#"
BEGIN
--
SELECT *
FROM "shop"."products"
WHERE "id" = $1
FOR UPDATE
--
UPDATE "shop"."products"
SET "name" = $1, "updated_at" = NOW(), "updated_by" = $2
WHERE "id" = $3
RETURNING *
--
COMMIT
"#);
    assert_eq!(
        db.params(2),
        [
            Value::from("Bigger anvil"),
            Value::from("editor"),
            Value::I64(1)
        ]
    );
}

#[tokio::test]
async fn update_requires_exactly_one_row() {
    let db = FakeDb::new();
    db.respond(vec![]);

    let err = products()
        .update(
            &db,
            &row(&[("id", Value::I64(404))]),
            &row(&[("name", "Ghost".into())]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound { matched: 0, .. }), "{err:?}");
    assert_eq!(db.statements().last().map(String::as_str), Some("ROLLBACK"));
}

#[tokio::test]
async fn update_with_invalid_patch_touches_nothing() {
    let db = FakeDb::new();
    let err = products()
        .update(
            &db,
            &row(&[("id", Value::I64(1))]),
            &row(&[("name", Value::Null), ("created_by", "mallory".into())]),
        )
        .await
        .unwrap_err();

    let Error::Validation(validation) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert!(validation.mentions("name"));
    assert!(validation.mentions("created_by"));
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn soft_delete_issues_update() {
    let db = FakeDb::new().with_actor("janitor");
    db.set_affected(2);

    let removed = tickets(true)
        .remove_where(&db, &row(&[("status", "spam".into())]))
        .await
        .unwrap();

    assert_eq!(removed, 2);
    insta::assert_snapshot!(db.statements().join("\n--\n"), @r#"
UPDATE "public"."tickets"
SET "deleted_at" = NOW(), "updated_at" = NOW(), "updated_by" = $1
WHERE "status" = $2 AND "deleted_at" IS NULL
"#);
    assert_eq!(db.params(0), [Value::from("janitor"), Value::from("spam")]);
}

#[tokio::test]
async fn hard_delete_issues_delete() {
    let db = FakeDb::new();
    db.set_affected(1);

    let removed = tickets(false)
        .remove_where(&db, &row(&[("id", Value::I64(7))]))
        .await
        .unwrap();

    assert_eq!(removed, 1);
    insta::assert_snapshot!(db.statements().join("\n--\n"), @r#"
DELETE FROM "public"."tickets"
WHERE "id" = $1
"#);
}

#[tokio::test]
async fn remove_without_conditions_is_rejected() {
    let db = FakeDb::new();
    let err = tickets(false)
        .remove_where(&db, &Default::default())
        .await
        .unwrap_err();

    let Error::Validation(validation) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert_eq!(validation.violations[0].kind, ViolationKind::EmptyConditions);
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn finder_is_reusable() {
    let db = FakeDb::new();
    db.respond(vec![row(&[("id", Value::I64(1))])]);
    db.respond(vec![
        row(&[("id", Value::I64(1))]),
        row(&[("id", Value::I64(2))]),
    ]);

    let finder = tickets(true)
        .find_where(
            &row(&[("status", "open".into())]),
            Combinator::And,
            FindOptions::default().order_by(OrderKey::asc("id")),
        )
        .unwrap();
    assert!(db.statements().is_empty());

    assert_eq!(finder.fetch(&db).await.unwrap().len(), 1);
    assert_eq!(finder.fetch(&db).await.unwrap().len(), 2);
    let statements = db.statements();
    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0], statements[1]);
}

#[tokio::test]
async fn find_by_key_and_count() {
    let db = FakeDb::new();
    let engine = tickets(true);

    db.respond(vec![]);
    let missing = engine
        .find_by_key(&db, &row(&[("id", Value::I64(9))]))
        .await
        .unwrap();
    assert_eq!(missing, None);

    db.respond(vec![row(&[("count", Value::I64(3))])]);
    let count = engine
        .count_where(&db, &row(&[("status", "open".into())]), Combinator::And)
        .await
        .unwrap();
    assert_eq!(count, 3);
    insta::assert_snapshot!(db.statements()[1], @r#"
SELECT count(*) AS "count"
FROM "public"."tickets"
WHERE "status" = $1 AND "deleted_at" IS NULL
"#);
}

#[tokio::test]
async fn update_rejects_changed_generated_column() {
    let db = FakeDb::new();
    db.respond(stored_invoice());

    let err = invoices()
        .update(
            &db,
            &row(&[("id", Value::I64(1))]),
            &row(&[("amount", "15.00".into()), ("amount_cents", Value::I64(999))]),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::ImmutableField { ref column, .. } if column == "amount_cents"),
        "{err:?}"
    );
    assert!(db.starting_with("UPDATE").is_empty());
    assert_eq!(db.statements().last().map(String::as_str), Some("ROLLBACK"));
}

#[tokio::test]
async fn update_accepts_unchanged_generated_columns() {
    let db = FakeDb::new();
    db.respond(stored_invoice());
    db.respond(vec![row(&[("amount", Value::from("12.50"))])]);

    invoices()
        .update(
            &db,
            &row(&[("id", Value::I64(1))]),
            &row(&[
                ("id", Value::I64(1)),
                ("amount", "12.50".into()),
                ("amount_cents", Value::I64(1200)),
            ]),
        )
        .await
        .unwrap();

    insta::assert_snapshot!(db.starting_with("UPDATE")[0], @r#"
UPDATE "billing"."invoices"
SET "amount" = $1
WHERE "id" = $2
RETURNING *
"#);
}

#[tokio::test]
async fn update_with_only_unchanged_generated_columns_is_a_no_op() {
    let db = FakeDb::new();
    db.respond(stored_invoice());

    let stored = invoices()
        .update(
            &db,
            &row(&[("id", Value::I64(1))]),
            &row(&[("amount_cents", Value::I64(1200))]),
        )
        .await
        .unwrap();

    assert_eq!(stored.get("amount_cents"), Some(&Value::I64(1200)));
    let statements = db.statements();
    assert_eq!(statements.len(), 3, "{statements:?}");
    assert_eq!(statements[0], "BEGIN");
    assert!(statements[1].ends_with("FOR UPDATE"));
    assert_eq!(statements[2], "COMMIT");
}

#[tokio::test]
async fn updates_inside_caller_transaction_use_savepoints() {
    let db = FakeDb::new();
    let engine = products();
    let stored = row(&[
        ("id", Value::I64(1)),
        ("sku", "A-1".into()),
        ("name", "Anvil".into()),
    ]);
    db.respond(vec![stored.clone()]);
    db.respond(vec![stored.clone()]);
    db.respond(vec![stored]);

    db.begin().await.unwrap();
    let tx = db.within_transaction();
    engine
        .update(
            &tx,
            &row(&[("id", Value::I64(1))]),
            &row(&[("name", "Bigger anvil".into())]),
        )
        .await
        .unwrap();
    let err = engine
        .update(
            &tx,
            &row(&[("id", Value::I64(1))]),
            &row(&[("sku", "B-2".into())]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ImmutableField { .. }), "{err:?}");
    db.commit().await.unwrap();

    let outline: Vec<String> = db
        .statements()
        .iter()
        .map(|s| s.lines().next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        outline,
        [
            "BEGIN",
            "SAVEPOINT tally_work",
            "SELECT *",
            "UPDATE \"shop\".\"products\"",
            "RELEASE SAVEPOINT tally_work",
            "SAVEPOINT tally_work",
            "SELECT *",
            "ROLLBACK TO SAVEPOINT tally_work; RELEASE SAVEPOINT tally_work",
            "COMMIT",
        ]
    );
}
