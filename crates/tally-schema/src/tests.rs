use super::*;

fn users() -> TableDefinition {
    TableDefinition::new("public", "users")
        .column(
            ColumnDefinition::new("id", "uuid")
                .primary_key()
                .default("gen_random_uuid()"),
        )
        .column(ColumnDefinition::new("email", "varchar(255)").not_null().unique())
}

#[test]
fn test_parse_fk_reference_dot_format() {
    assert_eq!(parse_fk_reference("users.id"), Some(("users", "id")));
    assert_eq!(
        parse_fk_reference("app.category.parent_id"),
        Some(("app.category", "parent_id"))
    );
}

#[test]
fn test_parse_fk_reference_paren_format() {
    assert_eq!(parse_fk_reference("users(id)"), Some(("users", "id")));
    assert_eq!(parse_fk_reference("app.shop(id)"), Some(("app.shop", "id")));
}

#[test]
fn test_parse_fk_reference_invalid() {
    assert_eq!(parse_fk_reference(""), None);
    assert_eq!(parse_fk_reference("users"), None);
    assert_eq!(parse_fk_reference(".id"), None);
    assert_eq!(parse_fk_reference("users."), None);
    assert_eq!(parse_fk_reference("(id)"), None);
    assert_eq!(parse_fk_reference("users("), None);
    assert_eq!(parse_fk_reference("users()"), None);
}

#[test]
fn test_index_column_parse_desc_nulls_last() {
    let col = IndexColumn::parse("updated_at DESC NULLS LAST");
    assert_eq!(col.name, "updated_at");
    assert_eq!(col.order, SortOrder::Desc);
    assert_eq!(col.nulls, NullsOrder::Last);
    assert_eq!(col.to_sql(), "\"updated_at\" DESC NULLS LAST");
}

#[test]
fn test_index_column_parse_quoted() {
    let col = IndexColumn::parse("\"order\" ASC NULLS FIRST");
    assert_eq!(col.name, "order");
    assert_eq!(col.order, SortOrder::Asc);
    assert_eq!(col.nulls, NullsOrder::First);
}

#[test]
fn test_load_basic_table() {
    let schema = users().load().unwrap();
    assert_eq!(schema.qualified_name(), "\"public\".\"users\"");
    assert_eq!(schema.primary_key(), ["id".to_string()]);

    let id = schema.column("id").unwrap();
    assert!(!id.nullable);
    assert!(id.immutable);
    assert!(!id.is_required());

    let email = schema.column("email").unwrap();
    assert_eq!(email.ty.max_length(), Some(255));
    assert!(email.is_required());
    assert_eq!(schema.constraints().unique[0].name, "uq_users_email");
    assert!(schema.warnings().is_empty());
}

#[test]
fn test_columns_default_to_nullable() {
    let schema = users()
        .column(ColumnDefinition::new("nick", "text"))
        .load()
        .unwrap();
    assert!(schema.column("nick").unwrap().nullable);
}

#[test]
fn test_audit_and_soft_delete_append_managed_columns() {
    let schema = users().audit().soft_delete().load().unwrap();
    let names: Vec<&str> = schema.all_columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "id",
            "email",
            "created_at",
            "updated_at",
            "created_by",
            "updated_by",
            "deleted_at"
        ]
    );
    assert_eq!(schema.declared_columns().count(), 2);

    let created_at = schema.managed(ManagedColumn::CreatedAt).unwrap();
    assert!(!created_at.nullable);
    assert_eq!(created_at.default.as_deref(), Some("now()"));
    assert!(schema.managed(ManagedColumn::DeletedAt).unwrap().nullable);
}

#[test]
fn test_managed_column_collision_is_rejected() {
    let err = users()
        .column(ColumnDefinition::new("deleted_at", "timestamptz"))
        .soft_delete()
        .load()
        .unwrap_err();
    assert_eq!(
        err,
        SchemaError::ReservedColumn {
            table: "users".into(),
            column: "deleted_at".into(),
            feature: "soft delete",
        }
    );

    // Without the option, the name is free.
    users()
        .column(ColumnDefinition::new("deleted_at", "timestamptz"))
        .load()
        .unwrap();
}

#[test]
fn test_duplicate_column_is_rejected() {
    let err = users()
        .column(ColumnDefinition::new("email", "text"))
        .load()
        .unwrap_err();
    assert!(matches!(err, SchemaError::DuplicateColumn { column, .. } if column == "email"));
}

#[test]
fn test_constraint_on_unknown_column_is_rejected() {
    let err = users().unique(["email", "handle"]).load().unwrap_err();
    assert!(matches!(err, SchemaError::UnknownColumn { column, .. } if column == "handle"));

    let err = users()
        .index(IndexDefinition::new(["missing DESC"]))
        .load()
        .unwrap_err();
    assert!(matches!(err, SchemaError::UnknownColumn { column, .. } if column == "missing"));
}

#[test]
fn test_nullable_primary_key_is_rejected() {
    let err = TableDefinition::new("public", "t")
        .column(ColumnDefinition::new("id", "bigint").nullable())
        .primary_key(["id"])
        .load()
        .unwrap_err();
    assert!(matches!(err, SchemaError::InvalidPrimaryKey { .. }));
}

#[test]
fn test_generated_column_rules() {
    let err = users()
        .column(
            ColumnDefinition::new("total", "integer")
                .generated_as("1 + 1")
                .default("0"),
        )
        .load()
        .unwrap_err();
    assert!(matches!(err, SchemaError::InvalidColumn { reason, .. } if reason.contains("default")));

    let err = users()
        .column(ColumnDefinition::new("seq", "text").identity(GeneratedKind::Always))
        .load()
        .unwrap_err();
    assert!(matches!(err, SchemaError::InvalidColumn { reason, .. } if reason.contains("integer")));

    let mut by_default = ColumnDefinition::new("lower_email", "text").generated_as("lower(email)");
    if let Some(generated) = &mut by_default.generated {
        generated.kind = GeneratedKind::ByDefault;
    }
    let err = users().column(by_default).load().unwrap_err();
    assert!(matches!(err, SchemaError::InvalidColumn { reason, .. } if reason.contains("by-default")));

    users()
        .column(ColumnDefinition::new("seq", "bigint").identity(GeneratedKind::ByDefault))
        .load()
        .unwrap();
}

#[test]
fn test_foreign_key_arity_mismatch() {
    let err = users()
        .column(ColumnDefinition::new("org_id", "uuid"))
        .foreign_key(ForeignKeyDefinition::new(["org_id"], "orgs", ["id", "region"]))
        .load()
        .unwrap_err();
    assert_eq!(
        err,
        SchemaError::ForeignKeyArity {
            table: "users".into(),
            constraint: "fk_users_org_id".into(),
            columns: 1,
            referenced: 2,
        }
    );
}

#[test]
fn test_reference_shorthand_builds_foreign_key() {
    let schema = users()
        .column(ColumnDefinition::new("org_id", "uuid").references("billing.orgs(id)"))
        .load()
        .unwrap();
    let fk = &schema.constraints().foreign_keys[0];
    assert_eq!(fk.references_namespace.as_deref(), Some("billing"));
    assert_eq!(fk.references_table, "orgs");
    assert_eq!(fk.references_columns, ["id".to_string()]);
}

#[test]
fn test_inline_length_wins_with_warning() {
    let schema = users()
        .column(ColumnDefinition::new("handle", "varchar(40)").length(80))
        .load()
        .unwrap();
    assert_eq!(schema.column("handle").unwrap().ty.to_string(), "varchar(40)");
    assert_eq!(schema.warnings().len(), 1);
    assert_eq!(schema.warnings()[0].column.as_deref(), Some("handle"));

    let schema = users()
        .column(ColumnDefinition::new("handle", "varchar").length(80))
        .load()
        .unwrap();
    assert_eq!(schema.column("handle").unwrap().ty.to_string(), "varchar(80)");
    assert!(schema.warnings().is_empty());

    let err = users()
        .column(ColumnDefinition::new("n", "integer").length(8))
        .load()
        .unwrap_err();
    assert!(matches!(err, SchemaError::InvalidColumn { .. }));
}

#[test]
fn test_behavior_consistency_checks() {
    let err = users()
        .column(ColumnDefinition::new("meta", "text").json())
        .load()
        .unwrap_err();
    assert!(matches!(err, SchemaError::InvalidColumn { reason, .. } if reason.contains("json")));

    let err = users()
        .column(ColumnDefinition::new("slug", "text").skip(SkipRule::UnlessPresent("title".into())))
        .load()
        .unwrap_err();
    assert!(matches!(err, SchemaError::UnknownColumn { column, .. } if column == "title"));
}

#[test]
fn test_load_from_json() {
    let def = TableDefinition::from_json(
        r#"{
            "name": "orders",
            "soft_delete": true,
            "columns": [
                {"name": "id", "type": "bigint", "generated": {"kind": "by-default"}},
                {"name": "status", "type": "text", "nullable": false, "default": "'open'"},
                {"name": "note", "type": "text", "behavior": {"skip": "if-absent", "init": "trim"}}
            ],
            "constraints": {
                "primary_key": ["id"],
                "checks": [{"expression": "status IN ('open', 'closed')"}],
                "indexes": [{"columns": ["status", "id DESC"], "where": "deleted_at IS NULL"}]
            }
        }"#,
    )
    .unwrap();
    assert_eq!(def.namespace, DEFAULT_NAMESPACE);

    let schema = def.load().unwrap();
    assert!(schema.soft_delete());
    let note = schema.column("note").unwrap();
    assert_eq!(note.behavior.skip, SkipRule::IfAbsent);
    assert_eq!(note.behavior.init, Some(InitRule::Trim));
    assert!(schema.constraints().checks[0].name.starts_with("ck_orders_"));
    assert_eq!(schema.constraints().indexes[0].name, "idx_orders_status_id");
}

#[test]
fn test_load_from_toml() {
    let def = TableDefinition::from_toml(
        r#"
namespace = "app"
name = "tags"

[[columns]]
name = "label"
type = "text"
primary_key = true
"#,
    )
    .unwrap();
    let schema = def.load().unwrap();
    assert_eq!(schema.namespace(), "app");
    assert_eq!(schema.primary_key(), ["label".to_string()]);
}

#[test]
fn test_unknown_fields_are_rejected() {
    let err = TableDefinition::from_json(r#"{"name": "t", "colums": []}"#).unwrap_err();
    assert!(matches!(err, SchemaError::Parse(_)));
}
