use crate::*;

fn users() -> TableName {
    TableName::qualified("public", "users")
}

#[test]
fn test_select_star() {
    let stmt = SelectStmt::new(users());

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @r#"
SELECT *
FROM "public"."users"
"#);
    assert!(result.params.is_empty());
}

#[test]
fn test_select_with_where_and_order() {
    let stmt = SelectStmt::new(users())
        .columns([
            SelectColumn::expr(Expr::column("id")),
            SelectColumn::expr(Expr::column("name")),
        ])
        .where_(
            Expr::column("active")
                .eq(Expr::param("active"))
                .and(Expr::column("deleted_at").is_null()),
        )
        .order_by(OrderBy::desc(Expr::column("created_at")))
        .limit(Expr::Int(10))
        .offset(Expr::Int(20));

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @r#"
SELECT "id", "name"
FROM "public"."users"
WHERE "active" = $1 AND "deleted_at" IS NULL
ORDER BY "created_at" DESC
LIMIT 10
OFFSET 20
"#);
}

#[test]
fn test_select_with_params_dedupes() {
    let stmt = SelectStmt::new(users()).where_(
        Expr::column("handle")
            .eq(Expr::param("handle"))
            .and(Expr::column("alias").eq(Expr::param("handle")))
            .and(Expr::column("status").eq(Expr::param("status"))),
    );

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @r#"
SELECT *
FROM "public"."users"
WHERE "handle" = $1 AND "alias" = $1 AND "status" = $2
"#);
    assert_eq!(
        result.params,
        vec![ParamName::from("handle"), ParamName::from("status")]
    );
}

#[test]
fn test_or_group_keeps_precedence() {
    let any = Expr::any([
        Expr::column("a").eq(Expr::param("a")),
        Expr::column("b").eq(Expr::param("b")),
    ])
    .unwrap();
    let stmt = SelectStmt::new(users())
        .where_(any)
        .and_where(Expr::column("deleted_at").is_null())
        .for_update();

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @r#"
SELECT *
FROM "public"."users"
WHERE ("a" = $1 OR "b" = $2) AND "deleted_at" IS NULL
FOR UPDATE
"#);
}

#[test]
fn test_single_any_is_not_parenthesized() {
    let expr = Expr::any([Expr::column("a").is_null()]).unwrap();
    assert_eq!(expr, Expr::column("a").is_null());
    assert!(Expr::any(Vec::<Expr>::new()).is_none());
    assert!(Expr::all(Vec::<Expr>::new()).is_none());
}

#[test]
fn test_count_with_alias() {
    let stmt = SelectStmt::new(users()).column(SelectColumn::aliased(
        Expr::FnCall {
            name: "COUNT".into(),
            args: vec![Expr::Raw("*".into())],
        },
        "count",
    ));

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @r#"
SELECT COUNT(*) AS "count"
FROM "public"."users"
"#);
}

#[test]
fn test_insert_with_casts() {
    let stmt = InsertStmt::new(users())
        .column("email", Expr::param("email"))
        .column("born", Expr::param("born").cast("text").cast("timestamptz"))
        .column("created_at", Expr::Now)
        .returning(Returning::All);

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @r#"
INSERT INTO "public"."users" ("email", "born", "created_at")
VALUES ($1, $2::text::timestamptz, NOW())
RETURNING *
"#);
    assert_eq!(
        result.params,
        vec![ParamName::from("email"), ParamName::from("born")]
    );
}

#[test]
fn test_insert_default_values() {
    let stmt = InsertStmt::new(users()).returning(Returning::All);

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @r#"
INSERT INTO "public"."users"
DEFAULT VALUES
RETURNING *
"#);
}

#[test]
fn test_update_simple() {
    let stmt = UpdateStmt::new(users())
        .set("status", Expr::param("status"))
        .set("updated_at", Expr::Now)
        .where_(Expr::column("handle").eq(Expr::param("handle")))
        .returning(Returning::Columns(vec!["id".into(), "status".into()]));

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @r#"
UPDATE "public"."users"
SET "status" = $1, "updated_at" = NOW()
WHERE "handle" = $2
RETURNING "id", "status"
"#);
    assert_eq!(
        result.params,
        vec![ParamName::from("status"), ParamName::from("handle")]
    );
}

#[test]
fn test_delete_simple() {
    let stmt = DeleteStmt::new(users()).where_(Expr::column("id").eq(Expr::param("id")));

    let result = render(&stmt);
    insta::assert_snapshot!(result.sql, @r#"
DELETE FROM "public"."users"
WHERE "id" = $1
"#);
    assert_eq!(result.params, vec![ParamName::from("id")]);
}

#[test]
fn test_string_literals_are_escaped() {
    let stmt = DeleteStmt::new(TableName::new("t"))
        .where_(Expr::column("name").eq(Expr::string("O'Brien")));

    let result = render(&stmt);
    assert_eq!(result.sql, "DELETE FROM \"t\"\nWHERE \"name\" = 'O''Brien'");
}
