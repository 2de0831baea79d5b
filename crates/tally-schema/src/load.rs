//! Turning a [`TableDefinition`] into a validated [`TableSchema`].

use std::collections::HashSet;

use tally_sql::{check_constraint_name, foreign_key_name, index_name, primary_key_name, unique_name};

use crate::{
    CheckConstraint, Column, ColumnDefinition, ColumnType, Constraints, ForeignKey,
    ForeignKeyDefinition, FormatModifier, Index, IndexColumn, InitRule, ManagedColumn,
    PrimaryKey, SchemaError, SchemaWarning, SkipRule, TableDefinition, TableSchema,
    UniqueConstraint, UniqueDefinition, parse_fk_reference,
};

impl TableSchema {
    /// Validate a definition. Every structural problem is reported here, so
    /// nothing downstream has to re-check it.
    pub fn load(def: TableDefinition) -> Result<TableSchema, SchemaError> {
        if def.namespace.trim().is_empty() {
            return Err(SchemaError::EmptyName { what: "namespace" });
        }
        if def.name.trim().is_empty() {
            return Err(SchemaError::EmptyName { what: "table" });
        }
        let table = def.name.clone();
        if def.columns.is_empty() {
            return Err(SchemaError::NoColumns { table });
        }

        let mut managed = Vec::new();
        if def.audit {
            managed.extend(ManagedColumn::AUDIT);
        }
        if def.soft_delete {
            managed.push(ManagedColumn::DeletedAt);
        }

        let mut names = HashSet::new();
        for col in &def.columns {
            if col.name.trim().is_empty() {
                return Err(SchemaError::EmptyName { what: "column" });
            }
            if !names.insert(col.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table,
                    column: col.name.clone(),
                });
            }
            if let Some(kind) = managed.iter().find(|m| m.column_name() == col.name) {
                return Err(SchemaError::ReservedColumn {
                    table,
                    column: col.name.clone(),
                    feature: kind.feature(),
                });
            }
        }

        let shorthand_pk: Vec<String> = def
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        let pk_columns = match (shorthand_pk.is_empty(), def.constraints.primary_key.is_empty()) {
            (false, false) => {
                return Err(SchemaError::InvalidPrimaryKey {
                    table,
                    reason: "declared both on columns and in constraints".into(),
                });
            }
            (false, true) => shorthand_pk,
            _ => def.constraints.primary_key.clone(),
        };

        let mut warnings = Vec::new();
        let mut columns = Vec::with_capacity(def.columns.len() + managed.len());
        let mut unique_defs = def.constraints.unique.clone();
        let mut fk_defs = def.constraints.foreign_keys.clone();

        for col in &def.columns {
            let is_pk = pk_columns.contains(&col.name);
            columns.push(load_column(&table, col, is_pk, &names, &mut warnings)?);

            if col.unique {
                unique_defs.push(UniqueDefinition {
                    name: None,
                    columns: vec![col.name.clone()],
                });
            }
            if let Some(target) = &col.references {
                let (ref_table, ref_column) =
                    parse_fk_reference(target).ok_or_else(|| SchemaError::InvalidColumn {
                        table: table.clone(),
                        column: col.name.clone(),
                        reason: format!("invalid reference {target:?}"),
                    })?;
                fk_defs.push(ForeignKeyDefinition::new(
                    [col.name.as_str()],
                    ref_table,
                    [ref_column],
                ));
            }
        }
        columns.extend(managed.iter().map(|m| m.column()));

        let constraints = load_constraints(&table, &columns, pk_columns, unique_defs, fk_defs, &def)?;

        for warning in &warnings {
            tracing::warn!(table = %table, "{warning}");
        }

        Ok(TableSchema {
            namespace: def.namespace,
            name: def.name,
            audit: def.audit,
            soft_delete: def.soft_delete,
            version: def.version,
            doc: def.doc,
            columns,
            constraints,
            warnings,
        })
    }
}

fn load_column(
    table: &str,
    def: &ColumnDefinition,
    is_pk: bool,
    names: &HashSet<&str>,
    warnings: &mut Vec<SchemaWarning>,
) -> Result<Column, SchemaError> {
    let invalid = |reason: String| SchemaError::InvalidColumn {
        table: table.to_string(),
        column: def.name.clone(),
        reason,
    };

    let mut ty = ColumnType::parse(&def.ty).ok_or_else(|| SchemaError::InvalidType {
        table: table.to_string(),
        column: def.name.clone(),
        ty: def.ty.clone(),
    })?;

    match (&ty.modifier, def.length) {
        (Some(inline), Some(length)) => warnings.push(SchemaWarning {
            column: Some(def.name.clone()),
            message: format!(
                "type {} carries an inline length; ignoring length attribute {length} (inline {inline} wins)",
                def.ty
            ),
        }),
        (None, Some(length)) => {
            if !ty.kind.takes_length() || ty.array {
                return Err(invalid(format!("type {ty} does not take a length")));
            }
            ty.modifier = Some(length.to_string());
        }
        _ => {}
    }

    let nullable = if is_pk {
        if def.nullable == Some(true) {
            return Err(SchemaError::InvalidPrimaryKey {
                table: table.to_string(),
                reason: format!("column {} cannot be nullable", def.name),
            });
        }
        false
    } else {
        def.nullable.unwrap_or(true)
    };

    if let Some(generated) = &def.generated {
        if def.default.is_some() {
            return Err(invalid("generated column cannot declare a default".into()));
        }
        if generated.is_identity() {
            if !ty.kind.is_integer() || ty.array {
                return Err(invalid(format!("identity column must be an integer type, not {ty}")));
            }
        } else if !generated.is_always() {
            return Err(invalid(
                "by-default generated column cannot carry an expression".into(),
            ));
        }
        if def.behavior.conditional {
            return Err(invalid("generated column cannot be conditional".into()));
        }
    }

    let behavior = &def.behavior;
    if behavior.format == FormatModifier::Json && !ty.kind.is_json() {
        return Err(invalid(format!("json format requires a json or jsonb column, not {ty}")));
    }
    if behavior.init == Some(InitRule::Now) && !ty.kind.is_temporal() {
        return Err(invalid(format!("now init requires a date/time column, not {ty}")));
    }
    if let SkipRule::UnlessPresent(other) = &behavior.skip
        && !names.contains(other.as_str())
    {
        return Err(SchemaError::UnknownColumn {
            table: table.to_string(),
            constraint: format!("skip rule of {}", def.name),
            column: other.clone(),
        });
    }

    Ok(Column {
        name: def.name.clone(),
        ty,
        nullable,
        default: def.default.clone(),
        primary_key: is_pk,
        immutable: def.immutable || is_pk,
        generated: def.generated.clone(),
        behavior: behavior.clone(),
        managed: None,
        doc: def.doc.clone(),
    })
}

fn load_constraints(
    table: &str,
    columns: &[Column],
    pk_columns: Vec<String>,
    unique_defs: Vec<UniqueDefinition>,
    fk_defs: Vec<ForeignKeyDefinition>,
    def: &TableDefinition,
) -> Result<Constraints, SchemaError> {
    let require = |constraint: &str, cols: &[String]| -> Result<(), SchemaError> {
        if cols.is_empty() {
            return Err(SchemaError::EmptyConstraint {
                table: table.to_string(),
                constraint: constraint.to_string(),
            });
        }
        for col in cols {
            if !columns.iter().any(|c| &c.name == col) {
                return Err(SchemaError::UnknownColumn {
                    table: table.to_string(),
                    constraint: constraint.to_string(),
                    column: col.clone(),
                });
            }
        }
        Ok(())
    };

    let mut constraints = Constraints::default();

    if !pk_columns.is_empty() {
        require("primary key", &pk_columns)?;
        constraints.primary_key = Some(PrimaryKey {
            name: primary_key_name(table),
            columns: pk_columns,
        });
    }

    for unique in unique_defs {
        let name = unique
            .name
            .unwrap_or_else(|| unique_name(table, &unique.columns));
        require(&format!("unique constraint {name}"), &unique.columns)?;
        constraints.unique.push(UniqueConstraint {
            name,
            columns: unique.columns,
        });
    }

    for check in &def.constraints.checks {
        if check.expression.trim().is_empty() {
            return Err(SchemaError::EmptyConstraint {
                table: table.to_string(),
                constraint: "check".into(),
            });
        }
        constraints.checks.push(CheckConstraint {
            name: check
                .name
                .clone()
                .unwrap_or_else(|| check_constraint_name(table, &check.expression)),
            expr: check.expression.trim().to_string(),
        });
    }

    for fk in fk_defs {
        let name = fk
            .name
            .unwrap_or_else(|| foreign_key_name(table, &fk.columns));
        require(&format!("foreign key {name}"), &fk.columns)?;
        if fk.columns.len() != fk.referenced_columns.len() {
            return Err(SchemaError::ForeignKeyArity {
                table: table.to_string(),
                constraint: name,
                columns: fk.columns.len(),
                referenced: fk.referenced_columns.len(),
            });
        }
        let (references_namespace, references_table) = match fk.references.split_once('.') {
            Some((ns, t)) => (Some(ns.to_string()), t.to_string()),
            None => (None, fk.references.clone()),
        };
        if references_table.is_empty() {
            return Err(SchemaError::EmptyConstraint {
                table: table.to_string(),
                constraint: format!("foreign key {name} target"),
            });
        }
        constraints.foreign_keys.push(ForeignKey {
            name,
            columns: fk.columns,
            references_namespace,
            references_table,
            references_columns: fk.referenced_columns,
            on_delete: fk.on_delete,
        });
    }

    for index in &def.constraints.indexes {
        let cols: Vec<IndexColumn> = index.columns.iter().map(|c| IndexColumn::parse(c)).collect();
        let col_names: Vec<String> = cols.iter().map(|c| c.name.clone()).collect();
        let name = index
            .name
            .clone()
            .unwrap_or_else(|| index_name(table, &col_names));
        require(&format!("index {name}"), &col_names)?;
        constraints.indexes.push(Index {
            name,
            columns: cols,
            method: index.method,
            unique: index.unique,
            where_clause: index.where_clause.clone(),
        });
    }

    let mut seen = HashSet::new();
    let all_names = constraints
        .primary_key
        .iter()
        .map(|pk| &pk.name)
        .chain(constraints.unique.iter().map(|u| &u.name))
        .chain(constraints.checks.iter().map(|c| &c.name))
        .chain(constraints.foreign_keys.iter().map(|f| &f.name))
        .chain(constraints.indexes.iter().map(|i| &i.name));
    for name in all_names {
        if !seen.insert(name) {
            return Err(SchemaError::DuplicateConstraint {
                table: table.to_string(),
                name: name.clone(),
            });
        }
    }

    Ok(constraints)
}
