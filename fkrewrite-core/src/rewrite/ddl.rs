//! Replacement table DDL
//!
//! The scratch table is described with sea-query builders fed from the
//! introspected descriptors, never from a hardcoded column list. Columns added
//! by later migrations are carried over without any change here.

use sea_orm::sea_query::{
    Alias, ColumnDef, Expr, ForeignKey, Index, Table, TableCreateStatement,
};

use crate::errors::RewriteError;
use crate::schema::{
    ColumnDescriptor, ForeignKeyDescriptor, IndexOrigin, ReferentialAction, RewriteSpec,
    TableSchema,
};

pub struct DdlSynthesizer<'a> {
    schema: &'a TableSchema,
    spec: &'a RewriteSpec,
}

impl<'a> DdlSynthesizer<'a> {
    pub fn new(schema: &'a TableSchema, spec: &'a RewriteSpec) -> Self {
        Self { schema, spec }
    }

    /// `CREATE TABLE <table>_new (...)` with the target foreign key rewritten.
    pub fn scratch_table(&self) -> Result<TableCreateStatement, RewriteError> {
        if self.schema.columns.is_empty() {
            return Err(self.error("table has no columns"));
        }
        if self.schema.column(&self.spec.target_column).is_none() {
            return Err(self.error(format!(
                "column '{}' is not part of the table",
                self.spec.target_column
            )));
        }

        let scratch = self.spec.scratch_table();
        let primary_key = self.schema.primary_key();
        let inline_pk = primary_key.len() == 1;
        if self.schema.autoincrement && !inline_pk {
            return Err(self.error("AUTOINCREMENT without a single-column primary key"));
        }

        let mut stmt = Table::create();
        stmt.table(Alias::new(&scratch));

        let mut columns: Vec<&ColumnDescriptor> = self.schema.columns.iter().collect();
        columns.sort_by_key(|c| c.position);
        for column in columns {
            let mut def = self.column_def(column, inline_pk);
            stmt.col(&mut def);
        }

        if primary_key.len() > 1 {
            let mut pk = Index::create();
            for column in &primary_key {
                pk.col(Alias::new(&column.name));
            }
            stmt.primary_key(&mut pk);
        }

        for index in &self.schema.indexes {
            if index.origin != IndexOrigin::Unique {
                continue;
            }
            let Some(names) = index.column_names() else {
                return Err(self.error(format!("unique constraint {} has expression terms", index.name)));
            };
            let mut unique = Index::create();
            unique.unique();
            for name in names {
                unique.col(Alias::new(name));
            }
            stmt.index(&mut unique);
        }

        for fk in &self.schema.foreign_keys {
            let mut clause = self.foreign_key(&scratch, fk);
            stmt.foreign_key(&mut clause);
        }

        Ok(stmt.to_owned())
    }

    fn column_def(&self, column: &ColumnDescriptor, inline_pk: bool) -> ColumnDef {
        let mut def = ColumnDef::new(Alias::new(&column.name));
        if !column.declared_type.is_empty() {
            def.custom(Alias::new(&column.declared_type));
        }
        if column.not_null {
            def.not_null();
        }
        if let Some(default) = &column.default_expr {
            def.default(Expr::cust(default_sql(default)));
        }
        if inline_pk && column.is_primary_key {
            def.primary_key();
            if self.schema.autoincrement {
                def.auto_increment();
            }
        }
        def
    }

    fn foreign_key(
        &self,
        scratch: &str,
        fk: &ForeignKeyDescriptor,
    ) -> sea_orm::sea_query::ForeignKeyCreateStatement {
        let rewritten = fk.from_column == self.spec.target_column;
        let on_delete = if rewritten {
            self.spec.desired_on_delete
        } else {
            fk.on_delete
        };

        let mut clause = ForeignKey::create();
        clause
            .from(Alias::new(scratch), Alias::new(&fk.from_column))
            .to(Alias::new(&fk.to_table), Alias::new(&fk.to_column));
        if rewritten || on_delete != ReferentialAction::NoAction {
            clause.on_delete(on_delete.into());
        }
        if fk.on_update != ReferentialAction::NoAction {
            clause.on_update(fk.on_update.into());
        }
        clause
    }

    fn error(&self, reason: impl Into<String>) -> RewriteError {
        RewriteError::Synthesis {
            table: self.schema.name.clone(),
            reason: reason.into(),
        }
    }
}

/// `PRAGMA table_info` reports the default as written. Literals go back
/// verbatim; anything else is parenthesised, which is always valid.
fn default_sql(expr: &str) -> String {
    let trimmed = expr.trim();
    let upper = trimmed.to_ascii_uppercase();

    let literal = trimmed.starts_with('(')
        || trimmed.starts_with('\'')
        || upper.starts_with("X'")
        || trimmed.parse::<f64>().is_ok()
        || matches!(
            upper.as_str(),
            "NULL" | "TRUE" | "FALSE" | "CURRENT_TIME" | "CURRENT_DATE" | "CURRENT_TIMESTAMP"
        );

    if literal {
        trimmed.to_string()
    } else {
        format!("({})", trimmed)
    }
}
