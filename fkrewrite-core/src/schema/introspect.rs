//! Live catalog reads for SQLite
//!
//! Every read goes through the `pragma_*` table-valued functions so the table
//! name is bound as a parameter rather than spliced into the statement.

use std::collections::BTreeMap;

use sea_orm::{ConnectionTrait, DbErr, QueryResult, Statement};
use sqlparser::ast::{
    ColumnOption, ConstraintCharacteristics, Statement as SqlStatement, TableConstraint,
};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use tracing::debug;

use super::{
    ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, IndexOrigin, ReferentialAction,
    TableSchema, TriggerDescriptor,
};
use crate::errors::RewriteError;

pub struct SchemaIntrospector<'a, C> {
    db: &'a C,
}

impl<'a, C> SchemaIntrospector<'a, C>
where
    C: ConnectionTrait,
{
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    async fn query(&self, sql: &str, name: &str) -> Result<Vec<QueryResult>, DbErr> {
        let backend = self.db.get_database_backend();
        self.db
            .query_all(Statement::from_sql_and_values(backend, sql, [name.into()]))
            .await
    }

    async fn stored_sql(&self, kind: &str, name: &str) -> Result<Option<Option<String>>, DbErr> {
        let backend = self.db.get_database_backend();
        let row = self
            .db
            .query_one(Statement::from_sql_and_values(
                backend,
                "SELECT sql FROM sqlite_master WHERE type = ? AND name = ? COLLATE NOCASE",
                [kind.into(), name.into()],
            ))
            .await?;

        row.map(|row| row.try_get::<Option<String>>("", "sql"))
            .transpose()
    }

    pub async fn table_exists(&self, name: &str) -> Result<bool, DbErr> {
        Ok(self.stored_sql("table", name).await?.is_some())
    }

    /// Full snapshot of `name`: columns, foreign keys, indexes and the
    /// definition features that cannot be reproduced from the catalog.
    pub async fn describe_table(&self, name: &str) -> Result<TableSchema, RewriteError> {
        let create_sql = match self.stored_sql("table", name).await? {
            Some(sql) => sql,
            None => return Err(RewriteError::SchemaNotFound(name.to_string())),
        };

        let (columns, mut unsupported) = self.read_columns(name).await?;
        if columns.is_empty() {
            return Err(RewriteError::SchemaNotFound(name.to_string()));
        }

        let (foreign_keys, fk_unsupported) = self.read_foreign_keys(name).await?;
        unsupported.extend(fk_unsupported);

        let indexes = self.describe_indexes(name).await?;
        let triggers = self.describe_triggers(name).await?;

        let scan = create_sql
            .as_deref()
            .map(scan_table_definition)
            .unwrap_or_default();
        unsupported.extend(scan.unsupported);

        debug!(
            "Introspected {}: {} columns, {} foreign keys, {} indexes",
            name,
            columns.len(),
            foreign_keys.len(),
            indexes.len()
        );

        Ok(TableSchema {
            name: name.to_string(),
            columns,
            foreign_keys,
            indexes,
            triggers,
            autoincrement: scan.autoincrement,
            create_sql,
            unsupported,
        })
    }

    /// Foreign keys of `name` that can be described column-to-column.
    pub async fn describe_foreign_keys(
        &self,
        name: &str,
    ) -> Result<Vec<ForeignKeyDescriptor>, RewriteError> {
        Ok(self.read_foreign_keys(name).await?.0)
    }

    pub async fn describe_indexes(&self, name: &str) -> Result<Vec<IndexDescriptor>, DbErr> {
        let listed = self
            .query("SELECT * FROM pragma_index_list(?) ORDER BY seq", name)
            .await?
            .iter()
            .map(|row| -> Result<(String, i32, String, i32), DbErr> {
                Ok((
                    row.try_get("", "name")?,
                    row.try_get("", "unique")?,
                    row.try_get("", "origin")?,
                    row.try_get("", "partial")?,
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut indexes = Vec::with_capacity(listed.len());
        for (index_name, unique, origin, partial) in listed {
            let columns = self
                .query(
                    "SELECT * FROM pragma_index_info(?) ORDER BY seqno",
                    &index_name,
                )
                .await?
                .iter()
                .map(|r| r.try_get::<Option<String>>("", "name"))
                .collect::<Result<Vec<_>, _>>()?;

            let sql = self.stored_sql("index", &index_name).await?.flatten();

            indexes.push(IndexDescriptor {
                name: index_name,
                unique: unique != 0,
                origin: IndexOrigin::from_catalog(&origin),
                columns,
                partial: partial != 0,
                sql,
            });
        }

        Ok(indexes)
    }

    pub async fn describe_triggers(&self, name: &str) -> Result<Vec<TriggerDescriptor>, DbErr> {
        let rows = self
            .query(
                "SELECT name, sql FROM sqlite_master \
                 WHERE type = 'trigger' AND tbl_name = ? COLLATE NOCASE ORDER BY name",
                name,
            )
            .await?;

        rows.iter()
            .map(|row| -> Result<TriggerDescriptor, DbErr> {
                Ok(TriggerDescriptor {
                    name: row.try_get("", "name")?,
                    sql: row.try_get("", "sql")?,
                })
            })
            .collect()
    }

    async fn read_columns(
        &self,
        name: &str,
    ) -> Result<(Vec<ColumnDescriptor>, Vec<String>), DbErr> {
        let rows = self
            .query("SELECT * FROM pragma_table_xinfo(?) ORDER BY cid", name)
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        let mut unsupported = Vec::new();
        for row in rows {
            let column_name: String = row.try_get("", "name")?;
            let hidden: i32 = row.try_get("", "hidden")?;
            if hidden != 0 {
                unsupported.push(format!("generated or hidden column '{}'", column_name));
                continue;
            }

            let pk: i32 = row.try_get("", "pk")?;
            let not_null: i32 = row.try_get("", "notnull")?;
            columns.push(ColumnDescriptor {
                position: row.try_get("", "cid")?,
                name: column_name,
                declared_type: row.try_get("", "type")?,
                not_null: not_null != 0,
                default_expr: row.try_get("", "dflt_value")?,
                is_primary_key: pk > 0,
                pk_ordinal: pk,
            });
        }

        Ok((columns, unsupported))
    }

    async fn read_foreign_keys(
        &self,
        name: &str,
    ) -> Result<(Vec<ForeignKeyDescriptor>, Vec<String>), DbErr> {
        let rows = self
            .query(
                "SELECT * FROM pragma_foreign_key_list(?) ORDER BY id, seq",
                name,
            )
            .await?
            .iter()
            .map(CatalogForeignKey::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let mut grouped: BTreeMap<i32, Vec<CatalogForeignKey>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.id).or_default().push(row);
        }

        let mut foreign_keys = Vec::with_capacity(grouped.len());
        let mut unsupported = Vec::new();
        for (id, mut rows) in grouped {
            if rows.len() > 1 {
                unsupported.push(format!("composite foreign key #{}", id));
                continue;
            }

            let Some(row) = rows.pop() else { continue };
            let to_column = match row.to {
                Some(column) => column,
                None => match self.implicit_parent_key(&row.table).await? {
                    Some(column) => column,
                    None => {
                        unsupported.push(format!(
                            "foreign key on '{}' references '{}' without a resolvable key",
                            row.from, row.table
                        ));
                        continue;
                    }
                },
            };

            foreign_keys.push(ForeignKeyDescriptor {
                constraint_id: id,
                from_column: row.from,
                to_table: row.table,
                to_column,
                on_update: ReferentialAction::from_catalog(&row.on_update),
                on_delete: ReferentialAction::from_catalog(&row.on_delete),
            });
        }

        Ok((foreign_keys, unsupported))
    }

    /// `REFERENCES parent` without a column list targets the parent's primary key.
    async fn implicit_parent_key(&self, parent: &str) -> Result<Option<String>, DbErr> {
        let rows = self
            .query(
                "SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk",
                parent,
            )
            .await?;

        match rows.as_slice() {
            [row] => Ok(Some(row.try_get("", "name")?)),
            _ => Ok(None),
        }
    }
}

/// One row of `PRAGMA foreign_key_list`
struct CatalogForeignKey {
    id: i32,
    table: String,
    from: String,
    to: Option<String>,
    on_update: String,
    on_delete: String,
}

impl CatalogForeignKey {
    fn from_row(row: &QueryResult) -> Result<Self, DbErr> {
        Ok(Self {
            id: row.try_get("", "id")?,
            table: row.try_get("", "table")?,
            from: row.try_get("", "from")?,
            to: row.try_get("", "to")?,
            on_update: row.try_get("", "on_update")?,
            on_delete: row.try_get("", "on_delete")?,
        })
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct DefinitionScan {
    pub autoincrement: bool,
    pub unsupported: Vec<String>,
}

impl DefinitionScan {
    fn note(&mut self, reason: &str) {
        if !self.unsupported.iter().any(|r| r == reason) {
            self.unsupported.push(reason.to_string());
        }
    }
}

fn is_deferrable(characteristics: &Option<ConstraintCharacteristics>) -> bool {
    characteristics
        .as_ref()
        .and_then(|c| c.deferrable)
        .unwrap_or(false)
}

/// Parses a stored `CREATE TABLE` for clauses the pragmas do not report.
/// A definition the parser cannot read is reported as unsupported.
pub(crate) fn scan_table_definition(sql: &str) -> DefinitionScan {
    let mut scan = DefinitionScan::default();

    let create = match Parser::parse_sql(&SQLiteDialect {}, sql) {
        Ok(statements) => statements.into_iter().find_map(|statement| match statement {
            SqlStatement::CreateTable(create) => Some(create),
            _ => None,
        }),
        Err(e) => {
            debug!("Cannot parse table definition: {}", e);
            None
        }
    };
    let Some(create) = create else {
        scan.note("definition not understood by the SQL parser");
        return scan;
    };

    for column in &create.columns {
        if column.collation.is_some() {
            scan.note("COLLATE clause");
        }
        for def in &column.options {
            match &def.option {
                ColumnOption::Check(_) => scan.note("CHECK constraint"),
                ColumnOption::OnConflict(_) => scan.note("ON CONFLICT clause"),
                ColumnOption::DialectSpecific(tokens)
                    if tokens
                        .iter()
                        .any(|t| t.to_string().eq_ignore_ascii_case("AUTOINCREMENT")) =>
                {
                    scan.autoincrement = true;
                }
                ColumnOption::Unique {
                    characteristics, ..
                }
                | ColumnOption::ForeignKey {
                    characteristics, ..
                } if is_deferrable(characteristics) => scan.note("deferrable constraint"),
                _ => {}
            }
        }
    }

    for constraint in &create.constraints {
        match constraint {
            TableConstraint::Check { .. } => scan.note("CHECK constraint"),
            TableConstraint::Unique {
                characteristics, ..
            }
            | TableConstraint::PrimaryKey {
                characteristics, ..
            }
            | TableConstraint::ForeignKey {
                characteristics, ..
            } if is_deferrable(characteristics) => scan.note("deferrable constraint"),
            _ => {}
        }
    }

    if create.without_rowid {
        scan.note("WITHOUT ROWID table");
    }
    if create.strict {
        scan.note("STRICT table");
    }

    scan
}
