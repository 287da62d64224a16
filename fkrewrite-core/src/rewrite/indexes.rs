//! Index recreation after the table swap
//!
//! `DROP TABLE` takes every index of the original table with it. Required
//! indexes from the [`RewriteSpec`] are always recreated; explicit indexes
//! found on the original table are recreated too unless
//! `preserve_existing_indexes` is off.
//! Everything is emitted with `IF NOT EXISTS` so a repeated run is harmless.

use std::sync::OnceLock;

use regex::Regex;
use sea_orm::sea_query::{Alias, Index};
use sea_orm::{DbBackend, Statement};

use crate::schema::{IndexDescriptor, IndexOrigin, IndexSpec, RewriteSpec, TableSchema};

/// One index the recreator will (re)build, with the statement that does it.
#[derive(Debug, Clone)]
pub struct IndexStatement {
    pub name: String,
    pub statement: Statement,
}

pub struct IndexRecreator<'a> {
    spec: &'a RewriteSpec,
    backend: DbBackend,
}

impl<'a> IndexRecreator<'a> {
    pub fn new(spec: &'a RewriteSpec, backend: DbBackend) -> Self {
        Self { spec, backend }
    }

    /// Required indexes only; used when the original index list is unknown.
    pub fn required(&self) -> Vec<IndexStatement> {
        self.spec
            .required_indexes
            .iter()
            .map(|index| self.from_spec(index))
            .collect()
    }

    /// Required indexes plus, when enabled, the explicit indexes of `schema`.
    pub fn statements(&self, schema: &TableSchema) -> Vec<IndexStatement> {
        let mut statements = Vec::new();

        if self.spec.preserve_existing_indexes {
            for index in &schema.indexes {
                if index.origin != IndexOrigin::CreateIndex {
                    continue;
                }
                if self.spec.required_indexes.iter().any(|r| r.name == index.name) {
                    continue;
                }
                if let Some(statement) = self.from_descriptor(index) {
                    statements.push(statement);
                }
            }
        }

        for required in &self.spec.required_indexes {
            if required.columns.iter().all(|c| schema.column(c).is_some()) {
                statements.push(self.from_spec(required));
            }
        }

        statements
    }

    fn from_spec(&self, index: &IndexSpec) -> IndexStatement {
        let mut stmt = Index::create();
        stmt.if_not_exists()
            .name(&index.name)
            .table(Alias::new(&self.spec.target_table));
        for column in &index.columns {
            stmt.col(Alias::new(column));
        }
        if index.unique {
            stmt.unique();
        }

        IndexStatement {
            name: index.name.clone(),
            statement: self.backend.build(&stmt),
        }
    }

    /// Replays the stored `CREATE INDEX` text. The catalog column list loses
    /// per-term `COLLATE` and `DESC`, so it is only used when no text exists.
    fn from_descriptor(&self, index: &IndexDescriptor) -> Option<IndexStatement> {
        if let Some(sql) = index.sql.as_deref() {
            return Some(IndexStatement {
                name: index.name.clone(),
                statement: Statement::from_string(self.backend, with_if_not_exists(sql)),
            });
        }
        if index.partial {
            return None;
        }

        let columns = index.column_names()?;
        Some(self.from_spec(&IndexSpec {
            name: index.name.clone(),
            columns: columns.into_iter().map(str::to_string).collect(),
            unique: index.unique,
        }))
    }
}

fn create_index_prefix() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| {
        Regex::new(r"(?i)^\s*CREATE\s+(UNIQUE\s+)?INDEX\s+(IF\s+NOT\s+EXISTS\s+)?")
            .expect("static regex")
    })
}

fn with_if_not_exists(sql: &str) -> String {
    create_index_prefix()
        .replace(sql, |caps: &regex::Captures| {
            let unique = if caps.get(1).is_some() { "UNIQUE " } else { "" };
            format!("CREATE {}INDEX IF NOT EXISTS ", unique)
        })
        .into_owned()
}
