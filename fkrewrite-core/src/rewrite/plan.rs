//! The ordered statement list of one table rebuild
//!
//! Built entirely from the introspected schema, so a dry run shows exactly
//! what an upgrade would execute.

use sea_orm::sea_query::{Alias, Query, Table};
use sea_orm::{DbBackend, Statement};
use serde::Serialize;

use super::ddl::DdlSynthesizer;
use super::indexes::IndexRecreator;
use super::rebuild::RebuildStage;
use crate::errors::RewriteError;
use crate::schema::{ColumnDescriptor, RewriteSpec, TableSchema};

#[derive(Debug, Clone)]
pub struct PlannedStatement {
    pub stage: RebuildStage,
    pub statement: Statement,
}

#[derive(Debug, Clone)]
pub struct RewritePlan {
    pub table: String,
    pub scratch: String,
    /// Columns copied by name, in physical order
    pub columns: Vec<String>,
    pub statements: Vec<PlannedStatement>,
    pub indexes: Vec<String>,
    pub triggers: Vec<String>,
}

/// Serializable view of a plan for `plan` output.
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub table: String,
    pub scratch: String,
    pub columns: Vec<String>,
    pub statements: Vec<String>,
}

impl RewritePlan {
    pub fn build(
        schema: &TableSchema,
        spec: &RewriteSpec,
        backend: DbBackend,
    ) -> Result<Self, RewriteError> {
        let table = Alias::new(&schema.name);
        let scratch_name = spec.scratch_table();
        let scratch = Alias::new(&scratch_name);

        let create = DdlSynthesizer::new(schema, spec).scratch_table()?;

        let mut ordered: Vec<&ColumnDescriptor> = schema.columns.iter().collect();
        ordered.sort_by_key(|c| c.position);
        let columns: Vec<String> = ordered.iter().map(|c| c.name.clone()).collect();

        let select = Query::select()
            .columns(columns.iter().map(Alias::new))
            .from(table.clone())
            .to_owned();
        let copy = Query::insert()
            .into_table(scratch.clone())
            .columns(columns.iter().map(Alias::new))
            .select_from(select)
            .map_err(|e| RewriteError::Synthesis {
                table: schema.name.clone(),
                reason: e.to_string(),
            })?
            .to_owned();

        let mut statements = vec![
            PlannedStatement {
                stage: RebuildStage::DropStaleScratch,
                statement: backend.build(
                    &Table::drop()
                        .table(scratch.clone())
                        .if_exists()
                        .to_owned(),
                ),
            },
            PlannedStatement {
                stage: RebuildStage::CreateScratch,
                statement: backend.build(&create),
            },
            PlannedStatement {
                stage: RebuildStage::CopyRows,
                statement: backend.build(&copy),
            },
            PlannedStatement {
                stage: RebuildStage::DropOriginal,
                statement: backend.build(&Table::drop().table(table.clone()).to_owned()),
            },
            PlannedStatement {
                stage: RebuildStage::RenameScratch,
                statement: backend.build(&Table::rename().table(scratch, table).to_owned()),
            },
        ];

        let index_statements = IndexRecreator::new(spec, backend).statements(schema);
        let indexes = index_statements.iter().map(|i| i.name.clone()).collect();
        statements.extend(index_statements.into_iter().map(|i| PlannedStatement {
            stage: RebuildStage::RecreateIndexes,
            statement: i.statement,
        }));

        let triggers = schema.triggers.iter().map(|t| t.name.clone()).collect();
        statements.extend(schema.triggers.iter().map(|t| PlannedStatement {
            stage: RebuildStage::RecreateTriggers,
            statement: Statement::from_string(backend, t.sql.clone()),
        }));

        Ok(Self {
            table: schema.name.clone(),
            scratch: scratch_name,
            columns,
            statements,
            indexes,
            triggers,
        })
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements
            .iter()
            .map(|s| s.statement.sql.clone())
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            table: self.table.clone(),
            scratch: self.scratch.clone(),
            columns: self.columns.clone(),
            statements: self.sql(),
        }
    }
}
