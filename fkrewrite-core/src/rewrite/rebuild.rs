//! Executes a [`RewritePlan`] against a live connection
//!
//! SQLite cannot alter a foreign key in place. The table is rebuilt through a
//! scratch copy while foreign key enforcement is off, then checked with
//! `PRAGMA foreign_key_check` before the transaction commits. Only violations
//! the rebuild itself introduced fail the step; orphans that were already
//! there are logged and carried over.
//!
//! `PRAGMA foreign_keys` is a no-op inside a transaction and applies to one
//! connection only, so it is switched before `BEGIN`. A pool may run the
//! rebuild on a different connection, so enforcement is read again on the
//! connection that drops the original table and the step fails if it is still
//! on: that `DROP` would otherwise fire every `ON DELETE` action pointing at
//! the table.

use sea_orm::sea_query::{Alias, Expr, Query, Table};
use sea_orm::{ConnectionTrait, DbErr, ExecResult, Statement, TransactionTrait};
use serde::Serialize;
use strum::Display;
use tracing::{debug, info, warn};

use super::indexes::IndexRecreator;
use super::plan::RewritePlan;
use crate::errors::{RewriteError, RewriteResult};
use crate::schema::RewriteSpec;

/// Phase of the rebuild a statement belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RebuildStage {
    DropStaleScratch,
    CreateScratch,
    CopyRows,
    DropOriginal,
    RenameScratch,
    RecreateIndexes,
    RecreateTriggers,
    ForeignKeyCheck,
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RebuildOptions {
    /// Run the whole sequence inside one transaction
    pub transactional: bool,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self {
            transactional: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub rows_copied: u64,
    pub indexes: Vec<String>,
    pub triggers: Vec<String>,
    pub transactional: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TableRebuilder {
    options: RebuildOptions,
}

impl TableRebuilder {
    pub fn new(options: RebuildOptions) -> Self {
        Self { options }
    }

    pub async fn execute<C>(&self, db: &C, plan: &RewritePlan) -> RewriteResult<RebuildReport>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let enforced = pragma_enabled(db, "foreign_keys").await?;
        if enforced {
            set_pragma(db, "foreign_keys", false).await?;
        }

        let result = if self.options.transactional {
            let txn = db.begin().await?;
            match run_plan(&txn, plan).await {
                Ok(report) => txn
                    .commit()
                    .await
                    .map(|_| report)
                    .map_err(|e| RewriteError::rebuild(&plan.table, RebuildStage::Commit, e)),
                Err(err) => {
                    if let Err(rollback) = txn.rollback().await {
                        warn!("Rollback of '{}' rebuild failed: {}", plan.table, rollback);
                    }
                    Err(err)
                }
            }
        } else {
            warn!(
                "Rebuilding '{}' without a transaction; a failure can leave '{}' behind",
                plan.table, plan.scratch
            );
            run_plan(db, plan).await
        };

        if enforced {
            if let Err(e) = set_pragma(db, "foreign_keys", true).await {
                warn!("Failed to re-enable foreign key enforcement: {}", e);
                if result.is_ok() {
                    return Err(e.into());
                }
            }
        }

        result.map(|report| RebuildReport {
            transactional: self.options.transactional,
            ..report
        })
    }

    /// Finishes a rebuild that was interrupted between dropping the original
    /// table and renaming the scratch table: the scratch copy is the only
    /// surviving data, so it is renamed into place and the required indexes
    /// are recreated.
    pub async fn complete_interrupted<C>(
        &self,
        db: &C,
        spec: &RewriteSpec,
    ) -> RewriteResult<Vec<String>>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let backend = db.get_database_backend();
        let scratch = spec.scratch_table();
        let rename = backend.build(
            &Table::rename()
                .table(Alias::new(&scratch), Alias::new(&spec.target_table))
                .to_owned(),
        );
        let indexes = IndexRecreator::new(spec, backend).required();

        let txn = db.begin().await?;
        let outcome = async {
            rename_table(&txn, rename).await.map_err(|e| {
                RewriteError::rebuild(&spec.target_table, RebuildStage::RenameScratch, e)
            })?;
            for index in &indexes {
                debug!("{}", index.statement.sql);
                txn.execute(index.statement.clone()).await.map_err(|e| {
                    RewriteError::rebuild(&spec.target_table, RebuildStage::RecreateIndexes, e)
                })?;
            }
            Ok::<_, RewriteError>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                txn.commit().await.map_err(|e| {
                    RewriteError::rebuild(&spec.target_table, RebuildStage::Commit, e)
                })?;
                info!("Recovered '{}' from '{}'", spec.target_table, scratch);
                Ok(indexes.into_iter().map(|i| i.name).collect())
            }
            Err(err) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!("Rollback of '{}' recovery failed: {}", spec.target_table, rollback);
                }
                Err(err)
            }
        }
    }
}

async fn run_plan<C>(db: &C, plan: &RewritePlan) -> RewriteResult<RebuildReport>
where
    C: ConnectionTrait + TransactionTrait,
{
    let expected = count_rows(db, &plan.table)
        .await
        .map_err(|e| RewriteError::rebuild(&plan.table, RebuildStage::CopyRows, e))?;
    let existing_violations = foreign_key_violations(db, &plan.table)
        .await
        .map_err(|e| RewriteError::rebuild(&plan.table, RebuildStage::ForeignKeyCheck, e))?;
    if existing_violations > 0 {
        warn!(
            "'{}' already has {} foreign key violation(s); they are copied as they are",
            plan.table, existing_violations
        );
    }

    let mut rows_copied = 0;
    for planned in &plan.statements {
        debug!("[{}] {}", planned.stage, planned.statement.sql);
        let result = match planned.stage {
            RebuildStage::DropOriginal => {
                drop_original(db, &plan.table, planned.statement.clone()).await?
            }
            RebuildStage::RenameScratch => rename_table(db, planned.statement.clone())
                .await
                .map_err(|e| RewriteError::rebuild(&plan.table, planned.stage, e))?,
            _ => db
                .execute(planned.statement.clone())
                .await
                .map_err(|e| RewriteError::rebuild(&plan.table, planned.stage, e))?,
        };

        if planned.stage == RebuildStage::CopyRows {
            rows_copied = result.rows_affected();
            if rows_copied != expected {
                return Err(RewriteError::RowCountMismatch {
                    table: plan.table.clone(),
                    expected,
                    copied: rows_copied,
                });
            }
        }
    }

    let violations = foreign_key_violations(db, &plan.table)
        .await
        .map_err(|e| RewriteError::rebuild(&plan.table, RebuildStage::ForeignKeyCheck, e))?;
    if let Some(introduced) = introduced_violations(existing_violations, violations) {
        return Err(RewriteError::ForeignKeyViolation {
            table: plan.table.clone(),
            violations: introduced,
        });
    }

    Ok(RebuildReport {
        rows_copied,
        indexes: plan.indexes.clone(),
        triggers: plan.triggers.clone(),
        transactional: false,
    })
}

/// Number of violations the rebuild added on top of those found before it.
fn introduced_violations(before: usize, after: usize) -> Option<usize> {
    after.checked_sub(before).filter(|added| *added > 0)
}

/// Drops the original table inside its own (nested) transaction, so the
/// enforcement check and the `DROP` share one pooled connection.
async fn drop_original<C>(db: &C, table: &str, statement: Statement) -> RewriteResult<ExecResult>
where
    C: ConnectionTrait + TransactionTrait,
{
    let stage = RebuildStage::DropOriginal;
    let txn = db
        .begin()
        .await
        .map_err(|e| RewriteError::rebuild(table, stage, e))?;

    let outcome = async {
        if pragma_enabled(&txn, "foreign_keys").await? {
            return Err(DbErr::Custom(format!(
                "foreign key enforcement is on for the connection rebuilding '{}'; \
                 run the rewrite on a single-connection pool",
                table
            )));
        }
        txn.execute(statement).await
    }
    .await;

    match outcome {
        Ok(result) => {
            txn.commit()
                .await
                .map_err(|e| RewriteError::rebuild(table, stage, e))?;
            Ok(result)
        }
        Err(err) => {
            if let Err(rollback) = txn.rollback().await {
                warn!("Rollback of '{}' drop failed: {}", table, rollback);
            }
            Err(RewriteError::rebuild(table, stage, err))
        }
    }
}

/// Renames with `legacy_alter_table` on, so views and triggers elsewhere that
/// mention the dropped original are not re-parsed against a missing table.
async fn rename_table<C>(db: &C, statement: Statement) -> Result<ExecResult, DbErr>
where
    C: ConnectionTrait,
{
    let legacy = pragma_enabled(db, "legacy_alter_table").await?;
    if !legacy {
        set_pragma(db, "legacy_alter_table", true).await?;
    }
    let result = db.execute(statement).await;
    if !legacy {
        set_pragma(db, "legacy_alter_table", false).await?;
    }
    result
}

async fn count_rows<C>(db: &C, table: &str) -> Result<u64, DbErr>
where
    C: ConnectionTrait,
{
    let backend = db.get_database_backend();
    let query = Query::select()
        .expr_as(Expr::cust("COUNT(*)"), Alias::new("row_count"))
        .from(Alias::new(table))
        .to_owned();

    let count = match db.query_one(backend.build(&query)).await? {
        Some(row) => row.try_get::<i64>("", "row_count")?,
        None => 0,
    };
    Ok(u64::try_from(count).unwrap_or_default())
}

async fn foreign_key_violations<C>(db: &C, table: &str) -> Result<usize, DbErr>
where
    C: ConnectionTrait,
{
    let statement = Statement::from_string(
        db.get_database_backend(),
        format!("PRAGMA foreign_key_check({})", quote_identifier(table)),
    );
    let rows = db.query_all(statement).await?;
    for row in rows.iter().take(5) {
        let parent: String = row.try_get("", "parent").unwrap_or_default();
        let rowid: Option<i64> = row.try_get("", "rowid").unwrap_or_default();
        debug!(
            "Foreign key violation in '{}': rowid {:?} references missing '{}' row",
            table, rowid, parent
        );
    }
    Ok(rows.len())
}

pub(crate) async fn pragma_enabled<C>(db: &C, pragma: &str) -> Result<bool, DbErr>
where
    C: ConnectionTrait,
{
    let statement =
        Statement::from_string(db.get_database_backend(), format!("PRAGMA {}", pragma));
    match db.query_one(statement).await? {
        Some(row) => Ok(row.try_get::<i32>("", pragma)? != 0),
        None => Ok(false),
    }
}

pub(crate) async fn set_pragma<C>(db: &C, pragma: &str, enabled: bool) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let value = if enabled { "ON" } else { "OFF" };
    db.execute_unprepared(&format!("PRAGMA {} = {}", pragma, value))
        .await?;
    Ok(())
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
