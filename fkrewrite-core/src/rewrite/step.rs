//! One constraint rewrite as a migration step: recover, guard, rebuild.

use sea_orm::{ConnectionTrait, TransactionTrait};
use serde::Serialize;
use tracing::{error, info, warn};

use super::guard::{self, GuardDecision, SatisfiedReason};
use super::plan::RewritePlan;
use super::rebuild::{RebuildOptions, RebuildReport, TableRebuilder};
use crate::errors::{RewriteError, RewriteResult};
use crate::schema::{ReferentialAction, RewriteSpec, SchemaIntrospector, TableSchema};

/// Result of a successful upgrade
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RewriteOutcome {
    /// Nothing to do; the database was not touched
    AlreadySatisfied { reason: SatisfiedReason },
    /// The table was rebuilt with the desired action
    Rewritten {
        previous: ReferentialAction,
        report: RebuildReport,
    },
    /// An interrupted rebuild was completed from its scratch table
    Recovered { indexes: Vec<String> },
}

/// What an upgrade would do, without doing it
#[derive(Debug, Clone)]
pub enum PlanPreview {
    Skip(SatisfiedReason),
    Rewrite {
        previous: ReferentialAction,
        plan: RewritePlan,
    },
    Recover { scratch: String },
}

/// One foreign key action rewrite, usable standalone or as a runner step.
#[derive(Debug, Clone)]
pub struct ConstraintRewrite {
    name: String,
    spec: RewriteSpec,
    rebuilder: TableRebuilder,
}

impl ConstraintRewrite {
    pub fn new(spec: RewriteSpec) -> Self {
        let name = format!(
            "{}.{}_on_delete_{}",
            spec.target_table,
            spec.target_column,
            spec.desired_on_delete.as_ref().to_lowercase().replace(' ', "_")
        );
        Self {
            name,
            spec,
            rebuilder: TableRebuilder::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_options(mut self, options: RebuildOptions) -> Self {
        self.rebuilder = TableRebuilder::new(options);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &RewriteSpec {
        &self.spec
    }

    /// Brings the foreign key to the desired action.
    ///
    /// Safe to call any number of times: once the catalog reports the
    /// desired action, later calls read the schema and return
    /// [`RewriteOutcome::AlreadySatisfied`].
    pub async fn upgrade<C>(&self, db: &C) -> RewriteResult<RewriteOutcome>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let result = self.apply(db).await;
        match &result {
            Ok(RewriteOutcome::AlreadySatisfied { reason }) => {
                info!("Skipping {}: {}", self.name, reason)
            }
            Ok(RewriteOutcome::Rewritten { previous, report }) => info!(
                "Fixed {}: ON DELETE {} -> {}, {} rows copied",
                self.name, previous, self.spec.desired_on_delete, report.rows_copied
            ),
            Ok(RewriteOutcome::Recovered { .. }) => {
                info!("Recovered {} from an interrupted rebuild", self.name)
            }
            Err(e) => error!("Failed {}: {}", self.name, e),
        }
        result
    }

    async fn apply<C>(&self, db: &C) -> RewriteResult<RewriteOutcome>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        let introspector = SchemaIntrospector::new(db);
        let table = &self.spec.target_table;
        let scratch = self.spec.scratch_table();

        if !introspector.table_exists(table).await? {
            if !introspector.table_exists(&scratch).await? {
                return Err(RewriteError::SchemaNotFound(table.clone()));
            }
            warn!(
                "'{}' is missing but '{}' exists; completing the interrupted rebuild",
                table, scratch
            );
            let indexes = self.rebuilder.complete_interrupted(db, &self.spec).await?;
            let schema = introspector.describe_table(table).await?;
            return match guard::evaluate(&schema, &self.spec) {
                GuardDecision::Satisfied(_) => Ok(RewriteOutcome::Recovered { indexes }),
                GuardDecision::Rewrite { current } => self.rewrite(db, &schema, current).await,
            };
        }

        let schema = introspector.describe_table(table).await?;
        match guard::evaluate(&schema, &self.spec) {
            GuardDecision::Satisfied(reason) => {
                if introspector.table_exists(&scratch).await? {
                    warn!("Leftover scratch table '{}' found next to '{}'", scratch, table);
                }
                Ok(RewriteOutcome::AlreadySatisfied { reason })
            }
            GuardDecision::Rewrite { current } => self.rewrite(db, &schema, current).await,
        }
    }

    async fn rewrite<C>(
        &self,
        db: &C,
        schema: &TableSchema,
        previous: ReferentialAction,
    ) -> RewriteResult<RewriteOutcome>
    where
        C: ConnectionTrait + TransactionTrait,
    {
        if !schema.unsupported.is_empty() {
            return Err(RewriteError::UnsupportedTable {
                table: schema.name.clone(),
                reasons: schema.unsupported.clone(),
            });
        }

        let plan = RewritePlan::build(schema, &self.spec, db.get_database_backend())?;
        let report = self.rebuilder.execute(db, &plan).await?;
        Ok(RewriteOutcome::Rewritten { previous, report })
    }

    /// Dry run: introspects and builds the statement list without executing it.
    pub async fn plan<C>(&self, db: &C) -> RewriteResult<PlanPreview>
    where
        C: ConnectionTrait,
    {
        let introspector = SchemaIntrospector::new(db);
        let table = &self.spec.target_table;

        if !introspector.table_exists(table).await? {
            let scratch = self.spec.scratch_table();
            if introspector.table_exists(&scratch).await? {
                return Ok(PlanPreview::Recover { scratch });
            }
            return Err(RewriteError::SchemaNotFound(table.clone()));
        }

        let schema = introspector.describe_table(table).await?;
        match guard::evaluate(&schema, &self.spec) {
            GuardDecision::Satisfied(reason) => Ok(PlanPreview::Skip(reason)),
            GuardDecision::Rewrite { current } => {
                if !schema.unsupported.is_empty() {
                    return Err(RewriteError::UnsupportedTable {
                        table: schema.name.clone(),
                        reasons: schema.unsupported.clone(),
                    });
                }
                let plan = RewritePlan::build(&schema, &self.spec, db.get_database_backend())?;
                Ok(PlanPreview::Rewrite {
                    previous: current,
                    plan,
                })
            }
        }
    }

    /// Logged no-op; the rewritten action stays in place.
    pub async fn downgrade<C>(&self, _db: &C) -> RewriteResult<()>
    where
        C: ConnectionTrait,
    {
        info!(
            "Downgrade of {} skipped: ON DELETE {} is kept",
            self.name, self.spec.desired_on_delete
        );
        Ok(())
    }
}
