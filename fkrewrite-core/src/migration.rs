//! `sea_orm_migration` adapter
//!
//! Lets a [`ConstraintRewrite`] sit in an ordinary sea-orm `Migrator` next to
//! versioned migrations. The migrator records the step as applied, but the
//! step itself never relies on that record.

use sea_orm_migration::prelude::*;
use tracing::warn;

use crate::rewrite::ConstraintRewrite;
use crate::runner::FailurePolicy;

pub struct RewriteMigration {
    step: ConstraintRewrite,
    policy: FailurePolicy,
}

impl RewriteMigration {
    pub fn new(step: ConstraintRewrite) -> Self {
        Self {
            step,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl MigrationName for RewriteMigration {
    fn name(&self) -> &str {
        self.step.name()
    }
}

#[async_trait::async_trait]
impl MigrationTrait for RewriteMigration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        match self.step.upgrade(db).await {
            Ok(_) => Ok(()),
            Err(e) => match self.policy {
                FailurePolicy::Abort => Err(DbErr::Migration(format!(
                    "{}: {}",
                    self.step.name(),
                    e
                ))),
                FailurePolicy::Continue => {
                    warn!("Migration {} failed, continuing: {}", self.step.name(), e);
                    Ok(())
                }
            },
        }
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        self.step
            .downgrade(db)
            .await
            .map_err(|e| DbErr::Migration(e.to_string()))
    }
}
