//! Versionless runner for rewrite steps
//!
//! Steps are plain values run in registration order on every start. There is
//! no applied-migrations table: each step decides from the live schema
//! whether it has anything to do.

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{RewriteError, RunError};
use crate::rewrite::{ConstraintRewrite, RewriteOutcome, SatisfiedReason};

/// What the runner does when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the failure and carry on with the next step
    #[default]
    Continue,
    /// Stop and return the failure
    Abort,
}

#[async_trait]
pub trait MigrationStep: Send + Sync {
    fn name(&self) -> &str;

    async fn upgrade(&self, db: &DatabaseConnection) -> Result<RewriteOutcome, RewriteError>;

    async fn downgrade(&self, db: &DatabaseConnection) -> Result<(), RewriteError>;
}

#[async_trait]
impl MigrationStep for ConstraintRewrite {
    fn name(&self) -> &str {
        ConstraintRewrite::name(self)
    }

    async fn upgrade(&self, db: &DatabaseConnection) -> Result<RewriteOutcome, RewriteError> {
        ConstraintRewrite::upgrade(self, db).await
    }

    async fn downgrade(&self, db: &DatabaseConnection) -> Result<(), RewriteError> {
        ConstraintRewrite::downgrade(self, db).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Skipped { reason: SatisfiedReason },
    Fixed { rows_copied: u64 },
    Recovered,
    Reverted,
    /// `retryable` is set when the database error is transient (locks,
    /// lost connections) and the next start can be expected to succeed
    Failed { error: String, retryable: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: String,
    #[serde(flatten)]
    pub status: StepStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed { .. }))
    }

    pub fn is_clean(&self) -> bool {
        self.failed().next().is_none()
    }

    pub fn status_of(&self, step: &str) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.status)
    }
}

impl From<&RewriteOutcome> for StepStatus {
    fn from(outcome: &RewriteOutcome) -> Self {
        match outcome {
            RewriteOutcome::AlreadySatisfied { reason } => StepStatus::Skipped { reason: *reason },
            RewriteOutcome::Rewritten { report, .. } => StepStatus::Fixed {
                rows_copied: report.rows_copied,
            },
            RewriteOutcome::Recovered { .. } => StepStatus::Recovered,
        }
    }
}

#[derive(Default)]
pub struct MigrationRunner {
    steps: Vec<Box<dyn MigrationStep>>,
    policy: FailurePolicy,
}

impl MigrationRunner {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            steps: Vec::new(),
            policy,
        }
    }

    pub fn with_step(mut self, step: impl MigrationStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step's upgrade in registration order.
    pub async fn run_upgrade(&self, db: &DatabaseConnection) -> Result<RunReport, RunError> {
        let mut report = RunReport::default();

        for step in &self.steps {
            let status = match step.upgrade(db).await {
                Ok(outcome) => StepStatus::from(&outcome),
                Err(e) => self.on_failure(step.name(), e)?,
            };
            report.steps.push(StepReport {
                step: step.name().to_string(),
                status,
            });
        }

        info!(
            "Upgrade finished: {} step(s), {} failed",
            report.steps.len(),
            report.failed().count()
        );
        Ok(report)
    }

    /// Runs every step's downgrade in reverse registration order.
    pub async fn run_downgrade(&self, db: &DatabaseConnection) -> Result<RunReport, RunError> {
        let mut report = RunReport::default();

        for step in self.steps.iter().rev() {
            let status = match step.downgrade(db).await {
                Ok(()) => StepStatus::Reverted,
                Err(e) => self.on_failure(step.name(), e)?,
            };
            report.steps.push(StepReport {
                step: step.name().to_string(),
                status,
            });
        }

        Ok(report)
    }

    fn on_failure(&self, step: &str, error: RewriteError) -> Result<StepStatus, RunError> {
        match self.policy {
            FailurePolicy::Abort => Err(RunError::StepFailed {
                step: step.to_string(),
                source: error,
            }),
            FailurePolicy::Continue => {
                let kind = error.db_kind();
                let retryable = kind.is_some_and(|k| k.is_retryable());
                warn!(
                    "Step {} failed{}{}, continuing (retryable: {}): {}",
                    step,
                    error
                        .stage()
                        .map(|s| format!(" at {}", s))
                        .unwrap_or_default(),
                    kind.map(|k| format!(" [{:?}]", k)).unwrap_or_default(),
                    retryable,
                    error
                );
                Ok(StepStatus::Failed {
                    error: error.to_string(),
                    retryable,
                })
            }
        }
    }
}
