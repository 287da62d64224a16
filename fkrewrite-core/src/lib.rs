//! Idempotent, drift-tolerant rewriting of SQLite foreign key `ON DELETE`
//! actions.
//!
//! A [`rewrite::ConstraintRewrite`] introspects the live table, skips when the
//! constraint is already in the desired state, and otherwise rebuilds the table
//! through a scratch copy with every column, index and trigger carried over.

pub mod database;
pub mod errors;
#[cfg(feature = "migration")]
pub mod migration;
pub mod rewrite;
pub mod runner;
pub mod schema;

pub use errors::{RewriteError, RewriteResult, RunError};
pub use rewrite::{ConstraintRewrite, RewriteOutcome};
pub use runner::{FailurePolicy, MigrationRunner, MigrationStep, RunReport};
pub use schema::{ReferentialAction, RewriteSpec};
