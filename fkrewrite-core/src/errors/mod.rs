//! Error types for the constraint-rewrite engine
//!
//! - **RewriteError**: everything a single rewrite step can fail with
//! - **RunError**: a runner stopped because a step failed under an aborting policy
//! - **DbErrorKind**: coarse categorisation of `sea_orm::DbErr` used in failure logs
//!
//! Skipping a rewrite because the table is already in its desired state is not
//! an error; it is reported through `RewriteOutcome::AlreadySatisfied`.

pub mod db_errors;
pub mod rewrite;
pub mod run;

pub use db_errors::DbErrorKind;
pub use rewrite::RewriteError;
pub use run::RunError;

/// Result type alias for rewrite operations
pub type RewriteResult<T> = Result<T, RewriteError>;
