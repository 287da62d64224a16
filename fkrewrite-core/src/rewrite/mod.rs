//! Rewriting one foreign key's `ON DELETE` action by rebuilding its table

pub mod ddl;
pub mod guard;
pub mod indexes;
pub mod plan;
pub mod rebuild;
pub mod step;

pub use ddl::DdlSynthesizer;
pub use guard::{evaluate, GuardDecision, SatisfiedReason};
pub use indexes::{IndexRecreator, IndexStatement};
pub use plan::{PlanSummary, PlannedStatement, RewritePlan};
pub use rebuild::{RebuildOptions, RebuildReport, RebuildStage, TableRebuilder};
pub use step::{ConstraintRewrite, PlanPreview, RewriteOutcome};
