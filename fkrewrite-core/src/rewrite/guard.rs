//! Idempotency guard
//!
//! Nothing records whether a rewrite already ran. Instead the guard looks at the
//! introspected schema and decides whether there is anything left to do, which
//! makes every re-run after the first a read-only no-op.

use serde::Serialize;
use strum::Display;

use crate::schema::{ReferentialAction, RewriteSpec, TableSchema};

/// Why no rewrite is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SatisfiedReason {
    /// The foreign key already uses the desired delete action
    AlreadyDesired,
    /// The target column no longer exists
    ColumnMissing,
    /// The column exists but carries no foreign key
    ConstraintMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Satisfied(SatisfiedReason),
    Rewrite { current: ReferentialAction },
}

impl GuardDecision {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied(_))
    }
}

pub fn evaluate(schema: &TableSchema, spec: &RewriteSpec) -> GuardDecision {
    if schema.column(&spec.target_column).is_none() {
        return GuardDecision::Satisfied(SatisfiedReason::ColumnMissing);
    }

    match schema.foreign_key_for(&spec.target_column) {
        None => GuardDecision::Satisfied(SatisfiedReason::ConstraintMissing),
        Some(fk) if fk.on_delete == spec.desired_on_delete => {
            GuardDecision::Satisfied(SatisfiedReason::AlreadyDesired)
        }
        Some(fk) => GuardDecision::Rewrite {
            current: fk.on_delete,
        },
    }
}
