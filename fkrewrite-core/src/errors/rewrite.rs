use sea_orm::DbErr;
use thiserror::Error;

use super::db_errors::DbErrorKind;
use crate::rewrite::RebuildStage;

/// Failures of a single constraint rewrite
#[derive(Error, Debug)]
pub enum RewriteError {
    /// The target table does not exist in the catalog
    #[error("Table '{0}' not found")]
    SchemaNotFound(String),

    /// The table carries definitions the catalog cannot describe faithfully,
    /// so rebuilding it would silently drop them
    #[error("Table '{table}' cannot be rebuilt: {reasons:?}")]
    UnsupportedTable {
        table: String,
        reasons: Vec<String>,
    },

    /// The replacement DDL could not be built from the introspected schema
    #[error("Failed to synthesize DDL for '{table}': {reason}")]
    Synthesis { table: String, reason: String },

    /// A statement in the rebuild sequence failed
    #[error("Rebuild of '{table}' failed at {stage}: {source}")]
    RebuildFailure {
        table: String,
        stage: RebuildStage,
        #[source]
        source: DbErr,
    },

    /// The copy did not move every row into the scratch table
    #[error("Rebuild of '{table}' copied {copied} of {expected} rows")]
    RowCountMismatch {
        table: String,
        expected: u64,
        copied: u64,
    },

    /// `PRAGMA foreign_key_check` reported rows violating a constraint after the rebuild
    #[error("Rebuilt table '{table}' has {violations} foreign key violation(s)")]
    ForeignKeyViolation { table: String, violations: usize },

    /// Catalog access failed
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl RewriteError {
    pub fn rebuild(table: impl Into<String>, stage: RebuildStage, source: DbErr) -> Self {
        Self::RebuildFailure {
            table: table.into(),
            stage,
            source,
        }
    }

    /// True when the failure happened before any statement touched the table
    pub fn is_pre_rebuild(&self) -> bool {
        matches!(
            self,
            Self::SchemaNotFound(_)
                | Self::UnsupportedTable { .. }
                | Self::Synthesis { .. }
                | Self::Database(_)
        )
    }

    /// The stage at which a rebuild failure occurred, if any
    pub fn stage(&self) -> Option<RebuildStage> {
        match self {
            Self::RebuildFailure { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn db_kind(&self) -> Option<DbErrorKind> {
        match self {
            Self::RebuildFailure { source, .. } | Self::Database(source) => {
                Some(DbErrorKind::from_db_err(source))
            }
            _ => None,
        }
    }
}
