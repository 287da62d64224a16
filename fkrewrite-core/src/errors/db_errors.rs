//! Database error categorisation
//!
//! Rebuild failures are logged with a coarse kind so an operator can tell a
//! locked database (retry after restart) from a schema problem (needs a fix).

use sea_orm::DbErr;

/// Categories of database errors seen while rewriting a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// Another connection holds a lock (`SQLITE_BUSY` / `SQLITE_LOCKED`)
    Locked,

    /// A referenced table, column or index does not exist
    MissingObject,

    /// An object with the same name already exists
    AlreadyExists,

    /// Unique, not-null or foreign key constraint violation
    ConstraintViolation,

    /// The statement text was rejected by the parser
    Syntax,

    /// Connection could not be acquired or was lost
    ConnectionError,

    /// Unknown/other database error
    Unknown,
}

impl DbErrorKind {
    pub fn from_db_err(err: &DbErr) -> Self {
        match err {
            DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => Self::ConnectionError,
            DbErr::Exec(_) | DbErr::Query(_) => Self::from_message(&err.to_string()),
            _ => Self::Unknown,
        }
    }

    fn from_message(msg: &str) -> Self {
        let msg = msg.to_lowercase();
        if msg.contains("database is locked") || msg.contains("database table is locked") {
            Self::Locked
        } else if msg.contains("no such table")
            || msg.contains("no such column")
            || msg.contains("no such index")
        {
            Self::MissingObject
        } else if msg.contains("already exists") {
            Self::AlreadyExists
        } else if msg.contains("constraint failed") || msg.contains("foreign key") {
            Self::ConstraintViolation
        } else if msg.contains("syntax error") {
            Self::Syntax
        } else {
            Self::Unknown
        }
    }

    /// Whether re-running the step later can reasonably succeed without a code change
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Locked | Self::ConnectionError)
    }
}
