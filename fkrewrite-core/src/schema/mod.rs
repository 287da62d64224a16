//! Catalog snapshots of a single table
//!
//! A [`TableSchema`] is captured from the live database at the start of every
//! rewrite and thrown away at the end. Nothing here is cached between runs:
//! later migrations may add or remove columns, and the snapshot must reflect
//! whatever the table looks like right now.

pub mod introspect;

pub use introspect::SchemaIntrospector;

use sea_orm::sea_query::ForeignKeyAction;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Action a foreign key takes on referencing rows when the parent row is
/// deleted or updated.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum ReferentialAction {
    #[default]
    #[serde(rename = "NO ACTION", alias = "no_action")]
    #[strum(to_string = "NO ACTION", serialize = "no_action")]
    NoAction,
    #[serde(rename = "CASCADE", alias = "cascade")]
    #[strum(to_string = "CASCADE")]
    Cascade,
    #[serde(rename = "SET NULL", alias = "set_null")]
    #[strum(to_string = "SET NULL", serialize = "set_null")]
    SetNull,
    #[serde(rename = "SET DEFAULT", alias = "set_default")]
    #[strum(to_string = "SET DEFAULT", serialize = "set_default")]
    SetDefault,
    #[serde(rename = "RESTRICT", alias = "restrict")]
    #[strum(to_string = "RESTRICT")]
    Restrict,
}

impl ReferentialAction {
    /// Parses the action text reported by `PRAGMA foreign_key_list`.
    ///
    /// SQLite reports `NO ACTION` for constraints declared without an action;
    /// anything unrecognised is treated the same way.
    pub fn from_catalog(value: &str) -> Self {
        value.trim().parse().unwrap_or_default()
    }
}

impl From<ReferentialAction> for ForeignKeyAction {
    fn from(action: ReferentialAction) -> Self {
        match action {
            ReferentialAction::NoAction => ForeignKeyAction::NoAction,
            ReferentialAction::Cascade => ForeignKeyAction::Cascade,
            ReferentialAction::SetNull => ForeignKeyAction::SetNull,
            ReferentialAction::SetDefault => ForeignKeyAction::SetDefault,
            ReferentialAction::Restrict => ForeignKeyAction::Restrict,
        }
    }
}

/// One column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    /// Zero-based physical position (`cid`)
    pub position: i32,
    pub name: String,
    /// Declared type exactly as written; SQLite allows it to be empty
    pub declared_type: String,
    pub not_null: bool,
    /// Default expression text, verbatim
    pub default_expr: Option<String>,
    pub is_primary_key: bool,
    /// 1-based position inside the primary key, 0 when not part of it
    pub pk_ordinal: i32,
}

/// One single-column foreign key as reported by `PRAGMA foreign_key_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyDescriptor {
    pub constraint_id: i32,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub on_update: ReferentialAction,
    pub on_delete: ReferentialAction,
}

/// How an index came to exist, from the `origin` column of `PRAGMA index_list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexOrigin {
    /// `CREATE INDEX`
    CreateIndex,
    /// A `UNIQUE` constraint in the table definition
    Unique,
    /// The automatic index backing a non-rowid primary key
    PrimaryKey,
}

impl IndexOrigin {
    pub fn from_catalog(origin: &str) -> Self {
        match origin {
            "u" => Self::Unique,
            "pk" => Self::PrimaryKey,
            _ => Self::CreateIndex,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub unique: bool,
    pub origin: IndexOrigin,
    /// Indexed column names in key order; `None` marks an expression term
    pub columns: Vec<Option<String>>,
    pub partial: bool,
    /// Stored `CREATE INDEX` text; absent for automatic indexes
    pub sql: Option<String>,
}

impl IndexDescriptor {
    /// Plain column list, or `None` if any key term is an expression
    pub fn column_names(&self) -> Option<Vec<&str>> {
        self.columns.iter().map(|c| c.as_deref()).collect()
    }

    pub fn references_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.as_deref() == Some(column))
    }
}

/// A trigger attached to the table; `DROP TABLE` removes it with the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerDescriptor {
    pub name: String,
    pub sql: String,
}

/// Snapshot of one table's shape at introspection time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    /// Ordered by physical position
    pub columns: Vec<ColumnDescriptor>,
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
    pub triggers: Vec<TriggerDescriptor>,
    /// Rowid alias declared with `AUTOINCREMENT`
    pub autoincrement: bool,
    /// `CREATE TABLE` text stored in `sqlite_master`
    pub create_sql: Option<String>,
    /// Definitions the catalog cannot describe well enough to reproduce
    pub unsupported: Vec<String>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn foreign_key_for(&self, column: &str) -> Option<&ForeignKeyDescriptor> {
        self.foreign_keys.iter().find(|fk| fk.from_column == column)
    }

    /// Primary key columns ordered by their position inside the key
    pub fn primary_key(&self) -> Vec<&ColumnDescriptor> {
        let mut pk: Vec<_> = self.columns.iter().filter(|c| c.is_primary_key).collect();
        pk.sort_by_key(|c| c.pk_ordinal);
        pk
    }
}

/// Declarative intent of one rewrite: which foreign key to fix and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteSpec {
    pub target_table: String,
    pub target_column: String,
    pub desired_on_delete: ReferentialAction,
    /// Indexes that must exist once the table is rebuilt
    pub required_indexes: Vec<IndexSpec>,
    /// Also recreate every explicit index the original table had
    pub preserve_existing_indexes: bool,
}

impl RewriteSpec {
    /// Intent with the default index `ix_<table>_<column>` on the target column.
    pub fn new(
        target_table: impl Into<String>,
        target_column: impl Into<String>,
        desired_on_delete: ReferentialAction,
    ) -> Self {
        let target_table = target_table.into();
        let target_column = target_column.into();
        let default_index = IndexSpec::on_column(&target_table, &target_column);

        Self {
            target_table,
            target_column,
            desired_on_delete,
            required_indexes: vec![default_index],
            preserve_existing_indexes: true,
        }
    }

    pub fn with_required_indexes(mut self, indexes: Vec<IndexSpec>) -> Self {
        self.required_indexes = indexes;
        self
    }

    pub fn preserve_existing_indexes(mut self, preserve: bool) -> Self {
        self.preserve_existing_indexes = preserve;
        self
    }

    /// Name of the scratch table the rebuild goes through
    pub fn scratch_table(&self) -> String {
        format!("{}{}", self.target_table, SCRATCH_SUFFIX)
    }
}

/// Suffix appended to the table name to form the scratch table
pub const SCRATCH_SUFFIX: &str = "_new";

/// An index that must exist after the rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn on_column(table: &str, column: &str) -> Self {
        Self {
            name: format!("ix_{}_{}", table, column),
            columns: vec![column.to_string()],
            unique: false,
        }
    }
}
