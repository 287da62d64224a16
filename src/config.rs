use std::fs;
use std::path::Path;

use fkrewrite::rewrite::{ConstraintRewrite, RebuildOptions};
use fkrewrite::runner::{FailurePolicy, MigrationRunner};
use fkrewrite::schema::{IndexSpec, ReferentialAction, RewriteSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid rewrite #{index}: {reason}")]
    InvalidRewrite { index: usize, reason: String },
}

/// Run configuration loaded from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteConfig {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_true")]
    pub transactional: bool,
    pub rewrites: Vec<RewriteEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteEntry {
    /// Step name; defaults to `<table>.<column>_on_delete_<action>`
    #[serde(default)]
    pub name: Option<String>,
    pub table: String,
    pub column: String,
    pub on_delete: ReferentialAction,
    /// Replaces the default `ix_<table>_<column>` index when given
    #[serde(default)]
    pub indexes: Option<Vec<IndexSpec>>,
    #[serde(default = "default_true")]
    pub preserve_existing_indexes: bool,
}

fn default_true() -> bool {
    true
}

impl RewriteConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (index, entry) in self.rewrites.iter().enumerate() {
            if entry.table.trim().is_empty() || entry.column.trim().is_empty() {
                return Err(ConfigError::InvalidRewrite {
                    index,
                    reason: "table and column are required".to_string(),
                });
            }
            for spec in entry.indexes.iter().flatten() {
                if spec.columns.is_empty() {
                    return Err(ConfigError::InvalidRewrite {
                        index,
                        reason: format!("index '{}' has no columns", spec.name),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn steps(&self) -> Vec<ConstraintRewrite> {
        let options = RebuildOptions {
            transactional: self.transactional,
        };
        self.rewrites
            .iter()
            .map(|entry| {
                let step = ConstraintRewrite::new(entry.spec()).with_options(options);
                match &entry.name {
                    Some(name) => step.with_name(name),
                    None => step,
                }
            })
            .collect()
    }

    pub fn runner(&self) -> MigrationRunner {
        self.steps()
            .into_iter()
            .fold(MigrationRunner::new(self.failure_policy), |runner, step| {
                runner.with_step(step)
            })
    }
}

impl RewriteEntry {
    pub fn spec(&self) -> RewriteSpec {
        let spec = RewriteSpec::new(&self.table, &self.column, self.on_delete)
            .preserve_existing_indexes(self.preserve_existing_indexes);
        match &self.indexes {
            Some(indexes) => spec.with_required_indexes(indexes.clone()),
            None => spec,
        }
    }
}
