use thiserror::Error;

use super::rewrite::RewriteError;

/// A migration run stopped early
#[derive(Error, Debug)]
pub enum RunError {
    /// A step failed and the runner's policy is to abort
    #[error("Migration step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: RewriteError,
    },
}
