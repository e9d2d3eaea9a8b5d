use thiserror::Error;

/// Validation failures for relay configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A stage must run at least one worker task.
    #[error("`task_count` cannot be zero: stage={0}")]
    TaskCountZero(String),
    /// Block commit needs a positive row threshold.
    #[error("`block_commit_rows` cannot be zero: stage={0}")]
    BlockCommitRowsZero(String),
    /// A pipeline must carry a non-empty name.
    #[error("pipeline `name` cannot be empty")]
    PipelineNameEmpty,
    /// A field carries a value outside its accepted range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue {
        field: String,
        constraint: String,
    },
}
