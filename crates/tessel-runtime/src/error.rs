//! Runtime errors

use thiserror::Error;

use tessel_ir::{FieldId, GlobalId, RelationId, SubsetId, TaskId};

/// Runtime result type
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("relation not found: {0}")]
    RelationNotFound(RelationId),

    #[error("field not found: {0}")]
    FieldNotFound(FieldId),

    #[error("subset not found: {0}")]
    SubsetNotFound(SubsetId),

    #[error("global not found: {0}")]
    GlobalNotFound(GlobalId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("assertion failed in task {task}")]
    AssertionFailed { task: TaskId },

    #[error("numeric error in task {task}: {message}")]
    Numeric { task: TaskId, message: String },

    #[error("insert overflow in relation {relation}: reserved {reserved} rows")]
    InsertOverflow { relation: RelationId, reserved: u64 },

    #[error("row {row} out of bounds for relation {relation}")]
    RowOutOfBounds { relation: RelationId, row: u64 },

    #[error("malformed task graph: {0}")]
    MalformedGraph(String),
}
