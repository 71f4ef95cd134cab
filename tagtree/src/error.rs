use crate::node::NodeId;
use crate::value::TagKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TagTreeError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Operation '{op}' is not permitted on '{path}'")]
    NotPermitted { op: &'static str, path: String },

    #[error("Name conflict: '{name}' already exists in '{parent}'")]
    NameConflict { name: String, parent: String },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: TagKind, actual: TagKind },

    #[error("Index out of range: {index} (len {len})")]
    OutOfRange { index: isize, len: usize },

    #[error("A name is required to insert into '{0}'")]
    MissingName(String),

    #[error("Clipboard is empty")]
    ClipboardEmpty,

    #[error("Decode error in {path}: {message}")]
    Decode { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("{0}")]
    Other(String),
}

impl TagTreeError {
    /// The caller invoked an operation whose capability gate was false.
    pub fn is_capability_violation(&self) -> bool {
        matches!(self, TagTreeError::NotPermitted { .. })
    }

    /// The operation was permitted but its arguments broke a tree constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            TagTreeError::NameConflict { .. }
                | TagTreeError::TypeMismatch { .. }
                | TagTreeError::OutOfRange { .. }
                | TagTreeError::MissingName(_)
                | TagTreeError::ClipboardEmpty
        )
    }

    /// Failure reported by the storage collaborator while decoding or encoding.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            TagTreeError::Io(_)
                | TagTreeError::Yaml(_)
                | TagTreeError::Json(_)
                | TagTreeError::Decode { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TagTreeError>;
