//! Error types for the node state store.

use std::fmt;
use thiserror::Error;

/// The four per-node entity kinds kept by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    NodeInfo,
    Statistics,
    Status,
    Neighbours,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::NodeInfo => "nodeinfo",
            EntityKind::Statistics => "statistics",
            EntityKind::Status => "status",
            EntityKind::Neighbours => "neighbours",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// Expected condition: nothing stored for this id.
    #[error("node {node_id} has no {kind}")]
    NotFound { kind: EntityKind, node_id: String },

    #[error("unknown store engine '{0}'")]
    UnknownEngine(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn not_found(kind: EntityKind, node_id: &str) -> Self {
        StoreError::NotFound {
            kind,
            node_id: node_id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
