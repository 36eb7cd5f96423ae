// src/error.rs

use std::fmt;

use thiserror::Error;

/// What kind of entity an id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Node,
    Edge,
    Document,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Node => write!(f, "node"),
            EntityKind::Edge => write!(f, "edge"),
            EntityKind::Document => write!(f, "document"),
        }
    }
}

/// Every failure the library reports.
///
/// Mutation errors (`NotFound`, `InvalidConnection`, `DuplicateId`) are only
/// returned after the controller has verified nothing was changed.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("malformed document: {0}")]
    Schema(String),

    #[error("invalid color: {0}")]
    InvalidColor(String),

    #[error("{kind} `{id}` not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    #[error("duplicate {kind} id `{id}`")]
    DuplicateId { kind: EntityKind, id: String },

    #[error("transport error: {message}")]
    Transport { status: Option<u16>, message: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FlowError {
    pub fn node_not_found(id: impl Into<String>) -> Self {
        FlowError::NotFound { kind: EntityKind::Node, id: id.into() }
    }

    pub fn edge_not_found(id: impl Into<String>) -> Self {
        FlowError::NotFound { kind: EntityKind::Edge, id: id.into() }
    }

    /// Map a backing store rejection onto the taxonomy: a 400 is the caller's
    /// payload being wrong, anything else is a transport level failure.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 400 {
            FlowError::Validation(message)
        } else {
            FlowError::Transport { status: Some(status), message }
        }
    }

    /// HTTP status attached to a transport failure, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FlowError::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FlowError {
    fn from(err: reqwest::Error) -> Self {
        FlowError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            FlowError::from_status(400, "Flow data is required"),
            FlowError::Validation(_)
        ));

        let err = FlowError::from_status(403, "forbidden");
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.to_string(), "transport error: forbidden");
    }

    #[test]
    fn test_not_found_display() {
        assert_eq!(FlowError::node_not_found("n1").to_string(), "node `n1` not found");
        assert_eq!(FlowError::edge_not_found("e1").to_string(), "edge `e1` not found");
    }
}
