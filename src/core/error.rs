//! Error types and handling for the graph store
//!
//! Every failure the service can surface maps to a stable error code and an
//! HTTP-equivalent status, so the API layer renders them without guessing.

use serde::Serialize;
use thiserror::Error;

use crate::graph::events::QueueError;
use crate::storage::StorageError;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, GraphError>;

/// Main error type for the graph store
#[derive(Error, Debug)]
pub enum GraphError {
    /// Id suffix does not match any registered type code
    #[error("Incorrect object ID '{0}'")]
    IncorrectObjectId(String),

    /// Type name is not registered in the graph config
    #[error("Incorrect object type '{0}'")]
    IncorrectObjectType(String),

    /// Request did not carry an object type at all
    #[error("Unknown object type")]
    UnknownObjectType,

    /// Edge name is not declared for the source type
    #[error("Unknown edge {src}/{edge}")]
    UnknownEdge {
        /// Source object id
        src: String,
        /// Edge name
        edge: String,
    },

    /// Destination type is not listed in the edge's `contains`
    #[error("Unsupported destination object for edge '{src}/{edge}/{dst}'")]
    UnsupportedDestinationObject {
        /// Source object id
        src: String,
        /// Edge name
        edge: String,
        /// Destination object id
        dst: String,
    },

    /// Page size outside `0..=max`
    #[error("Incorrect count parameter. Count parameter must be between 0 and {max}")]
    IncorrectCountParameter {
        /// Configured maximum page size
        max: usize,
    },

    /// Schema validation failed
    #[error("{0}")]
    ObjectIsNotValid(String),

    /// Mutation attempted on a soft-deleted object
    #[error("Couldn't change deleted object")]
    ObjectDeleted,

    /// Edge with the same (src, name, dst) already exists
    #[error("Edge '{src}/{edge}/{dst}' already exists")]
    EdgeAlreadyExists {
        /// Source object id
        src: String,
        /// Edge name
        edge: String,
        /// Destination object id
        dst: String,
    },

    /// Another object already holds a unique value
    #[error("Unique constraint violated for '{field}'")]
    UniqueConstraintViolated {
        /// Field whose value is already reserved
        field: String,
    },

    /// Object is not stored
    #[error("Object '{0}' doesn't exist")]
    ObjectNotExists(String),

    /// Edge is not stored
    #[error("Edge '{src}/{edge}/{dst}' doesn't exist")]
    EdgeNotExists {
        /// Source object id
        src: String,
        /// Edge name
        edge: String,
        /// Destination object id
        dst: String,
    },

    /// Edge exists but its destination object does not
    #[error("Destination object doesn't exist for edge '{src}/{edge}/{dst}'")]
    DestinationObjectNotExists {
        /// Source object id
        src: String,
        /// Edge name
        edge: String,
        /// Destination object id
        dst: String,
    },

    /// Storage layer errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The mutation is committed but its event could not be published
    #[error("Event '{event_id}' persisted but not published: {source}")]
    Publish {
        /// Id of the persisted event
        event_id: String,
        /// Underlying queue failure
        source: QueueError,
    },

    /// Releasing a unique key during rollback failed; storage needs reconciliation
    #[error("Failed to release unique key '{key}' during rollback: {source}")]
    CompensationFailed {
        /// Key that is still reserved
        key: String,
        /// Underlying storage failure
        source: StorageError,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Client-facing error payload
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Stable error code
    pub code: &'static str,
    /// Human readable message
    pub message: String,
    /// HTTP status
    #[serde(skip)]
    pub status: u16,
}

impl GraphError {
    /// Create a validation error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::ObjectIsNotValid(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Stable code reported to clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::IncorrectObjectId(_) => "IncorrectObjectID",
            Self::IncorrectObjectType(_) => "IncorrectObjectType",
            Self::UnknownObjectType => "UnknownObjectType",
            Self::UnknownEdge { .. } => "UnknownEdge",
            Self::UnsupportedDestinationObject { .. } => "UnsupportedDestinationObject",
            Self::IncorrectCountParameter { .. } => "IncorrectCountParameter",
            Self::ObjectIsNotValid(_) => "ObjectIsNotValid",
            Self::ObjectDeleted => "ObjectDeleted",
            Self::EdgeAlreadyExists { .. } => "EdgeAlreadyExists",
            Self::UniqueConstraintViolated { .. } => "UniqueConstraintViolated",
            Self::ObjectNotExists(_) | Self::DestinationObjectNotExists { .. } => "ObjectNotExists",
            Self::EdgeNotExists { .. } => "EdgeNotExists",
            Self::Storage(_) => "StorageError",
            Self::Publish { .. } => "EventPublishFailed",
            Self::CompensationFailed { .. } => "CompensationFailed",
            Self::Config(_) => "ConfigurationError",
        }
    }

    /// HTTP status equivalent
    pub fn status(&self) -> u16 {
        if self.is_client_error() {
            400
        } else if self.is_not_found() {
            404
        } else if self.is_conflict() {
            409
        } else {
            500
        }
    }

    /// Check if this is a malformed-input error (400)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::IncorrectObjectId(_)
                | Self::IncorrectObjectType(_)
                | Self::UnknownObjectType
                | Self::UnknownEdge { .. }
                | Self::UnsupportedDestinationObject { .. }
                | Self::IncorrectCountParameter { .. }
                | Self::ObjectIsNotValid(_)
        )
    }

    /// Check if this is a conflict (409). Conflicts are never retried internally.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::ObjectDeleted | Self::EdgeAlreadyExists { .. } | Self::UniqueConstraintViolated { .. }
        )
    }

    /// Check if this is a not-found error (404)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ObjectNotExists(_) | Self::EdgeNotExists { .. } | Self::DestinationObjectNotExists { .. }
        )
    }

    /// Render the client payload
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
            status: self.status(),
        }
    }
}
