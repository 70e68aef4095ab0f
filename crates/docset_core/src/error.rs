//! Error types for the recordset engine.

use crate::security::Operation;
use docset_store::{DocumentId, StoreError};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A value failed a field's coercion or constraint.
    #[error("invalid value for {model}.{field}: {message}")]
    Validation {
        /// Model owning the field.
        model: String,
        /// Field name.
        field: String,
        /// Description of the failure.
        message: String,
    },

    /// A required field was missing or null.
    #[error("{model}.{field} is required")]
    Required {
        /// Model owning the field.
        model: String,
        /// Field name.
        field: String,
    },

    /// The store rejected a write on a unique index.
    #[error("uniqueness violation on {collection}.{index}: {key}")]
    Uniqueness {
        /// Collection the write targeted.
        collection: String,
        /// Violated index.
        index: String,
        /// Rendered key that collided.
        key: String,
    },

    /// A `RESTRICT` relation blocked an unlink.
    #[error("cannot delete {model}: still referenced by {referencing_model}.{field}")]
    DeletionConstraint {
        /// Model whose documents were being deleted.
        model: String,
        /// Model holding the reference.
        referencing_model: String,
        /// Referencing field.
        field: String,
    },

    /// The actor may not perform the operation.
    #[error("access denied: {operation} on {model} for actor {actor}")]
    Access {
        /// Target model.
        model: String,
        /// Attempted operation.
        operation: Operation,
        /// Acting user.
        actor: DocumentId,
    },

    /// No model is registered under this name.
    #[error("unknown model: {name}")]
    UnknownModel {
        /// The requested name.
        name: String,
    },

    /// The model has no field with this name.
    #[error("unknown field {model}.{field}")]
    UnknownField {
        /// Model searched.
        model: String,
        /// The requested field.
        field: String,
    },

    /// Registry construction failed.
    #[error("registry error: {message}")]
    Registry {
        /// Description of the problem.
        message: String,
    },

    /// A value could not be read as a document identifier.
    #[error("invalid identifier: {value}")]
    InvalidId {
        /// The rejected input.
        value: String,
    },

    /// An argument had the wrong shape.
    #[error("type error: {message}")]
    Type {
        /// Description of the problem.
        message: String,
    },

    /// A singleton was required.
    #[error("expected a single {model} record, found {count}")]
    EnsureOne {
        /// Model of the recordset.
        model: String,
        /// Number of records actually resolved.
        count: usize,
    },

    /// A DLS query expression failed to parse or evaluate.
    #[error("expression error: {message}")]
    Expression {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Store failure, propagated unmodified.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey {
                collection,
                index,
                key,
            } => Self::Uniqueness {
                collection,
                index,
                key,
            },
            StoreError::InvalidId { value } => Self::InvalidId { value },
            other => Self::Store(other),
        }
    }
}

impl EngineError {
    /// Creates a validation error.
    pub fn validation(
        model: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            model: model.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a missing-required-value error.
    pub fn required(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Required {
            model: model.into(),
            field: field.into(),
        }
    }

    /// Creates an unknown field error.
    pub fn unknown_field(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            model: model.into(),
            field: field.into(),
        }
    }

    /// Creates a registry error.
    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    /// Creates a type error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type {
            message: message.into(),
        }
    }

    /// Creates an expression error.
    pub fn expression(message: impl Into<String>) -> Self {
        Self::Expression {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for field-level validation failures.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::Required { .. })
    }

    /// Returns true for access denials.
    #[must_use]
    pub fn is_access(&self) -> bool {
        matches!(self, Self::Access { .. })
    }

    /// Returns true for unique index violations.
    #[must_use]
    pub fn is_uniqueness(&self) -> bool {
        matches!(self, Self::Uniqueness { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_becomes_uniqueness() {
        let err: EngineError = StoreError::DuplicateKey {
            collection: "rel".into(),
            index: "a_id+b_id".into(),
            key: "[1,2]".into(),
        }
        .into();
        assert!(err.is_uniqueness());
    }

    #[test]
    fn other_store_errors_pass_through() {
        let err: EngineError = StoreError::Locked.into();
        assert!(matches!(err, EngineError::Store(StoreError::Locked)));
    }

    #[test]
    fn required_is_a_validation_error() {
        let err = EngineError::required("res.person", "name");
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "res.person.name is required");
    }

    #[test]
    fn access_error_names_model_operation_and_actor() {
        let err = EngineError::Access {
            model: "base.user".into(),
            operation: Operation::Read,
            actor: DocumentId::NIL,
        };
        let text = err.to_string();
        assert!(text.contains("read"));
        assert!(text.contains("base.user"));
        assert!(err.is_access());
    }
}
