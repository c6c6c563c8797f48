//! Error types raised while declaring resources.
//!
//! These are author errors: a bad filter expression, a duplicate action
//! name, a generic action registered without a model store. They surface
//! when a resource is declared or wired, never per request.

use thiserror::Error;

/// Errors raised while validating a resource declaration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
    /// A filter expression named an operator outside the closed operator set.
    #[error("unknown filter operator `{operator}` in expression `{expression}`")]
    UnknownOperator {
        expression: String,
        operator: String,
    },

    /// A filter expression named a field the model does not expose.
    #[error("unknown filter field `{field}`")]
    UnknownField { field: String },

    /// A `between` filter was given something other than a two-element sequence.
    #[error("filter `{field}__between` expects a two-element sequence")]
    BadBetweenValue { field: String },

    /// Two actions were registered under the same name.
    #[error("duplicate action `{name}` on resource `{resource}`")]
    DuplicateAction {
        resource: String,
        name: String,
    },

    /// A model-backed generic action was registered on a resource without a store.
    #[error("action `{name}` on resource `{resource}` requires a model store")]
    MissingStore {
        resource: String,
        name: String,
    },
}

/// Raised when a resource that never declared a gRPC service name is
/// asked to produce a servicer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("resource `{resource}` does not declare a gRPC service name")]
pub struct ServicerNotFound {
    pub resource: String,
}

/// Raised when a `list` action returns a singular value where a sequence
/// or lazy query was required.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("`{action}` must return a sequence or lazy query, got a singular value")]
pub struct ReturnTypeError {
    pub action: String,
}

impl ReturnTypeError {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
        }
    }
}
