//! Defines the error types for the parameter tree.
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("Parameter path '{path}' not found")]
    PathNotFound { path: String },
    #[error("Parameter '{path}' has no value before {instant}")]
    NoValueBeforeInstant { path: String, instant: NaiveDate },
    #[error("Parameter '{path}' expired before {instant}")]
    Expired { path: String, instant: NaiveDate },
    /// The path names a subtree where a value or scale was expected.
    #[error("Parameter path '{path}' is a subtree, not a value")]
    NotAValue { path: String },
    #[error("Parameter path '{path}' is not a subtree")]
    NotASubtree { path: String },
    #[error("Parameter path '{path}' is not a leaf")]
    NotALeaf { path: String },
    #[error("Parameter subtree '{path}' already has a child named '{name}'")]
    DuplicateChildName { path: String, name: String },
    #[error("Parameter '{path}' does not hold a {expected}")]
    TypeMismatch { path: String, expected: &'static str },
}
