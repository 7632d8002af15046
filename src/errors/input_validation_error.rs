//! Predict-time input validation errors.

use thiserror::Error;

/// Errors raised when the key set passed to `predict` does not match the
/// graph's declared input nodes. Raised before any per-run state is touched.
#[derive(Error, Debug)]
pub enum InputValidationError {
    #[error("predict call is missing a buffer for declared input {name}")]
    MissingInput { name: String },

    #[error("predict call provides a buffer for {name}, which is not a declared input")]
    UnexpectedInput { name: String },
}
