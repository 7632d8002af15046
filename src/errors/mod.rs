//! Error types for the graph-model runtime.
//!
//! Each failure domain has its own specific error type, avoiding generic
//! wrappers like `anyhow` or `Box<dyn Error>` for better error handling
//! and debugging. `ModelError` unifies them at the public API boundary.

mod input_validation_error;
mod model_error;
mod shape_error;

pub use input_validation_error::InputValidationError;
pub use model_error::{ConfigurationError, DataLoadError, ModelError, WeightBindingError};
pub use shape_error::ShapeError;

/// Result type alias for operations that may fail anywhere in the runtime.
pub type ModelResult<T> = std::result::Result<T, ModelError>;

/// Result type alias for shape-checked tensor and layer operations.
pub type ShapeResult<T> = std::result::Result<T, ShapeError>;
