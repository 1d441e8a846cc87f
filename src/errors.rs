//! Centralized error handling for pcmdi_metrics
//!
//! Every fallible library operation returns [`Result`], whose error type
//! [`PmpError`] carries enough context to tell which variable, dimension or
//! parameter was at fault.

use thiserror::Error;

/// Main error type for metrics computations
#[derive(Debug, Error)]
pub enum PmpError {
    /// NetCDF file operation errors
    #[error("NetCDF error: {0}")]
    NetCDF(#[from] netcdf::Error),

    /// I/O operation errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Array shape or dimension error
    #[error("Array error: {0}")]
    Array(#[from] ndarray::ShapeError),

    /// Variable not found in a NetCDF file
    #[error("Variable '{var}' not found in file")]
    VariableNotFound { var: String },

    /// Dimension not found in variable
    #[error("Dimension '{dim}' not found in variable '{var}'")]
    DimensionNotFound { var: String, dim: String },

    /// Two inputs that must be co-located have different shapes
    #[error("{context}: shapes differ, {left:?} vs {right:?}")]
    ShapeMismatch {
        context: String,
        left: Vec<usize>,
        right: Vec<usize>,
    },

    /// Statistics computation errors
    #[error("Statistics computation error: {0}")]
    Statistics(String),

    /// Invalid parameter value
    #[error(transparent)]
    Parameter(#[from] ParameterError),

    /// Unknown or malformed season name
    #[error("Invalid season: {0}")]
    InvalidSeason(String),

    /// Time axis decoding or calendar arithmetic failures
    #[error("Calendar error: {0}")]
    Calendar(String),

    /// EOF decomposition failures
    #[error("EOF analysis error: {0}")]
    Eof(String),

    /// Thread pool configuration error
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("{0}")]
    Generic(String),
}

/// Parameter validation errors.
///
/// `WrongType` is raised when an option holds a value of the wrong kind
/// (a list where a string is expected, and so on). `Unset` and
/// `InvalidValue` cover options that are present but unusable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("{name} is the wrong type. It must be {expected}.")]
    WrongType { name: String, expected: String },

    #[error("{name} cannot be None. It must be either True or False.")]
    Unset { name: String },

    #[error("{name} has an invalid value: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl From<String> for PmpError {
    fn from(error: String) -> Self {
        PmpError::Generic(error)
    }
}

impl From<&str> for PmpError {
    fn from(error: &str) -> Self {
        PmpError::Generic(error.to_string())
    }
}

/// Result type alias for metrics operations
pub type Result<T> = std::result::Result<T, PmpError>;
