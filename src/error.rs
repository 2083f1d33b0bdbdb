//! Error taxonomy for loading, marshaling and invoking kernels.

use std::any::Any;
use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Debug, Error)]
pub enum BenchError {
    /// The external allocator could not provide a matrix buffer.
    #[error("external allocator exhausted while allocating a {size}x{size} matrix")]
    Allocation { size: usize },

    /// A kernel's declared shape is not `(int, int**, int**, int**) -> void`.
    #[error("kernel `{name}` declares `{found}`, expected `{expected}`")]
    SignatureMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("matrix dimension must be positive, got {size}")]
    InvalidDimension { size: usize },

    #[error("{operand} is {rows}x{cols}, expected {size}x{size}")]
    DimensionMismatch {
        operand: &'static str,
        rows: usize,
        cols: usize,
        size: usize,
    },

    /// The kernel faulted inside the call. The fault is chained as the source.
    #[error("kernel `{name}` failed during execution")]
    KernelExecution {
        name: String,
        #[source]
        source: KernelFault,
    },

    #[error("failed to load kernel unit `{name}` from {path}")]
    UnitLoad {
        name: String,
        path: String,
        #[source]
        source: libloading::Error,
    },

    #[error("kernel `{0}` is already registered")]
    DuplicateKernel(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to serialize report: {0}")]
    Report(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fault raised on the far side of the kernel boundary.
#[derive(Debug)]
pub struct KernelFault {
    message: String,
}

impl KernelFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Builds a fault from a payload captured by `catch_unwind`.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "kernel unwound with a non-string payload".to_string()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for KernelFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for KernelFault {}

impl From<toml::de::Error> for BenchError {
    fn from(err: toml::de::Error) -> Self {
        BenchError::Config(err.to_string())
    }
}
